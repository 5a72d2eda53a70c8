//! Parsing of `MEAS?` response frames.
//!
//! With the current-sense function and a voltage source selected, the 2400
//! series answers a measurement trigger with a comma separated list of
//! numbers, e.g.
//!
//! ```text
//! +3.000000E+00,+1.234560E-06,+9.910000E+37,+1.234000E+02,+1.994800E+04\r\n
//! ```
//!
//! The measured current is always the second field. The first field is not
//! interpreted.

use crate::error::ResponseError;

/// Index of the current reading in a measurement frame.
pub const CURRENT_FIELD: usize = 1;

/// Split a decoded response into numbers.
pub fn parse_fields(text: &str) -> Result<Vec<f64>, ResponseError> {
    let trimmed = text.trim_end_matches(['\r', '\n']);
    if trimmed.trim().is_empty() {
        return Err(ResponseError::Empty);
    }

    trimmed
        .split(',')
        .enumerate()
        .map(|(index, field)| {
            field
                .trim()
                .parse::<f64>()
                .map_err(|_| ResponseError::InvalidField {
                    index,
                    field: field.to_string(),
                })
        })
        .collect()
}

/// Extract the current reading from one raw response frame.
pub fn parse_current(raw: &[u8]) -> Result<f64, ResponseError> {
    let text = std::str::from_utf8(raw).map_err(|_| ResponseError::NotUtf8)?;
    let fields = parse_fields(text)?;
    fields
        .get(CURRENT_FIELD)
        .copied()
        .ok_or(ResponseError::MissingCurrentField {
            count: fields.len(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_keithley_frame() {
        let raw = b"+3.000000E+00,+1.234560E-06,+9.910000E+37,+1.234000E+02,+1.994800E+04\r\n";
        assert_eq!(parse_current(raw).unwrap(), 1.23456e-6);
    }

    #[test]
    fn test_second_field_regardless_of_first() {
        for first in ["0", "-7.5", "+9.91E+37", "1e300"] {
            let raw = format!("{first},2.5e-3\r\n");
            assert_eq!(parse_current(raw.as_bytes()).unwrap(), 2.5e-3);
        }
    }

    #[test]
    fn test_terminators_are_optional() {
        assert_eq!(parse_current(b"1,2").unwrap(), 2.0);
        assert_eq!(parse_current(b"1,2\n").unwrap(), 2.0);
    }

    #[test]
    fn test_single_field_is_missing_current() {
        assert_eq!(
            parse_current(b"+1.0E+00\r\n"),
            Err(ResponseError::MissingCurrentField { count: 1 })
        );
    }

    #[test]
    fn test_non_numeric_field() {
        assert_eq!(
            parse_current(b"1.0,OVERFLOW\r\n"),
            Err(ResponseError::InvalidField {
                index: 1,
                field: "OVERFLOW".into()
            })
        );
        // Any bad field fails the whole frame, even past the current
        assert!(matches!(
            parse_current(b"1.0,2.0,xx\r\n"),
            Err(ResponseError::InvalidField { index: 2, .. })
        ));
    }

    #[test]
    fn test_empty_and_binary_frames() {
        assert_eq!(parse_current(b"\r\n"), Err(ResponseError::Empty));
        assert_eq!(parse_current(b""), Err(ResponseError::Empty));
        assert_eq!(parse_current(&[0xff, 0xfe, b',']), Err(ResponseError::NotUtf8));
    }
}
