//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to
//! handle the different things that can go wrong during a run, from loading
//! settings to talking to the source-measure unit and writing results.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps errors from `figment`, typically TOML syntax or type
//!   mismatches in the settings file or `SMDAQ_` environment overrides.
//! - **`Configuration`**: Semantic errors in settings that parse correctly but
//!   make no sense (a negative settle delay, an empty resource address).
//! - **`Io`**, **`Csv`**, **`Image`**: Output target failures.
//! - **`Instrument`**, **`SerialTimeout`**, **`SerialUnexpectedEof`**: Transport
//!   failures while opening the port or exchanging commands.
//! - **`Response`**: The instrument answered, but not with the comma separated
//!   numeric frame a measurement trigger is expected to produce.
//! - **`FeatureNotEnabled`**: Functionality compiled out via feature flags.
//! - **`ShutdownFailed`**: One or more teardown steps failed. Power-off is still
//!   attempted before this is reported.
//!
//! User cancellation is not an error: an interrupted run is a normal, shorter
//! run.

use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "storage_csv")]
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Instrument error: {0}")]
    Instrument(String),

    #[error("Serial read timeout after {0:?}")]
    SerialTimeout(std::time::Duration),

    #[error("Unexpected EOF from serial port")]
    SerialUnexpectedEof,

    #[error("Malformed measurement response: {0}")]
    Response(#[from] ResponseError),

    #[error("Sample at {elapsed}s arrived after one at {last}s")]
    OutOfOrderSample { last: f64, elapsed: f64 },

    #[error("Display error: {0}")]
    Display(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Shutdown failed: {}", join_errors(.0))]
    ShutdownFailed(Vec<DaqError>),
}

fn join_errors(errors: &[DaqError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

/// Why a raw measurement frame could not be turned into a current reading.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResponseError {
    #[error("response is not valid UTF-8")]
    NotUtf8,

    #[error("empty response")]
    Empty,

    #[error("field {index} ({field:?}) is not a number")]
    InvalidField { index: usize, field: String },

    #[error("expected at least 2 fields, got {count}")]
    MissingCurrentField { count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::Instrument("port busy".to_string());
        assert_eq!(err.to_string(), "Instrument error: port busy");
    }

    #[test]
    fn test_response_error_display() {
        let err = DaqError::from(ResponseError::InvalidField {
            index: 1,
            field: "abc".into(),
        });
        assert_eq!(
            err.to_string(),
            "Malformed measurement response: field 1 (\"abc\") is not a number"
        );
    }

    #[test]
    fn test_shutdown_failed_error() {
        let err = DaqError::ShutdownFailed(vec![
            DaqError::Display("window gone".into()),
            DaqError::Instrument("write failed".into()),
        ]);
        assert_eq!(
            err.to_string(),
            "Shutdown failed: Display error: window gone; Instrument error: write failed"
        );
    }
}
