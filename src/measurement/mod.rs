//! Samples and the accumulated current-versus-time series.

pub mod response;

pub use response::{parse_current, parse_fields};

/// One recorded point: measured current and the time it was recorded at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Amperes
    pub current: f64,
    /// Seconds since the seed measurement
    pub elapsed: f64,
}

/// Append-only current/time series.
///
/// Currents and elapsed times are kept in two parallel vectors, which is the
/// shape the plotter and the writers consume. Both only grow through
/// [`Series::push`], so they always have the same length, and `push` refuses
/// an elapsed time earlier than the last one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Series {
    currents: Vec<f64>,
    elapsed: Vec<f64>,
}

impl Series {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a series from the seed measurement at elapsed time zero.
    pub fn seeded(current: f64) -> Self {
        let mut series = Self::new();
        series.currents.push(current);
        series.elapsed.push(0.0);
        series
    }

    /// Append a sample. Returns `false` (and records nothing) if `elapsed`
    /// would move the time axis backwards.
    #[must_use = "a rejected sample is not stored"]
    pub fn push(&mut self, sample: Sample) -> bool {
        if let Some(&last) = self.elapsed.last() {
            if sample.elapsed < last {
                return false;
            }
        }
        self.currents.push(sample.current);
        self.elapsed.push(sample.elapsed);
        true
    }

    pub fn len(&self) -> usize {
        self.currents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.currents.is_empty()
    }

    pub fn currents(&self) -> &[f64] {
        &self.currents
    }

    pub fn elapsed(&self) -> &[f64] {
        &self.elapsed
    }

    /// Elapsed time of the most recent sample.
    pub fn last_elapsed(&self) -> Option<f64> {
        self.elapsed.last().copied()
    }

    pub fn last(&self) -> Option<Sample> {
        Some(Sample {
            current: *self.currents.last()?,
            elapsed: *self.elapsed.last()?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Sample> + '_ {
        self.currents
            .iter()
            .zip(&self.elapsed)
            .map(|(&current, &elapsed)| Sample { current, elapsed })
    }
}
