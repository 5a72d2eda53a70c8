//! Run metadata written next to the data file.
//!
//! The data file itself has a fixed two-column layout, so anything that
//! describes the run (which unit, which source level, whether the run was cut
//! short) goes into a `run_metadata.json` sidecar instead.

use crate::config::Settings;
use crate::error::AppResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunMetadata {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub instrument_idn: Option<String>,
    pub resource: String,
    pub prototype: String,
    pub spacing: String,
    pub sensor: String,
    pub toggle_voltage: f64,
    pub settle_secs: f64,
    pub duration_secs: f64,
    pub compliance_amps: f64,
    pub sample_count: usize,
    pub cancelled: bool,
    /// Error that ended the loop early, if any
    pub error: Option<String>,
    pub software_version: String,
}

impl RunMetadata {
    pub fn new(settings: &Settings, started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            instrument_idn: None,
            resource: settings.instrument.resource.clone(),
            prototype: settings.output.prototype.clone(),
            spacing: settings.output.spacing.clone(),
            sensor: settings.output.sensor.clone(),
            toggle_voltage: settings.acquisition.toggle_voltage,
            settle_secs: settings.acquisition.settle_secs,
            duration_secs: settings.acquisition.duration_secs,
            compliance_amps: settings.instrument.compliance_amps,
            sample_count: 0,
            cancelled: false,
            error: None,
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn write_to(&self, path: &Path) -> AppResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_from_settings() {
        let settings = Settings::default();
        let meta = RunMetadata::new(&settings, Utc::now());
        assert_eq!(meta.resource, "ASRL5::INSTR");
        assert_eq!(meta.toggle_voltage, 3.0);
        assert_eq!(meta.sample_count, 0);
        assert!(!meta.cancelled);
    }

    #[test]
    fn test_metadata_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_metadata.json");
        let mut meta = RunMetadata::new(&Settings::default(), Utc::now());
        meta.sample_count = 12;
        meta.cancelled = true;
        meta.write_to(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: RunMetadata = serde_json::from_str(&text).unwrap();
        assert_eq!(back.sample_count, 12);
        assert!(back.cancelled);
    }
}
