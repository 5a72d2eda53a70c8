//! Run settings loaded with Figment.
//!
//! Settings are assembled once at startup, in increasing order of precedence:
//! 1. Built-in defaults (the bench setup this tool was written for)
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `SMDAQ_`
//!
//! Nested keys are separated by a double underscore:
//!
//! ```text
//! SMDAQ_INSTRUMENT__RESOURCE=/dev/ttyUSB0
//! SMDAQ_ACQUISITION__DURATION_SECS=60
//! SMDAQ_OUTPUT__ENABLED=true
//! ```
//!
//! The resulting [`Settings`] is validated and then passed by reference to
//! everything that needs it.

use crate::error::{AppResult, DaqError};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File used when `--config` is not given and the file exists.
pub const DEFAULT_CONFIG_PATH: &str = "config/sourcemeter.toml";

/// Top-level settings
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub instrument: InstrumentSettings,
    pub acquisition: AcquisitionSettings,
    pub output: OutputSettings,
    pub plot: PlotSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ApplicationSettings {
    /// Default tracing directive when `RUST_LOG` is unset
    pub log_level: String,
}

/// Serial link and fixed instrument configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InstrumentSettings {
    /// Serial port path or VISA serial resource (`ASRL5::INSTR`)
    pub resource: String,
    pub baud_rate: u32,
    /// Overall read timeout for one response frame
    pub timeout_ms: u64,
    /// Current protection limit sent as `:SENS:CURR:PROT`
    pub compliance_amps: f64,
    /// Wait after the identification query
    pub identify_settle_secs: f64,
    /// Wait after the configuration sequence
    pub configure_settle_secs: f64,
}

/// Voltage-toggle cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AcquisitionSettings {
    /// The loop keeps going while the last elapsed time is <= this
    pub duration_secs: f64,
    pub toggle_voltage: f64,
    /// Wait after each source level change
    pub settle_secs: f64,
}

/// Where (and whether) results are written
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputSettings {
    pub enabled: bool,
    pub root: PathBuf,
    pub prototype: String,
    pub spacing: String,
    pub sensor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlotSettings {
    pub live_width: u32,
    pub live_height: u32,
    pub final_width: u32,
    pub final_height: u32,
    pub major_tick_secs: f64,
    pub minor_tick_secs: f64,
    /// TTF/OTF font replacing the bundled label font
    pub font_path: Option<PathBuf>,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            resource: "ASRL5::INSTR".to_string(),
            baud_rate: 9600,
            timeout_ms: 2000,
            compliance_amps: 1.0,
            identify_settle_secs: 1.0,
            configure_settle_secs: 3.0,
        }
    }
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            duration_secs: 220.0,
            toggle_voltage: 3.0,
            settle_secs: 0.5,
        }
    }
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            root: PathBuf::from("."),
            prototype: "Moister_Prototype - Working keithley".to_string(),
            spacing: "Test".to_string(),
            sensor: "1".to_string(),
        }
    }
}

impl Default for PlotSettings {
    fn default() -> Self {
        Self {
            live_width: 640,
            live_height: 480,
            final_width: 1000,
            final_height: 500,
            major_tick_secs: 20.0,
            minor_tick_secs: 5.0,
            font_path: None,
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and `SMDAQ_` variables.
    ///
    /// With `path == None` the file at [`DEFAULT_CONFIG_PATH`] is used when it
    /// exists. An explicitly given path must exist.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(DaqError::Configuration(format!(
                        "Settings file '{}' does not exist",
                        path.display()
                    )));
                }
                figment = figment.merge(Toml::file(path));
            }
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    figment = figment.merge(Toml::file(default_path));
                }
            }
        }

        let settings: Settings = figment
            .merge(Env::prefixed("SMDAQ_").split("__"))
            .extract()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges after loading.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(DaqError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.instrument.resource.trim().is_empty() {
            return Err(DaqError::Configuration(
                "instrument.resource cannot be empty".to_string(),
            ));
        }
        if self.instrument.baud_rate == 0 {
            return Err(DaqError::Configuration(
                "instrument.baud_rate must be positive".to_string(),
            ));
        }
        if self.instrument.timeout_ms == 0 {
            return Err(DaqError::Configuration(
                "instrument.timeout_ms must be positive".to_string(),
            ));
        }
        if !(self.instrument.compliance_amps > 0.0) {
            return Err(DaqError::Configuration(format!(
                "instrument.compliance_amps must be positive, got {}",
                self.instrument.compliance_amps
            )));
        }

        check_secs("instrument.identify_settle_secs", self.instrument.identify_settle_secs)?;
        check_secs("instrument.configure_settle_secs", self.instrument.configure_settle_secs)?;
        check_secs("acquisition.duration_secs", self.acquisition.duration_secs)?;
        check_secs("acquisition.settle_secs", self.acquisition.settle_secs)?;

        if !self.acquisition.toggle_voltage.is_finite() {
            return Err(DaqError::Configuration(
                "acquisition.toggle_voltage must be finite".to_string(),
            ));
        }

        for (key, value) in [
            ("output.prototype", &self.output.prototype),
            ("output.spacing", &self.output.spacing),
            ("output.sensor", &self.output.sensor),
        ] {
            if value.trim().is_empty() {
                return Err(DaqError::Configuration(format!("{key} cannot be empty")));
            }
        }

        for (key, width, height) in [
            ("plot.live", self.plot.live_width, self.plot.live_height),
            ("plot.final", self.plot.final_width, self.plot.final_height),
        ] {
            if width < 200 || height < 150 {
                return Err(DaqError::Configuration(format!(
                    "{key} size {width}x{height} is too small (minimum 200x150)"
                )));
            }
        }

        if !(self.plot.major_tick_secs > 0.0) || !(self.plot.minor_tick_secs > 0.0) {
            return Err(DaqError::Configuration(
                "plot tick spacing must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Zero is allowed (tests and dry runs use it), negative or NaN is not.
fn check_secs(key: &str, value: f64) -> AppResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "{key} must be a non-negative number of seconds, got {value}"
        )))
    }
}

impl InstrumentSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn identify_settle(&self) -> Duration {
        Duration::from_secs_f64(self.identify_settle_secs)
    }

    pub fn configure_settle(&self) -> Duration {
        Duration::from_secs_f64(self.configure_settle_secs)
    }
}

impl AcquisitionSettings {
    pub fn settle(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs)
    }
}

impl OutputSettings {
    /// `<root>/<prototype>/<spacing>/<sensor>`
    pub fn directory(&self) -> PathBuf {
        self.root
            .join(&self.prototype)
            .join(&self.spacing)
            .join(&self.sensor)
    }

    pub fn data_path(&self) -> PathBuf {
        self.directory().join("results.txt")
    }

    pub fn figure_path(&self) -> PathBuf {
        self.directory().join("fig.png")
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.directory().join("run_metadata.json")
    }

    /// Title of the final figure.
    pub fn figure_title(&self) -> String {
        format!("{}/{}\n Current Variation", self.spacing, self.sensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        settings.validate().expect("defaults should validate");
        assert_eq!(settings.instrument.resource, "ASRL5::INSTR");
        assert_eq!(settings.acquisition.duration_secs, 220.0);
        assert_eq!(settings.acquisition.toggle_voltage, 3.0);
        assert_eq!(settings.acquisition.settle(), Duration::from_millis(500));
        assert!(!settings.output.enabled);
    }

    #[test]
    fn test_output_paths() {
        let output = OutputSettings {
            root: PathBuf::from("/data"),
            prototype: "Proto".into(),
            spacing: "4mm".into(),
            sensor: "7".into(),
            ..OutputSettings::default()
        };
        assert_eq!(output.data_path(), PathBuf::from("/data/Proto/4mm/7/results.txt"));
        assert_eq!(output.figure_path(), PathBuf::from("/data/Proto/4mm/7/fig.png"));
        assert_eq!(output.figure_title(), "4mm/7\n Current Variation");
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[instrument]
resource = "/dev/ttyUSB3"

[acquisition]
duration_secs = 12.5

[output]
enabled = true
sensor = "B2"
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.instrument.resource, "/dev/ttyUSB3");
        assert_eq!(settings.instrument.baud_rate, 9600);
        assert_eq!(settings.acquisition.duration_secs, 12.5);
        assert_eq!(settings.acquisition.toggle_voltage, 3.0);
        assert!(settings.output.enabled);
        assert_eq!(settings.output.sensor, "B2");
    }

    #[test]
    fn test_missing_explicit_file_is_rejected() {
        let err = Settings::load(Some(Path::new("/nonexistent/sourcemeter.toml"))).unwrap_err();
        assert!(matches!(err, DaqError::Configuration(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = Settings::default();
        settings.acquisition.settle_secs = -0.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.instrument.resource = "  ".into();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.instrument.compliance_amps = 0.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.plot.live_width = 50;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.application.log_level = "verbose".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_duration_is_allowed() {
        let mut settings = Settings::default();
        settings.acquisition.duration_secs = 0.0;
        settings.acquisition.settle_secs = 0.0;
        assert!(settings.validate().is_ok());
    }
}
