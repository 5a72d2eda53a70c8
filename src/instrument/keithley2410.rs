//! Keithley 2410 SourceMeter driver
//!
//! Puts the unit in a fixed configuration, sourcing voltage and sensing
//! current with auto-range and a compliance limit, then exposes the three
//! operations the toggle loop needs: set the source level, trigger a
//! measurement, switch the output off.
//!
//! Configuration commands are fire-and-forget; the 2400 series does not
//! acknowledge them over RS-232.

use crate::adapters::InstrumentTransport;
use crate::config::InstrumentSettings;
use crate::error::AppResult;
use crate::measurement::parse_current;
use tokio::time::sleep;
use tracing::{debug, info};

pub const IDENTIFY: &str = "*IDN?";
pub const MEASURE: &str = "MEAS?";
pub const OUTPUT_OFF: &str = "OUTP OFF";

/// Keithley 2410 over any [`InstrumentTransport`]
pub struct Keithley2410<T: InstrumentTransport> {
    transport: T,
    identity: Option<String>,
}

impl<T: InstrumentTransport> Keithley2410<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            identity: None,
        }
    }

    /// Identification string from the last [`Keithley2410::identify`] call.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    pub async fn identify(&mut self) -> AppResult<String> {
        let idn = self.transport.query(IDENTIFY).await?;
        info!(resource = %self.transport.resource(), idn = %idn, "Instrument identified");
        self.identity = Some(idn.clone());
        Ok(idn)
    }

    /// The fixed configuration sequence, in the order it is sent.
    pub fn configuration_commands(compliance_amps: f64) -> Vec<String> {
        vec![
            "*RST".to_string(),
            "*CLS".to_string(),
            "SYST:REM".to_string(),
            ":SENS:FUNC 'CURR'".to_string(),
            ":SOUR:FUNC VOLT".to_string(),
            ":SOUR:VOLT:MODE FIX".to_string(),
            format!(":SENS:CURR:PROT {compliance_amps}"),
            ":SENS:CURR:RANG:AUTO ON".to_string(),
        ]
    }

    /// Identify, reset and configure the unit, waiting the configured
    /// settle delays.
    pub async fn initialize(&mut self, settings: &InstrumentSettings) -> AppResult<()> {
        self.identify().await?;
        sleep(settings.identify_settle()).await;

        for command in Self::configuration_commands(settings.compliance_amps) {
            self.transport.write(&command).await?;
        }
        sleep(settings.configure_settle()).await;

        info!(
            compliance_amps = settings.compliance_amps,
            "Source-measure unit configured: voltage source, current sense, auto-range"
        );
        Ok(())
    }

    pub async fn set_voltage(&mut self, volts: f64) -> AppResult<()> {
        self.transport.write(&format!(":SOUR:VOLT {volts}")).await
    }

    /// Trigger a measurement and return the current reading in amperes.
    pub async fn measure_current(&mut self) -> AppResult<f64> {
        self.transport.write(MEASURE).await?;
        let raw = self.transport.read_raw().await?;
        let current = parse_current(&raw)?;
        debug!(current, "Measured");
        Ok(current)
    }

    pub async fn output_off(&mut self) -> AppResult<()> {
        self.transport.write(OUTPUT_OFF).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;
    use crate::error::{DaqError, ResponseError};

    fn quick_settings() -> InstrumentSettings {
        InstrumentSettings {
            identify_settle_secs: 0.0,
            configure_settle_secs: 0.0,
            ..InstrumentSettings::default()
        }
    }

    #[tokio::test]
    async fn test_initialize_sends_configuration_in_order() {
        let mock = MockAdapter::new();
        let log = mock.command_log();
        let mut smu = Keithley2410::new(mock);

        smu.initialize(&quick_settings()).await.unwrap();

        assert_eq!(
            log.commands(),
            vec![
                "*IDN?",
                "*RST",
                "*CLS",
                "SYST:REM",
                ":SENS:FUNC 'CURR'",
                ":SOUR:FUNC VOLT",
                ":SOUR:VOLT:MODE FIX",
                ":SENS:CURR:PROT 1",
                ":SENS:CURR:RANG:AUTO ON",
            ]
        );
        assert!(smu.identity().unwrap().contains("2410"));
    }

    #[tokio::test]
    async fn test_voltage_command_formatting() {
        let mock = MockAdapter::new();
        let log = mock.command_log();
        let mut smu = Keithley2410::new(mock);

        smu.set_voltage(3.0).await.unwrap();
        smu.set_voltage(0.0).await.unwrap();
        smu.set_voltage(1.25).await.unwrap();

        assert_eq!(log.commands(), vec![":SOUR:VOLT 3", ":SOUR:VOLT 0", ":SOUR:VOLT 1.25"]);
    }

    #[tokio::test]
    async fn test_measure_current_uses_second_field() {
        let mock = MockAdapter::new().with_measurement_responses(["-5.0,7.5E-04,0,0,0\r\n"]);
        let mut smu = Keithley2410::new(mock);
        assert_eq!(smu.measure_current().await.unwrap(), 7.5e-4);
    }

    #[tokio::test]
    async fn test_measure_current_reports_malformed_frame() {
        let mock = MockAdapter::new().with_measurement_responses(["+1.0E+00\r\n"]);
        let mut smu = Keithley2410::new(mock);
        let err = smu.measure_current().await.unwrap_err();
        assert!(matches!(
            err,
            DaqError::Response(ResponseError::MissingCurrentField { count: 1 })
        ));
    }
}
