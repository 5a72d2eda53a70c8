//! Simulated source-measure unit.
//!
//! Answers the commands the acquisition loop sends as a Keithley 2410 driving
//! a resistive load would, and keeps a log of every command written so tests
//! can check what reached the "instrument". Raw responses can be scripted to
//! inject malformed frames.

use super::InstrumentTransport;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use log::debug;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Shared view of the commands a [`MockAdapter`] has received.
#[derive(Clone, Default)]
pub struct CommandLog(Arc<Mutex<Vec<String>>>);

impl CommandLog {
    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, command: &str) {
        self.lock().push(command.to_string());
    }

    pub fn commands(&self) -> Vec<String> {
        self.lock().clone()
    }

    /// How many times exactly `command` was sent.
    pub fn count(&self, command: &str) -> usize {
        self.lock().iter().filter(|c| c.as_str() == command).count()
    }
}

pub struct MockAdapter {
    resource: String,
    load_ohms: f64,
    noise_amps: f64,
    voltage: f64,
    pending: VecDeque<Vec<u8>>,
    scripted: VecDeque<Vec<u8>>,
    log: CommandLog,
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAdapter {
    /// A 1 MΩ load with nA-scale noise.
    pub fn new() -> Self {
        Self {
            resource: "MOCK::SMU".to_string(),
            load_ohms: 1.0e6,
            noise_amps: 1.0e-9,
            voltage: 0.0,
            pending: VecDeque::new(),
            scripted: VecDeque::new(),
            log: CommandLog::default(),
        }
    }

    pub fn with_load(mut self, ohms: f64) -> Self {
        self.load_ohms = ohms;
        self
    }

    /// Disable noise so currents are exactly `voltage / load`.
    pub fn noiseless(mut self) -> Self {
        self.noise_amps = 0.0;
        self
    }

    /// Queue raw frames returned by the next `MEAS?` triggers, in order,
    /// before falling back to simulated readings.
    pub fn with_measurement_responses<I, S>(mut self, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Vec<u8>>,
    {
        self.scripted.extend(responses.into_iter().map(Into::into));
        self
    }

    pub fn command_log(&self) -> CommandLog {
        self.log.clone()
    }

    fn simulated_reading(&self) -> Vec<u8> {
        let noise = if self.noise_amps > 0.0 {
            rand::thread_rng().gen_range(-self.noise_amps..self.noise_amps)
        } else {
            0.0
        };
        let current = self.voltage / self.load_ohms + noise;
        format!(
            "{:+.6E},{:+.6E},+9.910000E+37,+1.234000E+02,+1.994800E+04\r\n",
            self.voltage, current
        )
        .into_bytes()
    }
}

#[async_trait]
impl InstrumentTransport for MockAdapter {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn write(&mut self, command: &str) -> AppResult<()> {
        debug!("Mock SMU received: {}", command);
        self.log.push(command);

        let upper = command.trim().to_ascii_uppercase();
        if upper == "*IDN?" {
            self.pending
                .push_back(b"KEITHLEY INSTRUMENTS INC.,MODEL 2410,0000000,C34 (simulated)\r\n".to_vec());
        } else if upper == "MEAS?" {
            let frame = match self.scripted.pop_front() {
                Some(frame) => frame,
                None => self.simulated_reading(),
            };
            self.pending.push_back(frame);
        } else if let Some(level) = upper.strip_prefix(":SOUR:VOLT ") {
            // ":SOUR:VOLT:MODE FIX" does not match the prefix
            self.voltage = level.trim().parse().map_err(|_| {
                DaqError::Instrument(format!("Mock SMU: bad source level '{level}'"))
            })?;
        } else if upper == "*RST" || upper == "OUTP OFF" {
            self.voltage = 0.0;
        }
        Ok(())
    }

    async fn read_raw(&mut self) -> AppResult<Vec<u8>> {
        self.pending.pop_front().ok_or(DaqError::SerialTimeout(
            std::time::Duration::from_secs(2),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::parse_current;

    #[tokio::test]
    async fn test_identify() {
        let mut mock = MockAdapter::new();
        let idn = mock.query("*IDN?").await.unwrap();
        assert!(idn.contains("MODEL 2410"));
    }

    #[tokio::test]
    async fn test_reading_follows_source_level() {
        let mut mock = MockAdapter::new().with_load(1000.0).noiseless();
        mock.write(":SOUR:VOLT 3").await.unwrap();
        mock.write("MEAS?").await.unwrap();
        let raw = mock.read_raw().await.unwrap();
        let current = parse_current(&raw).unwrap();
        assert!((current - 3.0e-3).abs() < 1e-12);

        mock.write(":SOUR:VOLT 0").await.unwrap();
        mock.write("MEAS?").await.unwrap();
        assert_eq!(parse_current(&mock.read_raw().await.unwrap()).unwrap(), 0.0);
    }

    #[tokio::test]
    async fn test_scripted_frames_come_first() {
        let mut mock = MockAdapter::new().with_measurement_responses(["0,42\r\n", "garbage\r\n"]);
        mock.write("MEAS?").await.unwrap();
        assert_eq!(mock.read_raw().await.unwrap(), b"0,42\r\n");
        mock.write("MEAS?").await.unwrap();
        assert_eq!(mock.read_raw().await.unwrap(), b"garbage\r\n");
    }

    #[tokio::test]
    async fn test_read_without_pending_times_out() {
        let mut mock = MockAdapter::new();
        assert!(matches!(
            mock.read_raw().await,
            Err(DaqError::SerialTimeout(_))
        ));
    }

    #[tokio::test]
    async fn test_command_log_is_shared() {
        let mut mock = MockAdapter::new();
        let log = mock.command_log();
        mock.write("*RST").await.unwrap();
        mock.write("OUTP OFF").await.unwrap();
        assert_eq!(log.commands(), vec!["*RST", "OUTP OFF"]);
        assert_eq!(log.count("OUTP OFF"), 1);
    }
}
