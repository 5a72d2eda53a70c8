use super::InstrumentTransport;
use crate::config::InstrumentSettings;
use crate::error::{AppResult, DaqError};
use async_trait::async_trait;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use log::debug;
#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;
#[cfg(feature = "instrument_serial")]
use std::sync::Arc;
#[cfg(feature = "instrument_serial")]
use tokio::sync::Mutex;

/// Serial adapter for RS-232 communication
///
/// This adapter wraps the serialport crate and provides async I/O
/// using Tokio's blocking task executor for synchronous serial operations.
pub struct SerialAdapter {
    /// Resource as configured (e.g., "ASRL5::INSTR", "/dev/ttyUSB0")
    resource: String,

    /// Resolved port name (e.g., "/dev/ttyS4", "COM5")
    port_name: String,

    /// Baud rate (e.g., 9600, 115200)
    baud_rate: u32,

    /// Overall timeout for reading one response frame
    timeout: Duration,

    /// Line terminator for commands (e.g., "\r\n")
    line_terminator: String,

    /// Response line ending byte (e.g., b'\n')
    response_delimiter: u8,

    /// The actual serial port (behind Arc<Mutex> for the blocking pool)
    #[cfg(feature = "instrument_serial")]
    port: Option<Arc<Mutex<Box<dyn SerialPort>>>>,
}

impl SerialAdapter {
    /// Create an unopened adapter for a resource.
    ///
    /// # Arguments
    /// * `resource` - Serial port path or VISA serial resource
    /// * `baud_rate` - Communication speed (e.g., 9600, 115200)
    pub fn new(resource: &str, baud_rate: u32) -> Self {
        Self {
            resource: resource.to_string(),
            port_name: resolve_port_name(resource),
            baud_rate,
            timeout: Duration::from_secs(2),
            line_terminator: "\r\n".to_string(),
            response_delimiter: b'\n',
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_line_terminator(mut self, terminator: &str) -> Self {
        self.line_terminator = terminator.to_string();
        self
    }

    pub fn with_response_delimiter(mut self, delimiter: u8) -> Self {
        self.response_delimiter = delimiter;
        self
    }

    /// Build and open an adapter from instrument settings.
    pub fn open_with(settings: &InstrumentSettings) -> AppResult<Self> {
        let mut adapter =
            Self::new(&settings.resource, settings.baud_rate).with_timeout(settings.timeout());
        adapter.open()?;
        Ok(adapter)
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_open(&self) -> bool {
        #[cfg(feature = "instrument_serial")]
        {
            self.port.is_some()
        }
        #[cfg(not(feature = "instrument_serial"))]
        {
            false
        }
    }

    /// Open the serial port. No retry: a missing or busy port is reported
    /// straight back to the caller.
    pub fn open(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = serialport::new(&self.port_name, self.baud_rate)
                .timeout(Duration::from_millis(100)) // Internal read timeout
                .open()
                .map_err(|e| {
                    DaqError::Instrument(format!(
                        "Failed to open serial port '{}' (resource '{}') at {} baud: {}",
                        self.port_name, self.resource, self.baud_rate, e
                    ))
                })?;

            self.port = Some(Arc::new(Mutex::new(port)));

            debug!(
                "Serial port '{}' opened at {} baud",
                self.port_name, self.baud_rate
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    #[cfg(feature = "instrument_serial")]
    fn port(&self) -> AppResult<Arc<Mutex<Box<dyn SerialPort>>>> {
        self.port.clone().ok_or_else(|| {
            DaqError::Instrument(format!("Serial port '{}' is not open", self.port_name))
        })
    }
}

/// Map a VISA serial resource (`ASRL<n>::INSTR`) to an OS port name.
///
/// VISA numbers serial ports from 1: `ASRL1` is `COM1` on Windows and
/// `/dev/ttyS0` elsewhere. Anything else is taken as a port name already.
pub fn resolve_port_name(resource: &str) -> String {
    let trimmed = resource.trim();
    let upper = trimmed.to_ascii_uppercase();

    let Some(rest) = upper.strip_prefix("ASRL") else {
        return trimmed.to_string();
    };
    let number = rest.strip_suffix("::INSTR").unwrap_or(rest);
    match number.parse::<u32>() {
        Ok(n) if n >= 1 => {
            if cfg!(windows) {
                format!("COM{n}")
            } else {
                format!("/dev/ttyS{}", n - 1)
            }
        }
        _ => trimmed.to_string(),
    }
}

/// Names of the serial ports the OS reports.
pub fn list_ports() -> AppResult<Vec<String>> {
    #[cfg(feature = "instrument_serial")]
    {
        let ports = serialport::available_ports()
            .map_err(|e| DaqError::Instrument(format!("Failed to enumerate serial ports: {e}")))?;
        Ok(ports.into_iter().map(|p| p.port_name).collect())
    }

    #[cfg(not(feature = "instrument_serial"))]
    {
        Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
    }
}

#[async_trait]
impl InstrumentTransport for SerialAdapter {
    fn resource(&self) -> &str {
        &self.resource
    }

    async fn write(&mut self, command: &str) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let command_str = format!("{}{}", command, self.line_terminator);
            let command_for_log = command.to_string();

            // Execute blocking serial I/O on dedicated thread
            tokio::task::spawn_blocking(move || -> AppResult<()> {
                use std::io::Write;

                let mut port_guard = port.blocking_lock();
                port_guard.write_all(command_str.as_bytes())?;
                port_guard.flush()?;

                debug!("Sent serial command: {}", command_for_log.trim());
                Ok(())
            })
            .await
            .map_err(|e| DaqError::Instrument(format!("Serial I/O task panicked: {e}")))?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            let _ = command;
            Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }

    async fn read_raw(&mut self) -> AppResult<Vec<u8>> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = self.port()?;
            let delimiter = self.response_delimiter;
            let timeout = self.timeout;

            tokio::task::spawn_blocking(move || -> AppResult<Vec<u8>> {
                use std::io::Read;

                let mut port_guard = port.blocking_lock();

                // Read byte-by-byte until delimiter
                let mut response = Vec::new();
                let mut buffer = [0u8; 1];
                let start = std::time::Instant::now();

                loop {
                    if start.elapsed() > timeout {
                        return Err(DaqError::SerialTimeout(timeout));
                    }

                    match port_guard.read(&mut buffer) {
                        Ok(0) => {
                            // EOF - shouldn't happen with serial ports
                            return Err(DaqError::SerialUnexpectedEof);
                        }
                        Ok(_) => {
                            response.push(buffer[0]);
                            if buffer[0] == delimiter {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {
                            // Port timeout is shorter than our overall timeout
                            continue;
                        }
                        Err(e) => return Err(DaqError::Io(e)),
                    }
                }

                debug!(
                    "Received serial response: {}",
                    String::from_utf8_lossy(&response).trim()
                );
                Ok(response)
            })
            .await
            .map_err(|e| DaqError::Instrument(format!("Serial I/O task panicked: {e}")))?
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(DaqError::FeatureNotEnabled("instrument_serial".to_string()))
        }
    }
}
