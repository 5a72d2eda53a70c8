//! Instrument transports
//!
//! The acquisition code only ever talks to the source-measure unit through
//! [`InstrumentTransport`]: send a command, send a query and read its reply,
//! or read one raw response frame. Implementations handle the link details.

pub mod mock;
pub mod serial_adapter;

pub use mock::MockAdapter;
pub use serial_adapter::SerialAdapter;

use crate::error::AppResult;
use async_trait::async_trait;

/// Text command transport to a single instrument session.
#[async_trait]
pub trait InstrumentTransport: Send {
    /// Human readable resource name, for logs
    fn resource(&self) -> &str;

    /// Send a command. No acknowledgement is read.
    async fn write(&mut self, command: &str) -> AppResult<()>;

    /// Read one response frame as received, terminators included.
    async fn read_raw(&mut self) -> AppResult<Vec<u8>>;

    /// Send a command and return its trimmed text reply.
    async fn query(&mut self, command: &str) -> AppResult<String> {
        self.write(command).await?;
        let raw = self.read_raw().await?;
        Ok(String::from_utf8_lossy(&raw).trim().to_string())
    }
}

#[async_trait]
impl<T: InstrumentTransport + ?Sized> InstrumentTransport for Box<T> {
    fn resource(&self) -> &str {
        (**self).resource()
    }

    async fn write(&mut self, command: &str) -> AppResult<()> {
        (**self).write(command).await
    }

    async fn read_raw(&mut self) -> AppResult<Vec<u8>> {
        (**self).read_raw().await
    }

    async fn query(&mut self, command: &str) -> AppResult<String> {
        (**self).query(command).await
    }
}
