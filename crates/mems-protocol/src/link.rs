//! Serial Link to the ECU
//!
//! Raw byte transport. A link owns exactly one byte stream: the real serial
//! port, an emulated ECU or an in-memory test double. Reads are bounded by a
//! timeout and nothing is retried here.

use crate::emulator::EmulatedEcu;
use crate::error::MemsError;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt};
use tracing::{debug, info};

/// MEMS 1.6 diagnostic port speed
pub const MEMS_BAUD_RATE: u32 = 9600;

/// Default timeout for a single response read
const DEFAULT_READ_TIMEOUT_MS: u64 = 2000;

/// Byte stream a link can own
pub trait LinkStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> LinkStream for T {}

/// Serial link settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Baud rate (MEMS 1.6 only talks at 9600)
    pub baud_rate: u32,
    /// Timeout for one response read
    pub read_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: MEMS_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

/// Single-owner byte link to an ECU
pub struct SerialLink {
    /// Port name, or a label for non-serial streams
    name: String,
    stream: Box<dyn LinkStream>,
    read_timeout: Duration,
    emulated: bool,
}

impl SerialLink {
    /// Open a serial port (e.g. "/dev/ttyUSB0" or "COM3")
    pub fn open(port: &str, config: &SerialConfig) -> Result<Self, MemsError> {
        info!("Opening serial port {} at {} baud", port, config.baud_rate);

        let stream = tokio_serial::new(port, config.baud_rate)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open_native_async()
            .map_err(|e| MemsError::Connection {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        // stale bytes from a previous session would break the echo check
        stream
            .clear(ClearBuffer::All)
            .map_err(|e| MemsError::Connection {
                port: port.to_string(),
                reason: e.to_string(),
            })?;

        info!("Listening on {}", port);
        Ok(Self {
            name: port.to_string(),
            stream: Box::new(stream),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            emulated: false,
        })
    }

    /// Link to an emulated ECU running on its own task
    pub fn emulated(ecu: EmulatedEcu, config: &SerialConfig) -> Self {
        info!("Connecting to emulated ECU {}", ecu.ecu_id());
        Self {
            name: "emulator".to_string(),
            stream: Box::new(ecu.spawn()),
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            emulated: true,
        }
    }

    /// Wrap an arbitrary byte stream
    pub fn from_stream<S: LinkStream + 'static>(
        name: &str,
        stream: S,
        read_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            stream: Box::new(stream),
            read_timeout,
            emulated: false,
        }
    }

    /// Write all bytes to the ECU
    pub async fn write(&mut self, bytes: &[u8]) -> Result<(), MemsError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        debug!("write: {}", hex::encode(bytes));
        Ok(())
    }

    /// Read exactly `expected_len` bytes
    pub async fn read(&mut self, expected_len: usize) -> Result<Vec<u8>, MemsError> {
        let mut buf = vec![0u8; expected_len];

        match tokio::time::timeout(self.read_timeout, self.stream.read_exact(&mut buf)).await {
            Ok(Ok(_)) => {
                debug!("read ({}): {}", expected_len, hex::encode(&buf));
                Ok(buf)
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(MemsError::Timeout(self.read_timeout.as_millis() as u64)),
        }
    }

    /// Port name or stream label
    pub fn name(&self) -> &str {
        &self.name
    }

    /// True when the other end is the built-in emulator
    pub fn is_emulated(&self) -> bool {
        self.emulated
    }
}
