//! Transport layer abstraction.
//!
//! Defines the `NeoTransport` trait used by a session to talk to one device,
//! allowing different implementations (nusb, mock, etc.).

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device not found: VID={vid:04X} PID={pid:04X}")]
    DeviceNotFound { vid: u16, pid: u16 },

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Endpoint not found: type={ep_type}, direction={direction}")]
    EndpointNotFound { ep_type: String, direction: String },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Mode switch failed: {0}")]
    ModeSwitchFailed(String),

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Abstract byte pipe to a single Neo in comms mode.
///
/// A `timeout` of `None` selects the transport's default.
pub trait NeoTransport: Send {
    /// Write all of `data` to the OUT pipe.
    fn write(&mut self, data: &[u8], timeout: Option<Duration>) -> Result<(), TransportError>;

    /// Read up to `buf.len()` bytes, stopping early on a short packet.
    /// Returns the number of bytes actually read.
    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, TransportError>;

    /// Read exactly `buf.len()` bytes; a short read is an error.
    fn read_exact(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<(), TransportError> {
        let actual = self.read(buf, timeout)?;
        if actual != buf.len() {
            return Err(TransportError::ShortRead {
                expected: buf.len(),
                actual,
            });
        }
        Ok(())
    }

    /// Stable identity for the physical device (USB location).
    fn identity(&self) -> u32;
}
