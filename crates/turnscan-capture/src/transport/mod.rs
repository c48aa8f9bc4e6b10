//! Byte transports for the turntable link.

use turnscan_core::{Result, ScanError};

mod mock;
mod serial;

pub use mock::MockTransport;
pub use serial::{available_ports, SerialPortTransport, DEFAULT_BAUD_RATE};

/// A byte channel to the turntable controller.
///
/// The link shares one transport between its background reader and the
/// command writer, so implementations must be `Send`.
pub trait SerialTransport: Send {
    /// Opens the channel.
    fn open(&mut self) -> Result<()>;

    /// Closes the channel. Closing an already closed transport is a no-op.
    fn close(&mut self);

    /// Returns true while the channel is open.
    fn is_open(&self) -> bool;

    /// Reads whatever bytes are available into `buffer`, returning how many
    /// were read. Returns `Ok(0)` when nothing arrived before the transport's
    /// read timeout.
    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Writes a single byte.
    fn write_byte(&mut self, byte: u8) -> Result<()>;
}

/// Wraps a transport-level failure as a connection error.
pub(crate) fn connection_error(err: impl std::fmt::Display) -> ScanError {
    ScanError::Connection(err.to_string())
}
