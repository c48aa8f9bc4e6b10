//! In-memory transport for tests and dry runs.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use turnscan_core::{Result, ScanError};

use super::SerialTransport;

/// Mock transport: bytes injected by the test are read by the link, and
/// bytes written by the link are recorded.
///
/// Clones share the same buffers, so a test keeps one clone to drive the
/// controller side while the link owns the other.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Default)]
struct MockTransportInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
    open: bool,
    fail_open: bool,
    fail_io: bool,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues bytes for the link to read.
    pub fn inject_read(&self, data: &[u8]) {
        self.inner.lock().read_buffer.extend(data);
    }

    /// Returns every byte written so far.
    pub fn written(&self) -> Vec<u8> {
        self.inner.lock().write_buffer.clone()
    }

    /// Clears the record of written bytes.
    pub fn clear_written(&self) {
        self.inner.lock().write_buffer.clear();
    }

    /// Makes the next `open` fail.
    pub fn fail_open(&self, fail: bool) {
        self.inner.lock().fail_open = fail;
    }

    /// Makes every read and write fail, as if the cable was pulled.
    pub fn fail_io(&self, fail: bool) {
        self.inner.lock().fail_io = fail;
    }
}

impl SerialTransport for MockTransport {
    fn open(&mut self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_open {
            return Err(ScanError::Connection("mock port unavailable".into()));
        }
        inner.open = true;
        Ok(())
    }

    fn close(&mut self) {
        self.inner.lock().open = false;
    }

    fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        if inner.fail_io {
            return Err(ScanError::Connection("mock read failed".into()));
        }
        if !inner.open {
            return Err(ScanError::NotConnected);
        }
        let available = inner.read_buffer.len().min(buffer.len());
        for (slot, byte) in buffer.iter_mut().zip(inner.read_buffer.drain(..available)) {
            *slot = byte;
        }
        Ok(available)
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.fail_io {
            return Err(ScanError::Connection("mock write failed".into()));
        }
        if !inner.open {
            return Err(ScanError::NotConnected);
        }
        inner.write_buffer.push(byte);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_and_write() {
        let controller = MockTransport::new();
        let mut transport = controller.clone();
        transport.open().unwrap();

        controller.inject_read(b"DDF");
        let mut buf = [0_u8; 2];
        assert_eq!(transport.read_available(&mut buf).unwrap(), 2);
        assert_eq!(&buf, b"DD");
        assert_eq!(transport.read_available(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], b'F');
        assert_eq!(transport.read_available(&mut buf).unwrap(), 0);

        transport.write_byte(b'S').unwrap();
        assert_eq!(controller.written(), b"S".to_vec());
    }

    #[test]
    fn test_closed_transport_rejects_io() {
        let mut transport = MockTransport::new();
        let mut buf = [0_u8; 4];
        assert!(transport.read_available(&mut buf).is_err());
        assert!(transport.write_byte(b'R').is_err());
    }

    #[test]
    fn test_injected_failures() {
        let controller = MockTransport::new();
        let mut transport = controller.clone();

        controller.fail_open(true);
        assert!(matches!(transport.open(), Err(ScanError::Connection(_))));
        controller.fail_open(false);
        transport.open().unwrap();

        controller.fail_io(true);
        assert!(transport.write_byte(b'I').is_err());
    }
}
