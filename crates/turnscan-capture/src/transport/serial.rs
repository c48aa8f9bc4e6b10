//! `serialport`-backed transport.

use std::io::{Read, Write};
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use turnscan_core::{Result, ScanError};

use super::{connection_error, SerialTransport};

/// Baud rate of the turntable controller firmware.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Read timeout; keeps a pending read from holding the port for long.
const READ_TIMEOUT: Duration = Duration::from_millis(5);

/// Serial transport over a real port (8N1, no flow control).
pub struct SerialPortTransport {
    path: String,
    baud_rate: u32,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortTransport {
    /// Creates a closed transport for the given port path (e.g. `/dev/ttyACM0` or `COM3`).
    pub fn new(path: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            path: path.into(),
            baud_rate,
            port: None,
        }
    }

    /// Returns the port path.
    pub fn path(&self) -> &str {
        &self.path
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(ScanError::NotConnected)
    }
}

impl SerialTransport for SerialPortTransport {
    fn open(&mut self) -> Result<()> {
        let port = serialport::new(&self.path, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(connection_error)?;

        log::info!("Opened serial port: {} at {} baud", self.path, self.baud_rate);
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            log::info!("Closed serial port: {}", self.path);
        }
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn read_available(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.port_mut()?.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(connection_error(e)),
        }
    }

    fn write_byte(&mut self, byte: u8) -> Result<()> {
        let port = self.port_mut()?;
        port.write_all(&[byte]).map_err(connection_error)?;
        port.flush().map_err(connection_error)
    }
}

/// Lists the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>> {
    let ports = serialport::available_ports().map_err(connection_error)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
