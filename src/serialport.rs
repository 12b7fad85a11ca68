use crate::protocol::BAUD_RATE;
use crate::transport::Transport;
use std::io::{self, Read, Write};
use std::time::Duration;

/// Per-attempt read timeout on the cell bus.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(100);

/// The cell bus on a local serial device. Bus power is switched with DTR.
pub struct SerialTransport {
    serial: Box<dyn serialport::SerialPort>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("port", &self.serial.name())
            .finish()
    }
}

impl SerialTransport {
    pub fn new(port: &str) -> Result<Self, crate::Error> {
        let serial = serialport::new(port, BAUD_RATE)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(DEFAULT_TIMEOUT)
            .open()
            .map_err(io::Error::from)?;
        log::debug!("Opened serial port '{port}'");
        Ok(Self { serial })
    }

    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), crate::Error> {
        self.serial.set_timeout(timeout).map_err(io::Error::from)?;
        Ok(())
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        log::trace!("send_bytes: {:02X?}", bytes);
        self.serial.write_all(bytes)?;
        self.serial.flush()
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        match self.serial.read(buffer) {
            Ok(received) => Ok(received),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(err) => Err(err),
        }
    }

    fn discard_input(&mut self) -> io::Result<usize> {
        let mut discarded = 0;
        loop {
            let pending = self.serial.bytes_to_read().map_err(io::Error::from)?;
            if pending == 0 {
                break;
            }
            log::trace!("Got {} pending bytes", pending);
            let mut buf: Vec<u8> = vec![0; 64];
            let received = self.read(buf.as_mut_slice())?;
            log::trace!("Discarded {:02X?}", &buf[..received]);
            if received == 0 {
                break;
            }
            discarded += received;
        }
        Ok(discarded)
    }

    fn set_bus(&mut self, enabled: bool) -> io::Result<()> {
        log::debug!("Bus power {}", if enabled { "on" } else { "off" });
        self.serial
            .write_data_terminal_ready(enabled)
            .map_err(io::Error::from)
    }
}
