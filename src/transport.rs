//! The half-duplex byte channel shared by all slaves.

use std::io;

pub trait Transport {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Reads whatever is available, waiting at most one read timeout.
    /// `Ok(0)` means the timeout elapsed without data.
    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize>;

    /// Drops everything pending in the receive buffer, returning the count.
    fn discard_input(&mut self) -> io::Result<usize>;

    /// Switches power to the slave bus.
    fn set_bus(&mut self, enabled: bool) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        (**self).read(buffer)
    }

    fn discard_input(&mut self) -> io::Result<usize> {
        (**self).discard_input()
    }

    fn set_bus(&mut self, enabled: bool) -> io::Result<()> {
        (**self).set_bus(enabled)
    }
}
