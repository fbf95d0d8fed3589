//! Byte link to the chip.
//!
//! The orchestrator never blocks on the link: it asks how many bytes are
//! waiting and only reads those.

use std::io;

/// Non-blocking byte transport.
pub trait Transport {
    /// Number of received bytes that can be read without blocking.
    fn bytes_available(&mut self) -> io::Result<usize>;

    /// Reads one byte. Only called when [`Transport::bytes_available`] is non-zero.
    fn read_byte(&mut self) -> io::Result<u8>;

    /// Sends `bytes` to the chip.
    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        (**self).read_byte()
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_bytes(bytes)
    }
}

#[cfg(feature = "serial")]
impl Transport for Box<dyn tokio_serial::SerialPort> {
    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.bytes_to_read()? as usize)
    }

    fn read_byte(&mut self) -> io::Result<u8> {
        let mut byte = [0u8; 1];
        io::Read::read_exact(self, &mut byte)?;
        Ok(byte[0])
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        io::Write::write_all(self, bytes)?;
        io::Write::flush(self)
    }
}
