//! Collects received bytes into full packets.
use crate::protocol::{HeaderPolicy, FRAME_SIZE};
use crate::transport::Transport;
use std::io;

/// Accumulates bytes until a full [`FRAME_SIZE`] packet is available.
///
/// A partial packet is kept between calls. A packet only starts on a byte the
/// [`HeaderPolicy`] accepts; anything else arriving between packets is
/// skipped. The checksum check decides whether an assembled packet is usable.
#[derive(Debug, Clone)]
pub struct FrameReader {
    buffer: [u8; FRAME_SIZE],
    len: usize,
    skipped: u64,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            buffer: [0; FRAME_SIZE],
            len: 0,
            skipped: 0,
        }
    }

    /// Number of bytes of the packet currently being assembled.
    pub fn pending(&self) -> usize {
        self.len
    }

    /// Bytes dropped so far while waiting for a frame header.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Drops a partially received packet.
    pub fn reset(&mut self) {
        if self.len > 0 {
            log::debug!("Discarding partial packet of {} bytes", self.len);
        }
        self.len = 0;
    }

    /// Appends one byte, returns the packet once it is complete.
    pub fn push(&mut self, byte: u8) -> Option<[u8; FRAME_SIZE]> {
        self.buffer[self.len] = byte;
        self.len += 1;
        if self.len == FRAME_SIZE {
            self.len = 0;
            Some(self.buffer)
        } else {
            None
        }
    }

    /// Like [`FrameReader::push`], but a byte that `header` rejects is dropped
    /// instead of starting a packet.
    pub fn push_aligned(&mut self, byte: u8, header: &HeaderPolicy) -> Option<[u8; FRAME_SIZE]> {
        if self.len == 0 && !header.accepts(byte) {
            log::trace!("Skipping byte 0x{byte:02X} outside of a packet");
            self.skipped += 1;
            return None;
        }
        self.push(byte)
    }

    /// Reads the bytes available on `transport` until a packet is complete.
    ///
    /// Returns `None` when the transport runs dry first; the bytes read so far
    /// are kept for the next call. Bytes following a completed packet are left
    /// on the transport.
    pub fn read_from<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        header: &HeaderPolicy,
    ) -> io::Result<Option<[u8; FRAME_SIZE]>> {
        let mut available = transport.bytes_available()?;
        while available > 0 {
            if let Some(frame) = self.push_aligned(transport.read_byte()?, header) {
                log::trace!("Received packet {frame:02X?}");
                return Ok(Some(frame));
            }
            available -= 1;
        }
        Ok(None)
    }
}
