//! Wire format of the BL0940 energy metering chip.
//!
//! The chip answers a "read all registers" request with a fixed 35 byte
//! packet. Every multi-byte field is transmitted least significant byte
//! first and the last byte is an additive complement checksum.
//!
//! This module only deals with bytes: decoding fields, validating packets and
//! building the command frames sent to the chip. Conversion into physical
//! units lives in [`crate::calibration`].

/// Errors raised while validating a received packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The first byte of the packet is not an accepted frame header.
    #[error("Unexpected frame header 0x{0:02X}")]
    UnexpectedHeader(u8),
    /// The checksum byte does not match the packet body.
    #[error("Checksum mismatch - calculated=0x{calculated:02X} received=0x{received:02X}")]
    ChecksumMismatch { calculated: u8, received: u8 },
    /// A packet was handed over with the wrong number of bytes.
    #[error("Invalid packet size - expected={expected} received={received}")]
    FrameSize { expected: usize, received: usize },
}

/// Size of a full register packet including header and checksum.
pub const FRAME_SIZE: usize = 35;

/// Header byte observed on real devices.
pub const FRAME_HEADER: u8 = 0x55;
/// Header byte according to the datasheet. Real devices send [`FRAME_HEADER`].
pub const FRAME_HEADER_DOCUMENTED: u8 = 0x58;

/// Read command byte. The datasheet says 0x58, devices in the field accept 0x50.
pub const READ_COMMAND: u8 = 0x50;
/// Write command byte. The datasheet says 0xA8, devices in the field accept 0xA0.
pub const WRITE_COMMAND: u8 = 0xA0;
/// Pseudo register address returning the full packet.
pub const FULL_PACKET: u8 = 0xAA;

pub const REG_I_FAST_RMS_CTRL: u8 = 0x10;
pub const REG_MODE: u8 = 0x18;
pub const REG_SOFT_RESET: u8 = 0x19;
pub const REG_USR_WRPROT: u8 = 0x1A;
pub const REG_TPS_CTRL: u8 = 0x1B;

/// Register writes bringing the chip into a known state.
///
/// Soft reset, unlock user registers, 50Hz with 800ms RMS update, automatic
/// temperature measurement every 100ms, fast RMS over half a cycle.
pub const INIT_SEQUENCE: [(u8, u32); 5] = [
    (REG_SOFT_RESET, 0x5A5A5A),
    (REG_USR_WRPROT, 0x000055),
    (REG_MODE, 0x001000),
    (REG_TPS_CTRL, 0x0047FF),
    (REG_I_FAST_RMS_CTRL, 0x00181C),
];

// Byte offsets inside the packet. The gaps between fields are reserved registers.
const OFFSET_HEADER: usize = 0;
const OFFSET_I_FAST_RMS: usize = 1;
const OFFSET_I_RMS: usize = 4;
const OFFSET_V_RMS: usize = 10;
const OFFSET_WATT: usize = 16;
const OFFSET_CF_CNT: usize = 22;
const OFFSET_TPS1: usize = 28;
const OFFSET_TPS2: usize = 31;
const OFFSET_CHECKSUM: usize = FRAME_SIZE - 1;

/// Reassembles an unsigned 24 bit value sent low, middle, high.
pub fn decode_u24(l: u8, m: u8, h: u8) -> u32 {
    l as u32 | (m as u32) << 8 | (h as u32) << 16
}

/// Reassembles a signed 24 bit value sent low, middle, high.
///
/// The high byte carries the sign, the result is sign extended to 32 bits.
pub fn decode_i24(l: u8, m: u8, h: u8) -> i32 {
    (l as i32 | (m as i32) << 8) | ((h as i8) as i32) << 16
}

/// Reassembles an unsigned 16 bit value sent low, high.
pub fn decode_u16(l: u8, h: u8) -> u16 {
    u16::from_le_bytes([l, h])
}

fn u24_at(raw: &[u8], offset: usize) -> u32 {
    decode_u24(raw[offset], raw[offset + 1], raw[offset + 2])
}

fn i24_at(raw: &[u8], offset: usize) -> i32 {
    decode_i24(raw[offset], raw[offset + 1], raw[offset + 2])
}

fn u16_at(raw: &[u8], offset: usize) -> u16 {
    decode_u16(raw[offset], raw[offset + 1])
}

/// 8 bit wrapping sum of `bytes`, starting at `seed`.
pub fn byte_sum(seed: u8, bytes: &[u8]) -> u8 {
    bytes.iter().fold(seed, |sum, b| sum.wrapping_add(*b))
}

/// Checksum the chip appends to a packet body (everything but the checksum byte).
pub fn checksum(body: &[u8]) -> u8 {
    checksum_with_seed(0, body)
}

/// Like [`checksum`] but with `seed` folded into the sum.
pub fn checksum_with_seed(seed: u8, body: &[u8]) -> u8 {
    !byte_sum(seed, body)
}

/// Validates the trailing checksum byte of a full packet.
///
/// A packet is valid when the sum of all bytes, checksum included, is `0xFF`.
pub fn validate_checksum(raw: &[u8; FRAME_SIZE]) -> Result<(), Error> {
    validate_checksum_with_seed(0, raw)
}

/// Like [`validate_checksum`] but with `seed` folded into the sum.
pub fn validate_checksum_with_seed(seed: u8, raw: &[u8; FRAME_SIZE]) -> Result<(), Error> {
    let (body, received) = (&raw[..OFFSET_CHECKSUM], raw[OFFSET_CHECKSUM]);
    if byte_sum(seed, body).wrapping_add(received) == 0xFF {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            calculated: checksum_with_seed(seed, body),
            received,
        })
    }
}

/// Builds the request asking the chip for a full register packet.
pub fn read_command(command: u8) -> [u8; 2] {
    [command, FULL_PACKET]
}

/// Builds a 6 byte register write: command, register, value (low first), checksum.
pub fn write_register_command(command: u8, register: u8, value: u32) -> [u8; 6] {
    let [l, m, h, _] = value.to_le_bytes();
    let mut frame = [command, register, l, m, h, 0];
    frame[5] = checksum(&frame[..5]);
    frame
}

/// Which frame header bytes are accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderPolicy {
    /// Any header byte, only the checksum guards the packet.
    Any,
    /// One of the listed bytes.
    OneOf(Vec<u8>),
}

impl HeaderPolicy {
    pub fn accepts(&self, header: u8) -> bool {
        match self {
            HeaderPolicy::Any => true,
            HeaderPolicy::OneOf(headers) => headers.contains(&header),
        }
    }
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        HeaderPolicy::OneOf(vec![FRAME_HEADER, FRAME_HEADER_DOCUMENTED])
    }
}

/// Device specific details of the exchange with the chip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameFormat {
    pub header: HeaderPolicy,
    /// Added to the byte sum before validating the checksum.
    pub checksum_seed: u8,
    /// First byte of the read request.
    pub read_command: u8,
}

impl Default for FrameFormat {
    fn default() -> Self {
        Self {
            header: HeaderPolicy::default(),
            checksum_seed: 0,
            read_command: READ_COMMAND,
        }
    }
}

/// Raw register values of one packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPacket {
    pub frame_header: u8,
    /// Fast current RMS, not converted.
    pub i_fast_rms: u32,
    pub i_rms: u32,
    pub v_rms: u32,
    /// Active power, negative when power flows back.
    pub watt: i32,
    /// Energy pulse counter, wraps at 2^24.
    pub cf_cnt: u32,
    /// Internal temperature.
    pub tps1: u16,
    /// External temperature.
    pub tps2: u16,
    pub checksum: u8,
}

impl DataPacket {
    /// Decodes the register fields of a packet without validating it.
    pub fn decode(raw: &[u8; FRAME_SIZE]) -> Self {
        Self {
            frame_header: raw[OFFSET_HEADER],
            i_fast_rms: u24_at(raw, OFFSET_I_FAST_RMS),
            i_rms: u24_at(raw, OFFSET_I_RMS),
            v_rms: u24_at(raw, OFFSET_V_RMS),
            watt: i24_at(raw, OFFSET_WATT),
            cf_cnt: u24_at(raw, OFFSET_CF_CNT),
            tps1: u16_at(raw, OFFSET_TPS1),
            tps2: u16_at(raw, OFFSET_TPS2),
            checksum: raw[OFFSET_CHECKSUM],
        }
    }

    /// Checks header and checksum according to `format`, then decodes.
    pub fn validate(raw: &[u8; FRAME_SIZE], format: &FrameFormat) -> Result<Self, Error> {
        let header = raw[OFFSET_HEADER];
        if !format.header.accepts(header) {
            return Err(Error::UnexpectedHeader(header));
        }
        validate_checksum_with_seed(format.checksum_seed, raw)?;
        Ok(Self::decode(raw))
    }

    /// Like [`DataPacket::validate`] for a slice, which must hold exactly one packet.
    pub fn validate_slice(raw: &[u8], format: &FrameFormat) -> Result<Self, Error> {
        let raw: &[u8; FRAME_SIZE] = raw.try_into().map_err(|_| Error::FrameSize {
            expected: FRAME_SIZE,
            received: raw.len(),
        })?;
        Self::validate(raw, format)
    }
}
