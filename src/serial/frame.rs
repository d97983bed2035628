//! MH-Z19 frame format and response reassembly.
//!
//! Every request and response is exactly nine bytes:
//!
//! ```text
//! +------+---------+-------+-------+-------+-------+-------+-------+----------+
//! | 0xFF | command | data0 | data1 | data2 | data3 | data4 | data5 | checksum |
//! +------+---------+-------+-------+-------+-------+-------+-------+----------+
//! ```
//!
//! Requests carry the sensor number (always 1) in the command position and the
//! opcode in `data0`; responses echo the opcode in the command position.

use bytes::{Buf, BytesMut};
use std::fmt;

/// Length of every request and response frame.
pub const FRAME_LEN: usize = 9;

/// First byte of every frame.
pub const START_BYTE: u8 = 0xFF;

/// Opcode for reading the CO2 concentration.
pub const READ_CO2: u8 = 0x86;

/// Opcode for switching automatic baseline correction on or off.
pub const ABC_LOGIC: u8 = 0x79;

/// Turns automatic baseline correction off.
pub const DISABLE_ABC_COMMAND: [u8; FRAME_LEN] =
    [0xFF, 0x01, ABC_LOGIC, 0x00, 0x00, 0x00, 0x00, 0x00, 0x86];

/// Requests the current CO2 concentration.
pub const READ_CO2_COMMAND: [u8; FRAME_LEN] =
    [0xFF, 0x01, READ_CO2, 0x00, 0x00, 0x00, 0x00, 0x00, 0x79];

/// Compute the checksum of a frame: the two's complement of the sum of bytes
/// 1 through 7.
pub fn checksum(frame: &[u8; FRAME_LEN]) -> u8 {
    let sum = frame[1..FRAME_LEN - 1]
        .iter()
        .fold(0u8, |acc, b| acc.wrapping_add(*b));
    (!sum).wrapping_add(1)
}

/// A complete nine-byte frame received from the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame([u8; FRAME_LEN]);

impl Frame {
    pub fn new(bytes: [u8; FRAME_LEN]) -> Self {
        Frame(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }

    pub fn starts_with_marker(&self) -> bool {
        self.0[0] == START_BYTE
    }

    /// The command byte echoed by the sensor.
    pub fn command(&self) -> u8 {
        self.0[1]
    }

    /// Big-endian 16-bit value in bytes 2 and 3.
    pub fn value(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    pub fn checksum_valid(&self) -> bool {
        checksum(&self.0) == self.0[FRAME_LEN - 1]
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        Ok(())
    }
}

/// Accumulates bytes from a noisy stream until a complete frame is available.
///
/// Bytes preceding the first start byte are discarded. The assembler never
/// asks for more than the remainder of the current frame, see [`needed`].
///
/// [`needed`]: FrameAssembler::needed
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: BytesMut,
    discarded: usize,
}

impl FrameAssembler {
    pub fn new() -> Self {
        FrameAssembler {
            buffer: BytesMut::with_capacity(FRAME_LEN),
            discarded: 0,
        }
    }

    /// Add received bytes, dropping any noise ahead of the start byte.
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        while !self.buffer.is_empty() && self.buffer[0] != START_BYTE {
            self.buffer.advance(1);
            self.discarded += 1;
        }
    }

    /// Number of bytes still missing from the current frame.
    pub fn needed(&self) -> usize {
        FRAME_LEN.saturating_sub(self.buffer.len())
    }

    /// Number of bytes collected so far, counting from the start byte.
    pub fn collected(&self) -> usize {
        self.buffer.len()
    }

    /// Number of noise bytes dropped since the last [`reset`](Self::reset).
    pub fn discarded(&self) -> usize {
        self.discarded
    }

    /// Take the next complete frame, if one has been assembled.
    pub fn take_frame(&mut self) -> Option<Frame> {
        if self.buffer.len() < FRAME_LEN {
            return None;
        }
        let mut bytes = [0u8; FRAME_LEN];
        self.buffer.copy_to_slice(&mut bytes);
        Some(Frame(bytes))
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.discarded = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_checksums() {
        assert_eq!(checksum(&DISABLE_ABC_COMMAND), DISABLE_ABC_COMMAND[8]);
        assert_eq!(checksum(&READ_CO2_COMMAND), READ_CO2_COMMAND[8]);
    }

    #[test]
    fn test_frame_accessors() {
        let frame = Frame::new([0xFF, 0x86, 0x01, 0x2C, 0x47, 0x00, 0x00, 0x00, 0x06]);
        assert!(frame.starts_with_marker());
        assert_eq!(frame.command(), READ_CO2);
        assert_eq!(frame.value(), 300);
        assert!(frame.checksum_valid());

        let corrupted = Frame::new([0xFF, 0x86, 0x01, 0x2D, 0x47, 0x00, 0x00, 0x00, 0x06]);
        assert!(!corrupted.checksum_valid());
    }

    #[test]
    fn test_frame_display_is_hex() {
        let frame = Frame::new(READ_CO2_COMMAND);
        assert_eq!(frame.to_string(), "FF 01 86 00 00 00 00 00 79");
    }

    #[test]
    fn test_assembler_skips_leading_noise() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0x00, 0x13, 0xFF, 0x86]);
        assert_eq!(assembler.discarded(), 2);
        assert_eq!(assembler.collected(), 2);
        assert_eq!(assembler.needed(), 7);
        assert_eq!(assembler.take_frame(), None);

        assembler.push(&[0x01, 0x2C, 0x47, 0x00, 0x00, 0x00, 0x06]);
        assert_eq!(assembler.needed(), 0);
        let frame = assembler.take_frame().unwrap();
        assert_eq!(frame.value(), 300);
        assert_eq!(assembler.collected(), 0);
    }

    #[test]
    fn test_assembler_discards_noise_only_reads() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0x01, 0x02, 0x03]);
        assert_eq!(assembler.collected(), 0);
        assert_eq!(assembler.needed(), FRAME_LEN);
        assert_eq!(assembler.discarded(), 3);
    }

    #[test]
    fn test_assembler_keeps_start_byte_inside_frame() {
        // 0xFF inside the payload must not restart the frame.
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0xFF, 0x86, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x7C]);
        let frame = assembler.take_frame().unwrap();
        assert_eq!(frame.value(), 0xFFFF);
    }

    #[test]
    fn test_assembler_reset() {
        let mut assembler = FrameAssembler::new();
        assembler.push(&[0x00, 0xFF, 0x86]);
        assembler.reset();
        assert_eq!(assembler.collected(), 0);
        assert_eq!(assembler.discarded(), 0);
    }
}
