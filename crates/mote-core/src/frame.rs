//! Bit-addressable frame buffer.
//!
//! A [`Frame`] owns the bytes of one message plus a base offset and a logical
//! data length, so the payload of a wrapped packet can be addressed without
//! copying it out of the packet first.
//!
//! # Bit addressing
//!
//! Offsets and widths are counted in bits relative to the base offset.  Bits
//! are numbered MSB-first: bit 0 is the most significant bit of the first
//! payload byte, and a value spanning several bytes is read big-endian.
//!
//! ```text
//! bytes:   0x00      0x01      0x00      0x64
//! bits:    0........ 8........ 16....... 24.......
//! read(0, 16)  = 0x0001
//! read(16, 16) = 0x0064
//! ```

use thiserror::Error;

/// Errors raised by frame accessors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    /// The requested bit range extends past the logical end of the frame.
    ///
    /// During decode this is a per-field condition: the caller skips the
    /// field and carries on with the next one.
    #[error("frame too short: need {needed_bits} bits, frame holds {available_bits}")]
    TooShort {
        needed_bits: usize,
        available_bits: usize,
    },

    /// Bit widths must lie in `1..=64`.
    #[error("invalid bit width {0}: must be between 1 and 64")]
    InvalidWidth(usize),

    /// The base offset and data length do not fit inside the buffer.
    #[error("window [{base_offset}, {base_offset}+{data_length}) exceeds buffer of {buffer_len} bytes")]
    InvalidWindow {
        base_offset: usize,
        data_length: usize,
        buffer_len: usize,
    },
}

/// A byte buffer with MSB-first bit accessors.
///
/// Frames are created per message and owned exclusively by the decode or
/// encode call that created them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    base_offset: usize,
    data_length: usize,
}

impl Frame {
    /// Creates a zero-filled frame of `data_length` bytes.
    pub fn new(data_length: usize) -> Self {
        Self {
            data: vec![0u8; data_length],
            base_offset: 0,
            data_length,
        }
    }

    /// Wraps an existing buffer; the whole buffer is the logical data.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        let data_length = data.len();
        Self {
            data,
            base_offset: 0,
            data_length,
        }
    }

    /// Wraps a buffer whose logical data starts at `base_offset` and spans
    /// `data_length` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidWindow`] if the window does not fit in the
    /// buffer.
    pub fn with_offset(
        data: Vec<u8>,
        base_offset: usize,
        data_length: usize,
    ) -> Result<Self, FrameError> {
        if base_offset
            .checked_add(data_length)
            .map_or(true, |end| end > data.len())
        {
            return Err(FrameError::InvalidWindow {
                base_offset,
                data_length,
                buffer_len: data.len(),
            });
        }
        Ok(Self {
            data,
            base_offset,
            data_length,
        })
    }

    /// Logical length in bytes.
    pub fn data_length(&self) -> usize {
        self.data_length
    }

    /// Byte offset of the logical data inside the buffer.
    pub fn base_offset(&self) -> usize {
        self.base_offset
    }

    /// Returns `true` if the logical data is empty.
    pub fn is_empty(&self) -> bool {
        self.data_length == 0
    }

    /// The logical data (the window selected by base offset and length).
    pub fn as_bytes(&self) -> &[u8] {
        &self.data[self.base_offset..self.base_offset + self.data_length]
    }

    /// The whole underlying buffer, including any bytes before the base offset.
    pub fn buffer(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the frame and returns the underlying buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Reads `bit_width` bits starting at `bit_offset` as an unsigned value.
    ///
    /// # Errors
    ///
    /// - [`FrameError::InvalidWidth`] if the width is 0 or larger than 64.
    /// - [`FrameError::TooShort`] if the range extends past the logical end.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use mote_core::Frame;
    ///
    /// let frame = Frame::from_bytes(vec![0x00, 0x01, 0x00, 0x64]);
    /// assert_eq!(frame.read(0, 16).unwrap(), 1);
    /// assert_eq!(frame.read(16, 16).unwrap(), 100);
    /// ```
    pub fn read(&self, bit_offset: usize, bit_width: usize) -> Result<u64, FrameError> {
        self.check_range(bit_offset, bit_width)?;

        let mut value: u64 = 0;
        let mut pos = bit_offset;
        let mut remaining = bit_width;
        while remaining > 0 {
            let byte = self.data[self.base_offset + pos / 8];
            let available = 8 - pos % 8;
            let take = available.min(remaining);
            let shift = available - take;
            let bits = (byte >> shift) & low_mask(take);
            value = (value << take) | u64::from(bits);
            pos += take;
            remaining -= take;
        }
        Ok(value)
    }

    /// Reads `bit_width` bits and sign-extends them from the top bit.
    ///
    /// # Errors
    ///
    /// Same as [`Frame::read`].
    pub fn read_signed(&self, bit_offset: usize, bit_width: usize) -> Result<i64, FrameError> {
        let raw = self.read(bit_offset, bit_width)?;
        if bit_width == 64 {
            return Ok(raw as i64);
        }
        let shift = 64 - bit_width;
        Ok(((raw << shift) as i64) >> shift)
    }

    /// Writes the low `bit_width` bits of `value` starting at `bit_offset`.
    ///
    /// Bits of `value` above `bit_width` are ignored; range checking of the
    /// logical value is the encoder's job.
    ///
    /// # Errors
    ///
    /// Same as [`Frame::read`].
    pub fn write(&mut self, bit_offset: usize, bit_width: usize, value: u64) -> Result<(), FrameError> {
        self.check_range(bit_offset, bit_width)?;

        let mut pos = bit_offset;
        let mut remaining = bit_width;
        while remaining > 0 {
            let index = self.base_offset + pos / 8;
            let available = 8 - pos % 8;
            let take = available.min(remaining);
            let shift = available - take;
            let mask = low_mask(take) << shift;
            let bits = ((value >> (remaining - take)) as u8) & low_mask(take);
            self.data[index] = (self.data[index] & !mask) | (bits << shift);
            pos += take;
            remaining -= take;
        }
        Ok(())
    }

    fn check_range(&self, bit_offset: usize, bit_width: usize) -> Result<(), FrameError> {
        if bit_width == 0 || bit_width > 64 {
            return Err(FrameError::InvalidWidth(bit_width));
        }
        let available_bits = self.data_length * 8;
        let needed_bits = bit_offset.saturating_add(bit_width);
        if needed_bits > available_bits {
            return Err(FrameError::TooShort {
                needed_bits,
                available_bits,
            });
        }
        Ok(())
    }
}

/// Mask with the lowest `bits` bits set (`bits` in `1..=8`).
fn low_mask(bits: usize) -> u8 {
    ((1u16 << bits) - 1) as u8
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_byte_aligned_big_endian_words() {
        let frame = Frame::from_bytes(vec![0x00, 0x01, 0x00, 0x64]);
        assert_eq!(frame.read(0, 16), Ok(1));
        assert_eq!(frame.read(16, 16), Ok(100));
        assert_eq!(frame.read(0, 32), Ok(0x0001_0064));
    }

    #[test]
    fn test_read_unaligned_bits_across_byte_boundary() {
        // 0b1011_0110 0b1100_0000 → bits 4..10 are 0110_11
        let frame = Frame::from_bytes(vec![0b1011_0110, 0b1100_0000]);
        assert_eq!(frame.read(4, 6), Ok(0b01_1011));
        assert_eq!(frame.read(0, 1), Ok(1));
        assert_eq!(frame.read(1, 1), Ok(0));
    }

    #[test]
    fn test_read_full_64_bits() {
        let frame = Frame::from_bytes(vec![0xFF; 8]);
        assert_eq!(frame.read(0, 64), Ok(u64::MAX));
    }

    #[test]
    fn test_read_past_end_returns_too_short() {
        let frame = Frame::from_bytes(vec![0x00, 0x01]);
        assert_eq!(
            frame.read(8, 16),
            Err(FrameError::TooShort {
                needed_bits: 24,
                available_bits: 16
            })
        );
    }

    #[test]
    fn test_read_zero_width_is_rejected() {
        let frame = Frame::new(4);
        assert_eq!(frame.read(0, 0), Err(FrameError::InvalidWidth(0)));
        assert_eq!(frame.read(0, 65), Err(FrameError::InvalidWidth(65)));
    }

    #[test]
    fn test_read_signed_sign_extends() {
        let frame = Frame::from_bytes(vec![0xFF, 0xFE]);
        assert_eq!(frame.read_signed(0, 16), Ok(-2));
        assert_eq!(frame.read_signed(0, 4), Ok(-1));
        assert_eq!(frame.read_signed(8, 8), Ok(-2));
    }

    #[test]
    fn test_read_respects_base_offset_and_length() {
        // Arrange: 2 header bytes, 2 payload bytes, 1 trailing byte outside the window
        let frame = Frame::with_offset(vec![0xAA, 0xBB, 0x12, 0x34, 0xCC], 2, 2).unwrap();

        // Assert
        assert_eq!(frame.read(0, 16), Ok(0x1234));
        assert!(matches!(frame.read(16, 8), Err(FrameError::TooShort { .. })));
        assert_eq!(frame.as_bytes(), &[0x12, 0x34]);
        assert_eq!(frame.buffer().len(), 5);
    }

    #[test]
    fn test_with_offset_rejects_window_outside_buffer() {
        let result = Frame::with_offset(vec![0u8; 4], 3, 2);
        assert!(matches!(result, Err(FrameError::InvalidWindow { .. })));
    }

    #[test]
    fn test_write_then_read_unaligned_value() {
        let mut frame = Frame::new(3);
        frame.write(3, 13, 0x1ABC).unwrap();
        assert_eq!(frame.read(3, 13), Ok(0x1ABC));
        // Bits outside the written range stay zero
        assert_eq!(frame.read(0, 3), Ok(0));
        assert_eq!(frame.read(16, 8), Ok(0));
    }

    #[test]
    fn test_write_preserves_neighbouring_bits() {
        let mut frame = Frame::from_bytes(vec![0xFF, 0xFF]);
        frame.write(4, 8, 0x00).unwrap();
        assert_eq!(frame.as_bytes(), &[0xF0, 0x0F]);
    }

    #[test]
    fn test_write_truncates_value_to_width() {
        let mut frame = Frame::new(1);
        frame.write(0, 4, 0xFF).unwrap();
        assert_eq!(frame.as_bytes(), &[0xF0]);
    }

    #[test]
    fn test_write_past_end_returns_too_short() {
        let mut frame = Frame::new(1);
        assert!(matches!(frame.write(4, 8, 1), Err(FrameError::TooShort { .. })));
    }
}
