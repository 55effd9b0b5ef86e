use crate::error::J2kError;
use thiserror::Error;

/// Raised when a bit reader runs off the end of its data.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("bitstream exhausted")]
pub struct BitstreamExhausted;

impl From<BitstreamExhausted> for J2kError {
    fn from(_: BitstreamExhausted) -> Self {
        J2kError::BitstreamExhausted
    }
}

/// MSB-first reader for packet headers (B.10.1).
///
/// A byte following 0xFF carries only 7 bits; its most significant bit is the
/// stuffed zero and is skipped.
pub struct J2kBitReader<'a> {
    data: &'a [u8],
    pos: usize,
    bit_index: u8,
}

impl<'a> J2kBitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_position(data, 0)
    }

    /// Starts reading at byte `pos` of `data`.
    pub fn with_position(data: &'a [u8], pos: usize) -> Self {
        Self {
            data,
            pos,
            bit_index: 8,
        }
    }

    pub fn read_bit(&mut self) -> Result<u32, BitstreamExhausted> {
        if self.bit_index == 0 {
            let prev = *self.data.get(self.pos).ok_or(BitstreamExhausted)?;
            self.pos += 1;
            self.bit_index = if prev == 0xFF { 7 } else { 8 };
        }
        let byte = *self.data.get(self.pos).ok_or(BitstreamExhausted)?;
        self.bit_index -= 1;
        Ok(((byte >> self.bit_index) & 1) as u32)
    }

    pub fn read_bits(&mut self, count: u8) -> Result<u32, BitstreamExhausted> {
        let mut bits = 0u32;
        for _ in 0..count {
            bits = (bits << 1) | self.read_bit()?;
        }
        Ok(bits)
    }

    /// Byte-aligns after a packet header. The partially read byte is consumed,
    /// plus the stuffed byte if it was 0xFF.
    pub fn flush(&mut self) {
        if let Some(&byte) = self.data.get(self.pos) {
            self.pos += 1;
            if byte == 0xFF && self.pos < self.data.len() {
                self.pos += 1;
            }
        }
        self.bit_index = 8;
    }

    /// Byte position of the byte currently being read.
    pub fn position(&self) -> usize {
        self.pos
    }
}

/// Writer counterpart of [`J2kBitReader`], used to build packet headers in tests.
#[cfg(test)]
pub struct J2kBitWriter {
    data: Vec<u8>,
    bit_buffer: u8,
    bits_count: u8,
    capacity: u8,
}

#[cfg(test)]
impl J2kBitWriter {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            bit_buffer: 0,
            bits_count: 0,
            capacity: 8,
        }
    }

    pub fn write_bit(&mut self, bit: u32) {
        self.bit_buffer = (self.bit_buffer << 1) | (bit & 1) as u8;
        self.bits_count += 1;
        if self.bits_count == self.capacity {
            self.flush_byte();
        }
    }

    pub fn write_bits(&mut self, value: u32, count: u8) {
        for i in (0..count).rev() {
            self.write_bit((value >> i) & 1);
        }
    }

    fn flush_byte(&mut self) {
        let b = self.bit_buffer;
        self.data.push(b);
        self.capacity = if b == 0xFF { 7 } else { 8 };
        self.bit_buffer = 0;
        self.bits_count = 0;
    }

    /// Pads the last byte with zeros. A trailing 0xFF gets its stuffing byte so
    /// that [`J2kBitReader::flush`] lands on the next byte.
    pub fn finish(mut self) -> Vec<u8> {
        if self.bits_count > 0 {
            self.bit_buffer <<= self.capacity - self.bits_count;
            self.flush_byte();
        }
        if self.data.last() == Some(&0xFF) {
            self.data.push(0x00);
        }
        self.data
    }
}
