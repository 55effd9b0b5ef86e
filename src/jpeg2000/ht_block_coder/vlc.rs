//! Backward-growing bit-streams of the HT block coder: the CxtVLC / U-VLC
//! stream at the end of the cleanup segment and the MagRef stream at the end
//! of the refinement segment.

use super::vlc_tables::{VLC_TABLE_INITIAL, VLC_TABLE_NON_INITIAL};

/// Reads bytes from high to low addresses, LSB first. A byte whose low 7 bits
/// are all set and whose successor (the previously read byte) is above 0x8F
/// carries a stuffed MSB and contributes 7 bits. Below the start the stream
/// reads as zeros.
pub struct BackwardReader<'a> {
    data: &'a [u8],
    /// Index of the next byte to read, -1 once exhausted.
    pos: isize,
    last: u8,
    buf: u64,
    bits_left: u32,
}

impl<'a> BackwardReader<'a> {
    /// Starts at `data[start]`; `last` stands in for the byte after it.
    pub fn new(data: &'a [u8], start: isize, last: u8) -> Self {
        Self {
            data,
            pos: start.min(data.len() as isize - 1),
            last,
            buf: 0,
            bits_left: 0,
        }
    }

    fn refill(&mut self) {
        while self.bits_left <= 32 {
            let byte = if self.pos >= 0 {
                let b = self.data[self.pos as usize];
                self.pos -= 1;
                b
            } else {
                0
            };
            let bits = if self.last > 0x8F && byte & 0x7F == 0x7F { 7 } else { 8 };
            self.buf |= ((byte as u64) & ((1 << bits) - 1)) << self.bits_left;
            self.bits_left += bits;
            self.last = byte;
        }
    }

    #[inline]
    pub fn peek(&mut self, count: u32) -> u32 {
        if self.bits_left < count {
            self.refill();
        }
        (self.buf & ((1u64 << count) - 1)) as u32
    }

    #[inline]
    pub fn drop_bits(&mut self, count: u32) {
        if self.bits_left < count {
            self.refill();
        }
        self.buf >>= count;
        self.bits_left -= count;
    }

    pub fn read(&mut self, count: u32) -> u32 {
        let v = self.peek(count);
        self.drop_bits(count);
        v
    }
}

/// Result of one CxtVLC codeword.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuadVlc {
    /// Significance pattern of the four samples.
    pub rho: u8,
    pub u_off: u8,
    pub e_k: u8,
    pub e_1: u8,
}

/// Decodes a CxtVLC codeword in context `context` (0..8).
pub fn decode_quad_vlc(reader: &mut BackwardReader, context: u32, initial_row: bool) -> QuadVlc {
    let table = if initial_row {
        &VLC_TABLE_INITIAL
    } else {
        &VLC_TABLE_NON_INITIAL
    };
    let index = (reader.peek(7) | (context << 7)) as usize;
    let entry = table[index & 0x3FF];
    reader.drop_bits(((entry & 0x0F) >> 1) as u32);
    QuadVlc {
        u_off: (entry & 1) as u8,
        rho: ((entry >> 4) & 0x0F) as u8,
        e_k: ((entry >> 8) & 0x0F) as u8,
        e_1: ((entry >> 12) & 0x0F) as u8,
    }
}

/// U-VLC prefix (1, 2, 3 or 5).
pub fn decode_u_prefix(reader: &mut BackwardReader) -> u32 {
    const VALUE: [u8; 8] = [5, 1, 2, 1, 3, 1, 2, 1];
    const LENGTH: [u8; 8] = [3, 1, 2, 1, 3, 1, 2, 1];
    let bits = reader.peek(3) as usize;
    reader.drop_bits(LENGTH[bits] as u32);
    VALUE[bits] as u32
}

pub fn decode_u_suffix(reader: &mut BackwardReader, prefix: u32) -> u32 {
    match prefix {
        0..=2 => 0,
        3 => reader.read(1),
        _ => reader.read(5),
    }
}

pub fn decode_u_extension(reader: &mut BackwardReader, suffix: u32) -> u32 {
    if suffix >= 28 {
        reader.read(4)
    } else {
        0
    }
}

/// Full unsigned residual: prefix, suffix and extension.
pub fn decode_u(reader: &mut BackwardReader) -> u32 {
    let prefix = decode_u_prefix(reader);
    let suffix = decode_u_suffix(reader, prefix);
    let extension = decode_u_extension(reader, suffix);
    prefix + suffix + 4 * extension
}
