//! Forward-growing bit-streams of the HT block coder.
//!
//! MagSgn carries the magnitude and sign bits of the cleanup pass and grows
//! from the start of the cleanup segment up to `Pcup`. SigProp carries the
//! significance propagation bits and grows from the start of the refinement
//! segment. Both are read LSB first and a byte that follows 0xFF carries 7
//! bits.

/// MagSgn reader. Past the end the stream reads as ones.
pub struct MagSgnReader<'a> {
    data: &'a [u8],
    pos: usize,
    last: u8,
    buf: u64,
    bits_left: u32,
}

impl<'a> MagSgnReader<'a> {
    /// `data` is the prefix of the cleanup segment, `Dcup[..Pcup]`.
    pub fn new(data: &'a [u8]) -> Self {
        let mut reader = Self {
            data,
            pos: 0,
            last: 0,
            buf: 0,
            bits_left: 0,
        };
        reader.refill();
        reader
    }

    fn refill(&mut self) {
        while self.bits_left < 32 {
            let bits = if self.last == 0xFF { 7 } else { 8 };
            let byte = match self.data.get(self.pos) {
                Some(&b) => {
                    self.pos += 1;
                    self.last = b;
                    b
                }
                None => 0xFF,
            };
            self.buf |= ((byte as u64) & ((1 << bits) - 1)) << self.bits_left;
            self.bits_left += bits;
        }
    }

    /// Reads `count` bits (at most 31).
    pub fn read(&mut self, count: u32) -> u32 {
        if self.bits_left <= count {
            self.refill();
        }
        let v = (self.buf & ((1u64 << count) - 1)) as u32;
        self.buf >>= count;
        self.bits_left -= count;
        v
    }
}

/// SigProp reader. Past the end the stream reads as zeros.
pub struct SigPropReader<'a> {
    data: &'a [u8],
    pos: usize,
    last: u8,
    byte: u8,
    bits: u8,
}

impl<'a> SigPropReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            last: 0,
            byte: 0,
            bits: 0,
        }
    }

    pub fn read_bit(&mut self) -> u32 {
        if self.bits == 0 {
            self.bits = if self.last == 0xFF { 7 } else { 8 };
            self.byte = match self.data.get(self.pos) {
                Some(&b) => {
                    self.pos += 1;
                    b
                }
                None => 0,
            };
            self.last = self.byte;
        }
        let bit = self.byte & 1;
        self.byte >>= 1;
        self.bits -= 1;
        bit as u32
    }
}
