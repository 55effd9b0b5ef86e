//! Adaptive run-length (MEL) decoding of the HT cleanup segment.
//!
//! The MEL bit-stream starts at `Pcup` and grows forward, sharing its last
//! bytes with the VLC stream that grows backward from the segment end.

/// Run-length exponents of the 13 MEL states.
const MEL_EXPONENTS: [u8; 13] = [0, 0, 0, 1, 1, 1, 2, 2, 2, 3, 3, 4, 5];

pub struct MelDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    byte: u8,
    bits: u8,
    k: usize,
    run: u32,
    one: bool,
}

impl<'a> MelDecoder<'a> {
    /// `data` is the cleanup segment and `start` the MEL offset in it.
    pub fn new(data: &'a [u8], start: usize) -> Self {
        Self {
            data,
            pos: start,
            byte: 0,
            bits: 0,
            k: 0,
            run: 0,
            one: false,
        }
    }

    /// MSB first; a byte following 0xFF carries 7 bits. Past the end the
    /// stream reads as ones.
    fn read_bit(&mut self) -> u32 {
        if self.bits == 0 {
            self.bits = if self.byte == 0xFF { 7 } else { 8 };
            self.byte = match self.data.get(self.pos) {
                Some(&b) => {
                    self.pos += 1;
                    b
                }
                None => 0xFF,
            };
        }
        self.bits -= 1;
        ((self.byte >> self.bits) & 1) as u32
    }

    /// Next MEL symbol: 0 while inside a run of insignificant quads.
    pub fn decode(&mut self) -> u32 {
        if self.run == 0 && !self.one {
            let exponent = MEL_EXPONENTS[self.k];
            if self.read_bit() == 1 {
                self.run = 1 << exponent;
                self.k = (self.k + 1).min(12);
            } else {
                self.run = 0;
                for _ in 0..exponent {
                    self.run = (self.run << 1) | self.read_bit();
                }
                self.k = self.k.saturating_sub(1);
                self.one = true;
            }
        }
        if self.run > 0 {
            self.run -= 1;
            0
        } else {
            self.one = false;
            1
        }
    }
}
