//! MQ arithmetic decoder (ISO/IEC 15444-1 Annex C) and the raw bit reader
//! used by the selective arithmetic coding bypass (D.6).

#[derive(Clone, Copy)]
pub(crate) struct MqContextState {
    pub(crate) qe: u32,
    pub(crate) nmps: u8,
    pub(crate) nlps: u8,
    pub(crate) switch: bool,
}

const fn st(qe: u32, nmps: u8, nlps: u8, switch: u8) -> MqContextState {
    MqContextState {
        qe,
        nmps,
        nlps,
        switch: switch != 0,
    }
}

// Table C.2: Qe, NMPS, NLPS, SWITCH.
pub(crate) const MQ_TABLE: [MqContextState; 47] = [
    st(0x5601, 1, 1, 1),
    st(0x3401, 2, 6, 0),
    st(0x1801, 3, 9, 0),
    st(0x0AC1, 4, 12, 0),
    st(0x0521, 5, 29, 0),
    st(0x0221, 38, 33, 0),
    st(0x5601, 7, 6, 1),
    st(0x5401, 8, 14, 0),
    st(0x4801, 9, 14, 0),
    st(0x3801, 10, 14, 0),
    st(0x3001, 11, 17, 0),
    st(0x2401, 12, 18, 0),
    st(0x1C01, 13, 20, 0),
    st(0x1601, 29, 21, 0),
    st(0x5601, 15, 14, 1),
    st(0x5401, 16, 14, 0),
    st(0x5101, 17, 15, 0),
    st(0x4801, 18, 16, 0),
    st(0x3801, 19, 17, 0),
    st(0x3401, 20, 18, 0),
    st(0x3001, 21, 19, 0),
    st(0x2801, 22, 19, 0),
    st(0x2401, 23, 20, 0),
    st(0x2201, 24, 21, 0),
    st(0x1C01, 25, 22, 0),
    st(0x1801, 26, 23, 0),
    st(0x1601, 27, 24, 0),
    st(0x1401, 28, 25, 0),
    st(0x1201, 29, 26, 0),
    st(0x1101, 30, 27, 0),
    st(0x0AC1, 31, 28, 0),
    st(0x09C1, 32, 29, 0),
    st(0x08A1, 33, 30, 0),
    st(0x0521, 34, 31, 0),
    st(0x0441, 35, 32, 0),
    st(0x02A1, 36, 33, 0),
    st(0x0221, 37, 34, 0),
    st(0x0141, 38, 35, 0),
    st(0x0111, 39, 36, 0),
    st(0x0085, 40, 37, 0),
    st(0x0049, 41, 38, 0),
    st(0x0025, 42, 39, 0),
    st(0x0015, 43, 40, 0),
    st(0x0009, 44, 41, 0),
    st(0x0005, 45, 42, 0),
    st(0x0001, 45, 43, 0),
    st(0x5601, 46, 46, 0),
];

/// Number of tier-1 contexts: 9 significance, 5 sign, 3 refinement, run
/// length and uniform.
pub const NUM_CONTEXTS: usize = 19;
pub const CX_RL: usize = 17;
pub const CX_UNI: usize = 18;

/// A context: index into [`MQ_TABLE`] and the MPS value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MqContext {
    pub state: u8,
    pub mps: u8,
}

/// Initial states of Table D.7.
pub fn initial_contexts() -> [MqContext; NUM_CONTEXTS] {
    let mut contexts = [MqContext::default(); NUM_CONTEXTS];
    contexts[0].state = 4;
    contexts[CX_RL].state = 3;
    contexts[CX_UNI].state = 46;
    contexts
}

/// Decoder over the data of one code-block. Bytes outside the data read as
/// 0xFF, which the decoder treats as a marker and pads with 1 bits.
pub struct MqDecoder<'a> {
    data: &'a [u8],
    /// Byte pointer (BP).
    pos: usize,
    a: u32,
    c: u32,
    ct: u32,
    contexts: [MqContext; NUM_CONTEXTS],
}

impl<'a> MqDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let mut decoder = Self {
            data,
            pos: 0,
            a: 0x8000,
            c: 0,
            ct: 0,
            contexts: initial_contexts(),
        };
        decoder.init(0);
        decoder
    }

    #[inline]
    fn byte_at(&self, pos: usize) -> u32 {
        self.data.get(pos).copied().unwrap_or(0xFF) as u32
    }

    /// INITDEC at byte `start`. The contexts are kept.
    pub fn init(&mut self, start: usize) {
        self.pos = start;
        self.c = self.byte_at(start) << 16;
        self.byte_in();
        self.c <<= 7;
        self.ct -= 7;
        self.a = 0x8000;
    }

    /// Starts a raw segment at byte `start`.
    pub fn init_raw(&mut self, start: usize) {
        self.pos = start;
        self.c = 0;
        self.ct = 0;
    }

    pub fn reset_contexts(&mut self) {
        self.contexts = initial_contexts();
    }

    /// Byte pointer, relative to the start of the data.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn byte_in(&mut self) {
        if self.byte_at(self.pos) == 0xFF {
            let next = self.byte_at(self.pos + 1);
            if next > 0x8F {
                self.c = self.c.wrapping_add(0xFF00);
                self.ct = 8;
            } else {
                self.pos += 1;
                self.c = self.c.wrapping_add(next << 9);
                self.ct = 7;
            }
        } else {
            self.pos += 1;
            self.c = self.c.wrapping_add(self.byte_at(self.pos) << 8);
            self.ct = 8;
        }
    }

    fn renorm(&mut self) {
        loop {
            if self.ct == 0 {
                self.byte_in();
            }
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    /// DECODE (C.3.2) in context `cx`.
    pub fn decode(&mut self, cx: usize) -> u32 {
        let ctx = self.contexts[cx];
        let state = MQ_TABLE[ctx.state as usize];
        let qe = state.qe;
        self.a -= qe;

        let d;
        if (self.c >> 16) < qe {
            // LPS_EXCHANGE
            if self.a < qe {
                d = ctx.mps;
                self.contexts[cx].state = state.nmps;
            } else {
                d = 1 - ctx.mps;
                if state.switch {
                    self.contexts[cx].mps = 1 - ctx.mps;
                }
                self.contexts[cx].state = state.nlps;
            }
            self.a = qe;
            self.renorm();
        } else {
            self.c -= qe << 16;
            if self.a & 0x8000 != 0 {
                return ctx.mps as u32;
            }
            // MPS_EXCHANGE
            if self.a < qe {
                d = 1 - ctx.mps;
                if state.switch {
                    self.contexts[cx].mps = 1 - ctx.mps;
                }
                self.contexts[cx].state = state.nlps;
            } else {
                d = ctx.mps;
                self.contexts[cx].state = state.nmps;
            }
            self.renorm();
        }
        d as u32
    }

    /// One bit of a raw (bypass) segment. A byte following 0xFF carries 7
    /// bits; 0xFF followed by a marker code reads as ones.
    pub fn decode_raw(&mut self) -> u32 {
        if self.ct == 0 {
            if self.c == 0xFF {
                if self.byte_at(self.pos) > 0x8F {
                    self.c = 0xFF;
                    self.ct = 8;
                } else {
                    self.c = self.byte_at(self.pos);
                    self.pos += 1;
                    self.ct = 7;
                }
            } else {
                self.c = self.byte_at(self.pos);
                self.pos += 1;
                self.ct = 8;
            }
        }
        self.ct -= 1;
        (self.c >> self.ct) & 1
    }
}
