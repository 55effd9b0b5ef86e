//! Encoders used to build test inputs for the decoding stages.

use super::bit_io::J2kBitWriter;
use super::bit_plane_coder::{
    ref_ctx, set_significance, sig_ctx, sign_ctx, REF, SIG, SIG_NB, VIS, VSC_MASK,
};
use super::image::J2kCodeBlock;
use super::mq_coder::{initial_contexts, MqContext, CX_RL, CX_UNI, MQ_TABLE, NUM_CONTEXTS};
use super::packet::needs_termination;
use super::tag_tree::build_parent_links;
use crate::constants::{CBLK_RESET, CBLK_SEGSYM, CBLK_VSC, INITIAL_LBLOCK};

/// Tag tree encoder (B.10.2). Parents hold the minimum of their children.
pub struct TagTreeEncoder {
    parents: Vec<Option<usize>>,
    values: Vec<i32>,
    low: Vec<i32>,
    known: Vec<bool>,
}

impl TagTreeEncoder {
    pub fn new(w: usize, h: usize, leaves: &[i32]) -> Self {
        let parents = build_parent_links(w, h);
        let mut values = vec![i32::MAX; parents.len()];
        values[..leaves.len()].copy_from_slice(leaves);
        for i in 0..parents.len() {
            if let Some(p) = parents[i] {
                values[p] = values[p].min(values[i]);
            }
        }
        let n = parents.len();
        Self {
            parents,
            values,
            low: vec![0; n],
            known: vec![false; n],
        }
    }

    pub fn encode(&mut self, writer: &mut J2kBitWriter, leaf: usize, threshold: i32) {
        let mut path = vec![leaf];
        let mut node = leaf;
        while let Some(parent) = self.parents[node] {
            path.push(parent);
            node = parent;
        }
        let mut low = 0;
        for &node in path.iter().rev() {
            low = low.max(self.low[node]);
            while low < threshold {
                if low >= self.values[node] {
                    if !self.known[node] {
                        writer.write_bit(1);
                        self.known[node] = true;
                    }
                    break;
                }
                writer.write_bit(0);
                low += 1;
            }
            self.low[node] = low;
        }
    }
}

/// MQ encoder of C.2.
pub struct MqEncoder {
    /// Output, with a leading placeholder byte standing in for BP - 1.
    out: Vec<u8>,
    a: u32,
    c: u32,
    ct: u32,
    contexts: [MqContext; NUM_CONTEXTS],
}

impl MqEncoder {
    pub fn new() -> Self {
        Self::with_contexts(initial_contexts())
    }

    pub fn with_contexts(contexts: [MqContext; NUM_CONTEXTS]) -> Self {
        Self {
            out: vec![0],
            a: 0x8000,
            c: 0,
            ct: 12,
            contexts,
        }
    }

    pub fn contexts(&self) -> [MqContext; NUM_CONTEXTS] {
        self.contexts
    }

    pub fn reset_contexts(&mut self) {
        self.contexts = initial_contexts();
    }

    fn last(&self) -> u8 {
        self.out[self.out.len() - 1]
    }

    fn byte_out(&mut self) {
        if self.last() == 0xFF {
            self.out.push((self.c >> 20) as u8);
            self.c &= 0xF_FFFF;
            self.ct = 7;
        } else if self.c < 0x800_0000 {
            self.out.push((self.c >> 19) as u8);
            self.c &= 0x7_FFFF;
            self.ct = 8;
        } else {
            let n = self.out.len();
            self.out[n - 1] = self.out[n - 1].wrapping_add(1);
            if self.last() == 0xFF {
                self.c &= 0x7FF_FFFF;
                self.out.push((self.c >> 20) as u8);
                self.c &= 0xF_FFFF;
                self.ct = 7;
            } else {
                self.out.push((self.c >> 19) as u8);
                self.c &= 0x7_FFFF;
                self.ct = 8;
            }
        }
    }

    fn renorm(&mut self) {
        loop {
            self.a <<= 1;
            self.c <<= 1;
            self.ct -= 1;
            if self.ct == 0 {
                self.byte_out();
            }
            if self.a & 0x8000 != 0 {
                break;
            }
        }
    }

    pub fn encode(&mut self, bit: u32, cx: usize) {
        let ctx = self.contexts[cx];
        let state = MQ_TABLE[ctx.state as usize];
        let qe = state.qe;
        if bit == ctx.mps as u32 {
            self.a -= qe;
            if self.a & 0x8000 == 0 {
                if self.a < qe {
                    self.a = qe;
                } else {
                    self.c += qe;
                }
                self.contexts[cx].state = state.nmps;
                self.renorm();
            } else {
                self.c += qe;
            }
        } else {
            self.a -= qe;
            if self.a < qe {
                self.c += qe;
            } else {
                self.a = qe;
            }
            if state.switch {
                self.contexts[cx].mps = 1 - ctx.mps;
            }
            self.contexts[cx].state = state.nlps;
            self.renorm();
        }
    }

    /// FLUSH: terminates the codeword and returns its bytes. The encoder
    /// keeps its contexts and starts a fresh codeword.
    pub fn finish(&mut self) -> Vec<u8> {
        let temp = self.c + self.a;
        self.c |= 0xFFFF;
        if self.c >= temp {
            self.c -= 0x8000;
        }
        self.c <<= self.ct;
        self.byte_out();
        self.c <<= self.ct;
        self.byte_out();
        if self.last() == 0xFF {
            self.out.pop();
        }
        let bytes = self.out.split_off(1);
        self.out = vec![0];
        self.a = 0x8000;
        self.c = 0;
        self.ct = 12;
        bytes
    }
}

/// Raw (bypass) bit packer: a byte after 0xFF holds 7 bits.
pub struct RawEncoder {
    out: Vec<u8>,
    c: u8,
    ct: u8,
}

impl RawEncoder {
    pub fn new() -> Self {
        Self {
            out: Vec::new(),
            c: 0,
            ct: 8,
        }
    }

    pub fn encode(&mut self, bit: u32) {
        self.ct -= 1;
        self.c |= ((bit & 1) as u8) << self.ct;
        if self.ct == 0 {
            self.out.push(self.c);
            self.ct = if self.c == 0xFF { 7 } else { 8 };
            self.c = 0;
        }
    }

    pub fn finish(mut self) -> Vec<u8> {
        let full = if self.out.last() == Some(&0xFF) { 7 } else { 8 };
        if self.ct != full {
            self.out.push(self.c);
        }
        self.out
    }
}

enum SymbolCoder {
    Mq(MqEncoder),
    Raw(RawEncoder),
}

impl SymbolCoder {
    fn encode(&mut self, bit: u32, cx: usize) {
        match self {
            SymbolCoder::Mq(mq) => mq.encode(bit, cx),
            SymbolCoder::Raw(raw) => raw.encode(bit),
        }
    }

    fn is_raw(&self) -> bool {
        matches!(self, SymbolCoder::Raw(_))
    }

    fn mq(&mut self) -> &mut MqEncoder {
        match self {
            SymbolCoder::Mq(mq) => mq,
            SymbolCoder::Raw(_) => panic!("raw coder in cleanup pass"),
        }
    }
}

struct T1Encoder {
    magnitudes: Vec<u32>,
    negative: Vec<bool>,
    width: usize,
    height: usize,
    stride: usize,
    flags: Vec<u16>,
    band_position: usize,
    vsc: bool,
    segsym: bool,
}

impl T1Encoder {
    fn masked(&self, i: usize, y: usize, y0: usize) -> u16 {
        if self.vsc && y == y0 + 3 {
            self.flags[i] & VSC_MASK
        } else {
            self.flags[i]
        }
    }

    fn bit(&self, x: usize, y: usize, plane: u32) -> u32 {
        (self.magnitudes[y * self.width + x] >> plane) & 1
    }

    fn significance_pass(&mut self, coder: &mut SymbolCoder, plane: u32) {
        for y0 in (0..self.height).step_by(4) {
            for x in 0..self.width {
                for y in y0..(y0 + 4).min(self.height) {
                    let i = (y + 1) * self.stride + x + 1;
                    let flags = self.flags[i];
                    if flags & SIG_NB == 0 || flags & (SIG | VIS) != 0 {
                        continue;
                    }
                    let masked = self.masked(i, y, y0);
                    let bit = self.bit(x, y, plane);
                    coder.encode(bit, sig_ctx(masked, self.band_position));
                    if bit != 0 {
                        let negative = self.negative[y * self.width + x];
                        let (cx, xor) = sign_ctx(masked);
                        let symbol = if coder.is_raw() {
                            negative as u32
                        } else {
                            negative as u32 ^ xor
                        };
                        coder.encode(symbol, cx);
                        set_significance(&mut self.flags, self.stride, x, y, negative);
                    }
                    self.flags[i] |= VIS;
                }
            }
        }
    }

    fn refinement_pass(&mut self, coder: &mut SymbolCoder, plane: u32) {
        for y0 in (0..self.height).step_by(4) {
            for x in 0..self.width {
                for y in y0..(y0 + 4).min(self.height) {
                    let i = (y + 1) * self.stride + x + 1;
                    if self.flags[i] & (SIG | VIS) != SIG {
                        continue;
                    }
                    let masked = self.masked(i, y, y0);
                    coder.encode(self.bit(x, y, plane), ref_ctx(masked));
                    self.flags[i] |= REF;
                }
            }
        }
    }

    fn code_sample(&mut self, mq: &mut MqEncoder, x: usize, y: usize, y0: usize, plane: u32, sig_known: bool) {
        let i = (y + 1) * self.stride + x + 1;
        let masked = self.masked(i, y, y0);
        let bit = self.bit(x, y, plane);
        if !sig_known {
            if masked & (SIG | VIS) != 0 {
                self.flags[i] &= !VIS;
                return;
            }
            mq.encode(bit, sig_ctx(masked, self.band_position));
        }
        if bit != 0 {
            let negative = self.negative[y * self.width + x];
            let (cx, xor) = sign_ctx(masked);
            mq.encode(negative as u32 ^ xor, cx);
            set_significance(&mut self.flags, self.stride, x, y, negative);
        }
        self.flags[i] &= !VIS;
    }

    fn cleanup_pass(&mut self, mq: &mut MqEncoder, plane: u32) {
        let busy = SIG_NB | VIS | SIG;
        let last_mask = if self.vsc { VSC_MASK } else { u16::MAX };
        for y0 in (0..self.height).step_by(4) {
            for x in 0..self.width {
                let column = (y0 + 1) * self.stride + x + 1;
                let run_mode = y0 + 3 < self.height
                    && self.flags[column] & busy == 0
                    && self.flags[column + self.stride] & busy == 0
                    && self.flags[column + 2 * self.stride] & busy == 0
                    && self.flags[column + 3 * self.stride] & busy & last_mask == 0;
                if run_mode {
                    let run = (0..4)
                        .position(|r| self.bit(x, y0 + r, plane) != 0)
                        .unwrap_or(4);
                    mq.encode((run != 4) as u32, CX_RL);
                    if run == 4 {
                        continue;
                    }
                    mq.encode((run >> 1) as u32, CX_UNI);
                    mq.encode((run & 1) as u32, CX_UNI);
                    self.code_sample(mq, x, y0 + run, y0, plane, true);
                    for y in (y0 + run + 1)..(y0 + 4) {
                        self.code_sample(mq, x, y, y0, plane, false);
                    }
                } else {
                    for y in y0..(y0 + 4).min(self.height) {
                        self.code_sample(mq, x, y, y0, plane, false);
                    }
                }
            }
        }
        if self.segsym {
            for bit in [1, 0, 1, 0] {
                mq.encode(bit, CX_UNI);
            }
        }
    }
}

/// Encodes integer coefficients into a classic code-block laid out the way
/// packet decoding leaves it: terminated segments are followed by two 0xFF
/// bytes and start offsets are recorded in `data_start`.
pub fn encode_codeblock(
    values: &[i32],
    width: usize,
    height: usize,
    band_position: usize,
    cblk_style: u8,
    magnitude_bits: u8,
) -> J2kCodeBlock {
    let magnitudes: Vec<u32> = values.iter().map(|v| v.unsigned_abs()).collect();
    let max = magnitudes.iter().copied().max().unwrap_or(0);
    let nonzerobits = 32 - max.leading_zeros();
    assert!(nonzerobits <= magnitude_bits as u32);

    let mut cblk = J2kCodeBlock {
        lblock: INITIAL_LBLOCK,
        data_start: vec![0],
        included: true,
        nonzerobits: nonzerobits as u8,
        zbp: magnitude_bits - nonzerobits as u8,
        ..Default::default()
    };
    if nonzerobits == 0 {
        return cblk;
    }

    let stride = width + 2;
    let mut encoder = T1Encoder {
        negative: values.iter().map(|&v| v < 0).collect(),
        magnitudes,
        width,
        height,
        stride,
        flags: vec![0; stride * (height + 2)],
        band_position,
        vsc: cblk_style & CBLK_VSC != 0,
        segsym: cblk_style & CBLK_SEGSYM != 0,
    };

    let npasses = 3 * nonzerobits - 2;
    let mut coder = SymbolCoder::Mq(MqEncoder::new());
    let mut contexts = initial_contexts();
    let mut plane = nonzerobits - 1;
    let mut pass_type = 2;
    for passno in 0..npasses {
        match pass_type {
            0 => encoder.significance_pass(&mut coder, plane),
            1 => encoder.refinement_pass(&mut coder, plane),
            _ => encoder.cleanup_pass(coder.mq(), plane),
        }
        if let SymbolCoder::Mq(mq) = &mut coder {
            if cblk_style & CBLK_RESET != 0 {
                mq.reset_contexts();
            }
            contexts = mq.contexts();
        } else if cblk_style & CBLK_RESET != 0 {
            contexts = initial_contexts();
        }

        let kind = needs_termination(cblk_style, passno);
        let last = passno + 1 == npasses;
        if kind != 0 || last {
            let bytes = match &mut coder {
                SymbolCoder::Mq(mq) => mq.finish(),
                SymbolCoder::Raw(raw) => std::mem::replace(raw, RawEncoder::new()).finish(),
            };
            cblk.data.extend_from_slice(&bytes);
            if kind != 0 {
                cblk.data.extend_from_slice(&[0xFF, 0xFF]);
                cblk.data_start.push(cblk.data.len());
                cblk.nb_terminations += 1;
            }
            coder = if kind == 2 {
                SymbolCoder::Raw(RawEncoder::new())
            } else {
                SymbolCoder::Mq(MqEncoder::with_contexts(contexts))
            };
        }

        pass_type += 1;
        if pass_type == 3 {
            pass_type = 0;
            plane = plane.wrapping_sub(1);
        }
    }
    cblk.npasses = npasses;
    cblk
}

fn write_pass_count(writer: &mut J2kBitWriter, npasses: u32) {
    match npasses {
        1 => writer.write_bit(0),
        2 => writer.write_bits(0b10, 2),
        3..=5 => writer.write_bits(0b1100 | (npasses - 3), 4),
        6..=36 => writer.write_bits((0b1111 << 5) | (npasses - 6), 9),
        _ => writer.write_bits((0x1FF << 7) | (npasses - 37), 16),
    }
}

/// First-layer packet of a precinct holding the single code-block `cblk`,
/// header followed by body.
pub fn single_block_packet(cblk: &J2kCodeBlock) -> Vec<u8> {
    let mut writer = J2kBitWriter::new();
    if cblk.npasses == 0 {
        writer.write_bit(0);
        return writer.finish();
    }
    writer.write_bit(1);
    TagTreeEncoder::new(1, 1, &[0]).encode(&mut writer, 0, 1);
    let zbp = cblk.zbp as i32;
    TagTreeEncoder::new(1, 1, &[zbp]).encode(&mut writer, 0, zbp + 1);
    write_pass_count(&mut writer, cblk.npasses);

    let length = cblk.data.len() as u32;
    let length_bits = 32 - length.leading_zeros();
    let pass_bits = 31 - cblk.npasses.leading_zeros();
    let mut lblock = INITIAL_LBLOCK as u32;
    while lblock + pass_bits < length_bits {
        writer.write_bit(1);
        lblock += 1;
    }
    writer.write_bit(0);
    writer.write_bits(length, (lblock + pass_bits) as u8);

    let mut packet = writer.finish();
    packet.extend_from_slice(&cblk.data);
    packet
}

/// A single-tile, single-layer codestream without decomposition levels:
/// one 5/3 code-block per component carrying `coefficients[c]`, no
/// quantization, two guard bits and band exponent `depth`.
pub fn lossless_codestream(
    width: u32,
    height: u32,
    depth: u8,
    mct: bool,
    coefficients: &[Vec<i32>],
) -> Vec<u8> {
    let ncomp = coefficients.len() as u16;
    let mut out = vec![0xFF, 0x4F, 0xFF, 0x51];
    out.extend_from_slice(&(38 + 3 * ncomp).to_be_bytes());
    out.extend_from_slice(&[0x00, 0x00]);
    for v in [width, height, 0, 0, width, height, 0, 0] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.extend_from_slice(&ncomp.to_be_bytes());
    for _ in 0..ncomp {
        out.extend_from_slice(&[depth - 1, 1, 1]);
    }
    // COD: LRCP, one layer, no levels, 64x64 code-blocks, 5/3
    out.extend_from_slice(&[0xFF, 0x52, 0x00, 0x0C, 0x00, 0x00, 0x00, 0x01, mct as u8]);
    out.extend_from_slice(&[0x00, 0x04, 0x04, 0x00, 0x01]);
    // QCD
    out.extend_from_slice(&[0xFF, 0x5C, 0x00, 0x04, 0x40, depth << 3]);

    let mut body = Vec::new();
    for values in coefficients {
        let cblk = encode_codeblock(values, width as usize, height as usize, 0, 0, depth + 1);
        body.extend(single_block_packet(&cblk));
    }
    out.extend_from_slice(&[0xFF, 0x90, 0x00, 0x0A, 0x00, 0x00]);
    out.extend_from_slice(&(14 + body.len() as u32).to_be_bytes());
    out.extend_from_slice(&[0x00, 0x01, 0xFF, 0x93]);
    out.extend(body);
    out.extend_from_slice(&[0xFF, 0xD9]);
    out
}
