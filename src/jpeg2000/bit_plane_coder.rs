//! Classic tier-1 decoding of one code-block: significance propagation,
//! magnitude refinement and cleanup passes over stripes of four rows
//! (ISO/IEC 15444-1 Annex D).
//!
//! Coefficients come out as sign-magnitude words (bit 31 is the sign). A
//! bit-plane `b` of a band with `Mb` magnitude bits lands at bit
//! `b + 31 - Mb - roi_shift` and each significant sample carries a half-LSB
//! reconstruction bit below its last decoded plane.

use super::image::J2kCodeBlock;
use super::mq_coder::{MqDecoder, CX_RL, CX_UNI};
use super::packet::needs_termination;
use crate::constants::{CBLK_RESET, CBLK_SEGSYM, CBLK_VSC};
use crate::error::J2kError;
use log::{trace, warn};

pub(crate) const SIG_N: u16 = 0x0001;
pub(crate) const SIG_E: u16 = 0x0002;
pub(crate) const SIG_W: u16 = 0x0004;
pub(crate) const SIG_S: u16 = 0x0008;
pub(crate) const SIG_NE: u16 = 0x0010;
pub(crate) const SIG_NW: u16 = 0x0020;
pub(crate) const SIG_SE: u16 = 0x0040;
pub(crate) const SIG_SW: u16 = 0x0080;
pub(crate) const SIG_NB: u16 = 0x00FF;
pub(crate) const SGN_N: u16 = 0x0100;
pub(crate) const SGN_S: u16 = 0x0200;
pub(crate) const SGN_W: u16 = 0x0400;
pub(crate) const SGN_E: u16 = 0x0800;
pub(crate) const VIS: u16 = 0x1000;
pub(crate) const SIG: u16 = 0x2000;
pub(crate) const REF: u16 = 0x4000;

/// Neighbours below the last row of a stripe, ignored with vertically
/// causal context formation.
pub(crate) const VSC_MASK: u16 = !(SIG_S | SIG_SW | SIG_SE | SGN_S);

const SEGMENTATION_SYMBOL: u32 = 0xA;

const fn bit(flags: u16, mask: u16) -> u32 {
    (flags & mask != 0) as u32
}

/// Table D.1. `band_position` is 0 for LL, 1 HL, 2 LH, 3 HH.
const fn sig_context(flags: u16, band_position: usize) -> u8 {
    let h = bit(flags, SIG_E) + bit(flags, SIG_W);
    let v = bit(flags, SIG_N) + bit(flags, SIG_S);
    let d = bit(flags, SIG_NE) + bit(flags, SIG_NW) + bit(flags, SIG_SE) + bit(flags, SIG_SW);

    if band_position < 3 {
        let (h, v) = if band_position == 1 { (v, h) } else { (h, v) };
        if h == 2 {
            8
        } else if h == 1 {
            if v >= 1 {
                7
            } else if d >= 1 {
                6
            } else {
                5
            }
        } else if v == 2 {
            4
        } else if v == 1 {
            3
        } else if d >= 2 {
            2
        } else {
            d as u8
        }
    } else {
        let hv = h + v;
        if d >= 3 {
            8
        } else if d == 2 {
            if hv >= 1 {
                7
            } else {
                6
            }
        } else if d == 1 {
            if hv >= 2 {
                5
            } else if hv == 1 {
                4
            } else {
                3
            }
        } else if hv >= 2 {
            2
        } else {
            hv as u8
        }
    }
}

const fn contribution(significant: bool, negative: bool) -> i32 {
    if !significant {
        0
    } else if negative {
        -1
    } else {
        1
    }
}

const fn clamp_unit(v: i32) -> i32 {
    if v > 1 {
        1
    } else if v < -1 {
        -1
    } else {
        v
    }
}

/// Tables D.2 and D.3. The key holds SIG_N/E/W/S in its low nibble and
/// SGN_N/S/W/E in its high nibble. Bit 7 of the result is the XOR bit.
const fn sign_context(key: usize) -> u8 {
    let north = contribution(key & 0x01 != 0, key & 0x10 != 0);
    let east = contribution(key & 0x02 != 0, key & 0x80 != 0);
    let west = contribution(key & 0x04 != 0, key & 0x40 != 0);
    let south = contribution(key & 0x08 != 0, key & 0x20 != 0);
    let h = clamp_unit(east + west);
    let v = clamp_unit(north + south);

    let context = match (h, v) {
        (0, 0) => 9,
        (0, _) => 10,
        (_, 0) => 12,
        (h, v) if h == v => 13,
        _ => 11,
    };
    let xor = h < 0 || (h == 0 && v < 0);
    context | if xor { 0x80 } else { 0 }
}

const fn build_sig_contexts() -> [[u8; 256]; 4] {
    let mut lut = [[0u8; 256]; 4];
    let mut band = 0;
    while band < 4 {
        let mut flags = 0;
        while flags < 256 {
            lut[band][flags] = sig_context(flags as u16, band);
            flags += 1;
        }
        band += 1;
    }
    lut
}

const fn build_sign_contexts() -> [u8; 256] {
    let mut lut = [0u8; 256];
    let mut key = 0;
    while key < 256 {
        lut[key] = sign_context(key);
        key += 1;
    }
    lut
}

static SIG_CONTEXTS: [[u8; 256]; 4] = build_sig_contexts();
static SIGN_CONTEXTS: [u8; 256] = build_sign_contexts();

#[inline]
pub(crate) fn sig_ctx(flags: u16, band_position: usize) -> usize {
    SIG_CONTEXTS[band_position][(flags & SIG_NB) as usize] as usize
}

/// Sign context and XOR bit.
#[inline]
pub(crate) fn sign_ctx(flags: u16) -> (usize, u32) {
    let key = (flags & 0x0F) | ((flags >> 4) & 0xF0);
    let v = SIGN_CONTEXTS[key as usize];
    ((v & 0x7F) as usize, (v >> 7) as u32)
}

#[inline]
pub(crate) fn ref_ctx(flags: u16) -> usize {
    if flags & REF != 0 {
        16
    } else if flags & SIG_NB != 0 {
        15
    } else {
        14
    }
}

/// Marks sample (x, y) significant in a flag grid with a one-sample border.
pub(crate) fn set_significance(flags: &mut [u16], stride: usize, x: usize, y: usize, negative: bool) {
    let i = (y + 1) * stride + x + 1;
    flags[i] |= SIG;
    if negative {
        flags[i + 1] |= SIG_W | SGN_W;
        flags[i - 1] |= SIG_E | SGN_E;
        flags[i + stride] |= SIG_N | SGN_N;
        flags[i - stride] |= SIG_S | SGN_S;
    } else {
        flags[i + 1] |= SIG_W;
        flags[i - 1] |= SIG_E;
        flags[i + stride] |= SIG_N;
        flags[i - stride] |= SIG_S;
    }
    flags[i + stride + 1] |= SIG_NW;
    flags[i + stride - 1] |= SIG_NE;
    flags[i - stride + 1] |= SIG_SW;
    flags[i - stride - 1] |= SIG_SE;
}

/// Per-band parameters of a code-block.
#[derive(Debug, Clone, Copy)]
pub struct CodeBlockParams {
    pub cblk_style: u8,
    /// 0 LL, 1 HL, 2 LH, 3 HH.
    pub band_position: usize,
    pub magnitude_bits: u8,
    pub roi_shift: u8,
    pub strict: bool,
}

/// Converts signed samples to sign-magnitude words and undoes the Maxshift
/// scaling of background coefficients.
pub(crate) fn finish_block(data: &mut [i32], magnitude_bits: u8, roi_shift: u8) {
    let roi_mask = roi_background_mask(magnitude_bits);
    for v in data.iter_mut() {
        let negative = *v < 0;
        let mag = descale_roi(v.unsigned_abs(), roi_mask, roi_shift);
        *v = if negative {
            (mag | 0x8000_0000) as i32
        } else {
            mag as i32
        };
    }
}

/// Magnitudes at or below this value carry no bit at or above `31 - Mb` and
/// belong to the background of a Maxshift ROI.
pub(crate) fn roi_background_mask(magnitude_bits: u8) -> u32 {
    u32::MAX.checked_shr(magnitude_bits as u32 + 1).unwrap_or(0)
}

#[inline]
pub(crate) fn descale_roi(mag: u32, roi_mask: u32, roi_shift: u8) -> u32 {
    if roi_shift > 0 && mag <= roi_mask {
        ((mag as u64) << roi_shift).min(0x7FFF_FFFF) as u32
    } else {
        mag
    }
}

/// Reusable state for decoding code-blocks one after another.
#[derive(Default)]
pub struct BitPlaneDecoder {
    width: usize,
    height: usize,
    stride: usize,
    data: Vec<i32>,
    flags: Vec<u16>,
}

impl BitPlaneDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self, width: usize, height: usize) -> Result<(), J2kError> {
        self.width = width;
        self.height = height;
        self.stride = width + 2;
        self.data.clear();
        self.data.try_reserve(width * height)?;
        self.data.resize(width * height, 0);
        self.flags.clear();
        self.flags.try_reserve(self.stride * (height + 2))?;
        self.flags.resize(self.stride * (height + 2), 0);
        Ok(())
    }

    /// Decodes `cblk` into `width * height` sign-magnitude words.
    pub fn decode(
        &mut self,
        cblk: &J2kCodeBlock,
        width: usize,
        height: usize,
        params: &CodeBlockParams,
    ) -> Result<&[i32], J2kError> {
        self.reset(width, height)?;
        if cblk.npasses == 0 || cblk.nonzerobits == 0 || cblk.data.is_empty() {
            return Ok(&self.data);
        }

        let style = params.cblk_style;
        let vsc = style & CBLK_VSC != 0;
        let mut mq = MqDecoder::new(&cblk.data);
        let mut raw = false;
        let mut term = 0usize;
        let mut pass_type = 2;
        let mut plane = cblk.nonzerobits as i32 - 1 + 31
            - params.magnitude_bits as i32
            - params.roi_shift as i32;
        // One cleanup pass on the first bit-plane, three passes on each one below.
        if (1..=30).contains(&plane) && cblk.npasses as i32 > 3 * plane - 2 {
            trace!("{} passes over {} bit-planes", cblk.npasses, plane);
            return Err(J2kError::InvalidCodingPassCount);
        }

        for passno in 0..cblk.npasses {
            if !(1..=30).contains(&plane) {
                trace!("bit-plane {} in pass {}", plane, passno);
                return Err(J2kError::InvalidBitplane);
            }
            let plane_bit = plane as u32;
            match pass_type {
                0 => self.significance_pass(&mut mq, plane_bit, params.band_position, vsc, raw),
                1 => self.refinement_pass(&mut mq, plane_bit, vsc, raw),
                _ => self.cleanup_pass(
                    &mut mq,
                    plane_bit,
                    params.band_position,
                    vsc,
                    style & CBLK_SEGSYM != 0,
                ),
            }
            if style & CBLK_RESET != 0 {
                mq.reset_contexts();
            }

            let kind = needs_termination(style, passno);
            if passno + 1 < cblk.npasses && kind != 0 {
                if term >= cblk.nb_terminations {
                    return Err(J2kError::MissingTermination);
                }
                // Terminated segments carry two 0xFF bytes past their end.
                let Some(&next_start) = cblk.data_start.get(term + 1) else {
                    return Err(J2kError::MissingTermination);
                };
                let expected = next_start.saturating_sub(2);
                let position = mq.position();
                if position > expected {
                    if params.strict {
                        return Err(J2kError::TerminationMismatch);
                    }
                    warn!(
                        "coder read {} bytes past segment end in pass {} of {}",
                        position - expected,
                        passno,
                        cblk.npasses
                    );
                } else if position < expected {
                    trace!(
                        "{} bytes left in segment after pass {}",
                        expected - position,
                        passno
                    );
                }
                term += 1;
                raw = kind == 2;
                if raw {
                    mq.init_raw(next_start);
                } else {
                    mq.init(next_start);
                }
            }

            pass_type += 1;
            if pass_type == 3 {
                pass_type = 0;
                plane -= 1;
            }
        }

        let end = if cblk.data_start.last() == Some(&cblk.data.len()) {
            cblk.data.len().saturating_sub(2)
        } else {
            cblk.data.len()
        };
        if mq.position() + 2 < end {
            trace!("end mismatch: {} bytes unread", end - mq.position());
        }

        finish_block(&mut self.data, params.magnitude_bits, params.roi_shift);
        Ok(&self.data)
    }

    #[inline]
    fn decode_symbol(mq: &mut MqDecoder, cx: usize, raw: bool) -> u32 {
        if raw {
            mq.decode_raw()
        } else {
            mq.decode(cx)
        }
    }

    fn significance_pass(
        &mut self,
        mq: &mut MqDecoder,
        plane: u32,
        band_position: usize,
        vsc: bool,
        raw: bool,
    ) {
        let magnitude = 3i32 << (plane - 1);
        let stride = self.stride;
        for y0 in (0..self.height).step_by(4) {
            for x in 0..self.width {
                for y in y0..(y0 + 4).min(self.height) {
                    let i = (y + 1) * stride + x + 1;
                    let flags = self.flags[i];
                    if flags & SIG_NB == 0 || flags & (SIG | VIS) != 0 {
                        continue;
                    }
                    let masked = if vsc && y == y0 + 3 { flags & VSC_MASK } else { flags };
                    if Self::decode_symbol(mq, sig_ctx(masked, band_position), raw) != 0 {
                        let negative = if raw {
                            mq.decode_raw() != 0
                        } else {
                            let (cx, xor) = sign_ctx(masked);
                            mq.decode(cx) ^ xor != 0
                        };
                        self.data[y * self.width + x] = if negative { -magnitude } else { magnitude };
                        set_significance(&mut self.flags, stride, x, y, negative);
                    }
                    self.flags[i] |= VIS;
                }
            }
        }
    }

    fn refinement_pass(&mut self, mq: &mut MqDecoder, plane: u32, vsc: bool, raw: bool) {
        let half = 1i32 << (plane - 1);
        let stride = self.stride;
        for y0 in (0..self.height).step_by(4) {
            for x in 0..self.width {
                for y in y0..(y0 + 4).min(self.height) {
                    let i = (y + 1) * stride + x + 1;
                    let flags = self.flags[i];
                    if flags & (SIG | VIS) != SIG {
                        continue;
                    }
                    let masked = if vsc && y == y0 + 3 { flags & VSC_MASK } else { flags };
                    let r = if Self::decode_symbol(mq, ref_ctx(masked), raw) != 0 {
                        half
                    } else {
                        -half
                    };
                    let v = &mut self.data[y * self.width + x];
                    *v += if *v < 0 { -r } else { r };
                    self.flags[i] |= REF;
                }
            }
        }
    }

    fn cleanup_pass(
        &mut self,
        mq: &mut MqDecoder,
        plane: u32,
        band_position: usize,
        vsc: bool,
        segmentation_symbols: bool,
    ) {
        let magnitude = 3i32 << (plane - 1);
        let stride = self.stride;
        let busy = SIG_NB | VIS | SIG;
        for y0 in (0..self.height).step_by(4) {
            for x in 0..self.width {
                let column = (y0 + 1) * stride + x + 1;
                let last_mask = if vsc { VSC_MASK } else { u16::MAX };
                let mut run_length = 0;
                let mut significant = false;
                if y0 + 3 < self.height
                    && self.flags[column] & busy == 0
                    && self.flags[column + stride] & busy == 0
                    && self.flags[column + 2 * stride] & busy == 0
                    && self.flags[column + 3 * stride] & busy & last_mask == 0
                {
                    if mq.decode(CX_RL) == 0 {
                        continue;
                    }
                    run_length = mq.decode(CX_UNI) as usize;
                    run_length = (run_length << 1) | mq.decode(CX_UNI) as usize;
                    significant = true;
                }

                for y in (y0 + run_length)..(y0 + 4).min(self.height) {
                    let i = (y + 1) * stride + x + 1;
                    let masked = if vsc && y == y0 + 3 {
                        self.flags[i] & VSC_MASK
                    } else {
                        self.flags[i]
                    };
                    if !significant && masked & (SIG | VIS) == 0 {
                        significant = mq.decode(sig_ctx(masked, band_position)) != 0;
                    }
                    if significant {
                        let (cx, xor) = sign_ctx(masked);
                        let negative = mq.decode(cx) ^ xor != 0;
                        self.data[y * self.width + x] = if negative { -magnitude } else { magnitude };
                        set_significance(&mut self.flags, stride, x, y, negative);
                    }
                    significant = false;
                    self.flags[i] &= !VIS;
                }
            }
        }

        if segmentation_symbols {
            let mut symbol = 0;
            for _ in 0..4 {
                symbol = (symbol << 1) | mq.decode(CX_UNI);
            }
            if symbol != SEGMENTATION_SYMBOL {
                warn!("segmentation symbol {:#x}, expected 0xa", symbol);
            }
        }
    }
}
