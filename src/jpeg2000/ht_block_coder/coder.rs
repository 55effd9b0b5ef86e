//! HT cleanup pass: quad significance from MEL and CxtVLC, exponent bounds
//! from the U-VLC residuals and neighbouring exponents, magnitudes and signs
//! from MagSgn (15444-15, 7.3).

use super::mag_sgn::MagSgnReader;
use super::mel::MelDecoder;
use super::vlc::{
    decode_quad_vlc, decode_u, decode_u_extension, decode_u_prefix, decode_u_suffix,
    BackwardReader, QuadVlc,
};
use super::{HtBuffers, STATE_SIGMA};
use crate::error::J2kError;
use log::debug;

pub struct CleanupDecoder<'a> {
    mel: MelDecoder<'a>,
    vlc: BackwardReader<'a>,
    mag_sgn: MagSgnReader<'a>,
    /// Bit position of the cleanup LSB.
    p_lsb: u32,
    /// Largest admissible exponent bound.
    max_bound: u32,
}

/// Per-sample results in quad order: `(x,y)`, `(x,y+1)`, `(x+1,y)`,
/// `(x+1,y+1)` for each quad, quads in raster order.
struct QuadSamples {
    sigma: Vec<u8>,
    exponent: Vec<u8>,
    mu: Vec<u32>,
}

impl<'a> CleanupDecoder<'a> {
    /// `dcup` is the cleanup segment with its last two bytes already
    /// rewritten (`0xFF` and low nibble set) and `pcup` the MagSgn length.
    pub fn new(dcup: &'a [u8], pcup: usize, p_lsb: u32, max_bound: u32) -> Self {
        let suffix = &dcup[pcup..];
        let mut vlc = BackwardReader::new(suffix, suffix.len() as isize - 2, 0xFF);
        vlc.drop_bits(4);
        Self {
            mel: MelDecoder::new(dcup, pcup),
            vlc,
            mag_sgn: MagSgnReader::new(&dcup[..pcup]),
            p_lsb,
            max_bound,
        }
    }

    fn decode_significance(&mut self, context: u32, initial_row: bool) -> QuadVlc {
        if context == 0 && self.mel.decode() == 0 {
            return QuadVlc::default();
        }
        decode_quad_vlc(&mut self.vlc, context, initial_row)
    }

    /// Unsigned residuals of a quad pair (7.3.6). `u_off[1]` is 0 when the
    /// row ends with a single quad.
    fn decode_residuals(&mut self, u_off: [u8; 2], initial_row: bool) -> [u32; 2] {
        let vlc = &mut self.vlc;
        match (u_off[0], u_off[1]) {
            (1, 1) if initial_row && self.mel.decode() == 1 => {
                let (p1, p2) = (decode_u_prefix(vlc), decode_u_prefix(vlc));
                let (s1, s2) = (decode_u_suffix(vlc, p1), decode_u_suffix(vlc, p2));
                let (e1, e2) = (decode_u_extension(vlc, s1), decode_u_extension(vlc, s2));
                [2 + p1 + s1 + 4 * e1, 2 + p2 + s2 + 4 * e2]
            }
            (1, 1) if initial_row => {
                let p1 = decode_u_prefix(vlc);
                if p1 > 2 {
                    let u2 = vlc.read(1) + 1;
                    let s1 = decode_u_suffix(vlc, p1);
                    let e1 = decode_u_extension(vlc, s1);
                    [p1 + s1 + 4 * e1, u2]
                } else {
                    let p2 = decode_u_prefix(vlc);
                    let (s1, s2) = (decode_u_suffix(vlc, p1), decode_u_suffix(vlc, p2));
                    let (e1, e2) = (decode_u_extension(vlc, s1), decode_u_extension(vlc, s2));
                    [p1 + s1 + 4 * e1, p2 + s2 + 4 * e2]
                }
            }
            (1, 1) => {
                let (p1, p2) = (decode_u_prefix(vlc), decode_u_prefix(vlc));
                let (s1, s2) = (decode_u_suffix(vlc, p1), decode_u_suffix(vlc, p2));
                let (e1, e2) = (decode_u_extension(vlc, s1), decode_u_extension(vlc, s2));
                [p1 + s1 + 4 * e1, p2 + s2 + 4 * e2]
            }
            (1, _) => [decode_u(vlc), 0],
            (_, 1) => [0, decode_u(vlc)],
            _ => [0, 0],
        }
    }

    fn recover_magnitudes(
        &mut self,
        samples: &mut QuadSamples,
        q: usize,
        quad: &QuadVlc,
        bound: u32,
    ) {
        for i in 0..4 {
            let n = 4 * q + i;
            let m = samples.sigma[n] as i32 * bound as i32 - ((quad.e_k >> i) & 1) as i32;
            if m <= 0 {
                continue;
            }
            let m = m as u32;
            let known_one = ((quad.e_1 >> i) & 1) as u32;
            let v = self.mag_sgn.read(m) + (known_one << m);
            samples.exponent[n] = (32 - (v | 1).leading_zeros()) as u8;
            samples.mu[n] = (((v >> 1) + 1) << self.p_lsb)
                | (1 << (self.p_lsb - 1))
                | ((v & 1) << 31);
        }
    }

    /// Decodes the cleanup pass into `buffers`.
    pub fn decode(
        &mut self,
        width: usize,
        height: usize,
        buffers: &mut HtBuffers,
    ) -> Result<(), J2kError> {
        let quad_width = width.div_ceil(2);
        let quad_height = height.div_ceil(2);
        let count = 4 * quad_width * quad_height;
        let mut samples = QuadSamples {
            sigma: zeroed(count)?,
            exponent: zeroed(count)?,
            mu: zeroed(count)?,
        };

        for row in 0..quad_height {
            let initial_row = row == 0;
            let row_start = row * quad_width;
            let row_end = row_start + quad_width;
            let mut context = 0u32;
            let mut q = row_start;
            while q < row_end {
                let pair = q + 1 < row_end;
                let mut quads = [QuadVlc::default(); 2];
                for (k, quad) in quads.iter_mut().enumerate().take(if pair { 2 } else { 1 }) {
                    let qk = q + k;
                    if !initial_row {
                        context = row_context(&samples.sigma, qk, quad_width);
                    }
                    *quad = self.decode_significance(context, initial_row);
                    for i in 0..4 {
                        samples.sigma[4 * qk + i] = (quad.rho >> i) & 1;
                    }
                    if initial_row {
                        let s = &samples.sigma[4 * qk..4 * qk + 4];
                        context = ((s[0] | s[1]) + (s[2] << 1) + (s[3] << 2)) as u32;
                    }
                }

                let u_off = [quads[0].u_off, quads[1].u_off];
                let residuals = self.decode_residuals(u_off, initial_row);
                let pair_len = if pair { 2 } else { 1 };
                let mut bounds = [0u32; 2];
                for k in 0..pair_len {
                    let kappa = if initial_row {
                        1
                    } else {
                        exponent_offset(&samples.exponent, q + k, quad_width, quads[k].rho)
                    };
                    bounds[k] = kappa + residuals[k];
                    if bounds[k] > self.max_bound {
                        debug!(
                            "exponent bound {} above {} in quad {}",
                            bounds[k],
                            self.max_bound,
                            q + k
                        );
                        return Err(J2kError::InvalidData);
                    }
                }
                for k in 0..pair_len {
                    self.recover_magnitudes(&mut samples, q + k, &quads[k], bounds[k]);
                }
                q += pair_len;
            }
        }

        let stride = buffers.stride;
        for qy in 0..quad_height {
            for qx in 0..quad_width {
                let n = 4 * (qy * quad_width + qx);
                let (x, y) = (2 * qx, 2 * qy);
                let has_below = y + 1 < height;
                let has_right = x + 1 < width;
                let positions = [
                    (x, y, true),
                    (x, y + 1, has_below),
                    (x + 1, y, has_right),
                    (x + 1, y + 1, has_below && has_right),
                ];
                for (i, &(sx, sy, inside)) in positions.iter().enumerate() {
                    if !inside {
                        continue;
                    }
                    buffers.samples[sx + sy * stride] = samples.mu[n + i] as i32;
                    if samples.sigma[n + i] != 0 {
                        buffers.states[(sy + 1) * stride + sx + 1] |= STATE_SIGMA;
                    }
                }
            }
        }
        Ok(())
    }
}

fn zeroed<T: Copy + Default>(count: usize) -> Result<Vec<T>, J2kError> {
    let mut v = Vec::new();
    v.try_reserve(count)?;
    v.resize(count, T::default());
    Ok(v)
}

/// CxtVLC context of a quad below the first row, from the significance of
/// its already decoded neighbours.
fn row_context(sigma: &[u8], q: usize, quad_width: usize) -> u32 {
    let above = 4 * (q - quad_width);
    let mut context = sigma[above + 1] as u32 + ((sigma[above + 3] as u32) << 2);
    if q % quad_width != 0 {
        context |= sigma[above - 1] as u32;
        context += ((sigma[4 * q - 1] | sigma[4 * q - 2]) as u32) << 1;
    }
    if (q + 1) % quad_width != 0 {
        context |= (sigma[above + 5] as u32) << 2;
    }
    context
}

/// kappa: quads with more than one significant sample inherit the largest
/// exponent of the row above, minus one.
fn exponent_offset(exponent: &[u8], q: usize, quad_width: usize, rho: u8) -> u32 {
    if rho.count_ones() < 2 {
        return 1;
    }
    let above = 4 * (q - quad_width);
    let mut max_e = exponent[above + 1].max(exponent[above + 3]);
    if q % quad_width != 0 {
        max_e = max_e.max(exponent[above - 1]);
    }
    if (q + 1) % quad_width != 0 {
        max_e = max_e.max(exponent[above + 5]);
    }
    (max_e as u32).saturating_sub(1).max(1)
}
