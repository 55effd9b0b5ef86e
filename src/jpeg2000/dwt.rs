//! Inverse discrete wavelet transforms (ISO/IEC 15444-1 Annex F).
//!
//! Coefficients of a tile-component live in one plane in Mallat layout: at
//! every level the low-pass samples of a row come first, followed by its
//! high-pass samples, and likewise down each column. Synthesis runs from the
//! lowest resolution up, each level rebuilding the area of the next
//! resolution in place. The parity of the resolution's origin on the
//! reference grid decides whether a line starts with a low-pass sample.

use super::image::{J2kRect, Transform};

/// Samples of margin on both sides of a line, enough for the 9/7 extension.
const PAD: usize = 4;

const F_LFTG_ALPHA: f32 = 1.586_134_3;
const F_LFTG_BETA: f32 = 0.052_980_117;
const F_LFTG_GAMMA: f32 = 0.882_911_1;
const F_LFTG_DELTA: f32 = 0.443_506_87;
const F_LFTG_K: f32 = 1.230_174_1;

// The same parameters in Q16.
const I_LFTG_ALPHA: i64 = 103_949;
const I_LFTG_BETA: i64 = 3_472;
const I_LFTG_GAMMA: i64 = 57_862;
const I_LFTG_DELTA: i64 = 29_066;
const I_LFTG_K: i64 = 80_621;
/// 1/K in Q16.
const I_LFTG_X: i64 = 53_274;

/// A one-dimensional synthesis filter.
///
/// `synthesize` receives a line whose samples occupy `p[i0..i1]`, low-pass
/// samples at even indices, with at least `PAD` writable samples on both
/// sides for the symmetric extension.
pub trait WaveletFilter {
    type Sample: Copy + Default;

    fn synthesize(p: &mut [Self::Sample], i0: usize, i1: usize);

    /// Runs the 2-D synthesis over `resolutions`, lowest first. Each entry is
    /// the area of a resolution level on the component grid; the plane has
    /// row stride `stride` and holds the first area's samples at its origin.
    fn inverse_2d(plane: &mut [Self::Sample], stride: usize, resolutions: &[J2kRect]) {
        let longest = resolutions
            .iter()
            .map(|r| r.width().max(r.height()) as usize)
            .max()
            .unwrap_or(0);
        let mut line = vec![Self::Sample::default(); longest + 2 * PAD + 2];

        for rect in resolutions.iter().skip(1) {
            let width = rect.width() as usize;
            let height = rect.height() as usize;
            if width == 0 || height == 0 {
                continue;
            }

            let mh = (rect.x0 & 1) as usize;
            for y in 0..height {
                let row = &mut plane[y * stride..y * stride + width];
                interleave(row.iter().copied(), &mut line, mh, width);
                Self::synthesize(&mut line, PAD + mh, PAD + mh + width);
                row.copy_from_slice(&line[PAD + mh..PAD + mh + width]);
            }

            let mv = (rect.y0 & 1) as usize;
            for x in 0..width {
                let column = (0..height).map(|y| plane[y * stride + x]);
                interleave(column, &mut line, mv, height);
                Self::synthesize(&mut line, PAD + mv, PAD + mv + height);
                for (y, &v) in line[PAD + mv..PAD + mv + height].iter().enumerate() {
                    plane[y * stride + x] = v;
                }
            }
        }
    }
}

/// Spreads `len` Mallat-ordered samples over `line` so that the low-pass
/// half lands on even indices from `PAD + parity` on.
fn interleave<T: Copy>(src: impl Iterator<Item = T>, line: &mut [T], parity: usize, len: usize) {
    let start = PAD + parity;
    let end = start + len;
    let first_low = start + (start & 1);
    let first_high = start + (1 - (start & 1));
    let targets = (first_low..end).step_by(2).chain((first_high..end).step_by(2));
    for (i, v) in targets.zip(src) {
        line[i] = v;
    }
}

/// Whole-sample symmetric extension of `p[i0..i1]` by `n` samples.
fn extend<T: Copy>(p: &mut [T], i0: usize, i1: usize, n: usize) {
    for i in 1..=n {
        p[i0 - i] = p[i0 + i];
        p[i1 - 1 + i] = p[i1 - 1 - i];
    }
}

/// Reversible 5/3 filter.
pub struct Dwt53;

impl WaveletFilter for Dwt53 {
    type Sample = i32;

    fn synthesize(p: &mut [i32], i0: usize, i1: usize) {
        if i1 <= i0 + 1 {
            if i0 & 1 == 1 {
                p[i0] >>= 1;
            }
            return;
        }
        extend(p, i0, i1, 2);
        for i in i0 / 2..i1 / 2 + 1 {
            p[2 * i] -= (p[2 * i - 1] + p[2 * i + 1] + 2) >> 2;
        }
        for i in i0 / 2..i1 / 2 {
            p[2 * i + 1] += (p[2 * i] + p[2 * i + 2]) >> 1;
        }
    }
}

/// Irreversible 9/7 filter in single precision.
pub struct Dwt97;

impl WaveletFilter for Dwt97 {
    type Sample = f32;

    fn synthesize(p: &mut [f32], i0: usize, i1: usize) {
        if i1 <= i0 + 1 {
            if i0 & 1 == 1 {
                p[i0] *= 0.5;
            }
            return;
        }
        for (i, v) in p[i0..i1].iter_mut().enumerate() {
            *v *= if (i0 + i) & 1 == 0 {
                F_LFTG_K
            } else {
                1.0 / F_LFTG_K
            };
        }
        extend(p, i0, i1, PAD);
        for i in i0 / 2 - 1..i1 / 2 + 2 {
            p[2 * i] -= F_LFTG_DELTA * (p[2 * i - 1] + p[2 * i + 1]);
        }
        for i in i0 / 2 - 1..i1 / 2 + 1 {
            p[2 * i + 1] -= F_LFTG_GAMMA * (p[2 * i] + p[2 * i + 2]);
        }
        for i in i0 / 2..i1 / 2 + 1 {
            p[2 * i] += F_LFTG_BETA * (p[2 * i - 1] + p[2 * i + 1]);
        }
        for i in i0 / 2..i1 / 2 {
            p[2 * i + 1] += F_LFTG_ALPHA * (p[2 * i] + p[2 * i + 2]);
        }
    }
}

/// Irreversible 9/7 filter in fixed point, for bit-exact output. Samples
/// carry `I_PRESHIFT` fractional bits.
pub struct Dwt97Int;

#[inline]
fn mul_q16(coef: i64, v: i32) -> i32 {
    ((coef * v as i64 + (1 << 15)) >> 16) as i32
}

impl WaveletFilter for Dwt97Int {
    type Sample = i32;

    fn synthesize(p: &mut [i32], i0: usize, i1: usize) {
        if i1 <= i0 + 1 {
            if i0 & 1 == 1 {
                p[i0] >>= 1;
            }
            return;
        }
        for (i, v) in p[i0..i1].iter_mut().enumerate() {
            let scale = if (i0 + i) & 1 == 0 { I_LFTG_K } else { I_LFTG_X };
            *v = mul_q16(scale, *v);
        }
        extend(p, i0, i1, PAD);
        for i in i0 / 2 - 1..i1 / 2 + 2 {
            p[2 * i] -= mul_q16(I_LFTG_DELTA, p[2 * i - 1] + p[2 * i + 1]);
        }
        for i in i0 / 2 - 1..i1 / 2 + 1 {
            p[2 * i + 1] -= mul_q16(I_LFTG_GAMMA, p[2 * i] + p[2 * i + 2]);
        }
        for i in i0 / 2..i1 / 2 + 1 {
            p[2 * i] += mul_q16(I_LFTG_BETA, p[2 * i - 1] + p[2 * i + 1]);
        }
        for i in i0 / 2..i1 / 2 {
            p[2 * i + 1] += mul_q16(I_LFTG_ALPHA, p[2 * i] + p[2 * i + 2]);
        }
    }
}

/// Inverse transform of an integer plane: 5/3, or fixed-point 9/7 on Q8
/// samples.
pub fn inverse_dwt_int(plane: &mut [i32], stride: usize, resolutions: &[J2kRect], transform: Transform) {
    match transform {
        Transform::Dwt53 => Dwt53::inverse_2d(plane, stride, resolutions),
        _ => Dwt97Int::inverse_2d(plane, stride, resolutions),
    }
}

/// Inverse transform of a floating-point 9/7 plane.
pub fn inverse_dwt_float(plane: &mut [f32], stride: usize, resolutions: &[J2kRect]) {
    Dwt97::inverse_2d(plane, stride, resolutions);
}
