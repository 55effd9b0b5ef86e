//! Inverse quantization (ISO/IEC 15444-1 Annex E).
//!
//! Tier-1 leaves every coefficient as a sign-magnitude word: bit 31 is the
//! sign, and the magnitude has its binary point at bit `31 - Mb`, with a
//! half-LSB reconstruction bit set below the last decoded bit-plane.

use crate::constants::QSTY_NONE;

/// Δb = 2^(Rb - εb) * (1 + μb / 2^11). `rb` is the component precision plus
/// the band gain.
pub fn band_stepsize(quantsty: u8, expn: u8, mant: u16, rb: u32) -> f64 {
    if quantsty == QSTY_NONE {
        return 1.0;
    }
    let exponent = rb as i32 - expn as i32;
    2f64.powi(exponent) * (1.0 + mant as f64 / 2048.0)
}

/// Δb as a fixed-point value with `frac_bits` fractional bits.
pub fn fixed_stepsize(stepsize: f64, frac_bits: u32) -> i32 {
    let v = (stepsize * (1u64 << frac_bits) as f64).round();
    v.clamp(0.0, i32::MAX as f64) as i32
}

#[inline]
fn split(word: i32) -> (bool, u32) {
    (word < 0, (word as u32) & 0x7FFF_FFFF)
}

/// Reversible path: integer samples.
pub fn dequantize_int(
    src: &[i32],
    width: usize,
    height: usize,
    dst: &mut [i32],
    dst_stride: usize,
    magnitude_bits: u8,
    i_stepsize: i32,
) {
    let f = 31 - magnitude_bits as u32;
    for y in 0..height {
        let row = &mut dst[y * dst_stride..y * dst_stride + width];
        for (out, &word) in row.iter_mut().zip(&src[y * width..(y + 1) * width]) {
            let (negative, mag) = split(word);
            let v = if i_stepsize == 1 << 15 {
                (mag >> f) as i64
            } else {
                (mag as i64 * i_stepsize as i64) >> (f + 15)
            };
            let v = v.min(i32::MAX as i64) as i32;
            *out = if negative { -v } else { v };
        }
    }
}

/// Irreversible path with the floating-point 9/7 wavelet.
pub fn dequantize_float(
    src: &[i32],
    width: usize,
    height: usize,
    dst: &mut [f32],
    dst_stride: usize,
    magnitude_bits: u8,
    stepsize: f32,
) {
    let f = 31 - magnitude_bits as i32;
    let scale = stepsize * 2f32.powi(-f);
    for y in 0..height {
        let row = &mut dst[y * dst_stride..y * dst_stride + width];
        for (out, &word) in row.iter_mut().zip(&src[y * width..(y + 1) * width]) {
            let (negative, mag) = split(word);
            let v = mag as f32 * scale;
            *out = if negative { -v } else { v };
        }
    }
}

/// Irreversible path with the fixed-point 9/7 wavelet. Produces samples with
/// `I_PRESHIFT` (8) fractional bits.
pub fn dequantize_int97(
    src: &[i32],
    width: usize,
    height: usize,
    dst: &mut [i32],
    dst_stride: usize,
    magnitude_bits: u8,
    i_stepsize97: i32,
) {
    let f = 31 - magnitude_bits as u32;
    for y in 0..height {
        let row = &mut dst[y * dst_stride..y * dst_stride + width];
        for (out, &word) in row.iter_mut().zip(&src[y * width..(y + 1) * width]) {
            let (negative, mag) = split(word);
            // One fractional bit survives the shift.
            let c = ((mag as i64) << 1) >> f;
            let v = (c * i_stepsize97 as i64 + (1 << 15)) >> 16;
            let v = v.min(i32::MAX as i64) as i32;
            *out = if negative { -v } else { v };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{I_PRESHIFT, QSTY_SE};

    fn word(value: i32, magnitude_bits: u8) -> i32 {
        // value at binary point 31 - Mb, plus the half-LSB bit
        let f = 31 - magnitude_bits as u32;
        let mag = ((value.unsigned_abs()) << f) | if f > 0 { 1 << (f - 1) } else { 0 };
        if value < 0 {
            (mag | 0x8000_0000) as i32
        } else {
            mag as i32
        }
    }

    #[test]
    fn test_stepsize() {
        assert_eq!(band_stepsize(QSTY_NONE, 10, 0, 8), 1.0);
        assert_eq!(band_stepsize(QSTY_SE, 8, 0, 8), 1.0);
        assert_eq!(band_stepsize(QSTY_SE, 8, 1024, 9), 3.0);
        assert_eq!(fixed_stepsize(1.0, 15), 32768);
        assert_eq!(fixed_stepsize(0.5, 16 + I_PRESHIFT - 1), 1 << 22);
    }

    #[test]
    fn test_lossless_int_is_exact() {
        let mb = 9;
        let src = [word(100, mb), word(-3, mb), word(0, mb), word(255, mb)];
        let mut dst = [0i32; 4];
        dequantize_int(&src, 2, 2, &mut dst, 2, mb, 1 << 15);
        assert_eq!(dst, [100, -3, 0, 255]);
    }

    #[test]
    fn test_int_with_stepsize() {
        let mb = 9;
        let src = [word(10, mb), word(-10, mb)];
        let mut dst = [0i32; 2];
        dequantize_int(&src, 2, 1, &mut dst, 2, mb, fixed_stepsize(2.0, 15));
        // (10 + 1/2) * 2
        assert_eq!(dst, [21, -21]);
    }

    #[test]
    fn test_float_applies_stepsize() {
        let mb = 12;
        let src = [word(7, mb), word(-7, mb)];
        let mut dst = [0f32; 2];
        dequantize_float(&src, 2, 1, &mut dst, 2, mb, 0.5);
        assert!((dst[0] - 3.75).abs() < 1e-6);
        assert!((dst[1] + 3.75).abs() < 1e-6);
    }

    #[test]
    fn test_int97_is_q8() {
        let mb = 12;
        let src = [word(7, mb)];
        let mut dst = [0i32; 1];
        dequantize_int97(&src, 1, 1, &mut dst, 1, mb, fixed_stepsize(1.0, 23));
        // 7.5 in Q8
        assert_eq!(dst[0], 1920);
    }

    #[test]
    fn test_writes_into_strided_plane() {
        let mb = 4;
        let src = [word(1, mb), word(2, mb)];
        let mut dst = [0i32; 6];
        dequantize_int(&src, 1, 2, &mut dst, 3, mb, 1 << 15);
        assert_eq!(dst, [1, 0, 0, 2, 0, 0]);
    }
}
