//! Inverse multiple component transforms (ISO/IEC 15444-1 Annex G).

/// ICT coefficients in Q16: Cr to R, Cb to G, Cr to G, Cb to B.
const I_ICT: [i64; 4] = [91_881, 22_553, 46_802, 116_130];
const F_ICT: [f32; 4] = [1.402, 0.344_13, 0.714_14, 1.772];

/// Reversible component transform, in place on three equally sized planes.
pub fn inverse_rct(y: &mut [i32], cb: &mut [i32], cr: &mut [i32]) {
    for ((y, u), v) in y.iter_mut().zip(cb.iter_mut()).zip(cr.iter_mut()) {
        let g = *y - ((*u + *v) >> 2);
        let r = *v + g;
        let b = *u + g;
        *y = r;
        *u = g;
        *v = b;
    }
}

/// Irreversible component transform on floating-point planes.
pub fn inverse_ict_float(y: &mut [f32], cb: &mut [f32], cr: &mut [f32]) {
    for ((y, u), v) in y.iter_mut().zip(cb.iter_mut()).zip(cr.iter_mut()) {
        let r = *y + F_ICT[0] * *v;
        let g = *y - F_ICT[1] * *u - F_ICT[2] * *v;
        let b = *y + F_ICT[3] * *u;
        *y = r;
        *u = g;
        *v = b;
    }
}

#[inline]
fn mul_q16(coef: i64, v: i32) -> i32 {
    ((coef * v as i64 + (1 << 15)) >> 16) as i32
}

/// Irreversible component transform on fixed-point planes.
pub fn inverse_ict_int(y: &mut [i32], cb: &mut [i32], cr: &mut [i32]) {
    for ((y, u), v) in y.iter_mut().zip(cb.iter_mut()).zip(cr.iter_mut()) {
        let r = *y + mul_q16(I_ICT[0], *v);
        let g = *y - mul_q16(I_ICT[1], *u) - mul_q16(I_ICT[2], *v);
        let b = *y + mul_q16(I_ICT[3], *u);
        *y = r;
        *u = g;
        *v = b;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rct_inverts_forward() {
        let rgb = [(255, 0, 0), (12, 200, 99), (0, 0, 0), (-30, 40, 7)];
        let mut y = Vec::new();
        let mut cb = Vec::new();
        let mut cr = Vec::new();
        for &(r, g, b) in &rgb {
            y.push((r + 2 * g + b) >> 2);
            cb.push(b - g);
            cr.push(r - g);
        }
        inverse_rct(&mut y, &mut cb, &mut cr);
        let back: Vec<(i32, i32, i32)> = (0..rgb.len()).map(|i| (y[i], cb[i], cr[i])).collect();
        assert_eq!(back, rgb);
    }

    #[test]
    fn test_ict_grey_is_unchanged() {
        let mut y = vec![42.0f32, -10.0];
        let mut cb = vec![0.0f32; 2];
        let mut cr = vec![0.0f32; 2];
        inverse_ict_float(&mut y, &mut cb, &mut cr);
        assert_eq!(y, vec![42.0, -10.0]);
        assert_eq!(cb, vec![42.0, -10.0]);
        assert_eq!(cr, vec![42.0, -10.0]);
    }

    #[test]
    fn test_ict_int_matches_float() {
        let samples = [(100.0f32, 20.0f32, -15.0f32), (-50.0, -3.5, 60.25)];
        for &(y0, cb0, cr0) in &samples {
            let (mut fy, mut fcb, mut fcr) = (vec![y0], vec![cb0], vec![cr0]);
            inverse_ict_float(&mut fy, &mut fcb, &mut fcr);

            let q8 = |v: f32| (v * 256.0).round() as i32;
            let (mut iy, mut icb, mut icr) = (vec![q8(y0)], vec![q8(cb0)], vec![q8(cr0)]);
            inverse_ict_int(&mut iy, &mut icb, &mut icr);

            for (i, f) in [(iy[0], fy[0]), (icb[0], fcb[0]), (icr[0], fcr[0])] {
                assert!((i as f32 / 256.0 - f).abs() < 0.02, "{i} vs {f}");
            }
        }
    }
}
