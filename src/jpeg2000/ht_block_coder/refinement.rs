//! HT refinement passes over the refinement segment: significance
//! propagation (15444-15, 7.4) and magnitude refinement (7.5).

use super::mag_sgn::SigPropReader;
use super::vlc::BackwardReader;
use super::{HtBuffers, STATE_REF, STATE_SCAN, STATE_SIGMA};

const STATE_SIGNIFICANT: u8 = STATE_SIGMA | STATE_REF;

/// Whether any neighbour of `(x, y)` is significant. The row below is
/// ignored when `causal` is false.
fn has_significant_neighbour(buffers: &HtBuffers, x: usize, y: usize, causal: bool) -> bool {
    let stride = buffers.stride;
    // (x, y) sits at (x + 1, y + 1) in the state buffer
    let above = &buffers.states[y * stride + x..y * stride + x + 3];
    let row = &buffers.states[(y + 1) * stride + x..(y + 1) * stride + x + 3];
    let below = &buffers.states[(y + 2) * stride + x..(y + 2) * stride + x + 3];
    let mut neighbours = above[0] | above[1] | above[2] | row[0] | row[2];
    if causal {
        neighbours |= below[0] | below[1] | below[2];
    }
    neighbours & STATE_SIGNIFICANT != 0
}

/// SigProp pass at bit `p`: samples next to a significant one receive a
/// significance bit, then the new significant samples of the 4x4 block
/// receive their signs.
pub fn decode_sigprop(
    dref: &[u8],
    width: usize,
    height: usize,
    p: u32,
    vsc: bool,
    buffers: &mut HtBuffers,
) {
    let mut reader = SigPropReader::new(dref);
    let stride = buffers.stride;
    let half_and_bit = ((1u32 << p) | (1 << (p - 1))) as i32;
    for y0 in (0..height).step_by(4) {
        let block_height = (height - y0).min(4);
        for x0 in (0..width).step_by(4) {
            let block_width = (width - x0).min(4);
            for x in x0..x0 + block_width {
                for y in y0..y0 + block_height {
                    let index = (y + 1) * stride + x + 1;
                    let causal = !vsc || y != y0 + block_height - 1;
                    let state = buffers.states[index];
                    let mut new_state = state | STATE_SCAN;
                    if state & STATE_SIGMA == 0
                        && has_significant_neighbour(buffers, x, y, causal)
                        && reader.read_bit() != 0
                    {
                        new_state |= STATE_REF;
                        buffers.samples[x + y * stride] |= half_and_bit;
                    }
                    buffers.states[index] = new_state;
                }
            }
            for x in x0..x0 + block_width {
                for y in y0..y0 + block_height {
                    if buffers.states[(y + 1) * stride + x + 1] & STATE_REF != 0 {
                        let sign = reader.read_bit();
                        buffers.samples[x + y * stride] |= (sign << 31) as i32;
                    }
                }
            }
        }
    }
}

/// MagRef pass at bit `p`: one refinement bit for every sample made
/// significant by the cleanup pass, read backwards from the segment end.
pub fn decode_magref(dref: &[u8], width: usize, height: usize, p: u32, buffers: &mut HtBuffers) {
    let mut reader = BackwardReader::new(dref, dref.len() as isize - 1, 0xFF);
    let stride = buffers.stride;
    for y0 in (0..height).step_by(4) {
        let stripe_height = (height - y0).min(4);
        for x in 0..width {
            for y in y0..y0 + stripe_height {
                if buffers.states[(y + 1) * stride + x + 1] & STATE_SIGMA == 0 {
                    continue;
                }
                let bit = reader.read(1);
                let sample = &mut buffers.samples[x + y * stride];
                *sample &= ((0xFFFF_FFFEu32 | bit) << p) as i32;
                *sample |= (1 << (p - 1)) as i32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffers_with_sigma(
        width: usize,
        height: usize,
        significant: &[(usize, usize)],
    ) -> HtBuffers {
        let mut buffers = HtBuffers::default();
        buffers.reset(width, height).unwrap();
        for &(x, y) in significant {
            buffers.states[(y + 1) * buffers.stride + x + 1] |= STATE_SIGMA;
        }
        buffers
    }

    #[test]
    fn test_sigprop_propagates_within_the_pass() {
        let mut buffers = buffers_with_sigma(8, 4, &[(0, 0)]);
        // column 0: (0,1) <- 1, (0,2) <- 0 as it now neighbours (0,1);
        // column 1: (1,0) <- 1, (1,1) <- 0, (1,2) <- 0; column 2: (2,0),
        // (2,1) <- 0; then two positive signs
        decode_sigprop(&[0b0000_0101], 8, 4, 10, false, &mut buffers);
        let stride = buffers.stride;
        let bits = (1 << 10) | (1 << 9);
        assert_eq!(buffers.samples[stride], bits);
        assert_eq!(buffers.samples[1], bits);
        assert_eq!(buffers.samples[1 + stride], 0);
        assert_eq!(buffers.samples[2 * stride], 0);
        assert_eq!(buffers.states[2 * stride + 1], STATE_SCAN | STATE_REF);
        assert_eq!(buffers.states[3 * stride + 1], STATE_SCAN);
    }

    #[test]
    fn test_sigprop_signs_follow_block_scan() {
        let mut buffers = buffers_with_sigma(2, 2, &[(0, 0)]);
        // significance 1, 1, 1 then signs 0, 1, 1
        decode_sigprop(&[0b0011_0111], 2, 2, 4, false, &mut buffers);
        let stride = buffers.stride;
        let bits = (1 << 4) | (1 << 3);
        assert_eq!(buffers.samples[stride], bits);
        assert_eq!(buffers.samples[1], bits | i32::MIN);
        assert_eq!(buffers.samples[1 + stride], bits | i32::MIN);
    }

    #[test]
    fn test_sigprop_vsc_ignores_row_below_stripe_end() {
        // (0,4) is significant, (0,3) ends the first stripe
        let mut buffers = buffers_with_sigma(1, 5, &[(0, 4)]);
        decode_sigprop(&[0xFF], 1, 5, 6, true, &mut buffers);
        assert_eq!(buffers.samples[3 * buffers.stride], 0);

        let mut buffers = buffers_with_sigma(1, 5, &[(0, 4)]);
        decode_sigprop(&[0x01], 1, 5, 6, false, &mut buffers);
        assert_eq!(buffers.samples[3 * buffers.stride], (1 << 6) | (1 << 5));
    }

    #[test]
    fn test_magref_refines_cleanup_samples() {
        let mut buffers = buffers_with_sigma(2, 1, &[(0, 0), (1, 0)]);
        let p = 8;
        // both samples hold 1.5 at bit p + 1
        let cleanup = (1 << (p + 1)) | (1 << p);
        buffers.samples[0] = cleanup;
        buffers.samples[1] = cleanup | i32::MIN;
        // read backwards from the last byte: bits 1 then 0
        decode_magref(&[0x00, 0b0000_0001], 2, 1, p, &mut buffers);
        assert_eq!(buffers.samples[0], (1 << (p + 1)) | (1 << p) | (1 << (p - 1)));
        assert_eq!(buffers.samples[1], (1 << (p + 1)) | (1 << (p - 1)) | i32::MIN);
    }
}
