//! High-throughput block decoder (ISO/IEC 15444-15).
//!
//! A code-block carries at most one HT set: a cleanup segment holding the
//! MagSgn, MEL and VLC streams, followed by an optional refinement segment
//! shared by the SigProp (forward) and MagRef (backward) streams. Placeholder
//! passes in front of the set only move the bit-plane down.

pub mod coder;
pub mod mag_sgn;
pub mod mel;
pub mod refinement;
pub mod vlc;
pub mod vlc_tables;

use crate::constants::CBLK_VSC;
use crate::error::J2kError;
use crate::jpeg2000::bit_plane_coder::{descale_roi, roi_background_mask, CodeBlockParams};
use crate::jpeg2000::image::J2kCodeBlock;
use coder::CleanupDecoder;
use log::{debug, trace};
use refinement::{decode_magref, decode_sigprop};

/// Largest cleanup suffix (MEL + VLC) length.
const MAX_SCUP: usize = 4079;

pub(crate) const STATE_SIGMA: u8 = 1 << 0;
pub(crate) const STATE_REF: u8 = 1 << 3;
pub(crate) const STATE_SCAN: u8 = 1 << 4;

/// Sample and state planes with a border of two on every side.
#[derive(Default)]
pub struct HtBuffers {
    pub(crate) stride: usize,
    pub(crate) samples: Vec<i32>,
    pub(crate) states: Vec<u8>,
}

impl HtBuffers {
    pub(crate) fn reset(&mut self, width: usize, height: usize) -> Result<(), J2kError> {
        self.stride = width + 4;
        let len = self.stride * (height + 4);
        self.samples.clear();
        self.samples.try_reserve(len)?;
        self.samples.resize(len, 0);
        self.states.clear();
        self.states.try_reserve(len)?;
        self.states.resize(len, 0);
        Ok(())
    }
}

/// Reusable state for decoding HT code-blocks one after another.
#[derive(Default)]
pub struct HtBlockDecoder {
    buffers: HtBuffers,
    cleanup: Vec<u8>,
    output: Vec<i32>,
}

impl HtBlockDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `cblk` into `width * height` sign-magnitude words with the
    /// binary point at `31 - Mb`.
    pub fn decode(
        &mut self,
        cblk: &J2kCodeBlock,
        width: usize,
        height: usize,
        params: &CodeBlockParams,
    ) -> Result<&[i32], J2kError> {
        self.output.clear();
        self.output.try_reserve(width * height)?;
        self.output.resize(width * height, 0);
        if cblk.npasses == 0 || cblk.nonzerobits == 0 || cblk.ht_placeholder {
            return Ok(&self.output);
        }

        let remainder = cblk.npasses % 3;
        let placeholder_passes = if remainder != 0 {
            cblk.npasses - remainder
        } else {
            cblk.npasses - 3
        };
        let placeholder_sets = placeholder_passes / 3;
        let set_passes = cblk.npasses - placeholder_passes;

        let [lcup, lref] = cblk.ht_pass_lengths;
        if lcup < 2 {
            debug!("HT cleanup segment of {} bytes", lcup);
            return Err(J2kError::InvalidData);
        }
        if lcup + lref > cblk.data.len() {
            debug!(
                "HT segments of {} + {} bytes exceed {} bytes of data",
                lcup,
                lref,
                cblk.data.len()
            );
            return Err(J2kError::InvalidSegmentLength);
        }

        let skipped = placeholder_sets + cblk.zbp as u32;
        if skipped > 29 || (set_passes > 1 && skipped > 28) {
            trace!("{} skipped bit-planes, {} passes", skipped, set_passes);
            return Err(J2kError::InvalidBitplane);
        }
        let p_lsb = 30 - skipped;

        let dcup = &cblk.data[..lcup];
        let scup = ((dcup[lcup - 1] as usize) << 4) + (dcup[lcup - 2] & 0x0F) as usize;
        if scup < 2 || scup > lcup || scup > MAX_SCUP {
            debug!("HT cleanup suffix length {} (segment {})", scup, lcup);
            return Err(J2kError::InvalidData);
        }
        let pcup = lcup - scup;

        self.cleanup.clear();
        self.cleanup.try_reserve(lcup)?;
        self.cleanup.extend_from_slice(dcup);
        self.cleanup[lcup - 1] = 0xFF;
        self.cleanup[lcup - 2] |= 0x0F;

        self.buffers.reset(width, height)?;
        CleanupDecoder::new(&self.cleanup, pcup, p_lsb, skipped + 1).decode(
            width,
            height,
            &mut self.buffers,
        )?;

        let dref = &cblk.data[lcup..lcup + lref];
        if set_passes > 1 {
            let vsc = params.cblk_style & CBLK_VSC != 0;
            decode_sigprop(dref, width, height, p_lsb - 1, vsc, &mut self.buffers);
        }
        if set_passes > 2 {
            decode_magref(dref, width, height, p_lsb - 1, &mut self.buffers);
        }

        let roi_mask = roi_background_mask(params.magnitude_bits);
        let stride = self.buffers.stride;
        for (y, row) in self.output.chunks_exact_mut(width).enumerate() {
            let samples = &self.buffers.samples[y * stride..y * stride + width];
            for (out, &sample) in row.iter_mut().zip(samples) {
                let word = sample as u32;
                let mag = descale_roi(word & 0x7FFF_FFFF, roi_mask, params.roi_shift);
                *out = (mag | (word & 0x8000_0000)) as i32;
            }
        }
        Ok(&self.output)
    }
}
