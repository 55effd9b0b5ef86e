//! Packet header decoding and packet body distribution (B.9, B.10).

use super::bit_io::J2kBitReader;
use super::image::{J2kCodeBlock, J2kTile};
use super::progression::{PacketIndex, TilePartCursor};
use crate::constants::{
    CBLK_BYPASS, CBLK_HT, CBLK_TERMALL, CSTY_EPH, CSTY_SOP, MAX_PASSES,
};
use crate::error::J2kError;
use log::{trace, warn};

const SOP_FIXED_BYTES: u32 = 0xFF91_0004;
const EPH: [u8; 2] = [0xFF, 0x92];

/// Termination after pass `passno`: 0 none, 1 an MQ segment follows, 2 a
/// raw segment follows.
pub fn needs_termination(cblk_style: u8, passno: u32) -> u8 {
    if cblk_style & CBLK_BYPASS != 0 {
        let pass_type = passno % 3;
        let bitplane = passno / 3;
        if pass_type == 0 && bitplane > 2 {
            return 2;
        }
        if pass_type == 2 && bitplane > 2 {
            return 1;
        }
        if cblk_style & CBLK_TERMALL != 0 {
            return if bitplane > 2 { 2 } else { 1 };
        }
    }
    if cblk_style & CBLK_TERMALL != 0 {
        return 1;
    }
    0
}

#[inline]
fn floor_log2(n: u32) -> u8 {
    (31 - n.max(1).leading_zeros()) as u8
}

/// Number of new coding passes (Table B.4).
fn read_pass_count(reader: &mut J2kBitReader) -> Result<u32, J2kError> {
    if reader.read_bit()? == 0 {
        return Ok(1);
    }
    if reader.read_bit()? == 0 {
        return Ok(2);
    }
    let v = reader.read_bits(2)?;
    if v != 3 {
        return Ok(3 + v);
    }
    let v = reader.read_bits(5)?;
    if v != 31 {
        return Ok(6 + v);
    }
    Ok(37 + reader.read_bits(7)?)
}

fn read_lblock_increment(reader: &mut J2kBitReader) -> Result<u8, J2kError> {
    let mut inc = 0u8;
    while reader.read_bit()? == 1 {
        inc = inc.saturating_add(1);
    }
    Ok(inc)
}

/// A codeword segment announced by the current packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PendingSegment {
    cblk: usize,
    length: usize,
    terminated: bool,
}

/// Decodes the packets of one tile in the order given by a
/// [`PacketIterator`](super::progression::PacketIterator).
pub struct PacketDecoder<'a> {
    source: &'a [u8],
    strict: bool,
    cursor: TilePartCursor,
    /// Read position in the tile's PPM / PPT headers.
    packed_position: usize,
}

impl<'a> PacketDecoder<'a> {
    pub fn new(source: &'a [u8], tile: &J2kTile, strict: bool) -> Self {
        Self {
            source,
            strict,
            cursor: TilePartCursor::new(tile),
            packed_position: 0,
        }
    }

    pub fn decode_packet(&mut self, tile: &mut J2kTile, index: PacketIndex) -> Result<(), J2kError> {
        self.cursor.next_packet();
        let source = self.source;
        let J2kTile {
            params,
            packed_headers,
            components,
            cblks,
            ..
        } = tile;
        let compno = index.component as usize;
        let csty = params.csty;
        let cblk_style = params.codsty[compno].cblk_style;
        let nguardbits = params.qntsty[compno].nguardbits as i32;
        let roi_shift = params.roi_shift[compno] as i32;
        let resolution = &mut components[compno].resolutions[index.resolution as usize];
        let precno = index.precinct as usize;

        if csty & CSTY_SOP != 0 {
            let pos = self.cursor.position();
            let end = self.cursor.end();
            if end - pos >= 6 && source[pos..pos + 4] == SOP_FIXED_BYTES.to_be_bytes() {
                self.cursor.set_position(pos + 6);
            } else {
                trace!("SOP marker not found at {}", pos);
            }
        }

        let (header_data, header_start) = match packed_headers.as_deref() {
            Some(packed) => (packed, self.packed_position),
            None => (&source[..self.cursor.end()], self.cursor.position()),
        };
        let mut reader = J2kBitReader::with_position(header_data, header_start);
        let mut pending = Vec::new();

        if reader.read_bit()? == 1 {
            for band in resolution.bands.iter_mut() {
                if band.coord.is_empty() {
                    continue;
                }
                let expn = band.expn as i32;
                let Some(prec) = band.precincts.get_mut(precno) else {
                    return Err(J2kError::InvalidData);
                };
                for cblkno in 0..prec.codeblock_count() {
                    let cblk_index = prec.cblk_start + cblkno;
                    let cblk = &mut cblks[cblk_index];

                    let included = if cblk.included {
                        reader.read_bit()? == 1
                    } else {
                        let threshold = index.layer as i32 + 1;
                        let value = prec.inclusion.decode(&mut reader, cblkno, threshold)?;
                        if value != index.layer as i32 {
                            false
                        } else {
                            let zbp = prec.zero_bitplanes.decode(&mut reader, cblkno, 100)?;
                            let nonzerobits = expn + nguardbits - 1 - (zbp - roi_shift);
                            if !(0..=30).contains(&nonzerobits) {
                                trace!("nonzerobits {} invalid", nonzerobits);
                                return Err(J2kError::InvalidData);
                            }
                            cblk.included = true;
                            cblk.nonzerobits = nonzerobits as u8;
                            cblk.zbp = zbp as u8;
                            true
                        }
                    };
                    if !included {
                        continue;
                    }

                    let newpasses = read_pass_count(&mut reader)?;
                    if cblk.npasses + newpasses >= MAX_PASSES {
                        trace!("{} + {} coding passes", cblk.npasses, newpasses);
                        return Err(J2kError::TooManyCodingPasses);
                    }
                    let inc = read_lblock_increment(&mut reader)?;
                    if cblk.lblock as u32 + inc as u32 + floor_log2(newpasses) as u32 > 16 {
                        return Err(J2kError::CodeBlockLengthTooLarge);
                    }
                    cblk.lblock += inc;

                    if cblk_style & CBLK_HT != 0 {
                        read_ht_lengths(&mut reader, cblk, cblk_index, newpasses, &mut pending)?;
                    } else {
                        read_segment_lengths(
                            &mut reader,
                            cblk,
                            cblk_index,
                            cblk_style,
                            newpasses,
                            &mut pending,
                        )?;
                    }
                }
            }
        }
        reader.flush();

        let mut header_end = reader.position();
        if csty & CSTY_EPH != 0 {
            if header_data.get(header_end..header_end + 2) == Some(&EPH[..]) {
                header_end += 2;
            } else if self.strict {
                return Err(J2kError::EndOfPacketHeaderNotFound);
            } else {
                warn!("EPH marker not found at {}", header_end);
            }
        }
        if packed_headers.is_some() {
            self.packed_position = header_end;
        } else {
            self.cursor.set_position(header_end);
        }

        trace!(
            "packet l{} r{} c{} p{}: {} segments",
            index.layer,
            index.resolution,
            index.component,
            index.precinct,
            pending.len()
        );
        self.copy_body(cblks, &pending)
    }

    /// Moves the announced segments from the packet body into the code-blocks.
    fn copy_body(
        &mut self,
        cblks: &mut [J2kCodeBlock],
        pending: &[PendingSegment],
    ) -> Result<(), J2kError> {
        let mut pos = self.cursor.position();
        let end = self.cursor.end();
        for segment in pending {
            if segment.length > end - pos {
                trace!(
                    "segment of {} bytes, {} left in tile-part",
                    segment.length,
                    end - pos
                );
                return Err(J2kError::InvalidSegmentLength);
            }
            let cblk = &mut cblks[segment.cblk];
            cblk.data.try_reserve(segment.length + 2)?;
            cblk.data
                .extend_from_slice(&self.source[pos..pos + segment.length]);
            pos += segment.length;
            if segment.terminated {
                cblk.data.extend_from_slice(&[0xFF, 0xFF]);
                cblk.nb_terminations += 1;
                cblk.data_start.try_reserve(1)?;
                cblk.data_start.push(cblk.data.len());
            }
        }
        self.cursor.set_position(pos);
        Ok(())
    }
}

/// Classic code-blocks: one segment up to each terminating pass.
fn read_segment_lengths(
    reader: &mut J2kBitReader,
    cblk: &mut J2kCodeBlock,
    cblk_index: usize,
    cblk_style: u8,
    mut newpasses: u32,
    pending: &mut Vec<PendingSegment>,
) -> Result<(), J2kError> {
    while newpasses > 0 {
        let mut segment_passes = 0;
        let mut terminated = false;
        while segment_passes < newpasses {
            segment_passes += 1;
            if needs_termination(cblk_style, cblk.npasses + segment_passes - 1) != 0 {
                terminated = true;
                break;
            }
        }
        let length = reader.read_bits(cblk.lblock + floor_log2(segment_passes))? as usize;
        pending.try_reserve(1)?;
        pending.push(PendingSegment {
            cblk: cblk_index,
            length,
            terminated,
        });
        cblk.npasses += segment_passes;
        newpasses -= segment_passes;
    }
    Ok(())
}

/// HT code-blocks: placeholder passes, then one cleanup segment and one
/// refinement segment (15444-15, B.10.7).
fn read_ht_lengths(
    reader: &mut J2kBitReader,
    cblk: &mut J2kCodeBlock,
    cblk_index: usize,
    mut newpasses: u32,
    pending: &mut Vec<PendingSegment>,
) -> Result<(), J2kError> {
    let push = |pending: &mut Vec<PendingSegment>, length: usize| -> Result<(), J2kError> {
        pending.try_reserve(1)?;
        pending.push(PendingSegment {
            cblk: cblk_index,
            length,
            terminated: false,
        });
        Ok(())
    };

    if cblk.ht_placeholder {
        // Passes after the last cleanup pass of this contribution.
        let href = (cblk.npasses + newpasses - 1) % 3;
        let segment_passes = newpasses as i64 - href as i64;
        if segment_passes < 1 {
            let length = reader.read_bits(cblk.lblock + floor_log2(newpasses))?;
            if length != 0 {
                warn!("non-empty HT placeholder segment ignored");
            }
            cblk.ht_placeholder_passes += newpasses;
            cblk.npasses += newpasses;
            return Ok(());
        }
        let segment_passes = segment_passes as u32;
        let length = reader.read_bits(cblk.lblock + floor_log2(segment_passes))?;
        if length == 0 {
            let extra = floor_log2(newpasses) - floor_log2(segment_passes);
            if extra > 0 {
                reader.read_bits(extra)?;
            }
            cblk.ht_placeholder_passes += newpasses;
            cblk.npasses += newpasses;
            return Ok(());
        }
        if length < 2 {
            warn!("HT cleanup segment of {} byte", length);
        }
        cblk.ht_placeholder = false;
        cblk.ht_placeholder_passes += segment_passes - 1;
        cblk.ht_pass_lengths[0] = length as usize;
        cblk.npasses += segment_passes;
        newpasses -= segment_passes;
        push(pending, length as usize)?;
    }

    // Passes already read since the cleanup pass.
    let refinement_done = cblk.npasses - cblk.ht_placeholder_passes - 1;
    if newpasses > 0 && refinement_done + newpasses > 2 {
        return Err(J2kError::MultipleHtSets);
    }
    if newpasses > 0 {
        let length = reader.read_bits(cblk.lblock + floor_log2(newpasses))? as usize;
        cblk.ht_pass_lengths[1] += length;
        cblk.npasses += newpasses;
        push(pending, length)?;
    }
    Ok(())
}
