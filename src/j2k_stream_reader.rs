use crate::error::J2kError;
use crate::j2k_marker_code::{J2K_MARKER_START_BYTE, J2kMarkerCode};

/// Byte-aligned big-endian cursor over a codestream.
///
/// The cursor never moves past `end`, so a reader built over a tile-part
/// range cannot observe bytes of the next tile-part.
#[derive(Debug, Clone)]
pub struct J2kStreamReader<'a> {
    source: &'a [u8],
    position: usize,
    end: usize,
}

impl<'a> J2kStreamReader<'a> {
    pub fn new(source: &'a [u8]) -> Self {
        Self {
            source,
            position: 0,
            end: source.len(),
        }
    }

    /// Reader restricted to `source[start..end]`, with positions still
    /// reported relative to the whole of `source`.
    pub fn with_range(source: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(source.len());
        Self {
            source,
            position: start.min(end),
            end,
        }
    }

    pub fn source(&self) -> &'a [u8] {
        self.source
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn remaining(&self) -> usize {
        self.end - self.position
    }

    pub fn read_u8(&mut self) -> Result<u8, J2kError> {
        if self.position >= self.end {
            return Err(J2kError::InvalidData);
        }
        let val = self.source[self.position];
        self.position += 1;
        Ok(val)
    }

    pub fn read_u16(&mut self) -> Result<u16, J2kError> {
        let b1 = self.read_u8()? as u16;
        let b2 = self.read_u8()? as u16;
        Ok((b1 << 8) | b2)
    }

    pub fn read_u32(&mut self) -> Result<u32, J2kError> {
        let hi = self.read_u16()? as u32;
        let lo = self.read_u16()? as u32;
        Ok((hi << 16) | lo)
    }

    /// Reads a 1- or 2-byte component index, as used by COC, QCC, RGN and POC.
    pub fn read_component_index(&mut self, component_count: usize) -> Result<u16, J2kError> {
        if component_count > 256 {
            self.read_u16()
        } else {
            self.read_u8().map(u16::from)
        }
    }

    pub fn set_position(&mut self, position: usize) -> Result<(), J2kError> {
        if position > self.end {
            return Err(J2kError::InvalidData);
        }
        self.position = position;
        Ok(())
    }

    pub fn skip(&mut self, count: usize) -> Result<(), J2kError> {
        if count > self.remaining() {
            return Err(J2kError::InvalidData);
        }
        self.position += count;
        Ok(())
    }

    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8], J2kError> {
        if count > self.remaining() {
            return Err(J2kError::InvalidData);
        }
        let bytes = &self.source[self.position..self.position + count];
        self.position += count;
        Ok(bytes)
    }

    /// Reads the next two bytes as a marker code. Values that are not a known
    /// marker are returned as `Err(code)` so the caller can skip them by length.
    pub fn read_marker(&mut self) -> Result<Result<J2kMarkerCode, u16>, J2kError> {
        let b1 = self.read_u8()?;
        if b1 != J2K_MARKER_START_BYTE {
            return Err(J2kError::InvalidData);
        }
        let code = 0xFF00 | self.read_u8()? as u16;
        Ok(J2kMarkerCode::try_from(code).map_err(|_| code))
    }

    /// Reads a marker segment length field and checks that the segment fits.
    /// Returns the length of the segment body (without the length field).
    pub fn read_segment_length(&mut self) -> Result<usize, J2kError> {
        let length = self.read_u16()? as usize;
        if length < 2 || length - 2 > self.remaining() {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        Ok(length - 2)
    }
}
