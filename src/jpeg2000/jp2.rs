//! JP2 box scanning (ISO/IEC 15444-1 Annex I), just far enough to find the
//! contiguous codestream box.

use crate::constants::JP2_SIGNATURE;
use crate::error::J2kError;
use log::debug;

pub struct Jp2Box {
    pub box_type: [u8; 4],
    pub data_range: std::ops::Range<usize>,
}

pub struct Jp2Reader<'a> {
    data: &'a [u8],
    position: usize,
}

/// Whether `data` starts with the JP2 signature box.
pub fn is_jp2(data: &[u8]) -> bool {
    data.starts_with(&JP2_SIGNATURE)
}

/// Returns the codestream inside a JP2 file, or `data` itself when it is
/// not wrapped.
pub fn locate_codestream(data: &[u8]) -> Result<&[u8], J2kError> {
    if !is_jp2(data) {
        return Ok(data);
    }
    Jp2Reader::new(data)
        .find_codestream()?
        .ok_or(J2kError::CodestreamNotFoundInContainer)
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

impl<'a> Jp2Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn find_codestream(&mut self) -> Result<Option<&'a [u8]>, J2kError> {
        self.position = 0;
        while let Some(b) = self.read_box()? {
            debug!(
                "jp2 box '{}' ({} bytes)",
                String::from_utf8_lossy(&b.box_type),
                b.data_range.len()
            );
            if b.box_type == *b"jp2c" {
                return Ok(Some(&self.data[b.data_range]));
            }
        }
        Ok(None)
    }

    /// Reads the next box header. A length of 1 announces a 64-bit length,
    /// a length of 0 a box running to the end of the file.
    pub fn read_box(&mut self) -> Result<Option<Jp2Box>, J2kError> {
        let start = self.position;
        if start + 8 > self.data.len() {
            return Ok(None);
        }
        let header = &self.data[start..start + 8];
        let box_type = [header[4], header[5], header[6], header[7]];
        let mut header_size = 8u64;
        let length = match be_u32(header) {
            0 => (self.data.len() - start) as u64,
            1 => {
                let xl = self
                    .data
                    .get(start + 8..start + 16)
                    .ok_or(J2kError::InvalidData)?;
                header_size = 16;
                (be_u32(xl) as u64) << 32 | be_u32(&xl[4..]) as u64
            }
            n => n as u64,
        };
        if length < header_size || length > (self.data.len() - start) as u64 {
            return Err(J2kError::InvalidData);
        }
        let data_end = start + length as usize;
        self.position = data_end;
        Ok(Some(Jp2Box {
            box_type,
            data_range: start + header_size as usize..data_end,
        }))
    }
}
