//! JPEG 2000 decoding (ISO/IEC 15444-1, with the HT block coder of 15444-15)
//!
//! The sub-modules follow the stages of the decoder:
//!
//! - `jp2` / `parser`: JP2 box scanning and codestream syntax (markers, headers).
//! - `image`: Data structures for the image, tiles, components and code-blocks.
//! - `progression` / `packet`: Packet order and packet header decoding (Tier-2).
//! - `tag_tree` / `bit_io`: Tag trees and bit-stuffed header reads.
//! - `mq_coder` / `bit_plane_coder`: The MQ coder and the EBCOT passes (Tier-1).
//! - `ht_block_coder`: The High-Throughput block decoder (Tier-1).
//! - `quantization`: Inverse scalar quantization.
//! - `dwt` / `mct`: Inverse wavelet and component transforms.
//! - `decoder`: The pipeline tying it all together.

pub mod bit_io;
pub mod bit_plane_coder;
pub mod decoder;
pub mod dwt;
pub mod ht_block_coder;
pub mod image;
pub mod jp2;
pub mod mct;
pub mod mq_coder;
pub mod packet;
pub mod parser;
pub mod progression;
pub mod quantization;
pub mod tag_tree;

#[cfg(test)]
pub(crate) mod test_support;
