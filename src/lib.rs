//! JPEG 2000 and HTJ2K codestream decoding.
//!
//! The crate reads raw codestreams (`.j2k`, `.j2c`, `.jph`) and JP2 files,
//! parses the marker segments, decodes packets and code-blocks (MQ/EBCOT or
//! High-Throughput), dequantizes, and reconstructs image samples through the
//! inverse wavelet and component transforms.
//!
//! ```no_run
//! use j2kdec_rs::{decode, DecodeOptions};
//!
//! let bytes = std::fs::read("image.j2k").unwrap();
//! let image = decode(&bytes, &DecodeOptions::default()).unwrap();
//! println!("{}x{}, {} components", image.width, image.height, image.components.len());
//! ```

pub mod constants;
pub mod error;
pub mod j2k_marker_code;
pub mod j2k_stream_reader;
pub mod jpeg2000;

pub use error::{ErrorCategory, J2kError};
pub use jpeg2000::decoder::{
    CoefficientPlane, ComponentCoefficients, DecodeOptions, DecodedComponent, DecodedImage,
    ImageHeader, J2kDecoder, TileCoefficients,
};
pub use jpeg2000::image::{J2kRect, Transform};

/// Decodes a codestream or JP2 file into component planes.
pub fn decode(bytes: &[u8], options: &DecodeOptions) -> Result<DecodedImage, J2kError> {
    J2kDecoder::new(bytes, *options).decode()
}
