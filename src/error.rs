use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum J2kError {
    #[error("Not enough memory")]
    NotEnoughMemory = 1,
    #[error("Invalid data")]
    InvalidData = 5,
    #[error("Parameter value not supported")]
    ParameterValueNotSupported = 7,
    #[error("Bitstream exhausted")]
    BitstreamExhausted = 10,
    #[error("Start of codestream marker not found")]
    StartOfCodestreamMarkerNotFound = 11,
    #[error("Image and tile size marker not found")]
    ImageSizeMarkerNotFound = 12,
    #[error("Invalid marker segment size")]
    InvalidMarkerSegmentSize = 15,
    #[error("Unknown marker found")]
    UnknownMarkerFound = 16,
    #[error("Invalid tile index")]
    InvalidTileIndex = 17,
    #[error("Invalid tile-part length")]
    InvalidTilePartLength = 18,
    #[error("Too many tile-parts")]
    TooManyTileParts = 19,
    #[error("Segment length exceeds remaining packet data")]
    InvalidSegmentLength = 20,
    #[error("Invalid number of coding passes")]
    InvalidCodingPassCount = 21,
    #[error("Bit-plane index out of range")]
    InvalidBitplane = 22,
    #[error("Codestream not found in container")]
    CodestreamNotFoundInContainer = 23,
    #[error("Missing termination in code-block data")]
    MissingTermination = 24,
    #[error("End of packet header marker not found")]
    EndOfPacketHeaderNotFound = 25,
    #[error("Coder position mismatch at termination")]
    TerminationMismatch = 26,
    #[error("Too many coding passes")]
    TooManyCodingPasses = 27,
    #[error("Code-block length field beyond 16 bits")]
    CodeBlockLengthTooLarge = 28,

    // Syntactically valid, but outside what this decoder implements
    #[error("Feature not supported")]
    UnsupportedFeature = 100,
    #[error("Progression step too large")]
    ProgressionStepTooLarge = 101,
    #[error("Mixed HT and classic code-blocks not supported")]
    MixedHtCodeBlocks = 102,
    #[error("Multiple HT sets not supported")]
    MultipleHtSets = 103,
}

/// Coarse classification of a [`J2kError`], for callers that only need to
/// tell corrupt input apart from unimplemented features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidData,
    Unsupported,
    OutOfMemory,
}

impl J2kError {
    pub fn category(self) -> ErrorCategory {
        match self {
            J2kError::NotEnoughMemory => ErrorCategory::OutOfMemory,
            J2kError::ParameterValueNotSupported
            | J2kError::UnsupportedFeature
            | J2kError::ProgressionStepTooLarge
            | J2kError::MixedHtCodeBlocks
            | J2kError::MultipleHtSets => ErrorCategory::Unsupported,
            _ => ErrorCategory::InvalidData,
        }
    }
}

impl From<std::collections::TryReserveError> for J2kError {
    fn from(_: std::collections::TryReserveError) -> Self {
        J2kError::NotEnoughMemory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_categories() {
        assert_eq!(J2kError::BitstreamExhausted.category(), ErrorCategory::InvalidData);
        assert_eq!(J2kError::InvalidSegmentLength.category(), ErrorCategory::InvalidData);
        assert_eq!(J2kError::TooManyCodingPasses.category(), ErrorCategory::InvalidData);
        assert_eq!(J2kError::MultipleHtSets.category(), ErrorCategory::Unsupported);
        assert_eq!(J2kError::NotEnoughMemory.category(), ErrorCategory::OutOfMemory);
    }

    #[test]
    fn test_try_reserve_maps_to_out_of_memory() {
        let mut v: Vec<u8> = Vec::new();
        let err = v.try_reserve(usize::MAX).unwrap_err();
        assert_eq!(J2kError::from(err), J2kError::NotEnoughMemory);
    }
}
