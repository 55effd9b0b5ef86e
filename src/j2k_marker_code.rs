use num_enum::TryFromPrimitive;

pub const J2K_MARKER_START_BYTE: u8 = 0xFF;

/// Marker codes of ISO/IEC 15444-1 Annex A, plus CAP and CPF from 15444-15.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u16)]
pub enum J2kMarkerCode {
    /// SOC: Start of codestream.
    StartOfCodestream = 0xFF4F,
    /// CAP: Extended capabilities.
    Capability = 0xFF50,
    /// SIZ: Image and tile size.
    ImageAndTileSize = 0xFF51,
    /// COD: Coding style default.
    CodingStyleDefault = 0xFF52,
    /// COC: Coding style component.
    CodingStyleComponent = 0xFF53,
    /// TLM: Tile-part lengths.
    TilePartLengths = 0xFF55,
    /// PLM: Packet lengths, main header.
    PacketLengthsMain = 0xFF57,
    /// PLT: Packet lengths, tile-part header.
    PacketLengthsTile = 0xFF58,
    /// CPF: Corresponding profile.
    CorrespondingProfile = 0xFF59,
    /// QCD: Quantization default.
    QuantizationDefault = 0xFF5C,
    /// QCC: Quantization component.
    QuantizationComponent = 0xFF5D,
    /// RGN: Region of interest.
    RegionOfInterest = 0xFF5E,
    /// POC: Progression order change.
    ProgressionOrderChange = 0xFF5F,
    /// PPM: Packed packet headers, main header.
    PackedPacketHeadersMain = 0xFF60,
    /// PPT: Packed packet headers, tile-part header.
    PackedPacketHeadersTile = 0xFF61,
    /// CRG: Component registration.
    ComponentRegistration = 0xFF63,
    /// COM: Comment.
    Comment = 0xFF64,
    /// SOT: Start of tile-part.
    StartOfTile = 0xFF90,
    /// SOP: Start of packet.
    StartOfPacket = 0xFF91,
    /// EPH: End of packet header.
    EndOfPacketHeader = 0xFF92,
    /// SOD: Start of data.
    StartOfData = 0xFF93,
    /// EOC: End of codestream.
    EndOfCodestream = 0xFFD9,
}

impl J2kMarkerCode {
    /// True for delimiting markers that carry no length field.
    pub fn is_delimiter(self) -> bool {
        matches!(
            self,
            Self::StartOfCodestream
                | Self::StartOfData
                | Self::EndOfCodestream
                | Self::EndOfPacketHeader
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_from_u16() {
        assert_eq!(
            J2kMarkerCode::try_from(0xFF51u16).unwrap(),
            J2kMarkerCode::ImageAndTileSize
        );
        assert_eq!(
            J2kMarkerCode::try_from(0xFFD9u16).unwrap(),
            J2kMarkerCode::EndOfCodestream
        );
        assert!(J2kMarkerCode::try_from(0xFF30u16).is_err());
        assert!(J2kMarkerCode::StartOfData.is_delimiter());
        assert!(!J2kMarkerCode::Comment.is_delimiter());
    }
}
