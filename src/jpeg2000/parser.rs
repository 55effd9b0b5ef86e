//! JPEG 2000 Codestream Parser.
//!
//! Handles the parsing of the main header (SOC, SIZ, CAP, COD, COC, QCD, QCC,
//! RGN, POC, PPM, TLM, PLM, CRG, COM, CPF) and of the tile-part headers
//! (SOT up to SOD). Tile-part bodies are not decoded here; the parser only
//! records their byte ranges and gathers packed packet headers per tile.

use super::image::{
    HAD_COC, HAD_QCC, J2kCap, J2kCodingParameters, J2kCodingStyle, J2kComponentInfo, J2kImage,
    J2kPocEntry, J2kQuantStyle, J2kTile, J2kTilePart, ProgressionOrder, Transform, ceil_div,
};
use crate::constants::{
    CBLK_HT, CBLK_HT_MIXED, CBLK_PREDTERM, CSTY_PREC, MAX_CBLK_LOG2_AREA, MAX_CBLK_LOG2_DIM,
    MAX_COMPONENTS, MAX_IMAGE_SAMPLES, MAX_POCS, MAX_RESLEVELS, MAX_SUBBANDS, MAX_TILE_PARTS,
    QSTY_NONE, QSTY_SE, QSTY_SI,
};
use crate::error::J2kError;
use crate::j2k_marker_code::J2kMarkerCode;
use crate::j2k_stream_reader::J2kStreamReader;
use crate::jpeg2000::decoder::DecodeOptions;
use log::{debug, trace, warn};

/// Where a marker segment was found, and thus which parameters it updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderScope {
    Main,
    Tile(usize),
}

/// A parser that transforms raw J2K marker segments into structured metadata.
pub struct J2kParser<'a> {
    reader: J2kStreamReader<'a>,
    options: DecodeOptions,
    pub image: J2kImage,
    /// Main-header coding parameters, the defaults of every tile.
    pub params: J2kCodingParameters,
    pub tiles: Vec<J2kTile>,
    /// Concatenated PPM data, consumed tile-part by tile-part.
    packed_main: Vec<u8>,
    packed_main_pos: usize,
    has_ppm: bool,
}

impl<'a> J2kParser<'a> {
    pub fn new(source: &'a [u8], options: DecodeOptions) -> Self {
        Self {
            reader: J2kStreamReader::new(source),
            options,
            image: J2kImage::default(),
            params: J2kCodingParameters::default(),
            tiles: Vec::new(),
            packed_main: Vec::new(),
            packed_main_pos: 0,
            has_ppm: false,
        }
    }

    /// Parses SOC, SIZ and the rest of the main header, stopping in front of
    /// the first SOT marker.
    pub fn parse_main_header(&mut self) -> Result<(), J2kError> {
        match self.reader.read_marker() {
            Ok(Ok(J2kMarkerCode::StartOfCodestream)) => {}
            _ => return Err(J2kError::StartOfCodestreamMarkerNotFound),
        }
        match self.reader.read_marker() {
            Ok(Ok(J2kMarkerCode::ImageAndTileSize)) => {}
            _ => return Err(J2kError::ImageSizeMarkerNotFound),
        }
        self.read_segment(J2kMarkerCode::ImageAndTileSize, |p, seg| p.parse_siz(seg))?;

        loop {
            let marker_pos = self.reader.position();
            if self.reader.remaining() < 2 {
                debug!("main header ends without a tile-part");
                return Err(J2kError::InvalidData);
            }
            match self.reader.read_marker()? {
                Ok(J2kMarkerCode::StartOfTile) => {
                    self.reader.set_position(marker_pos)?;
                    break;
                }
                Ok(J2kMarkerCode::ImageAndTileSize) => {
                    debug!("duplicate SIZ marker");
                    return Err(J2kError::InvalidData);
                }
                Ok(J2kMarkerCode::Capability) => {
                    self.read_segment(J2kMarkerCode::Capability, |p, seg| p.parse_cap(seg))?
                }
                Ok(J2kMarkerCode::PackedPacketHeadersMain) => self
                    .read_segment(J2kMarkerCode::PackedPacketHeadersMain, |p, seg| {
                        p.parse_ppm(seg)
                    })?,
                Ok(J2kMarkerCode::TilePartLengths) => {
                    self.read_segment(J2kMarkerCode::TilePartLengths, |_, seg| parse_tlm(seg))?
                }
                Ok(J2kMarkerCode::PacketLengthsMain) => {
                    self.read_segment(J2kMarkerCode::PacketLengthsMain, |_, seg| parse_plm(seg))?
                }
                Ok(J2kMarkerCode::ComponentRegistration) => self
                    .read_segment(J2kMarkerCode::ComponentRegistration, |p, seg| {
                        parse_crg(seg, p.image.components.len())
                    })?,
                Ok(J2kMarkerCode::CorrespondingProfile) => {
                    self.read_segment(J2kMarkerCode::CorrespondingProfile, |_, seg| {
                        debug!("CPF: {} bytes", seg.remaining());
                        seg.skip(seg.remaining())
                    })?
                }
                Ok(marker) => self.parse_common_marker(marker, HeaderScope::Main)?,
                Err(code) => self.skip_unknown_marker(code)?,
            }
        }

        self.tiles = Vec::new();
        self.tiles.try_reserve(self.image.tile_count())?;
        for index in 0..self.image.tile_count() {
            let mut params = self.params.clone();
            params.poc_inherited = true;
            self.tiles.push(J2kTile {
                index: index as u32,
                coord: self.image.tile_rect(index),
                params,
                ..Default::default()
            });
        }
        Ok(())
    }

    /// Parses every tile-part up to EOC. Must follow [`Self::parse_main_header`].
    pub fn parse_tile_parts(&mut self) -> Result<(), J2kError> {
        loop {
            if self.reader.remaining() < 2 {
                warn!("missing EOC marker");
                break;
            }
            match self.reader.read_marker()? {
                Ok(J2kMarkerCode::EndOfCodestream) => break,
                Ok(J2kMarkerCode::StartOfTile) => self.parse_tile_part()?,
                Ok(marker) => {
                    if self.options.strict_std_compliance {
                        return Err(J2kError::InvalidData);
                    }
                    warn!("unexpected {:?} between tile-parts", marker);
                    if !marker.is_delimiter() {
                        let length = self.reader.read_segment_length()?;
                        self.reader.skip(length)?;
                    }
                }
                Err(code) => self.skip_unknown_marker(code)?,
            }
        }

        if self.has_ppm && self.packed_main_pos < self.packed_main.len() {
            debug!(
                "{} bytes of PPM data left unused",
                self.packed_main.len() - self.packed_main_pos
            );
        }
        Ok(())
    }

    pub fn into_parts(self) -> (J2kImage, Vec<J2kTile>) {
        (self.image, self.tiles)
    }

    /// Runs `parse` on a reader bounded to the marker segment that follows,
    /// then moves past the segment.
    fn read_segment<F>(&mut self, marker: J2kMarkerCode, parse: F) -> Result<(), J2kError>
    where
        F: FnOnce(&mut Self, &mut J2kStreamReader<'a>) -> Result<(), J2kError>,
    {
        let length = self.reader.read_segment_length()?;
        let start = self.reader.position();
        let mut segment = J2kStreamReader::with_range(self.reader.source(), start, start + length);
        trace!("{:?} segment at {} ({} bytes)", marker, start, length);
        parse(self, &mut segment)?;
        if segment.remaining() != 0 {
            if self.options.strict_std_compliance {
                return Err(J2kError::InvalidMarkerSegmentSize);
            }
            warn!(
                "{:?} segment length {} disagrees with its content, {} bytes unread",
                marker,
                length,
                segment.remaining()
            );
        }
        self.reader.skip(length)
    }

    fn skip_unknown_marker(&mut self, code: u16) -> Result<(), J2kError> {
        if code < 0xFF30 {
            debug!("invalid marker {:04X} at {}", code, self.reader.position() - 2);
            return Err(J2kError::InvalidData);
        }
        if self.options.strict_std_compliance {
            return Err(J2kError::UnknownMarkerFound);
        }
        // 0xFF30..=0xFF3F carry no length field.
        if code <= 0xFF3F {
            warn!("skipping reserved marker {:04X}", code);
            return Ok(());
        }
        let length = self.reader.read_segment_length()?;
        warn!("skipping unknown marker {:04X} ({} bytes)", code, length);
        self.reader.skip(length)
    }

    /// Markers allowed in both the main and the tile-part headers.
    fn parse_common_marker(
        &mut self,
        marker: J2kMarkerCode,
        scope: HeaderScope,
    ) -> Result<(), J2kError> {
        match marker {
            J2kMarkerCode::CodingStyleDefault => {
                self.read_segment(marker, |p, seg| p.parse_cod(seg, scope))
            }
            J2kMarkerCode::CodingStyleComponent => {
                self.read_segment(marker, |p, seg| p.parse_coc(seg, scope))
            }
            J2kMarkerCode::QuantizationDefault => {
                self.read_segment(marker, |p, seg| p.parse_qcd(seg, scope))
            }
            J2kMarkerCode::QuantizationComponent => {
                self.read_segment(marker, |p, seg| p.parse_qcc(seg, scope))
            }
            J2kMarkerCode::RegionOfInterest => {
                self.read_segment(marker, |p, seg| p.parse_rgn(seg, scope))
            }
            J2kMarkerCode::ProgressionOrderChange => {
                self.read_segment(marker, |p, seg| p.parse_poc(seg, scope))
            }
            J2kMarkerCode::Comment => self.read_segment(marker, |_, seg| parse_com(seg)),
            _ => {
                if self.options.strict_std_compliance {
                    return Err(J2kError::InvalidData);
                }
                warn!("{:?} marker not allowed in {:?} header", marker, scope);
                if marker.is_delimiter() {
                    return Ok(());
                }
                let length = self.reader.read_segment_length()?;
                self.reader.skip(length)
            }
        }
    }

    fn params_mut(&mut self, scope: HeaderScope) -> &mut J2kCodingParameters {
        match scope {
            HeaderScope::Main => &mut self.params,
            HeaderScope::Tile(index) => &mut self.tiles[index].params,
        }
    }

    fn component_count(&self) -> usize {
        self.image.components.len()
    }

    fn parse_siz(&mut self, seg: &mut J2kStreamReader) -> Result<(), J2kError> {
        if seg.remaining() < 36 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let image = &mut self.image;
        image.rsiz = seg.read_u16()?;
        image.width = seg.read_u32()?;
        image.height = seg.read_u32()?;
        image.x_origin = seg.read_u32()?;
        image.y_origin = seg.read_u32()?;
        image.tile_width = seg.read_u32()?;
        image.tile_height = seg.read_u32()?;
        image.tile_x_origin = seg.read_u32()?;
        image.tile_y_origin = seg.read_u32()?;
        let ncomponents = seg.read_u16()? as usize;

        if ncomponents == 0 || ncomponents > MAX_COMPONENTS {
            debug!("invalid number of components: {}", ncomponents);
            return Err(J2kError::InvalidData);
        }
        if image.tile_width == 0 || image.tile_height == 0 {
            debug!("invalid tile dimension");
            return Err(J2kError::InvalidData);
        }
        if image.x_origin >= image.width || image.y_origin >= image.height {
            debug!("image offsets outside the image");
            return Err(J2kError::InvalidData);
        }
        if image.x_origin < image.tile_x_origin
            || image.y_origin < image.tile_y_origin
            || image.tile_width as u64 + image.tile_x_origin as u64 <= image.x_origin as u64
            || image.tile_height as u64 + image.tile_y_origin as u64 <= image.y_origin as u64
        {
            debug!("tile offsets are invalid");
            return Err(J2kError::InvalidData);
        }
        if seg.remaining() < 3 * ncomponents {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }

        image.components.clear();
        image.components.try_reserve(ncomponents)?;
        for _ in 0..ncomponents {
            let ssiz = seg.read_u8()?;
            let depth = (ssiz & 0x7F) + 1;
            let is_signed = (ssiz & 0x80) != 0;
            let dx = seg.read_u8()?;
            let dy = seg.read_u8()?;
            if depth > 38 || dx == 0 || dy == 0 {
                debug!("invalid component: depth {} sampling {}x{}", depth, dx, dy);
                return Err(J2kError::InvalidData);
            }
            if depth > 31 {
                debug!("{}-bit components do not fit 32-bit samples", depth);
                return Err(J2kError::ParameterValueNotSupported);
            }
            image.components.push(J2kComponentInfo {
                depth,
                is_signed,
                dx,
                dy,
            });
        }

        let samples: u64 = image
            .components
            .iter()
            .map(|c| {
                let w = ceil_div(image.width as i64, c.dx as i64)
                    - ceil_div(image.x_origin as i64, c.dx as i64);
                let h = ceil_div(image.height as i64, c.dy as i64)
                    - ceil_div(image.y_origin as i64, c.dy as i64);
                w as u64 * h as u64
            })
            .sum();
        if samples > MAX_IMAGE_SAMPLES {
            debug!(
                "{}x{} image with {} components holds {} samples, limit is {}",
                image.width - image.x_origin,
                image.height - image.y_origin,
                ncomponents,
                samples,
                MAX_IMAGE_SAMPLES
            );
            return Err(J2kError::ParameterValueNotSupported);
        }

        image.num_tiles_x =
            ceil_div((image.width - image.tile_x_origin) as i64, image.tile_width as i64) as u32;
        image.num_tiles_y =
            ceil_div((image.height - image.tile_y_origin) as i64, image.tile_height as i64) as u32;

        // Every tile needs at least an SOT and an SOD: 14 bytes.
        if image.tile_count() as u64 * 14 > self.reader.source().len() as u64 {
            debug!(
                "{}x{} tiles do not fit in {} bytes",
                image.num_tiles_x,
                image.num_tiles_y,
                self.reader.source().len()
            );
            return Err(J2kError::InvalidData);
        }

        debug!(
            "SIZ: {}x{} (origin {},{}), tiles {}x{} of {}x{}, {} components",
            image.width,
            image.height,
            image.x_origin,
            image.y_origin,
            image.num_tiles_x,
            image.num_tiles_y,
            image.tile_width,
            image.tile_height,
            ncomponents
        );
        self.params = J2kCodingParameters::new(ncomponents);
        Ok(())
    }

    fn parse_cap(&mut self, seg: &mut J2kStreamReader) -> Result<(), J2kError> {
        let pcap = seg.read_u32()?;
        let mut ccap = Vec::new();
        for i in 0..32 {
            if (pcap >> (31 - i)) & 1 != 0 {
                ccap.push(seg.read_u16()?);
            }
        }

        // Part 15 capabilities are bit 14 of Pcap (counted from the MSB as 1).
        if (pcap >> (31 - 14)) & 1 != 0 {
            let index = (0..14).filter(|i| (pcap >> (31 - i)) & 1 != 0).count();
            let ccap15 = ccap.get(index).copied().unwrap_or(0);
            if (ccap15 >> 14) & 3 == 2 {
                debug!("unknown Ccap15 value {:04X}", ccap15);
                return Err(J2kError::InvalidData);
            }
            if (ccap15 >> 13) & 1 != 0 {
                return Err(J2kError::MultipleHtSets);
            }
            let p = ccap15 & 0x1F;
            let b = match p {
                0 => 8,
                1..=19 => p + 8,
                _ => 4 * (p - 19) + 27,
            };
            if b > 31 {
                debug!("HT magnitude bound B = {} exceeds 31", b);
                return Err(J2kError::UnsupportedFeature);
            }
            debug!("CAP: HTJ2K codestream, Ccap15 {:04X}", ccap15);
        }
        self.image.cap = Some(J2kCap { pcap, ccap });
        Ok(())
    }

    /// SPcod / SPcoc fields shared by COD and COC.
    fn parse_cox(
        &self,
        seg: &mut J2kStreamReader,
        style: &mut J2kCodingStyle,
    ) -> Result<(), J2kError> {
        let nreslevels = seg.read_u8()? as usize + 1;
        if nreslevels >= MAX_RESLEVELS {
            debug!("nreslevels {} is invalid", nreslevels);
            return Err(J2kError::InvalidData);
        }
        let reduction = self.options.reduction_factor as usize;
        if nreslevels <= reduction {
            debug!(
                "reduction factor {} too large, at most {}",
                reduction,
                nreslevels - 1
            );
            return Err(J2kError::InvalidData);
        }
        style.nreslevels = nreslevels as u8;
        style.nreslevels2decode = (nreslevels - reduction) as u8;

        style.log2_cblk_width = (seg.read_u8()? & 15) + 2;
        style.log2_cblk_height = (seg.read_u8()? & 15) + 2;
        if style.log2_cblk_width > MAX_CBLK_LOG2_DIM
            || style.log2_cblk_height > MAX_CBLK_LOG2_DIM
            || style.log2_cblk_width + style.log2_cblk_height > MAX_CBLK_LOG2_AREA
        {
            debug!(
                "code-block size 2^{}x2^{} invalid",
                style.log2_cblk_width, style.log2_cblk_height
            );
            return Err(J2kError::InvalidData);
        }

        style.cblk_style = seg.read_u8()?;
        if style.cblk_style & CBLK_HT != 0 {
            if style.cblk_style & CBLK_HT_MIXED != 0 {
                return Err(J2kError::MixedHtCodeBlocks);
            }
            trace!("HT code-blocks");
        } else if style.cblk_style != 0 {
            debug!("code-block style {:02X}", style.cblk_style);
            if style.cblk_style & CBLK_PREDTERM != 0 {
                trace!("predictable termination, decoded like a plain MQ termination");
            }
        }

        style.transform = match seg.read_u8()? {
            0 if self.options.bitexact => Transform::Dwt97Int,
            0 => Transform::Dwt97,
            1 => Transform::Dwt53,
            other => {
                debug!("unknown wavelet transform {}", other);
                return Err(J2kError::InvalidData);
            }
        };

        if style.precincts_defined {
            for i in 0..nreslevels {
                let byte = seg.read_u8()?;
                style.log2_prec_widths[i] = byte & 0x0F;
                style.log2_prec_heights[i] = byte >> 4;
                if i > 0 && (byte & 0x0F == 0 || byte >> 4 == 0) {
                    debug!("PPx {} PPy {} invalid", byte & 0x0F, byte >> 4);
                    return Err(J2kError::InvalidData);
                }
            }
        } else {
            style.log2_prec_widths = [15; MAX_RESLEVELS];
            style.log2_prec_heights = [15; MAX_RESLEVELS];
        }
        Ok(())
    }

    fn parse_cod(
        &mut self,
        seg: &mut J2kStreamReader,
        scope: HeaderScope,
    ) -> Result<(), J2kError> {
        let scod = seg.read_u8()?;
        let order = seg.read_u8()?;
        let prog_order = ProgressionOrder::try_from(order).map_err(|_| {
            debug!("unknown progression order {}", order);
            J2kError::InvalidData
        })?;
        let nlayers = seg.read_u16()?;
        if nlayers == 0 {
            return Err(J2kError::InvalidData);
        }
        let mut mct = seg.read_u8()? != 0;
        if mct && self.component_count() < 3 {
            warn!(
                "MCT with too few components ({}), ignored",
                self.component_count()
            );
            mct = false;
        }

        let mut style = J2kCodingStyle {
            precincts_defined: scod & CSTY_PREC != 0,
            ..Default::default()
        };
        self.parse_cox(seg, &mut style)?;
        debug!(
            "COD ({:?}): Scod {:02X}, {:?}, {} layers, mct {}, {} levels, cblk 2^{}x2^{}, style {:02X}, {:?}",
            scope,
            scod,
            prog_order,
            nlayers,
            mct,
            style.nreslevels - 1,
            style.log2_cblk_width,
            style.log2_cblk_height,
            style.cblk_style,
            style.transform
        );

        let params = self.params_mut(scope);
        params.csty = scod;
        params.prog_order = prog_order;
        params.nlayers = nlayers;
        params.mct = mct;
        for (codsty, properties) in params.codsty.iter_mut().zip(&params.properties) {
            if properties & HAD_COC == 0 {
                *codsty = style.clone();
            }
        }
        Ok(())
    }

    fn parse_coc(
        &mut self,
        seg: &mut J2kStreamReader,
        scope: HeaderScope,
    ) -> Result<(), J2kError> {
        let compno = seg.read_component_index(self.component_count())? as usize;
        if compno >= self.component_count() {
            debug!("COC for invalid component {}", compno);
            return Err(J2kError::InvalidData);
        }
        let scoc = seg.read_u8()?;
        let mut style = J2kCodingStyle {
            precincts_defined: scoc & CSTY_PREC != 0,
            ..Default::default()
        };
        self.parse_cox(seg, &mut style)?;
        debug!(
            "COC ({:?}) component {}: {} levels, style {:02X}",
            scope,
            compno,
            style.nreslevels - 1,
            style.cblk_style
        );

        let params = self.params_mut(scope);
        params.codsty[compno] = style;
        params.properties[compno] |= HAD_COC;
        Ok(())
    }

    /// Sqcd / SPqcd fields shared by QCD and QCC.
    fn parse_qcx(seg: &mut J2kStreamReader) -> Result<J2kQuantStyle, J2kError> {
        let sqcd = seg.read_u8()?;
        let mut q = J2kQuantStyle {
            nguardbits: sqcd >> 5,
            quantsty: sqcd & 0x1F,
            ..Default::default()
        };
        match q.quantsty {
            QSTY_NONE => {
                let n = seg.remaining();
                if n > MAX_SUBBANDS {
                    return Err(J2kError::InvalidData);
                }
                for i in 0..n {
                    q.expn[i] = seg.read_u8()? >> 3;
                }
            }
            QSTY_SI => {
                let x = seg.read_u16()?;
                q.expn[0] = (x >> 11) as u8;
                q.mant[0] = x & 0x7FF;
                for i in 1..MAX_SUBBANDS {
                    q.expn[i] = (q.expn[0] as i32 - ((i as i32 - 1) / 3)).max(0) as u8;
                    q.mant[i] = q.mant[0];
                }
            }
            QSTY_SE => {
                let n = seg.remaining() / 2;
                if n > MAX_SUBBANDS {
                    return Err(J2kError::InvalidData);
                }
                for i in 0..n {
                    let x = seg.read_u16()?;
                    q.expn[i] = (x >> 11) as u8;
                    q.mant[i] = x & 0x7FF;
                }
            }
            other => {
                debug!("unknown quantization style {}", other);
                return Err(J2kError::InvalidData);
            }
        }
        Ok(q)
    }

    fn parse_qcd(
        &mut self,
        seg: &mut J2kStreamReader,
        scope: HeaderScope,
    ) -> Result<(), J2kError> {
        let q = Self::parse_qcx(seg)?;
        debug!(
            "QCD ({:?}): style {}, {} guard bits",
            scope, q.quantsty, q.nguardbits
        );
        let params = self.params_mut(scope);
        for (qntsty, properties) in params.qntsty.iter_mut().zip(&params.properties) {
            if properties & HAD_QCC == 0 {
                *qntsty = q.clone();
            }
        }
        Ok(())
    }

    fn parse_qcc(
        &mut self,
        seg: &mut J2kStreamReader,
        scope: HeaderScope,
    ) -> Result<(), J2kError> {
        let compno = seg.read_component_index(self.component_count())? as usize;
        if compno >= self.component_count() {
            debug!("QCC for invalid component {}", compno);
            return Err(J2kError::InvalidData);
        }
        let q = Self::parse_qcx(seg)?;
        let params = self.params_mut(scope);
        params.qntsty[compno] = q;
        params.properties[compno] |= HAD_QCC;
        Ok(())
    }

    fn parse_rgn(
        &mut self,
        seg: &mut J2kStreamReader,
        scope: HeaderScope,
    ) -> Result<(), J2kError> {
        let compno = seg.read_component_index(self.component_count())? as usize;
        let srgn = seg.read_u8()?;
        if srgn != 0 {
            debug!("RGN style {} not supported", srgn);
            return Err(J2kError::UnsupportedFeature);
        }
        if compno >= self.component_count() {
            return Err(J2kError::InvalidData);
        }
        let shift = seg.read_u8()?;
        debug!("RGN ({:?}) component {}: shift {}", scope, compno, shift);
        self.params_mut(scope).roi_shift[compno] = shift;
        Ok(())
    }

    fn parse_poc(
        &mut self,
        seg: &mut J2kStreamReader,
        scope: HeaderScope,
    ) -> Result<(), J2kError> {
        let ncomponents = self.component_count();
        let wide = ncomponents > 256;
        let entry_size = if wide { 9 } else { 7 };
        let count = seg.remaining() / entry_size;
        if count == 0 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }

        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let ra_start = seg.read_u8()?;
            let cs_start = seg.read_component_index(ncomponents)?;
            let ly_end = seg.read_u16()?;
            let ra_end = seg.read_u8()?;
            let mut cs_end = seg.read_component_index(ncomponents)?;
            let order = seg.read_u8()?;
            if !wide && cs_end == 0 {
                cs_end = 256;
            }
            cs_end = cs_end.min(ncomponents as u16);
            let Ok(order) = ProgressionOrder::try_from(order) else {
                debug!("POC entry {} has unknown progression order {}", i, order);
                return Err(J2kError::InvalidData);
            };
            if ra_start >= ra_end
                || ra_end as usize > MAX_RESLEVELS
                || cs_start >= cs_end
                || ly_end == 0
            {
                debug!(
                    "POC entry {} is invalid ({}, {}, {}, {}, {})",
                    i, ra_start, cs_start, ly_end, ra_end, cs_end
                );
                return Err(J2kError::InvalidData);
            }
            entries.push(J2kPocEntry {
                ra_start,
                cs_start,
                ly_end,
                ra_end,
                cs_end,
                order,
            });
        }

        let params = self.params_mut(scope);
        if params.poc.is_empty() || params.poc_inherited {
            params.poc = entries;
        } else {
            if params.poc.len() + entries.len() > MAX_POCS {
                debug!("too many POC entries");
                return Err(J2kError::InvalidData);
            }
            params.poc.extend(entries);
        }
        if params.poc.len() > MAX_POCS {
            return Err(J2kError::InvalidData);
        }
        params.poc_inherited = false;
        debug!("POC ({:?}): {} entries", scope, params.poc.len());
        Ok(())
    }

    fn parse_ppm(&mut self, seg: &mut J2kStreamReader) -> Result<(), J2kError> {
        let zppm = seg.read_u8()?;
        let data = seg.read_bytes(seg.remaining())?;
        trace!("PPM {}: {} bytes", zppm, data.len());
        self.packed_main.try_reserve(data.len())?;
        self.packed_main.extend_from_slice(data);
        self.has_ppm = true;
        Ok(())
    }

    fn parse_ppt(&mut self, seg: &mut J2kStreamReader, tile: usize) -> Result<(), J2kError> {
        if self.has_ppm {
            debug!("PPT and PPM in the same codestream");
            return Err(J2kError::InvalidData);
        }
        let zppt = seg.read_u8()?;
        let data = seg.read_bytes(seg.remaining())?;
        trace!("PPT {} for tile {}: {} bytes", zppt, tile, data.len());
        let packed = self.tiles[tile].packed_headers.get_or_insert_with(Vec::new);
        packed.try_reserve(data.len())?;
        packed.extend_from_slice(data);
        Ok(())
    }

    /// Rejects a TPsot already seen for the tile, or one that does not fit
    /// the TNsot announced so far.
    fn check_tile_part_index(&mut self, isot: usize, tpsot: u8, tnsot: u8) -> Result<(), J2kError> {
        let tile = &mut self.tiles[isot];
        if tile.tile_parts.iter().any(|tp| tp.tp_index == tpsot) {
            debug!("tile {}: tile-part {} repeated", isot, tpsot);
            return Err(J2kError::InvalidData);
        }
        if tnsot != 0 {
            if tile.num_tile_parts != 0 && tile.num_tile_parts != tnsot {
                debug!(
                    "tile {}: TNsot {} after {}",
                    isot, tnsot, tile.num_tile_parts
                );
                return Err(J2kError::InvalidData);
            }
            tile.num_tile_parts = tnsot;
        }
        if tile.num_tile_parts != 0 && tpsot >= tile.num_tile_parts {
            debug!(
                "tile {}: tile-part {} of {}",
                isot, tpsot, tile.num_tile_parts
            );
            return Err(J2kError::InvalidData);
        }
        Ok(())
    }

    fn parse_tile_part(&mut self) -> Result<(), J2kError> {
        let sot_start = self.reader.position() - 2;
        let length = self.reader.read_segment_length()?;
        if length != 8 {
            return Err(J2kError::InvalidMarkerSegmentSize);
        }
        let isot = self.reader.read_u16()? as usize;
        let mut psot = self.reader.read_u32()? as usize;
        let tpsot = self.reader.read_u8()? as usize;
        let tnsot = self.reader.read_u8()?;

        if isot >= self.tiles.len() {
            debug!("SOT for tile {} of {}", isot, self.tiles.len());
            return Err(J2kError::InvalidTileIndex);
        }
        let header_end = self.reader.position();
        let available = self.reader.end() - sot_start;
        if psot == 0 {
            // Up to EOC.
            psot = available.saturating_sub(2);
        }
        if psot > available || sot_start + psot < header_end + 2 {
            debug!("Psot {} invalid, {} bytes available", psot, available);
            return Err(J2kError::InvalidTilePartLength);
        }
        if tpsot >= MAX_TILE_PARTS || self.tiles[isot].tile_parts.len() >= MAX_TILE_PARTS {
            return Err(J2kError::TooManyTileParts);
        }
        self.check_tile_part_index(isot, tpsot as u8, tnsot)?;
        let tp_end = sot_start + psot;
        debug!(
            "SOT: tile {}, part {} of {}, {} bytes",
            isot, tpsot, tnsot, psot
        );

        if tpsot == 0 {
            let mut params = self.params.clone();
            params.poc_inherited = true;
            self.tiles[isot].params = params;
        }

        let scope = HeaderScope::Tile(isot);
        loop {
            if self.reader.position() + 2 > tp_end {
                debug!("tile-part header runs past Psot");
                return Err(J2kError::InvalidTilePartLength);
            }
            match self.reader.read_marker()? {
                Ok(J2kMarkerCode::StartOfData) => break,
                Ok(J2kMarkerCode::PackedPacketHeadersTile) => {
                    self.read_segment(J2kMarkerCode::PackedPacketHeadersTile, |p, seg| {
                        p.parse_ppt(seg, isot)
                    })?
                }
                Ok(J2kMarkerCode::PacketLengthsTile) => {
                    self.read_segment(J2kMarkerCode::PacketLengthsTile, |_, seg| parse_plt(seg))?
                }
                Ok(marker) => self.parse_common_marker(marker, scope)?,
                Err(code) => self.skip_unknown_marker(code)?,
            }
        }

        let data_start = self.reader.position();
        if data_start > tp_end {
            return Err(J2kError::InvalidTilePartLength);
        }

        if self.has_ppm {
            let packed = &self.packed_main[self.packed_main_pos.min(self.packed_main.len())..];
            if packed.len() < 4 {
                debug!("PPM data exhausted at tile {}", isot);
                return Err(J2kError::InvalidData);
            }
            let nppm = u32::from_be_bytes([packed[0], packed[1], packed[2], packed[3]]) as usize;
            if packed.len() - 4 < nppm {
                return Err(J2kError::InvalidData);
            }
            let headers = &packed[4..4 + nppm];
            let tile_headers = self.tiles[isot].packed_headers.get_or_insert_with(Vec::new);
            tile_headers.try_reserve(nppm)?;
            tile_headers.extend_from_slice(headers);
            self.packed_main_pos += 4 + nppm;
        }

        self.tiles[isot].tile_parts.push(J2kTilePart {
            tp_index: tpsot as u8,
            data_start,
            data_end: tp_end,
        });
        self.reader.set_position(tp_end)
    }
}

fn parse_tlm(seg: &mut J2kStreamReader) -> Result<(), J2kError> {
    let ztlm = seg.read_u8()?;
    let stlm = seg.read_u8()?;
    let st = ((stlm >> 4) & 3) as usize;
    if st == 3 {
        debug!("TLM with invalid ST value");
        return Err(J2kError::InvalidData);
    }
    let sp = ((stlm >> 6) & 1) as usize;
    let entry_size = st + 2 * (sp + 1);
    let entries = seg.remaining() / entry_size;
    seg.skip(entries * entry_size)?;
    debug!("TLM {}: {} tile-part lengths", ztlm, entries);
    Ok(())
}

fn parse_plm(seg: &mut J2kStreamReader) -> Result<(), J2kError> {
    let zplm = seg.read_u8()?;
    while seg.remaining() > 0 {
        let nplm = seg.read_u8()? as usize;
        seg.skip(nplm)?;
    }
    debug!("PLM {}", zplm);
    Ok(())
}

fn parse_plt(seg: &mut J2kStreamReader) -> Result<(), J2kError> {
    let zplt = seg.read_u8()?;
    let mut packets = 0;
    let mut last = 0u8;
    while seg.remaining() > 0 {
        last = seg.read_u8()?;
        if last & 0x80 == 0 {
            packets += 1;
        }
    }
    if last & 0x80 != 0 {
        debug!("PLT {} ends inside a packet length", zplt);
        return Err(J2kError::InvalidData);
    }
    trace!("PLT {}: {} packet lengths", zplt, packets);
    Ok(())
}

fn parse_crg(seg: &mut J2kStreamReader, ncomponents: usize) -> Result<(), J2kError> {
    if seg.remaining() != 4 * ncomponents {
        debug!("invalid CRG marker");
        return Err(J2kError::InvalidData);
    }
    seg.skip(seg.remaining())
}

fn parse_com(seg: &mut J2kStreamReader) -> Result<(), J2kError> {
    let rcom = seg.read_u16()?;
    let text = seg.read_bytes(seg.remaining())?;
    if rcom == 1 {
        debug!("COM: {}", String::from_utf8_lossy(text));
    } else {
        debug!("COM: {} binary bytes", text.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn siz(width: u32, height: u32, components: u16) -> Vec<u8> {
        let mut data = vec![0xFF, 0x51];
        data.extend_from_slice(&(38 + 3 * components).to_be_bytes());
        data.extend_from_slice(&[0x00, 0x00]); // Rsiz
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[0; 8]); // image offset
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[0; 8]); // tile offset
        data.extend_from_slice(&components.to_be_bytes());
        for _ in 0..components {
            data.extend_from_slice(&[0x07, 0x01, 0x01]);
        }
        data
    }

    fn cod_53(levels: u8) -> Vec<u8> {
        vec![
            0xFF, 0x52, // COD
            0x00, 0x0C, // length 12
            0x00, // Scod
            0x00, // LRCP
            0x00, 0x01, // 1 layer
            0x00, // mct
            levels, // decomposition levels
            0x04, // code-block width 2^6
            0x04, // code-block height 2^6
            0x00, // code-block style
            0x01, // 5/3
        ]
    }

    fn qcd_none(bands: usize) -> Vec<u8> {
        let mut data = vec![0xFF, 0x5C];
        data.extend_from_slice(&(3 + bands as u16).to_be_bytes());
        data.push(0x40); // 2 guard bits, no quantization
        for _ in 0..bands {
            data.push(9 << 3);
        }
        data
    }

    fn sot(tile: u16, psot: u32, tpsot: u8) -> Vec<u8> {
        sot_of(tile, psot, tpsot, 1)
    }

    fn sot_of(tile: u16, psot: u32, tpsot: u8, tnsot: u8) -> Vec<u8> {
        let mut data = vec![0xFF, 0x90, 0x00, 0x0A];
        data.extend_from_slice(&tile.to_be_bytes());
        data.extend_from_slice(&psot.to_be_bytes());
        data.extend_from_slice(&[tpsot, tnsot]);
        data
    }

    /// Main header of a 16x16 image followed by bodiless tile-parts of tile 0.
    fn with_tile_parts(parts: &[(u8, u8)]) -> Vec<u8> {
        let mut data = vec![0xFF, 0x4F];
        data.extend(siz(16, 16, 1));
        data.extend(cod_53(1));
        data.extend(qcd_none(4));
        for &(tpsot, tnsot) in parts {
            data.extend(sot_of(0, 14, tpsot, tnsot));
            data.extend_from_slice(&[0xFF, 0x93]);
        }
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    fn codestream(main: &[Vec<u8>], body: &[u8]) -> Vec<u8> {
        let mut data = vec![0xFF, 0x4F];
        for segment in main {
            data.extend_from_slice(segment);
        }
        data.extend(sot(0, 14 + body.len() as u32, 0));
        data.extend_from_slice(&[0xFF, 0x93]);
        data.extend_from_slice(body);
        data.extend_from_slice(&[0xFF, 0xD9]);
        data
    }

    fn parse(data: &[u8], options: DecodeOptions) -> Result<J2kParser<'_>, J2kError> {
        let mut parser = J2kParser::new(data, options);
        parser.parse_main_header()?;
        parser.parse_tile_parts()?;
        Ok(parser)
    }

    #[test]
    fn test_parse_siz() {
        let data = codestream(&[siz(256, 128, 3), cod_53(2), qcd_none(7)], &[]);
        let parser = parse(&data, DecodeOptions::default()).unwrap();
        assert_eq!(parser.image.width, 256);
        assert_eq!(parser.image.height, 128);
        assert_eq!(parser.image.components.len(), 3);
        assert_eq!(parser.image.components[0].depth, 8);
        assert!(!parser.image.components[0].is_signed);
        assert_eq!(parser.image.tile_count(), 1);
    }

    #[test]
    fn test_component_depth_limits() {
        let mut wide = siz(16, 16, 1);
        wide[40] = 31; // 32 bits
        let data = codestream(&[wide.clone(), cod_53(0), qcd_none(1)], &[]);
        let err = parse(&data, DecodeOptions::default()).err();
        assert_eq!(err, Some(J2kError::ParameterValueNotSupported));

        wide[40] = 40; // 41 bits
        let data = codestream(&[wide, cod_53(0), qcd_none(1)], &[]);
        let err = parse(&data, DecodeOptions::default()).err();
        assert_eq!(err, Some(J2kError::InvalidData));
    }

    #[test]
    fn test_image_sample_limit() {
        let data = codestream(&[siz(0x7F00_0008, 0x7F00_0008, 1), cod_53(0), qcd_none(1)], &[]);
        let err = parse(&data, DecodeOptions::default()).err();
        assert_eq!(err, Some(J2kError::ParameterValueNotSupported));

        // 12000 x 12000 fits for one component but not for two.
        let data = codestream(&[siz(12000, 12000, 1), cod_53(0), qcd_none(1)], &[]);
        assert!(parse(&data, DecodeOptions::default()).is_ok());
        let data = codestream(&[siz(12000, 12000, 2), cod_53(0), qcd_none(1)], &[]);
        let err = parse(&data, DecodeOptions::default()).err();
        assert_eq!(err, Some(J2kError::ParameterValueNotSupported));

        // Subsampled components count at their own resolution.
        let mut subsampled = siz(12000, 12000, 2);
        subsampled[44] = 2;
        subsampled[45] = 2;
        let data = codestream(&[subsampled, cod_53(0), qcd_none(1)], &[]);
        assert!(parse(&data, DecodeOptions::default()).is_ok());
    }

    #[test]
    fn test_parse_cod_qcd() {
        let data = codestream(&[siz(64, 64, 1), cod_53(3), qcd_none(10)], &[]);
        let parser = parse(&data, DecodeOptions::default()).unwrap();
        let codsty = &parser.params.codsty[0];
        assert_eq!(codsty.nreslevels, 4);
        assert_eq!(codsty.nreslevels2decode, 4);
        assert_eq!(codsty.log2_cblk_width, 6);
        assert_eq!(codsty.transform, Transform::Dwt53);
        assert_eq!(codsty.log2_prec_widths[0], 15);
        let qntsty = &parser.params.qntsty[0];
        assert_eq!(qntsty.quantsty, QSTY_NONE);
        assert_eq!(qntsty.nguardbits, 2);
        assert_eq!(&qntsty.expn[..10], &[9; 10]);

        let tile = &parser.tiles[0];
        assert_eq!(tile.tile_parts.len(), 1);
        assert_eq!(tile.params.codsty[0].nreslevels, 4);
    }

    #[test]
    fn test_coc_survives_later_cod() {
        let coc = vec![
            0xFF, 0x53, 0x00, 0x09, // COC, length 9
            0x01, // component 1
            0x00, // Scoc
            0x01, 0x03, 0x03, 0x00, 0x00, // 1 level, 32x32, 9/7
        ];
        let data = codestream(
            &[siz(16, 16, 3), coc, cod_53(2), qcd_none(7)],
            &[],
        );
        let parser = parse(&data, DecodeOptions::default().with_bitexact(true)).unwrap();
        assert_eq!(parser.params.codsty[0].nreslevels, 3);
        assert_eq!(parser.params.codsty[1].nreslevels, 2);
        assert_eq!(parser.params.codsty[1].log2_cblk_width, 5);
        assert_eq!(parser.params.codsty[1].transform, Transform::Dwt97Int);
        assert_eq!(parser.params.codsty[2].nreslevels, 3);
    }

    #[test]
    fn test_scalar_derived_extrapolation() {
        let qcd = vec![
            0xFF, 0x5C, 0x00, 0x05, // QCD, length 5
            0x21, // 1 guard bit, scalar derived
            0x50, 0x10, // expn 10, mant 0x010
        ];
        let data = codestream(&[siz(16, 16, 1), cod_53(2), qcd], &[]);
        let parser = parse(&data, DecodeOptions::default()).unwrap();
        let q = &parser.params.qntsty[0];
        assert_eq!(q.quantsty, QSTY_SI);
        assert_eq!(&q.expn[..8], &[10, 10, 10, 10, 9, 9, 9, 8]);
        assert!(q.mant[..8].iter().all(|&m| m == 0x10));
    }

    #[test]
    fn test_reduction_factor_too_large() {
        let data = codestream(&[siz(16, 16, 1), cod_53(2), qcd_none(7)], &[]);
        let mut parser = J2kParser::new(&data, DecodeOptions::default().with_reduction_factor(3));
        assert_eq!(parser.parse_main_header().err(), Some(J2kError::InvalidData));

        let parser = parse(&data, DecodeOptions::default().with_reduction_factor(2)).unwrap();
        assert_eq!(parser.params.codsty[0].nreslevels2decode, 1);
    }

    #[test]
    fn test_missing_soc_and_siz() {
        let data = [0xFF, 0x51, 0x00, 0x00];
        let mut parser = J2kParser::new(&data, DecodeOptions::default());
        assert_eq!(
            parser.parse_main_header().err(),
            Some(J2kError::StartOfCodestreamMarkerNotFound)
        );

        let mut data = vec![0xFF, 0x4F];
        data.extend(cod_53(1));
        let mut parser = J2kParser::new(&data, DecodeOptions::default());
        assert_eq!(
            parser.parse_main_header().err(),
            Some(J2kError::ImageSizeMarkerNotFound)
        );
    }

    #[test]
    fn test_invalid_tile_index() {
        let mut data = vec![0xFF, 0x4F];
        data.extend(siz(16, 16, 1));
        data.extend(cod_53(1));
        data.extend(qcd_none(4));
        data.extend(sot(3, 14, 0));
        data.extend_from_slice(&[0xFF, 0x93, 0xFF, 0xD9]);
        let mut parser = J2kParser::new(&data, DecodeOptions::default());
        parser.parse_main_header().unwrap();
        assert_eq!(parser.parse_tile_parts(), Err(J2kError::InvalidTileIndex));
    }

    #[test]
    fn test_psot_overflow() {
        let mut data = vec![0xFF, 0x4F];
        data.extend(siz(16, 16, 1));
        data.extend(cod_53(1));
        data.extend(qcd_none(4));
        data.extend(sot(0, 1000, 0));
        data.extend_from_slice(&[0xFF, 0x93, 0x00, 0xFF, 0xD9]);
        let mut parser = J2kParser::new(&data, DecodeOptions::default());
        parser.parse_main_header().unwrap();
        assert_eq!(
            parser.parse_tile_parts(),
            Err(J2kError::InvalidTilePartLength)
        );
    }

    #[test]
    fn test_unknown_marker_is_skipped_unless_strict() {
        let unknown = vec![0xFF, 0x70, 0x00, 0x04, 0xAA, 0xBB];
        let data = codestream(&[siz(16, 16, 1), unknown, cod_53(1), qcd_none(4)], &[]);
        assert!(parse(&data, DecodeOptions::default()).is_ok());
        assert_eq!(
            parse(&data, DecodeOptions::default().with_strict_std_compliance(true)).err(),
            Some(J2kError::UnknownMarkerFound)
        );
    }

    #[test]
    fn test_segment_length_mismatch() {
        // COM declares 8 bytes but Rcom + text fill them; COD one byte too long.
        let mut cod = cod_53(1);
        cod[3] = 0x0D;
        cod.push(0x00);
        let data = codestream(&[siz(16, 16, 1), cod, qcd_none(4)], &[]);
        assert!(parse(&data, DecodeOptions::default()).is_ok());
        assert_eq!(
            parse(&data, DecodeOptions::default().with_strict_std_compliance(true)).err(),
            Some(J2kError::InvalidMarkerSegmentSize)
        );

        let mut oversize = cod_53(1);
        oversize[3] = 0xF0;
        let data = codestream(&[siz(16, 16, 1), oversize], &[]);
        assert_eq!(
            parse(&data, DecodeOptions::default()).err(),
            Some(J2kError::InvalidMarkerSegmentSize)
        );
    }

    #[test]
    fn test_poc_replaces_then_appends() {
        let poc = |ra_start: u8, ra_end: u8| {
            vec![
                0xFF, 0x5F, 0x00, 0x09, ra_start, 0x00, 0x00, 0x01, ra_end, 0x00, 0x02,
            ]
        };
        let mut data = vec![0xFF, 0x4F];
        data.extend(siz(16, 16, 1));
        data.extend(cod_53(2));
        data.extend(qcd_none(7));
        data.extend(poc(0, 1));

        let mut tile_header = poc(1, 3);
        tile_header.extend(poc(0, 2));
        let psot = 12 + tile_header.len() as u32 + 2;
        data.extend(sot(0, psot, 0));
        data.extend(tile_header);
        data.extend_from_slice(&[0xFF, 0x93, 0xFF, 0xD9]);

        let parser = parse(&data, DecodeOptions::default()).unwrap();
        assert_eq!(parser.params.poc.len(), 1);
        let tile_poc = &parser.tiles[0].params.poc;
        assert_eq!(tile_poc.len(), 2);
        assert_eq!(tile_poc[0].ra_start, 1);
        assert_eq!(tile_poc[0].cs_end, 1);
        assert_eq!(tile_poc[0].order, ProgressionOrder::Rpcl);
        assert_eq!(tile_poc[1].ra_end, 2);
    }

    #[test]
    fn test_invalid_poc_entry() {
        let poc = vec![0xFF, 0x5F, 0x00, 0x09, 0x02, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00];
        let data = codestream(&[siz(16, 16, 1), cod_53(2), qcd_none(7), poc], &[]);
        assert_eq!(
            parse(&data, DecodeOptions::default()).err(),
            Some(J2kError::InvalidData)
        );
    }

    #[test]
    fn test_ppm_is_distributed_per_tile_part() {
        let ppm = vec![
            0xFF, 0x60, 0x00, 0x09, // PPM, length 9
            0x00, // Zppm
            0x00, 0x00, 0x00, 0x02, 0x80, 0x00, // Nppm = 2, headers
        ];
        let data = codestream(&[siz(16, 16, 1), cod_53(1), qcd_none(4), ppm], &[0xAB]);
        let parser = parse(&data, DecodeOptions::default()).unwrap();
        let tile = &parser.tiles[0];
        assert_eq!(tile.packed_headers.as_deref(), Some(&[0x80, 0x00][..]));
        let tp = tile.tile_parts[0];
        assert_eq!(tp.data_end - tp.data_start, 1);
        assert_eq!(data[tp.data_start], 0xAB);
    }

    #[test]
    fn test_tile_parts_in_order() {
        let data = with_tile_parts(&[(0, 2), (1, 2)]);
        let parser = parse(&data, DecodeOptions::default()).unwrap();
        assert_eq!(parser.tiles[0].tile_parts.len(), 2);
        assert_eq!(parser.tiles[0].num_tile_parts, 2);

        // TNsot may stay unknown
        let data = with_tile_parts(&[(0, 0), (1, 0), (2, 0)]);
        let parser = parse(&data, DecodeOptions::default()).unwrap();
        assert_eq!(parser.tiles[0].tile_parts.len(), 3);
    }

    #[test]
    fn test_repeated_tile_part_is_rejected() {
        for parts in [
            &[(0, 1), (0, 1)][..],
            &[(0, 0), (1, 0), (1, 0)],
            &[(0, 2), (1, 2), (2, 2)],
            &[(0, 0), (3, 2)],
            &[(0, 2), (1, 3)],
        ] {
            let data = with_tile_parts(parts);
            assert_eq!(
                parse(&data, DecodeOptions::default()).err(),
                Some(J2kError::InvalidData),
                "{:?}",
                parts
            );
        }
    }

    #[test]
    fn test_psot_zero_runs_to_eoc() {
        let mut data = vec![0xFF, 0x4F];
        data.extend(siz(16, 16, 1));
        data.extend(cod_53(1));
        data.extend(qcd_none(4));
        data.extend(sot(0, 0, 0));
        data.extend_from_slice(&[0xFF, 0x93, 0x01, 0x02, 0x03, 0xFF, 0xD9]);
        let parser = parse(&data, DecodeOptions::default()).unwrap();
        let tp = parser.tiles[0].tile_parts[0];
        assert_eq!(&data[tp.data_start..tp.data_end], &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_mixed_ht_is_unsupported() {
        let mut cod = cod_53(1);
        cod[12] = CBLK_HT | CBLK_HT_MIXED;
        let data = codestream(&[siz(16, 16, 1), cod, qcd_none(4)], &[]);
        let err = parse(&data, DecodeOptions::default()).err();
        assert_eq!(err, Some(J2kError::MixedHtCodeBlocks));
    }
}
