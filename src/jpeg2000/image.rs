use crate::constants::{INITIAL_LBLOCK, MAX_RESLEVELS, MAX_SUBBANDS, QSTY_NONE};
use crate::error::J2kError;
use crate::jpeg2000::quantization;
use crate::jpeg2000::tag_tree::TagTree;
use num_enum::TryFromPrimitive;

/// `ceil(a / 2^b)` on possibly negative reference grid offsets.
pub fn ceil_div_pow2(a: i64, b: u32) -> i64 {
    (a + (1i64 << b) - 1) >> b
}

pub fn ceil_div(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}

/// Half-open rectangle `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct J2kRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl J2kRect {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Every corner divided by `2^n`, rounding up.
    pub fn ceil_div_pow2(&self, n: u32) -> Self {
        let f = |v: u32| ceil_div_pow2(v as i64, n) as u32;
        Self::new(f(self.x0), f(self.y0), f(self.x1), f(self.y1))
    }
}

/// Image and tile geometry from the SIZ marker.
#[derive(Debug, Clone, Default)]
pub struct J2kImage {
    /// Capabilities (Rsiz).
    pub rsiz: u16,
    /// Width of the reference grid (Xsiz).
    pub width: u32,
    /// Height of the reference grid (Ysiz).
    pub height: u32,
    /// Horizontal offset of the image area on the reference grid.
    pub x_origin: u32,
    /// Vertical offset of the image area on the reference grid.
    pub y_origin: u32,
    /// Nominal tile width (XTsiz).
    pub tile_width: u32,
    /// Nominal tile height (YTsiz).
    pub tile_height: u32,
    /// Horizontal offset of the first tile on the reference grid.
    pub tile_x_origin: u32,
    /// Vertical offset of the first tile on the reference grid.
    pub tile_y_origin: u32,
    /// Number of tiles in each direction.
    pub num_tiles_x: u32,
    pub num_tiles_y: u32,
    /// Component information (depth, signedness, subsampling).
    pub components: Vec<J2kComponentInfo>,
    /// Capability (CAP) marker information, when present.
    pub cap: Option<J2kCap>,
}

impl J2kImage {
    pub fn tile_count(&self) -> usize {
        self.num_tiles_x as usize * self.num_tiles_y as usize
    }

    /// Area of tile `index` on the reference grid, clipped to the image area.
    pub fn tile_rect(&self, index: usize) -> J2kRect {
        let tx = (index % self.num_tiles_x.max(1) as usize) as u64;
        let ty = (index / self.num_tiles_x.max(1) as usize) as u64;
        let clip = |v: u64, lo: u32, hi: u32| v.clamp(lo as u64, hi as u64) as u32;
        let tw = self.tile_width as u64;
        let th = self.tile_height as u64;
        let ox = self.tile_x_origin as u64;
        let oy = self.tile_y_origin as u64;
        J2kRect::new(
            clip(tx * tw + ox, self.x_origin, self.width),
            clip(ty * th + oy, self.y_origin, self.height),
            clip((tx + 1) * tw + ox, self.x_origin, self.width),
            clip((ty + 1) * th + oy, self.y_origin, self.height),
        )
    }

    /// Image area of component `compno` on its own sub-sampled grid.
    pub fn component_rect(&self, compno: usize) -> J2kRect {
        let Some(c) = self.components.get(compno) else {
            return J2kRect::default();
        };
        let dx = c.dx.max(1) as i64;
        let dy = c.dy.max(1) as i64;
        J2kRect::new(
            ceil_div(self.x_origin as i64, dx) as u32,
            ceil_div(self.y_origin as i64, dy) as u32,
            ceil_div(self.width as i64, dx) as u32,
            ceil_div(self.height as i64, dy) as u32,
        )
    }
}

/// Metadata for a single component from the SIZ marker.
#[derive(Debug, Clone, Default)]
pub struct J2kComponentInfo {
    /// bit depth, 1..=38
    pub depth: u8,
    pub is_signed: bool,
    /// Horizontal subsampling factor
    pub dx: u8,
    /// Vertical subsampling factor
    pub dy: u8,
}

/// Capability (CAP) marker information (Part 15)
#[derive(Debug, Clone, Default)]
pub struct J2kCap {
    pub pcap: u32,
    pub ccap: Vec<u16>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive)]
#[repr(u8)]
pub enum ProgressionOrder {
    #[default]
    Lrcp = 0,
    Rlcp = 1,
    Rpcl = 2,
    Pcrl = 3,
    Cprl = 4,
}

/// Inverse wavelet transform selected for a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transform {
    /// Irreversible 9/7, floating point.
    #[default]
    Dwt97,
    /// Reversible 5/3.
    Dwt53,
    /// Irreversible 9/7 on fixed-point integers.
    Dwt97Int,
}

impl Transform {
    pub fn is_integer(self) -> bool {
        !matches!(self, Transform::Dwt97)
    }
}

/// Orientation of a wavelet subband.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubbandOrientation {
    #[default]
    /// Low-Low (base image)
    LL,
    /// High-Low (horizontal details)
    HL,
    /// Low-High (vertical details)
    LH,
    /// High-High (diagonal details)
    HH,
}

impl SubbandOrientation {
    /// Band of resolution `reslevel`, numbered from 0 within the level.
    pub fn from_band(reslevel: usize, bandno: usize) -> Self {
        match (reslevel, bandno) {
            (0, _) => SubbandOrientation::LL,
            (_, 0) => SubbandOrientation::HL,
            (_, 1) => SubbandOrientation::LH,
            _ => SubbandOrientation::HH,
        }
    }

    /// Position index: 0 LL, 1 HL, 2 LH, 3 HH. Bit 0 is the horizontal high
    /// pass, bit 1 the vertical one.
    pub fn position(self) -> usize {
        self as usize
    }

    /// log2 of the nominal dynamic range gain of the band (E.1.1.1).
    pub fn gain(self) -> u32 {
        match self {
            SubbandOrientation::LL => 0,
            SubbandOrientation::HL | SubbandOrientation::LH => 1,
            SubbandOrientation::HH => 2,
        }
    }
}

/// Coding style of one component (COD / COC).
#[derive(Debug, Clone)]
pub struct J2kCodingStyle {
    /// Precinct sizes are signalled explicitly (Scod bit 0).
    pub precincts_defined: bool,
    pub nreslevels: u8,
    /// Resolution levels left after applying the reduction factor.
    pub nreslevels2decode: u8,
    pub log2_cblk_width: u8,
    pub log2_cblk_height: u8,
    pub cblk_style: u8,
    pub transform: Transform,
    pub log2_prec_widths: [u8; MAX_RESLEVELS],
    pub log2_prec_heights: [u8; MAX_RESLEVELS],
}

impl Default for J2kCodingStyle {
    fn default() -> Self {
        Self {
            precincts_defined: false,
            nreslevels: 1,
            nreslevels2decode: 1,
            log2_cblk_width: 6,
            log2_cblk_height: 6,
            cblk_style: 0,
            transform: Transform::Dwt53,
            log2_prec_widths: [15; MAX_RESLEVELS],
            log2_prec_heights: [15; MAX_RESLEVELS],
        }
    }
}

/// Quantization style of one component (QCD / QCC).
#[derive(Debug, Clone)]
pub struct J2kQuantStyle {
    pub quantsty: u8,
    pub nguardbits: u8,
    pub expn: Vec<u8>,
    pub mant: Vec<u16>,
}

impl Default for J2kQuantStyle {
    fn default() -> Self {
        Self {
            quantsty: QSTY_NONE,
            nguardbits: 0,
            expn: vec![0; MAX_SUBBANDS],
            mant: vec![0; MAX_SUBBANDS],
        }
    }
}

/// One entry of a progression order change (POC) marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct J2kPocEntry {
    pub ra_start: u8,
    pub cs_start: u16,
    pub ly_end: u16,
    pub ra_end: u8,
    pub cs_end: u16,
    pub order: ProgressionOrder,
}

pub const HAD_COC: u8 = 0x01;
pub const HAD_QCC: u8 = 0x02;

/// Coding parameters shared by the main header and every tile.
///
/// The main-header set is copied into a tile at its first tile-part, after
/// which tile-part markers modify the copy.
#[derive(Debug, Clone, Default)]
pub struct J2kCodingParameters {
    /// SOP / EPH flags from COD.
    pub csty: u8,
    pub prog_order: ProgressionOrder,
    pub nlayers: u16,
    pub mct: bool,
    pub codsty: Vec<J2kCodingStyle>,
    pub qntsty: Vec<J2kQuantStyle>,
    /// Per component `HAD_COC` / `HAD_QCC` flags.
    pub properties: Vec<u8>,
    pub roi_shift: Vec<u8>,
    pub poc: Vec<J2kPocEntry>,
    /// The POC table was copied from the main header and has not been
    /// replaced by a tile POC yet.
    pub poc_inherited: bool,
}

impl J2kCodingParameters {
    pub fn new(component_count: usize) -> Self {
        Self {
            nlayers: 1,
            codsty: vec![J2kCodingStyle::default(); component_count],
            qntsty: vec![J2kQuantStyle::default(); component_count],
            properties: vec![0; component_count],
            roi_shift: vec![0; component_count],
            ..Default::default()
        }
    }
}

/// Byte range of one tile-part body in the codestream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct J2kTilePart {
    pub tp_index: u8,
    pub data_start: usize,
    pub data_end: usize,
}

/// A single tile of the image and all of its decoding state.
#[derive(Debug, Default)]
pub struct J2kTile {
    pub index: u32,
    /// Area on the reference grid.
    pub coord: J2kRect,
    pub params: J2kCodingParameters,
    pub tile_parts: Vec<J2kTilePart>,
    /// TNsot, 0 while no tile-part has announced it.
    pub num_tile_parts: u8,
    /// Packet headers from PPM or PPT, when they are not in-band.
    pub packed_headers: Option<Vec<u8>>,
    pub components: Vec<J2kTileComponent>,
    /// Arena of every code-block of the tile; precincts index into it.
    pub cblks: Vec<J2kCodeBlock>,
}

/// Component data specific to a single tile.
#[derive(Debug, Default)]
pub struct J2kTileComponent {
    /// Area at the decoded resolution.
    pub coord: J2kRect,
    /// Area at full resolution on the component grid.
    pub coord_o: J2kRect,
    pub resolutions: Vec<J2kResolution>,
}

/// A resolution level of one tile-component. Level 0 holds the LL band.
#[derive(Debug, Default)]
pub struct J2kResolution {
    pub coord: J2kRect,
    pub log2_prec_width: u8,
    pub log2_prec_height: u8,
    pub num_precincts_x: u32,
    pub num_precincts_y: u32,
    pub bands: Vec<J2kBand>,
}

impl J2kResolution {
    pub fn precinct_count(&self) -> usize {
        self.num_precincts_x as usize * self.num_precincts_y as usize
    }
}

/// A frequency subband within a resolution level.
#[derive(Debug, Default)]
pub struct J2kBand {
    pub orientation: SubbandOrientation,
    /// Area in the band's own coordinate system.
    pub coord: J2kRect,
    /// Position of the band in the component plane (Mallat layout).
    pub offset_x: u32,
    pub offset_y: u32,
    pub log2_cblk_width: u8,
    pub log2_cblk_height: u8,
    /// Exponent of the band, as used by the zero bit-plane computation.
    pub expn: u8,
    /// Magnitude bits M_b.
    pub magnitude_bits: u8,
    /// Quantization step size Δb.
    pub stepsize: f32,
    /// Δb in Q15.
    pub i_stepsize: i32,
    /// Δb in Q23, for the fixed-point 9/7 path.
    pub i_stepsize97: i32,
    pub precincts: Vec<J2kPrecinct>,
}

/// A precinct of one band.
#[derive(Debug)]
pub struct J2kPrecinct {
    pub coord: J2kRect,
    pub nb_codeblocks_width: u32,
    pub nb_codeblocks_height: u32,
    /// Index of the first code-block in the tile arena.
    pub cblk_start: usize,
    pub inclusion: TagTree,
    pub zero_bitplanes: TagTree,
}

impl J2kPrecinct {
    pub fn codeblock_count(&self) -> usize {
        self.nb_codeblocks_width as usize * self.nb_codeblocks_height as usize
    }
}

/// Compressed data and packet state of one code-block.
#[derive(Debug, Clone, Default)]
pub struct J2kCodeBlock {
    /// Area in band coordinates.
    pub coord: J2kRect,
    pub npasses: u32,
    pub lblock: u8,
    pub nonzerobits: u8,
    pub zbp: u8,
    pub included: bool,
    /// Concatenated codeword segments.
    pub data: Vec<u8>,
    /// Start offset in `data` of every codeword segment, first entry 0.
    pub data_start: Vec<usize>,
    pub nb_terminations: usize,
    /// Set until the first non-empty HT cleanup segment.
    pub ht_placeholder: bool,
    /// Passes read while in the placeholder state.
    pub ht_placeholder_passes: u32,
    /// HT cleanup and refinement segment lengths.
    pub ht_pass_lengths: [usize; 2],
}

impl J2kCodeBlock {
    fn new(coord: J2kRect) -> Self {
        Self {
            coord,
            lblock: INITIAL_LBLOCK,
            data_start: vec![0],
            ht_placeholder: true,
            ..Default::default()
        }
    }
}

impl J2kTile {
    /// Builds the component, resolution, band, precinct and code-block
    /// structure of the tile from its coding parameters.
    pub fn init_components(
        &mut self,
        image: &J2kImage,
        reduction_factor: u8,
    ) -> Result<(), J2kError> {
        let mut components = Vec::new();
        components.try_reserve(image.components.len())?;
        let mut cblks = Vec::new();

        for (compno, info) in image.components.iter().enumerate() {
            let dx = info.dx.max(1) as i64;
            let dy = info.dy.max(1) as i64;
            let coord_o = J2kRect::new(
                ceil_div(self.coord.x0 as i64, dx) as u32,
                ceil_div(self.coord.y0 as i64, dy) as u32,
                ceil_div(self.coord.x1 as i64, dx) as u32,
                ceil_div(self.coord.y1 as i64, dy) as u32,
            );
            let codsty = &self.params.codsty[compno];
            let qntsty = &self.params.qntsty[compno];
            let roi_shift = self.params.roi_shift[compno];
            let comp = init_component(
                coord_o,
                codsty,
                qntsty,
                info.depth,
                roi_shift,
                reduction_factor,
                &mut cblks,
            )?;
            components.push(comp);
        }

        self.components = components;
        self.cblks = cblks;
        Ok(())
    }
}

fn init_component(
    coord_o: J2kRect,
    codsty: &J2kCodingStyle,
    qntsty: &J2kQuantStyle,
    precision: u8,
    roi_shift: u8,
    reduction_factor: u8,
    cblks: &mut Vec<J2kCodeBlock>,
) -> Result<J2kTileComponent, J2kError> {
    let nreslevels = codsty.nreslevels as usize;
    let mut resolutions: Vec<J2kResolution> = Vec::with_capacity(nreslevels);

    for reslevelno in 0..nreslevels {
        // Number of decomposition levels above this resolution, plus one.
        let declvl = (nreslevels - reslevelno) as u32;
        let coord = coord_o.ceil_div_pow2(declvl - 1);
        let log2_prec_width = codsty.log2_prec_widths[reslevelno];
        let log2_prec_height = codsty.log2_prec_heights[reslevelno];

        let num_precincts_x = if coord.x1 == coord.x0 {
            0
        } else {
            (ceil_div_pow2(coord.x1 as i64, log2_prec_width as u32)
                - (coord.x0 >> log2_prec_width) as i64) as u32
        };
        let num_precincts_y = if coord.y1 == coord.y0 {
            0
        } else {
            (ceil_div_pow2(coord.y1 as i64, log2_prec_height as u32)
                - (coord.y0 >> log2_prec_height) as i64) as u32
        };
        let nb_precincts = num_precincts_x as usize * num_precincts_y as usize;
        if nb_precincts > i32::MAX as usize {
            return Err(J2kError::InvalidData);
        }

        let mut resolution = J2kResolution {
            coord,
            log2_prec_width,
            log2_prec_height,
            num_precincts_x,
            num_precincts_y,
            bands: Vec::new(),
        };

        // Mallat offsets: high-pass bands sit after the previous level's samples.
        let (prev_w, prev_h) = match resolutions.last() {
            Some(prev) => (prev.coord.width(), prev.coord.height()),
            None => (0, 0),
        };

        let nbands = if reslevelno == 0 { 1 } else { 3 };
        for bandno in 0..nbands {
            let orientation = SubbandOrientation::from_band(reslevelno, bandno);
            let band = init_band(
                &resolution,
                coord_o,
                codsty,
                qntsty,
                orientation,
                reslevelno,
                bandno,
                precision,
                roi_shift,
                (prev_w, prev_h),
                cblks,
            )?;
            resolution.bands.push(band);
        }
        resolutions.push(resolution);
    }

    let coord = coord_o.ceil_div_pow2(reduction_factor as u32);
    Ok(J2kTileComponent {
        coord,
        coord_o,
        resolutions,
    })
}

#[allow(clippy::too_many_arguments)]
fn init_band(
    resolution: &J2kResolution,
    coord_o: J2kRect,
    codsty: &J2kCodingStyle,
    qntsty: &J2kQuantStyle,
    orientation: SubbandOrientation,
    reslevelno: usize,
    bandno: usize,
    precision: u8,
    roi_shift: u8,
    prev_size: (u32, u32),
    cblks: &mut Vec<J2kCodeBlock>,
) -> Result<J2kBand, J2kError> {
    let declvl = codsty.nreslevels as u32 - reslevelno as u32;
    let bandpos = orientation.position();

    let (coord, log2_band_prec_width, log2_band_prec_height, log2_cblk_width, log2_cblk_height);
    if reslevelno == 0 {
        coord = coord_o.ceil_div_pow2(declvl - 1);
        log2_band_prec_width = resolution.log2_prec_width;
        log2_band_prec_height = resolution.log2_prec_height;
        log2_cblk_width = codsty.log2_cblk_width.min(resolution.log2_prec_width);
        log2_cblk_height = codsty.log2_cblk_height.min(resolution.log2_prec_height);
    } else {
        // (B-15): tbx = ceil((tcx - 2^(declvl-1) * xob) / 2^declvl)
        let xob = (bandpos & 1) as i64;
        let yob = ((bandpos >> 1) & 1) as i64;
        let f = |v: u32, ob: i64| {
            ceil_div_pow2(v as i64 - (ob << (declvl - 1)), declvl).max(0) as u32
        };
        coord = J2kRect::new(
            f(coord_o.x0, xob),
            f(coord_o.y0, yob),
            f(coord_o.x1, xob),
            f(coord_o.y1, yob),
        );
        log2_band_prec_width = resolution.log2_prec_width.saturating_sub(1);
        log2_band_prec_height = resolution.log2_prec_height.saturating_sub(1);
        log2_cblk_width = codsty.log2_cblk_width.min(log2_band_prec_width);
        log2_cblk_height = codsty.log2_cblk_height.min(log2_band_prec_height);
    }

    let gbandno = if reslevelno == 0 {
        0
    } else {
        3 * (reslevelno - 1) + 1 + bandno
    };
    let expn = qntsty.expn.get(gbandno).copied().unwrap_or(0);
    let mant = qntsty.mant.get(gbandno).copied().unwrap_or(0);
    let magnitude_bits = (expn as u32 + qntsty.nguardbits as u32).saturating_sub(1);
    if magnitude_bits + roi_shift as u32 > 31 {
        return Err(J2kError::InvalidData);
    }
    let stepsize = quantization::band_stepsize(
        qntsty.quantsty,
        expn,
        mant,
        precision as u32 + orientation.gain(),
    );

    let mut band = J2kBand {
        orientation,
        coord,
        offset_x: if bandpos & 1 != 0 { prev_size.0 } else { 0 },
        offset_y: if bandpos & 2 != 0 { prev_size.1 } else { 0 },
        log2_cblk_width,
        log2_cblk_height,
        expn,
        magnitude_bits: magnitude_bits as u8,
        stepsize: stepsize as f32,
        i_stepsize: quantization::fixed_stepsize(stepsize, 15),
        i_stepsize97: quantization::fixed_stepsize(stepsize, 16 + crate::constants::I_PRESHIFT - 1),
        precincts: Vec::new(),
    };

    let nb_precincts = resolution.precinct_count();
    band.precincts.try_reserve(nb_precincts)?;
    for precno in 0..nb_precincts {
        let precinct = init_precinct(
            &band,
            resolution,
            precno,
            log2_band_prec_width,
            log2_band_prec_height,
            cblks,
        )?;
        band.precincts.push(precinct);
    }
    Ok(band)
}

fn init_precinct(
    band: &J2kBand,
    resolution: &J2kResolution,
    precno: usize,
    log2_band_prec_width: u8,
    log2_band_prec_height: u8,
    cblks: &mut Vec<J2kCodeBlock>,
) -> Result<J2kPrecinct, J2kError> {
    let npx = resolution.num_precincts_x as u64;
    let px = (resolution.coord.x0 >> resolution.log2_prec_width) as u64 + precno as u64 % npx;
    let py = (resolution.coord.y0 >> resolution.log2_prec_height) as u64 + precno as u64 / npx;
    let px0 = px << log2_band_prec_width;
    let py0 = py << log2_band_prec_height;
    let px1 = px0 + (1u64 << log2_band_prec_width);
    let py1 = py0 + (1u64 << log2_band_prec_height);

    let coord = J2kRect::new(
        px0.max(band.coord.x0 as u64).min(u32::MAX as u64) as u32,
        py0.max(band.coord.y0 as u64).min(u32::MAX as u64) as u32,
        px1.min(band.coord.x1 as u64) as u32,
        py1.min(band.coord.y1 as u64) as u32,
    );

    let cbw = band.log2_cblk_width as u32;
    let cbh = band.log2_cblk_height as u32;
    let (nb_w, nb_h) = if coord.is_empty() {
        (0, 0)
    } else {
        (
            (ceil_div_pow2(coord.x1 as i64, cbw) - (coord.x0 >> cbw) as i64) as u32,
            (ceil_div_pow2(coord.y1 as i64, cbh) - (coord.y0 >> cbh) as i64) as u32,
        )
    };
    let count = nb_w as usize * nb_h as usize;
    if count > i32::MAX as usize {
        return Err(J2kError::InvalidData);
    }

    let cblk_start = cblks.len();
    cblks.try_reserve(count)?;
    for cblkno in 0..count {
        let cx0 = ((coord.x0 >> cbw) << cbw) + ((cblkno as u32 % nb_w) << cbw);
        let cy0 = ((coord.y0 >> cbh) << cbh) + ((cblkno as u32 / nb_w) << cbh);
        let cblk_coord = J2kRect::new(
            cx0.max(coord.x0),
            cy0.max(coord.y0),
            cx0.saturating_add(1 << cbw).min(coord.x1),
            cy0.saturating_add(1 << cbh).min(coord.y1),
        );
        cblks.push(J2kCodeBlock::new(cblk_coord));
    }

    Ok(J2kPrecinct {
        coord,
        nb_codeblocks_width: nb_w,
        nb_codeblocks_height: nb_h,
        cblk_start,
        inclusion: TagTree::new(nb_w as usize, nb_h as usize),
        zero_bitplanes: TagTree::new(nb_w as usize, nb_h as usize),
    })
}
