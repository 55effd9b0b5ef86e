//! JPEG 2000 / HTJ2K decoder.
//!
//! [`J2kDecoder`] drives the decoding process: marker parsing, then for every
//! tile the packet headers, tier-1 decoding of each code-block and
//! dequantization into component planes. [`J2kDecoder::decode`] carries on
//! with the inverse wavelet and component transforms, the DC level shift and
//! the assembly of tiles into a full image.

use super::bit_plane_coder::{BitPlaneDecoder, CodeBlockParams};
use super::dwt::{inverse_dwt_float, inverse_dwt_int};
use super::ht_block_coder::HtBlockDecoder;
use super::image::{J2kCodingParameters, J2kImage, J2kRect, J2kTile, Transform};
use super::jp2::locate_codestream;
use super::mct;
use super::packet::PacketDecoder;
use super::parser::J2kParser;
use super::progression::PacketIterator;
use super::quantization::{dequantize_float, dequantize_int, dequantize_int97};
use crate::constants::{CBLK_HT, I_PRESHIFT};
use crate::error::J2kError;
use log::{debug, trace, warn};

/// Per-call decoding options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Number of highest resolution levels to leave out.
    pub reduction_factor: u8,
    /// Reject deviations from the standard that are otherwise worked around.
    pub strict_std_compliance: bool,
    /// Use the fixed-point 9/7 wavelet for irreversible components.
    pub bitexact: bool,
}

impl DecodeOptions {
    pub fn with_reduction_factor(mut self, reduction_factor: u8) -> Self {
        self.reduction_factor = reduction_factor;
        self
    }

    pub fn with_strict_std_compliance(mut self, strict: bool) -> Self {
        self.strict_std_compliance = strict;
        self
    }

    pub fn with_bitexact(mut self, bitexact: bool) -> Self {
        self.bitexact = bitexact;
        self
    }
}

/// Contents of the main header.
#[derive(Debug, Clone)]
pub struct ImageHeader {
    /// Geometry and components (SIZ) and capabilities (CAP).
    pub image: J2kImage,
    /// Tile defaults from COD, COC, QCD, QCC, RGN and POC.
    pub params: J2kCodingParameters,
}

impl ImageHeader {
    pub fn tile_count(&self) -> usize {
        self.image.tile_count()
    }
}

/// Wavelet-domain samples of a tile-component.
#[derive(Debug, Clone, PartialEq)]
pub enum CoefficientPlane {
    /// 5/3 samples, or Q8 samples for the fixed-point 9/7 wavelet.
    Int(Vec<i32>),
    Float(Vec<f32>),
}

#[derive(Debug, Clone)]
pub struct ComponentCoefficients {
    /// Area of the tile-component at the decoded resolution.
    pub coord: J2kRect,
    pub transform: Transform,
    /// Area of every decoded resolution level, lowest first.
    pub resolutions: Vec<J2kRect>,
    /// Subbands in Mallat layout with `coord.width()` samples per row.
    pub plane: CoefficientPlane,
}

#[derive(Debug, Clone)]
pub struct TileCoefficients {
    pub index: u32,
    /// Area on the reference grid.
    pub coord: J2kRect,
    /// Whether the tile uses a multiple component transform.
    pub mct: bool,
    pub components: Vec<ComponentCoefficients>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedComponent {
    pub width: u32,
    pub height: u32,
    pub precision: u8,
    pub is_signed: bool,
    /// Row-major samples.
    pub data: Vec<i32>,
}

/// A decoded image, one plane per component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub components: Vec<DecodedComponent>,
}

/// High-level JPEG 2000 decoder over a raw codestream or a JP2 file.
pub struct J2kDecoder<'a> {
    data: &'a [u8],
    options: DecodeOptions,
    header: Option<ImageHeader>,
}

impl<'a> J2kDecoder<'a> {
    pub fn new(data: &'a [u8], options: DecodeOptions) -> Self {
        Self {
            data,
            options,
            header: None,
        }
    }

    fn parse_main_header(&self) -> Result<(&'a [u8], J2kParser<'a>), J2kError> {
        let codestream = locate_codestream(self.data)?;
        let mut parser = J2kParser::new(codestream, self.options);
        parser.parse_main_header()?;
        Ok((codestream, parser))
    }

    fn remember_header(&mut self, parser: &J2kParser) {
        if self.header.is_none() {
            self.header = Some(ImageHeader {
                image: parser.image.clone(),
                params: parser.params.clone(),
            });
        }
    }

    /// Parses the main header.
    pub fn read_header(&mut self) -> Result<&ImageHeader, J2kError> {
        if self.header.is_none() {
            let (_, parser) = self.parse_main_header()?;
            self.remember_header(&parser);
        }
        self.header.as_ref().ok_or(J2kError::InvalidData)
    }

    /// Decodes every tile down to dequantized wavelet coefficients.
    pub fn decode_coefficients(&mut self) -> Result<Vec<TileCoefficients>, J2kError> {
        let (codestream, mut parser) = self.parse_main_header()?;
        self.remember_header(&parser);
        parser.parse_tile_parts()?;
        let (image, tiles) = parser.into_parts();
        debug!(
            "decoding {} tiles of {}x{}, {} components",
            tiles.len(),
            image.width.saturating_sub(image.x_origin),
            image.height.saturating_sub(image.y_origin),
            image.components.len()
        );
        let options = self.options;
        map_tiles(tiles, |tile| decode_tile(codestream, &image, tile, &options))
    }

    /// Runs the full pipeline and returns the reconstructed image.
    pub fn decode(&mut self) -> Result<DecodedImage, J2kError> {
        let reduction = self.options.reduction_factor as u32;
        let tiles = self.decode_coefficients()?;
        let image = &self.read_header()?.image;
        let samples = map_tiles(tiles, |tile| reconstruct_tile(tile, image))?;
        compose(image, reduction, samples)
    }
}

#[cfg(feature = "parallel")]
fn map_tiles<T, R, F>(items: Vec<T>, f: F) -> Result<Vec<R>, J2kError>
where
    T: Send,
    R: Send,
    F: Fn(T) -> Result<R, J2kError> + Sync + Send,
{
    use rayon::prelude::*;
    items.into_par_iter().map(f).collect()
}

#[cfg(not(feature = "parallel"))]
fn map_tiles<T, R, F>(items: Vec<T>, f: F) -> Result<Vec<R>, J2kError>
where
    F: Fn(T) -> Result<R, J2kError>,
{
    items.into_iter().map(f).collect()
}

fn zeroed<T: Copy + Default>(count: usize) -> Result<Vec<T>, J2kError> {
    let mut v = Vec::new();
    v.try_reserve(count)?;
    v.resize(count, T::default());
    Ok(v)
}

/// A code-block and the band it belongs to.
#[derive(Debug, Clone, Copy)]
struct BlockJob {
    component: usize,
    resolution: usize,
    band: usize,
    cblk: usize,
}

/// Dequantized samples of one code-block, `width` per row.
enum BlockSamples {
    Int(Vec<i32>),
    Float(Vec<f32>),
}

/// Tier-1 state reused from one code-block to the next.
#[derive(Default)]
struct BlockDecoders {
    classic: BitPlaneDecoder,
    ht: HtBlockDecoder,
}

impl BlockDecoders {
    fn decode(&mut self, tile: &J2kTile, job: &BlockJob, strict: bool) -> Result<BlockSamples, J2kError> {
        let codsty = &tile.params.codsty[job.component];
        let band = &tile.components[job.component].resolutions[job.resolution].bands[job.band];
        let cblk = &tile.cblks[job.cblk];
        let width = cblk.coord.width() as usize;
        let height = cblk.coord.height() as usize;
        let params = CodeBlockParams {
            cblk_style: codsty.cblk_style,
            band_position: band.orientation.position(),
            magnitude_bits: band.magnitude_bits,
            roi_shift: tile.params.roi_shift[job.component],
            strict,
        };
        let words = if codsty.cblk_style & CBLK_HT != 0 {
            self.ht.decode(cblk, width, height, &params)?
        } else {
            self.classic.decode(cblk, width, height, &params)?
        };

        let mb = band.magnitude_bits;
        Ok(match codsty.transform {
            Transform::Dwt53 => {
                let mut out = zeroed(width * height)?;
                dequantize_int(words, width, height, &mut out, width, mb, band.i_stepsize);
                BlockSamples::Int(out)
            }
            Transform::Dwt97Int => {
                let mut out = zeroed(width * height)?;
                dequantize_int97(words, width, height, &mut out, width, mb, band.i_stepsize97);
                BlockSamples::Int(out)
            }
            Transform::Dwt97 => {
                let mut out = zeroed(width * height)?;
                dequantize_float(words, width, height, &mut out, width, mb, band.stepsize);
                BlockSamples::Float(out)
            }
        })
    }
}

#[cfg(feature = "parallel")]
fn decode_blocks(tile: &J2kTile, jobs: &[BlockJob], strict: bool) -> Result<Vec<BlockSamples>, J2kError> {
    use rayon::prelude::*;
    jobs.par_iter()
        .map_init(BlockDecoders::default, |decoders, job| decoders.decode(tile, job, strict))
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn decode_blocks(tile: &J2kTile, jobs: &[BlockJob], strict: bool) -> Result<Vec<BlockSamples>, J2kError> {
    let mut decoders = BlockDecoders::default();
    jobs.iter().map(|job| decoders.decode(tile, job, strict)).collect()
}

/// Every code-block of the resolutions that are decoded.
fn block_jobs(tile: &J2kTile) -> Vec<BlockJob> {
    let mut jobs = Vec::with_capacity(tile.cblks.len());
    for (compno, comp) in tile.components.iter().enumerate() {
        let nreslevels = tile.params.codsty[compno].nreslevels2decode as usize;
        for (resno, res) in comp.resolutions.iter().take(nreslevels).enumerate() {
            for (bandno, band) in res.bands.iter().enumerate() {
                for prec in &band.precincts {
                    for cblk in prec.cblk_start..prec.cblk_start + prec.codeblock_count() {
                        jobs.push(BlockJob {
                            component: compno,
                            resolution: resno,
                            band: bandno,
                            cblk,
                        });
                    }
                }
            }
        }
    }
    jobs
}

fn copy_rows<T: Copy>(
    dst: &mut [T],
    stride: usize,
    x: usize,
    y: usize,
    src: &[T],
    width: usize,
) -> Result<(), J2kError> {
    if width == 0 {
        return Ok(());
    }
    for (row, line) in src.chunks_exact(width).enumerate() {
        let start = (y + row) * stride + x;
        dst.get_mut(start..start + width)
            .ok_or(J2kError::InvalidData)?
            .copy_from_slice(line);
    }
    Ok(())
}

fn decode_tile(
    source: &[u8],
    image: &J2kImage,
    mut tile: J2kTile,
    options: &DecodeOptions,
) -> Result<TileCoefficients, J2kError> {
    tile.init_components(image, options.reduction_factor)?;

    if tile.tile_parts.is_empty() {
        warn!("tile {} has no tile-parts", tile.index);
    } else {
        let mut packets = PacketDecoder::new(source, &tile, options.strict_std_compliance);
        let mut iterator = PacketIterator::new(&tile, image)?;
        iterator.for_each(|index| packets.decode_packet(&mut tile, index))?;
    }

    let jobs = block_jobs(&tile);
    debug!("tile {}: {} code-blocks", tile.index, jobs.len());
    let blocks = decode_blocks(&tile, &jobs, options.strict_std_compliance)?;

    let mut components = Vec::new();
    components.try_reserve(tile.components.len())?;
    for (compno, comp) in tile.components.iter().enumerate() {
        let codsty = &tile.params.codsty[compno];
        let count = comp.coord.width() as usize * comp.coord.height() as usize;
        let plane = if codsty.transform.is_integer() {
            CoefficientPlane::Int(zeroed(count)?)
        } else {
            CoefficientPlane::Float(zeroed(count)?)
        };
        components.push(ComponentCoefficients {
            coord: comp.coord,
            transform: codsty.transform,
            resolutions: comp
                .resolutions
                .iter()
                .take(codsty.nreslevels2decode as usize)
                .map(|r| r.coord)
                .collect(),
            plane,
        });
    }

    for (job, block) in jobs.iter().zip(blocks) {
        let band = &tile.components[job.component].resolutions[job.resolution].bands[job.band];
        let cblk = &tile.cblks[job.cblk];
        let x = (band.offset_x + cblk.coord.x0 - band.coord.x0) as usize;
        let y = (band.offset_y + cblk.coord.y0 - band.coord.y0) as usize;
        let width = cblk.coord.width() as usize;
        let target = &mut components[job.component];
        let stride = target.coord.width() as usize;
        match (&mut target.plane, block) {
            (CoefficientPlane::Int(plane), BlockSamples::Int(samples)) => {
                copy_rows(plane, stride, x, y, &samples, width)?
            }
            (CoefficientPlane::Float(plane), BlockSamples::Float(samples)) => {
                copy_rows(plane, stride, x, y, &samples, width)?
            }
            _ => return Err(J2kError::InvalidData),
        }
    }

    Ok(TileCoefficients {
        index: tile.index,
        coord: tile.coord,
        mct: tile.params.mct,
        components,
    })
}

/// Samples of every component of a tile, with the area they cover.
type TileSamples = Vec<(J2kRect, Vec<i32>)>;

fn apply_mct(components: &mut [ComponentCoefficients], tile_index: u32) {
    let [c0, c1, c2, ..] = components else {
        warn!("tile {}: MCT needs 3 components", tile_index);
        return;
    };
    if c0.coord != c1.coord || c0.coord != c2.coord {
        warn!("tile {}: MCT components differ in size", tile_index);
        return;
    }
    if c0.transform != c1.transform || c0.transform != c2.transform {
        warn!("tile {}: MCT components use different wavelets", tile_index);
        return;
    }
    let reversible = c0.transform == Transform::Dwt53;
    match (&mut c0.plane, &mut c1.plane, &mut c2.plane) {
        (CoefficientPlane::Int(y), CoefficientPlane::Int(cb), CoefficientPlane::Int(cr)) => {
            if reversible {
                mct::inverse_rct(y, cb, cr);
            } else {
                mct::inverse_ict_int(y, cb, cr);
            }
        }
        (CoefficientPlane::Float(y), CoefficientPlane::Float(cb), CoefficientPlane::Float(cr)) => {
            mct::inverse_ict_float(y, cb, cr)
        }
        _ => warn!("tile {}: MCT over mixed sample types", tile_index),
    }
}

/// Range of a `precision` bit component.
fn sample_range(precision: u8, is_signed: bool) -> (i64, i64) {
    let p = precision.clamp(1, 38) as u32;
    let (min, max) = if is_signed {
        (-(1i64 << (p - 1)), (1i64 << (p - 1)) - 1)
    } else {
        (0, (1i64 << p) - 1)
    };
    (min.max(i32::MIN as i64), max.min(i32::MAX as i64))
}

/// Undoes the DC level shift of unsigned components and clips.
fn to_samples(comp: &ComponentCoefficients, precision: u8, is_signed: bool) -> Vec<i32> {
    let (min, max) = sample_range(precision, is_signed);
    let shift = if is_signed {
        0
    } else {
        1i64 << (precision.clamp(1, 38) - 1)
    };
    let finish = |v: i64| (v + shift).clamp(min, max) as i32;
    match &comp.plane {
        CoefficientPlane::Int(plane) if comp.transform == Transform::Dwt97Int => plane
            .iter()
            .map(|&v| finish((v as i64 + (1 << (I_PRESHIFT - 1))) >> I_PRESHIFT))
            .collect(),
        CoefficientPlane::Int(plane) => plane.iter().map(|&v| finish(v as i64)).collect(),
        CoefficientPlane::Float(plane) => plane.iter().map(|&v| finish(v.round() as i64)).collect(),
    }
}

fn reconstruct_tile(mut tile: TileCoefficients, image: &J2kImage) -> Result<TileSamples, J2kError> {
    for comp in tile.components.iter_mut() {
        let stride = comp.coord.width() as usize;
        match &mut comp.plane {
            CoefficientPlane::Int(plane) => {
                inverse_dwt_int(plane, stride, &comp.resolutions, comp.transform)
            }
            CoefficientPlane::Float(plane) => inverse_dwt_float(plane, stride, &comp.resolutions),
        }
    }
    if tile.mct {
        apply_mct(&mut tile.components, tile.index);
    }
    trace!("tile {} reconstructed", tile.index);
    Ok(tile
        .components
        .iter()
        .zip(&image.components)
        .map(|(comp, info)| (comp.coord, to_samples(comp, info.depth, info.is_signed)))
        .collect())
}

/// Places the tiles into full-image planes.
fn compose(image: &J2kImage, reduction: u32, tiles: Vec<TileSamples>) -> Result<DecodedImage, J2kError> {
    let area = J2kRect::new(image.x_origin, image.y_origin, image.width, image.height)
        .ceil_div_pow2(reduction);
    let mut areas = Vec::with_capacity(image.components.len());
    let mut components = Vec::new();
    components.try_reserve(image.components.len())?;
    for (compno, info) in image.components.iter().enumerate() {
        let rect = image.component_rect(compno).ceil_div_pow2(reduction);
        components.push(DecodedComponent {
            width: rect.width(),
            height: rect.height(),
            precision: info.depth,
            is_signed: info.is_signed,
            data: zeroed(rect.width() as usize * rect.height() as usize)?,
        });
        areas.push(rect);
    }

    for tile in tiles {
        for ((coord, samples), (target, rect)) in tile.iter().zip(components.iter_mut().zip(&areas)) {
            let x = coord.x0.checked_sub(rect.x0).ok_or(J2kError::InvalidData)?;
            let y = coord.y0.checked_sub(rect.y0).ok_or(J2kError::InvalidData)?;
            copy_rows(
                &mut target.data,
                target.width as usize,
                x as usize,
                y as usize,
                samples,
                coord.width() as usize,
            )?;
        }
    }

    Ok(DecodedImage {
        width: area.width(),
        height: area.height(),
        components,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg2000::test_support::lossless_codestream;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn gradient(width: usize, height: usize) -> Vec<i32> {
        (0..width * height)
            .map(|i| ((i % width) * 29 + (i / width) * 17 + 3) as i32 % 256)
            .collect()
    }

    #[test]
    fn test_options_builders() {
        let options = DecodeOptions::default()
            .with_reduction_factor(2)
            .with_strict_std_compliance(true)
            .with_bitexact(true);
        assert_eq!(options.reduction_factor, 2);
        assert!(options.strict_std_compliance);
        assert!(options.bitexact);
    }

    #[test]
    fn test_lossless_single_component() {
        init_logger();
        let (width, height) = (7, 5);
        let samples = gradient(width, height);
        let shifted: Vec<i32> = samples.iter().map(|v| v - 128).collect();
        let data = lossless_codestream(width as u32, height as u32, 8, false, &[shifted.clone()]);

        let mut decoder = J2kDecoder::new(&data, DecodeOptions::default());
        let header = decoder.read_header().unwrap();
        assert_eq!(header.tile_count(), 1);
        assert_eq!(header.image.width, 7);

        let tiles = decoder.decode_coefficients().unwrap();
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].coord, J2kRect::new(0, 0, 7, 5));
        let comp = &tiles[0].components[0];
        assert_eq!(comp.transform, Transform::Dwt53);
        assert_eq!(comp.plane, CoefficientPlane::Int(shifted));

        let image = decoder.decode().unwrap();
        assert_eq!((image.width, image.height), (7, 5));
        assert_eq!(image.components[0].data, samples);
        assert_eq!(image.components[0].precision, 8);
    }

    #[test]
    fn test_dc_pattern_2x2() {
        init_logger();
        let data = lossless_codestream(2, 2, 8, false, &[vec![100; 4]]);
        let tiles = J2kDecoder::new(&data, DecodeOptions::default())
            .decode_coefficients()
            .unwrap();
        assert_eq!(tiles[0].coord, J2kRect::new(0, 0, 2, 2));
        assert_eq!(tiles[0].components[0].plane, CoefficientPlane::Int(vec![100; 4]));

        let image = decode_with(&data);
        assert_eq!(image.components[0].data, vec![228; 4]);
    }

    fn decode_with(data: &[u8]) -> DecodedImage {
        J2kDecoder::new(data, DecodeOptions::default()).decode().unwrap()
    }

    #[test]
    fn test_reversible_color_transform() {
        init_logger();
        let (width, height) = (4, 3);
        let red = gradient(width, height);
        let green: Vec<i32> = red.iter().map(|v| (v * 3 + 40) % 256).collect();
        let blue: Vec<i32> = red.iter().map(|v| 255 - v).collect();

        let mut planes = vec![Vec::new(), Vec::new(), Vec::new()];
        for i in 0..width * height {
            let (r, g, b) = (red[i] - 128, green[i] - 128, blue[i] - 128);
            planes[0].push((r + 2 * g + b) >> 2);
            planes[1].push(b - g);
            planes[2].push(r - g);
        }
        let data = lossless_codestream(width as u32, height as u32, 8, true, &planes);

        let image = J2kDecoder::new(&data, DecodeOptions::default()).decode().unwrap();
        assert_eq!(image.components.len(), 3);
        assert_eq!(image.components[0].data, red);
        assert_eq!(image.components[1].data, green);
        assert_eq!(image.components[2].data, blue);
    }

    #[test]
    fn test_level_shift_clips() {
        let comp = ComponentCoefficients {
            coord: J2kRect::new(0, 0, 4, 1),
            transform: Transform::Dwt53,
            resolutions: vec![J2kRect::new(0, 0, 4, 1)],
            plane: CoefficientPlane::Int(vec![-200, -128, 127, 300]),
        };
        assert_eq!(to_samples(&comp, 8, false), vec![0, 0, 255, 255]);
        assert_eq!(to_samples(&comp, 8, true), vec![-128, -128, 127, 127]);

        let comp = ComponentCoefficients {
            transform: Transform::Dwt97Int,
            plane: CoefficientPlane::Int(vec![-128 << 8, (10 << 8) | 0x80]),
            ..comp
        };
        assert_eq!(to_samples(&comp, 8, false), vec![0, 139]);
    }

    #[test]
    fn test_mct_needs_three_components() {
        let mut components = vec![ComponentCoefficients {
            coord: J2kRect::new(0, 0, 1, 1),
            transform: Transform::Dwt53,
            resolutions: Vec::new(),
            plane: CoefficientPlane::Int(vec![5]),
        }];
        apply_mct(&mut components, 0);
        assert_eq!(components[0].plane, CoefficientPlane::Int(vec![5]));
    }
}
