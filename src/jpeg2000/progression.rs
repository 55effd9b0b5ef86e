//! Packet progression (B.12).
//!
//! [`PacketIterator`] enumerates the `(layer, resolution, component,
//! precinct)` tuples of a tile in codestream order, one POC entry after the
//! other. Each packet is reported exactly once even when POC entries overlap.

use super::image::{J2kImage, J2kPocEntry, J2kRect, J2kTile, ProgressionOrder, ceil_div};
use crate::constants::MAX_RESLEVELS;
use crate::error::J2kError;
use log::trace;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PacketIndex {
    pub layer: u16,
    pub resolution: u8,
    pub component: u16,
    pub precinct: u32,
}

#[derive(Debug)]
struct ResolutionLayout {
    log2_prec_width: u32,
    log2_prec_height: u32,
    num_precincts_x: u32,
    num_precincts_y: u32,
    /// Layers already emitted, per precinct.
    decoded_layers: Vec<u16>,
}

#[derive(Debug)]
struct ComponentLayout {
    dx: u64,
    dy: u64,
    /// Top-left of the tile-component at full resolution.
    x0: u64,
    y0: u64,
    resolutions: Vec<ResolutionLayout>,
}

impl ComponentLayout {
    fn nreslevels(&self) -> usize {
        self.resolutions.len()
    }
}

/// Walks the packets of one tile. Only the precinct layout is kept, so the
/// visitor is free to borrow the tile mutably.
#[derive(Debug)]
pub struct PacketIterator {
    tile: J2kRect,
    nlayers: u16,
    entries: Vec<J2kPocEntry>,
    components: Vec<ComponentLayout>,
}

impl PacketIterator {
    pub fn new(tile: &J2kTile, image: &J2kImage) -> Result<Self, J2kError> {
        let params = &tile.params;
        let ncomponents = tile.components.len();
        let entries = if params.poc.is_empty() {
            vec![J2kPocEntry {
                ra_start: 0,
                cs_start: 0,
                ly_end: params.nlayers,
                ra_end: MAX_RESLEVELS as u8,
                cs_end: ncomponents as u16,
                order: params.prog_order,
            }]
        } else {
            params.poc.clone()
        };

        let mut components = Vec::new();
        components.try_reserve(ncomponents)?;
        for (comp, info) in tile.components.iter().zip(&image.components) {
            let mut resolutions = Vec::with_capacity(comp.resolutions.len());
            for res in &comp.resolutions {
                let mut decoded_layers = Vec::new();
                decoded_layers.try_reserve(res.precinct_count())?;
                decoded_layers.resize(res.precinct_count(), 0);
                resolutions.push(ResolutionLayout {
                    log2_prec_width: res.log2_prec_width as u32,
                    log2_prec_height: res.log2_prec_height as u32,
                    num_precincts_x: res.num_precincts_x,
                    num_precincts_y: res.num_precincts_y,
                    decoded_layers,
                });
            }
            components.push(ComponentLayout {
                dx: info.dx.max(1) as u64,
                dy: info.dy.max(1) as u64,
                x0: comp.coord_o.x0 as u64,
                y0: comp.coord_o.y0 as u64,
                resolutions,
            });
        }

        Ok(Self {
            tile: tile.coord,
            nlayers: params.nlayers,
            entries,
            components,
        })
    }

    /// Calls `visit` for every packet, in order.
    pub fn for_each<F>(&mut self, mut visit: F) -> Result<(), J2kError>
    where
        F: FnMut(PacketIndex) -> Result<(), J2kError>,
    {
        for i in 0..self.entries.len() {
            let entry = self.entries[i];
            let layers = entry.ly_end.min(self.nlayers);
            let cs_end = (entry.cs_end as usize).min(self.components.len());
            let comps = (entry.cs_start as usize).min(cs_end)..cs_end;
            let res = entry.ra_start as usize..entry.ra_end as usize;
            trace!(
                "progression {:?}: layers ..{}, components {:?}, resolutions {:?}",
                entry.order, layers, comps, res
            );
            match entry.order {
                ProgressionOrder::Lrcp => self.lrcp(layers, comps, res, &mut visit)?,
                ProgressionOrder::Rlcp => self.rlcp(layers, comps, res, &mut visit)?,
                ProgressionOrder::Rpcl => self.rpcl(layers, comps, res, &mut visit)?,
                ProgressionOrder::Pcrl => self.pcrl(layers, comps, res, &mut visit)?,
                ProgressionOrder::Cprl => self.cprl(layers, comps, res, &mut visit)?,
            }
        }
        Ok(())
    }

    fn emit<F>(
        &mut self,
        layer: u16,
        compno: usize,
        resno: usize,
        precno: usize,
        visit: &mut F,
    ) -> Result<(), J2kError>
    where
        F: FnMut(PacketIndex) -> Result<(), J2kError>,
    {
        let decoded = &mut self.components[compno].resolutions[resno].decoded_layers[precno];
        if layer < *decoded {
            return Ok(());
        }
        *decoded = layer + 1;
        visit(PacketIndex {
            layer,
            resolution: resno as u8,
            component: compno as u16,
            precinct: precno as u32,
        })
    }

    /// Every precinct of one resolution of one component, at one layer.
    fn emit_resolution<F>(
        &mut self,
        layer: u16,
        compno: usize,
        resno: usize,
        visit: &mut F,
    ) -> Result<(), J2kError>
    where
        F: FnMut(PacketIndex) -> Result<(), J2kError>,
    {
        let count = self.components[compno].resolutions[resno].decoded_layers.len();
        for precno in 0..count {
            self.emit(layer, compno, resno, precno, visit)?;
        }
        Ok(())
    }

    fn lrcp<F>(
        &mut self,
        layers: u16,
        comps: Range<usize>,
        res: Range<usize>,
        visit: &mut F,
    ) -> Result<(), J2kError>
    where
        F: FnMut(PacketIndex) -> Result<(), J2kError>,
    {
        for layer in 0..layers {
            for resno in res.clone() {
                let mut ok_reslevel = false;
                for compno in comps.clone() {
                    if resno < self.components[compno].nreslevels() {
                        ok_reslevel = true;
                        self.emit_resolution(layer, compno, resno, visit)?;
                    }
                }
                if !ok_reslevel {
                    break;
                }
            }
        }
        Ok(())
    }

    fn rlcp<F>(
        &mut self,
        layers: u16,
        comps: Range<usize>,
        res: Range<usize>,
        visit: &mut F,
    ) -> Result<(), J2kError>
    where
        F: FnMut(PacketIndex) -> Result<(), J2kError>,
    {
        for resno in res {
            let mut ok_reslevel = false;
            for layer in 0..layers {
                for compno in comps.clone() {
                    if resno < self.components[compno].nreslevels() {
                        ok_reslevel = true;
                        self.emit_resolution(layer, compno, resno, visit)?;
                    }
                }
            }
            if !ok_reslevel {
                break;
            }
        }
        Ok(())
    }

    /// Finest precinct size on the reference grid over the given components
    /// and resolutions, as log2 steps. `None` when nothing is covered.
    fn step(&self, comps: Range<usize>, res: &Range<usize>) -> Result<Option<(u64, u64)>, J2kError> {
        let mut step_x = u32::MAX;
        let mut step_y = u32::MAX;
        for comp in &self.components[comps] {
            let nres = comp.nreslevels();
            for resno in res.start..res.end.min(nres) {
                let r = &comp.resolutions[resno];
                let reduced = (nres - 1 - resno) as u32;
                step_x = step_x.min(r.log2_prec_width + reduced);
                step_y = step_y.min(r.log2_prec_height + reduced);
            }
        }
        if step_x == u32::MAX {
            return Ok(None);
        }
        if step_x >= 31 || step_y >= 31 {
            trace!("progression step 2^{} x 2^{}", step_x, step_y);
            return Err(J2kError::ProgressionStepTooLarge);
        }
        Ok(Some((1 << step_x, 1 << step_y)))
    }

    /// Maps the reference grid position `(x, y)` to a precinct of resolution
    /// `resno` of component `compno`, if a precinct starts there.
    fn precinct_at(&self, x: u64, y: u64, compno: usize, resno: usize) -> Option<usize> {
        let comp = &self.components[compno];
        let r = &comp.resolutions[resno];
        let reduced = (comp.nreslevels() - 1 - resno) as u32;
        let (tx0, ty0) = (self.tile.x0 as u64, self.tile.y0 as u64);

        let starts_precinct = |v: u64, t0: u64, d: u64, log2_prec: u32| {
            let tr0 = ceil_div_u64(t0, d << reduced);
            v % (d << (log2_prec + reduced)) == 0
                || (v == t0 && (tr0 << reduced) % (1u64 << (reduced + log2_prec)) != 0)
        };
        if !starts_precinct(y, ty0, comp.dy, r.log2_prec_height)
            || !starts_precinct(x, tx0, comp.dx, r.log2_prec_width)
        {
            return None;
        }

        let prcx = (ceil_div_u64(x, comp.dx << reduced) >> r.log2_prec_width)
            .checked_sub(ceil_div_u64(comp.x0, 1 << reduced) >> r.log2_prec_width);
        let prcy = (ceil_div_u64(y, comp.dy << reduced) >> r.log2_prec_height)
            .checked_sub(ceil_div_u64(comp.y0, 1 << reduced) >> r.log2_prec_height);
        match (prcx, prcy) {
            (Some(px), Some(py))
                if px < r.num_precincts_x as u64 && py < r.num_precincts_y as u64 =>
            {
                Some((px + py * r.num_precincts_x as u64) as usize)
            }
            _ => {
                trace!(
                    "precinct {:?},{:?} outside {}x{} at resolution {}",
                    prcx, prcy, r.num_precincts_x, r.num_precincts_y, resno
                );
                None
            }
        }
    }

    /// Grid positions of a position-driven progression.
    fn positions(&self, step_x: u64, step_y: u64) -> Vec<(u64, u64)> {
        let mut positions = Vec::new();
        let mut y = self.tile.y0 as u64;
        while y < self.tile.y1 as u64 {
            let mut x = self.tile.x0 as u64;
            while x < self.tile.x1 as u64 {
                positions.push((x, y));
                x = (x / step_x + 1) * step_x;
            }
            y = (y / step_y + 1) * step_y;
        }
        positions
    }

    fn emit_layers<F>(
        &mut self,
        layers: u16,
        compno: usize,
        resno: usize,
        precno: usize,
        visit: &mut F,
    ) -> Result<(), J2kError>
    where
        F: FnMut(PacketIndex) -> Result<(), J2kError>,
    {
        for layer in 0..layers {
            self.emit(layer, compno, resno, precno, visit)?;
        }
        Ok(())
    }

    fn rpcl<F>(
        &mut self,
        layers: u16,
        comps: Range<usize>,
        res: Range<usize>,
        visit: &mut F,
    ) -> Result<(), J2kError>
    where
        F: FnMut(PacketIndex) -> Result<(), J2kError>,
    {
        for resno in res {
            let single = resno..resno + 1;
            let Some((step_x, step_y)) = self.step(comps.clone(), &single)? else {
                break;
            };
            for (x, y) in self.positions(step_x, step_y) {
                for compno in comps.clone() {
                    if resno >= self.components[compno].nreslevels() {
                        continue;
                    }
                    if let Some(precno) = self.precinct_at(x, y, compno, resno) {
                        self.emit_layers(layers, compno, resno, precno, visit)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn pcrl<F>(
        &mut self,
        layers: u16,
        comps: Range<usize>,
        res: Range<usize>,
        visit: &mut F,
    ) -> Result<(), J2kError>
    where
        F: FnMut(PacketIndex) -> Result<(), J2kError>,
    {
        let Some((step_x, step_y)) = self.step(comps.clone(), &res)? else {
            return Ok(());
        };
        for (x, y) in self.positions(step_x, step_y) {
            for compno in comps.clone() {
                let nres = self.components[compno].nreslevels();
                for resno in res.start..res.end.min(nres) {
                    if let Some(precno) = self.precinct_at(x, y, compno, resno) {
                        self.emit_layers(layers, compno, resno, precno, visit)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn cprl<F>(
        &mut self,
        layers: u16,
        comps: Range<usize>,
        res: Range<usize>,
        visit: &mut F,
    ) -> Result<(), J2kError>
    where
        F: FnMut(PacketIndex) -> Result<(), J2kError>,
    {
        for compno in comps {
            let Some((step_x, step_y)) = self.step(compno..compno + 1, &res)? else {
                continue;
            };
            let nres = self.components[compno].nreslevels();
            for (x, y) in self.positions(step_x, step_y) {
                for resno in res.start..res.end.min(nres) {
                    if let Some(precno) = self.precinct_at(x, y, compno, resno) {
                        self.emit_layers(layers, compno, resno, precno, visit)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn ceil_div_u64(a: u64, b: u64) -> u64 {
    ceil_div(a as i64, b as i64) as u64
}

/// Read position over the tile-parts of a tile. Packets never straddle two
/// tile-parts, so the cursor only moves on between packets.
#[derive(Debug, Clone)]
pub struct TilePartCursor {
    parts: Vec<Range<usize>>,
    index: usize,
    position: usize,
}

impl TilePartCursor {
    pub fn new(tile: &J2kTile) -> Self {
        let parts: Vec<Range<usize>> = tile
            .tile_parts
            .iter()
            .map(|tp| tp.data_start..tp.data_end)
            .collect();
        let position = parts.first().map_or(0, |r| r.start);
        Self {
            parts,
            index: 0,
            position,
        }
    }

    /// Moves to the next tile-part when the current one is used up.
    pub fn next_packet(&mut self) {
        while self.position >= self.end() && self.index + 1 < self.parts.len() {
            self.index += 1;
            self.position = self.parts[self.index].start;
            trace!("continuing in tile-part {}", self.index);
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn set_position(&mut self, position: usize) {
        self.position = position.min(self.end());
    }

    /// End of the current tile-part.
    pub fn end(&self) -> usize {
        self.parts.get(self.index).map_or(0, |r| r.end)
    }

    pub fn tile_part(&self) -> usize {
        self.index
    }
}
