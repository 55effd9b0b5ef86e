//! Hand-assembled codestreams whose packets are all empty, so that every
//! decoded coefficient is zero and the expected samples follow from the
//! level shift alone.

#![allow(dead_code)]

pub const SOC: [u8; 2] = [0xFF, 0x4F];
pub const EOC: [u8; 2] = [0xFF, 0xD9];

#[derive(Debug, Clone, Copy)]
pub struct Component {
    pub depth: u8,
    pub signed: bool,
    pub dx: u8,
    pub dy: u8,
}

impl Component {
    pub fn unsigned(depth: u8) -> Self {
        Self {
            depth,
            signed: false,
            dx: 1,
            dy: 1,
        }
    }

    pub fn signed(depth: u8) -> Self {
        Self {
            signed: true,
            ..Self::unsigned(depth)
        }
    }

    pub fn subsampled(mut self, dx: u8, dy: u8) -> Self {
        self.dx = dx;
        self.dy = dy;
        self
    }
}

#[derive(Debug, Clone)]
pub struct StreamBuilder {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub components: Vec<Component>,
    pub levels: u8,
    pub irreversible: bool,
    pub mct: bool,
    pub progression: u8,
    pub extra_main_header: Vec<u8>,
    pub with_eoc: bool,
}

impl StreamBuilder {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x0: 0,
            y0: 0,
            x1: width,
            y1: height,
            tile_width: width,
            tile_height: height,
            components: vec![Component::unsigned(8)],
            levels: 0,
            irreversible: false,
            mct: false,
            progression: 0,
            extra_main_header: Vec::new(),
            with_eoc: true,
        }
    }

    pub fn origin(mut self, x0: u32, y0: u32) -> Self {
        self.x0 = x0;
        self.y0 = y0;
        self
    }

    pub fn tiles(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    pub fn components(mut self, components: Vec<Component>) -> Self {
        self.components = components;
        self
    }

    pub fn levels(mut self, levels: u8) -> Self {
        self.levels = levels;
        self
    }

    pub fn irreversible(mut self) -> Self {
        self.irreversible = true;
        self
    }

    pub fn mct(mut self) -> Self {
        self.mct = true;
        self
    }

    pub fn progression(mut self, order: u8) -> Self {
        self.progression = order;
        self
    }

    pub fn tile_count(&self) -> usize {
        (self.x1.div_ceil(self.tile_width) * self.y1.div_ceil(self.tile_height)) as usize
    }

    pub fn siz(&self) -> Vec<u8> {
        let ncomp = self.components.len() as u16;
        let mut out = vec![0xFF, 0x51];
        out.extend_from_slice(&(38 + 3 * ncomp).to_be_bytes());
        out.extend_from_slice(&[0x00, 0x00]);
        for v in [
            self.x1,
            self.y1,
            self.x0,
            self.y0,
            self.tile_width,
            self.tile_height,
            0,
            0,
        ] {
            out.extend_from_slice(&v.to_be_bytes());
        }
        out.extend_from_slice(&ncomp.to_be_bytes());
        for c in &self.components {
            out.extend_from_slice(&[(c.depth - 1) | ((c.signed as u8) << 7), c.dx, c.dy]);
        }
        out
    }

    pub fn cod(&self) -> Vec<u8> {
        let mut out = vec![0xFF, 0x52, 0x00, 0x0C, 0x00, self.progression, 0x00, 0x01];
        out.push(self.mct as u8);
        // 16x16 code-blocks, no style flags
        out.extend_from_slice(&[self.levels, 0x02, 0x02, 0x00]);
        out.push(if self.irreversible { 0 } else { 1 });
        out
    }

    pub fn qcd(&self) -> Vec<u8> {
        let nsubbands = 3 * self.levels as usize + 1;
        let depth = self.components[0].depth;
        let mut body = Vec::new();
        if self.irreversible {
            body.push(0x42);
            for _ in 0..nsubbands {
                body.extend_from_slice(&((depth as u16) << 11).to_be_bytes());
            }
        } else {
            body.push(0x40);
            body.extend(std::iter::repeat_n((depth + 2) << 3, nsubbands));
        }
        let mut out = vec![0xFF, 0x5C];
        out.extend_from_slice(&(body.len() as u16 + 2).to_be_bytes());
        out.extend(body);
        out
    }

    pub fn main_header(&self) -> Vec<u8> {
        let mut out = SOC.to_vec();
        out.extend(self.siz());
        out.extend(self.cod());
        out.extend(self.qcd());
        out.extend_from_slice(&self.extra_main_header);
        out
    }

    /// One empty packet per component and resolution.
    pub fn tile_body(&self) -> Vec<u8> {
        vec![0x00; self.components.len() * (self.levels as usize + 1)]
    }

    pub fn tile_part(&self, index: u16, body: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0x90, 0x00, 0x0A];
        out.extend_from_slice(&index.to_be_bytes());
        out.extend_from_slice(&(14 + body.len() as u32).to_be_bytes());
        out.extend_from_slice(&[0x00, 0x01, 0xFF, 0x93]);
        out.extend_from_slice(body);
        out
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = self.main_header();
        let body = self.tile_body();
        for index in 0..self.tile_count() {
            out.extend(self.tile_part(index as u16, &body));
        }
        if self.with_eoc {
            out.extend_from_slice(&EOC);
        }
        out
    }
}

/// Wraps a codestream in a minimal JP2 file.
pub fn jp2_wrap(codestream: &[u8]) -> Vec<u8> {
    let mut out = vec![
        0x00, 0x00, 0x00, 0x0C, b'j', b'P', b' ', b' ', 0x0D, 0x0A, 0x87, 0x0A,
    ];
    let boxed = |out: &mut Vec<u8>, box_type: &[u8; 4], payload: &[u8]| {
        out.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
        out.extend_from_slice(box_type);
        out.extend_from_slice(payload);
    };
    boxed(&mut out, b"ftyp", b"jp2 \x00\x00\x00\x00jp2 ");
    boxed(&mut out, b"jp2h", &[0x00; 22]);
    boxed(&mut out, b"jp2c", codestream);
    out
}

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}
