// Limits from ISO/IEC 15444-1, Annex A.
pub const MAX_DECOMPOSITION_LEVELS: usize = 32;
pub const MAX_RESLEVELS: usize = MAX_DECOMPOSITION_LEVELS + 1;
pub const MAX_SUBBANDS: usize = 3 * MAX_DECOMPOSITION_LEVELS + 1;
pub const MAX_TILE_PARTS: usize = 32;
pub const MAX_POCS: usize = 32;
pub const MAX_COMPONENTS: usize = 16384;
pub const MAX_CBLK_LOG2_DIM: u8 = 10;
pub const MAX_CBLK_LOG2_AREA: u8 = 12;

// Implementation limit on decoded samples summed over all components,
// the same ceiling ffmpeg's av_image_check_size puts on a plane.
pub const MAX_IMAGE_SAMPLES: u64 = (i32::MAX / 8) as u64;

// Implementation limit on coding passes per code-block.
pub const MAX_PASSES: u32 = 100;

// Initial value of the Lblock state of a code-block (B.10.7.1).
pub const INITIAL_LBLOCK: u8 = 3;

// Coding style flags (Scod / Scoc).
pub const CSTY_PREC: u8 = 0x01;
pub const CSTY_SOP: u8 = 0x02;
pub const CSTY_EPH: u8 = 0x04;

// Code-block style flags (SPcod / SPcoc).
pub const CBLK_BYPASS: u8 = 0x01;
pub const CBLK_RESET: u8 = 0x02;
pub const CBLK_TERMALL: u8 = 0x04;
pub const CBLK_VSC: u8 = 0x08;
pub const CBLK_PREDTERM: u8 = 0x10;
pub const CBLK_SEGSYM: u8 = 0x20;
pub const CBLK_HT: u8 = 0x40;
pub const CBLK_HT_MIXED: u8 = 0x80;

// Quantization styles (Sqcd & 0x1f).
pub const QSTY_NONE: u8 = 0;
pub const QSTY_SI: u8 = 1;
pub const QSTY_SE: u8 = 2;

// Fractional bits carried by integer 9/7 samples.
pub const I_PRESHIFT: u32 = 8;

// The JP2 signature box (I.5.1).
pub const JP2_SIGNATURE: [u8; 12] = [
    0x00, 0x00, 0x00, 0x0C, b'j', b'P', b' ', b' ', 0x0D, 0x0A, 0x87, 0x0A,
];
