//! CxtVLC decoding tables for the HT cleanup pass (15444-15, Annex C).
//!
//! Entry layout: bit 0 u_off, bits 1..=3 codeword length, bits 4..=7 rho,
//! bits 8..=11 e_k, bits 12..=15 e_1. The index is the context in bits 7..=9
//! and the next 7 bits of the VLC stream.

/// Quads below the first line pair.
pub static VLC_TABLE_NON_INITIAL: [u16; 1024] = [
    0x0016, 0x006A, 0x0046, 0x00DD, 0x0086, 0x888B, 0x0026, 0x444D,
    0x0016, 0x00AA, 0x0046, 0x88AD, 0x0086, 0x003A, 0x0026, 0x00DE,
    0x0016, 0x00CA, 0x0046, 0x009D, 0x0086, 0x005A, 0x0026, 0x222D,
    0x0016, 0x009A, 0x0046, 0x007D, 0x0086, 0x01FD, 0x0026, 0x007E,
    0x0016, 0x006A, 0x0046, 0x88CD, 0x0086, 0x888B, 0x0026, 0x111D,
    0x0016, 0x00AA, 0x0046, 0x005D, 0x0086, 0x003A, 0x0026, 0x00EE,
    0x0016, 0x00CA, 0x0046, 0x00BD, 0x0086, 0x005A, 0x0026, 0x11FF,
    0x0016, 0x009A, 0x0046, 0x003D, 0x0086, 0x04ED, 0x0026, 0x2AAF,
    0x0016, 0x006A, 0x0046, 0x00DD, 0x0086, 0x888B, 0x0026, 0x444D,
    0x0016, 0x00AA, 0x0046, 0x88AD, 0x0086, 0x003A, 0x0026, 0x44EF,
    0x0016, 0x00CA, 0x0046, 0x009D, 0x0086, 0x005A, 0x0026, 0x222D,
    0x0016, 0x009A, 0x0046, 0x007D, 0x0086, 0x01FD, 0x0026, 0x00BE,
    0x0016, 0x006A, 0x0046, 0x88CD, 0x0086, 0x888B, 0x0026, 0x111D,
    0x0016, 0x00AA, 0x0046, 0x005D, 0x0086, 0x003A, 0x0026, 0x4CCF,
    0x0016, 0x00CA, 0x0046, 0x00BD, 0x0086, 0x005A, 0x0026, 0x00FE,
    0x0016, 0x009A, 0x0046, 0x003D, 0x0086, 0x04ED, 0x0026, 0x006F,
    0x0002, 0x0088, 0x0002, 0x005C, 0x0002, 0x0018, 0x0002, 0x00DE,
    0x0002, 0x0028, 0x0002, 0x009C, 0x0002, 0x004A, 0x0002, 0x007E,
    0x0002, 0x0088, 0x0002, 0x00CC, 0x0002, 0x0018, 0x0002, 0x888F,
    0x0002, 0x0028, 0x0002, 0x00FE, 0x0002, 0x003A, 0x0002, 0x222F,
    0x0002, 0x0088, 0x0002, 0x04FD, 0x0002, 0x0018, 0x0002, 0x00BE,
    0x0002, 0x0028, 0x0002, 0x00BF, 0x0002, 0x004A, 0x0002, 0x006E,
    0x0002, 0x0088, 0x0002, 0x00AC, 0x0002, 0x0018, 0x0002, 0x444F,
    0x0002, 0x0028, 0x0002, 0x00EE, 0x0002, 0x003A, 0x0002, 0x113F,
    0x0002, 0x0088, 0x0002, 0x005C, 0x0002, 0x0018, 0x0002, 0x00CF,
    0x0002, 0x0028, 0x0002, 0x009C, 0x0002, 0x004A, 0x0002, 0x006F,
    0x0002, 0x0088, 0x0002, 0x00CC, 0x0002, 0x0018, 0x0002, 0x009F,
    0x0002, 0x0028, 0x0002, 0x00EF, 0x0002, 0x003A, 0x0002, 0x233F,
    0x0002, 0x0088, 0x0002, 0x04FD, 0x0002, 0x0018, 0x0002, 0x00AF,
    0x0002, 0x0028, 0x0002, 0x44FF, 0x0002, 0x004A, 0x0002, 0x005F,
    0x0002, 0x0088, 0x0002, 0x00AC, 0x0002, 0x0018, 0x0002, 0x007F,
    0x0002, 0x0028, 0x0002, 0x00DF, 0x0002, 0x003A, 0x0002, 0x111F,
    0x0002, 0x0028, 0x0002, 0x005C, 0x0002, 0x008A, 0x0002, 0x00BF,
    0x0002, 0x0018, 0x0002, 0x00FE, 0x0002, 0x00CC, 0x0002, 0x007E,
    0x0002, 0x0028, 0x0002, 0x8FFF, 0x0002, 0x004A, 0x0002, 0x007F,
    0x0002, 0x0018, 0x0002, 0x00DF, 0x0002, 0x00AC, 0x0002, 0x133F,
    0x0002, 0x0028, 0x0002, 0x222D, 0x0002, 0x008A, 0x0002, 0x00BE,
    0x0002, 0x0018, 0x0002, 0x44EF, 0x0002, 0x2AAD, 0x0002, 0x006E,
    0x0002, 0x0028, 0x0002, 0x15FF, 0x0002, 0x004A, 0x0002, 0x009E,
    0x0002, 0x0018, 0x0002, 0x00CF, 0x0002, 0x003C, 0x0002, 0x223F,
    0x0002, 0x0028, 0x0002, 0x005C, 0x0002, 0x008A, 0x0002, 0x2BBF,
    0x0002, 0x0018, 0x0002, 0x04EF, 0x0002, 0x00CC, 0x0002, 0x006F,
    0x0002, 0x0028, 0x0002, 0x27FF, 0x0002, 0x004A, 0x0002, 0x009F,
    0x0002, 0x0018, 0x0002, 0x00DE, 0x0002, 0x00AC, 0x0002, 0x444F,
    0x0002, 0x0028, 0x0002, 0x222D, 0x0002, 0x008A, 0x0002, 0x8AAF,
    0x0002, 0x0018, 0x0002, 0x00EE, 0x0002, 0x2AAD, 0x0002, 0x005F,
    0x0002, 0x0028, 0x0002, 0x44FF, 0x0002, 0x004A, 0x0002, 0x888F,
    0x0002, 0x0018, 0x0002, 0xAAAF, 0x0002, 0x003C, 0x0002, 0x111F,
    0x0004, 0x8FFD, 0x0028, 0x005C, 0x0004, 0x00BC, 0x008A, 0x66FF,
    0x0004, 0x00CD, 0x0018, 0x111D, 0x0004, 0x009C, 0x003A, 0x8AAF,
    0x0004, 0x00FC, 0x0028, 0x133D, 0x0004, 0x00AC, 0x004A, 0x3BBF,
    0x0004, 0x2BBD, 0x0018, 0x5FFF, 0x0004, 0x006C, 0x157D, 0x455F,
    0x0004, 0x2FFD, 0x0028, 0x222D, 0x0004, 0x22AD, 0x008A, 0x44EF,
    0x0004, 0x00CC, 0x0018, 0x4FFF, 0x0004, 0x007C, 0x003A, 0x447F,
    0x0004, 0x04DD, 0x0028, 0x233D, 0x0004, 0x009D, 0x004A, 0x00DE,
    0x0004, 0x88BD, 0x0018, 0xAFFF, 0x0004, 0x115D, 0x1FFD, 0x444F,
    0x0004, 0x8FFD, 0x0028, 0x005C, 0x0004, 0x00BC, 0x008A, 0x8CEF,
    0x0004, 0x00CD, 0x0018, 0x111D, 0x0004, 0x009C, 0x003A, 0x888F,
    0x0004, 0x00FC, 0x0028, 0x133D, 0x0004, 0x00AC, 0x004A, 0x44DF,
    0x0004, 0x2BBD, 0x0018, 0x8AFF, 0x0004, 0x006C, 0x157D, 0x006F,
    0x0004, 0x2FFD, 0x0028, 0x222D, 0x0004, 0x22AD, 0x008A, 0x00EE,
    0x0004, 0x00CC, 0x0018, 0x2EEF, 0x0004, 0x007C, 0x003A, 0x277F,
    0x0004, 0x04DD, 0x0028, 0x233D, 0x0004, 0x009D, 0x004A, 0x1BBF,
    0x0004, 0x88BD, 0x0018, 0x37FF, 0x0004, 0x115D, 0x1FFD, 0x333F,
    0x0002, 0x0088, 0x0002, 0x02ED, 0x0002, 0x00CA, 0x0002, 0x4CCF,
    0x0002, 0x0048, 0x0002, 0x23FF, 0x0002, 0x001A, 0x0002, 0x888F,
    0x0002, 0x0088, 0x0002, 0x006C, 0x0002, 0x002A, 0x0002, 0x00AF,
    0x0002, 0x0048, 0x0002, 0x22EF, 0x0002, 0x00AC, 0x0002, 0x005F,
    0x0002, 0x0088, 0x0002, 0x444D, 0x0002, 0x00CA, 0x0002, 0xCCCF,
    0x0002, 0x0048, 0x0002, 0x00FE, 0x0002, 0x001A, 0x0002, 0x006F,
    0x0002, 0x0088, 0x0002, 0x005C, 0x0002, 0x002A, 0x0002, 0x009F,
    0x0002, 0x0048, 0x0002, 0x00DF, 0x0002, 0x03FD, 0x0002, 0x222F,
    0x0002, 0x0088, 0x0002, 0x02ED, 0x0002, 0x00CA, 0x0002, 0x8CCF,
    0x0002, 0x0048, 0x0002, 0x11FF, 0x0002, 0x001A, 0x0002, 0x007E,
    0x0002, 0x0088, 0x0002, 0x006C, 0x0002, 0x002A, 0x0002, 0x007F,
    0x0002, 0x0048, 0x0002, 0x00EE, 0x0002, 0x00AC, 0x0002, 0x003E,
    0x0002, 0x0088, 0x0002, 0x444D, 0x0002, 0x00CA, 0x0002, 0x00BE,
    0x0002, 0x0048, 0x0002, 0x00BF, 0x0002, 0x001A, 0x0002, 0x003F,
    0x0002, 0x0088, 0x0002, 0x005C, 0x0002, 0x002A, 0x0002, 0x009E,
    0x0002, 0x0048, 0x0002, 0x00DE, 0x0002, 0x03FD, 0x0002, 0x111F,
    0x0004, 0x8AED, 0x0048, 0x888D, 0x0004, 0x00DC, 0x00CA, 0x3FFF,
    0x0004, 0xCFFD, 0x002A, 0x003D, 0x0004, 0x00BC, 0x005A, 0x8DDF,
    0x0004, 0x8FFD, 0x0048, 0x006C, 0x0004, 0x027D, 0x008A, 0x99FF,
    0x0004, 0x00EC, 0x00FA, 0x003C, 0x0004, 0x00AC, 0x001A, 0x009F,
    0x0004, 0x2FFD, 0x0048, 0x007C, 0x0004, 0x44CD, 0x00CA, 0x67FF,
    0x0004, 0x1FFD, 0x002A, 0x444D, 0x0004, 0x00AD, 0x005A, 0x8CCF,
    0x0004, 0x4FFD, 0x0048, 0x445D, 0x0004, 0x01BD, 0x008A, 0x4EEF,
    0x0004, 0x45DD, 0x00FA, 0x111D, 0x0004, 0x009C, 0x001A, 0x222F,
    0x0004, 0x8AED, 0x0048, 0x888D, 0x0004, 0x00DC, 0x00CA, 0xAFFF,
    0x0004, 0xCFFD, 0x002A, 0x003D, 0x0004, 0x00BC, 0x005A, 0x11BF,
    0x0004, 0x8FFD, 0x0048, 0x006C, 0x0004, 0x027D, 0x008A, 0x22EF,
    0x0004, 0x00EC, 0x00FA, 0x003C, 0x0004, 0x00AC, 0x001A, 0x227F,
    0x0004, 0x2FFD, 0x0048, 0x007C, 0x0004, 0x44CD, 0x00CA, 0x5DFF,
    0x0004, 0x1FFD, 0x002A, 0x444D, 0x0004, 0x00AD, 0x005A, 0x006F,
    0x0004, 0x4FFD, 0x0048, 0x445D, 0x0004, 0x01BD, 0x008A, 0x11DF,
    0x0004, 0x45DD, 0x00FA, 0x111D, 0x0004, 0x009C, 0x001A, 0x155F,
    0x0006, 0x00FC, 0x0018, 0x111D, 0x0048, 0x888D, 0x00AA, 0x4DDF,
    0x0006, 0x2AAD, 0x005A, 0x67FF, 0x0028, 0x223D, 0x00BC, 0xAAAF,
    0x0006, 0x00EC, 0x0018, 0x5FFF, 0x0048, 0x006C, 0x008A, 0xCCCF,
    0x0006, 0x009D, 0x00CA, 0x44EF, 0x0028, 0x003C, 0x8FFD, 0x137F,
    0x0006, 0x8EED, 0x0018, 0x1FFF, 0x0048, 0x007C, 0x00AA, 0x4CCF,
    0x0006, 0x227D, 0x005A, 0x1DDF, 0x0028, 0x444D, 0x4FFD, 0x155F,
    0x0006, 0x00DC, 0x0018, 0x2EEF, 0x0048, 0x445D, 0x008A, 0x22BF,
    0x0006, 0x009C, 0x00CA, 0x8CDF, 0x0028, 0x222D, 0x2FFD, 0x226F,
    0x0006, 0x00FC, 0x0018, 0x111D, 0x0048, 0x888D, 0x00AA, 0x1BBF,
    0x0006, 0x2AAD, 0x005A, 0x33FF, 0x0028, 0x223D, 0x00BC, 0x8AAF,
    0x0006, 0x00EC, 0x0018, 0x9BFF, 0x0048, 0x006C, 0x008A, 0x8ABF,
    0x0006, 0x009D, 0x00CA, 0x4EEF, 0x0028, 0x003C, 0x8FFD, 0x466F,
    0x0006, 0x8EED, 0x0018, 0xCFFF, 0x0048, 0x007C, 0x00AA, 0x8CCF,
    0x0006, 0x227D, 0x005A, 0xAEEF, 0x0028, 0x444D, 0x4FFD, 0x477F,
    0x0006, 0x00DC, 0x0018, 0xAFFF, 0x0048, 0x445D, 0x008A, 0x2BBF,
    0x0006, 0x009C, 0x00CA, 0x44DF, 0x0028, 0x222D, 0x2FFD, 0x133F,
    0x00F6, 0xAFFD, 0x1FFB, 0x003C, 0x0008, 0x23BD, 0x007A, 0x11DF,
    0x00F6, 0x45DD, 0x2FFB, 0x4EEF, 0x00DA, 0x177D, 0xCFFD, 0x377F,
    0x00F6, 0x3FFD, 0x8FFB, 0x111D, 0x0008, 0x009C, 0x005A, 0x1BBF,
    0x00F6, 0x00CD, 0x00BA, 0x8DDF, 0x4FFB, 0x006C, 0x9BFD, 0x455F,
    0x00F6, 0x67FD, 0x1FFB, 0x002C, 0x0008, 0x00AC, 0x007A, 0x009F,
    0x00F6, 0x00AD, 0x2FFB, 0x7FFF, 0x00DA, 0x004C, 0x5FFD, 0x477F,
    0x00F6, 0x00EC, 0x8FFB, 0x001C, 0x0008, 0x008C, 0x005A, 0x888F,
    0x00F6, 0x00CC, 0x00BA, 0x2EEF, 0x4FFB, 0x115D, 0x8AED, 0x113F,
    0x00F6, 0xAFFD, 0x1FFB, 0x003C, 0x0008, 0x23BD, 0x007A, 0x1DDF,
    0x00F6, 0x45DD, 0x2FFB, 0xBFFF, 0x00DA, 0x177D, 0xCFFD, 0x447F,
    0x00F6, 0x3FFD, 0x8FFB, 0x111D, 0x0008, 0x009C, 0x005A, 0x277F,
    0x00F6, 0x00CD, 0x00BA, 0x22EF, 0x4FFB, 0x006C, 0x9BFD, 0x444F,
    0x00F6, 0x67FD, 0x1FFB, 0x002C, 0x0008, 0x00AC, 0x007A, 0x11BF,
    0x00F6, 0x00AD, 0x2FFB, 0xFFFF, 0x00DA, 0x004C, 0x5FFD, 0x233F,
    0x00F6, 0x00EC, 0x8FFB, 0x001C, 0x0008, 0x008C, 0x005A, 0x006F,
    0x00F6, 0x00CC, 0x00BA, 0x8BBF, 0x4FFB, 0x115D, 0x8AED, 0x222F,
];

/// Quads in the first line pair.
pub static VLC_TABLE_INITIAL: [u16; 1024] = [
    0x0026, 0x00AA, 0x0046, 0x006C, 0x0086, 0x8AED, 0x0018, 0x8DDF,
    0x0026, 0x01BD, 0x0046, 0x5FFF, 0x0086, 0x027D, 0x005A, 0x155F,
    0x0026, 0x003A, 0x0046, 0x444D, 0x0086, 0x4CCD, 0x0018, 0xCCCF,
    0x0026, 0x2EFD, 0x0046, 0x99FF, 0x0086, 0x009C, 0x00CA, 0x133F,
    0x0026, 0x00AA, 0x0046, 0x445D, 0x0086, 0x8CCD, 0x0018, 0x11DF,
    0x0026, 0x4FFD, 0x0046, 0xCFFF, 0x0086, 0x009D, 0x005A, 0x007E,
    0x0026, 0x003A, 0x0046, 0x1FFF, 0x0086, 0x88AD, 0x0018, 0x00BE,
    0x0026, 0x8FFD, 0x0046, 0x4EEF, 0x0086, 0x888D, 0x00CA, 0x111F,
    0x0026, 0x00AA, 0x0046, 0x006C, 0x0086, 0x8AED, 0x0018, 0x45DF,
    0x0026, 0x01BD, 0x0046, 0x22EF, 0x0086, 0x027D, 0x005A, 0x227F,
    0x0026, 0x003A, 0x0046, 0x444D, 0x0086, 0x4CCD, 0x0018, 0x11BF,
    0x0026, 0x2EFD, 0x0046, 0x00FE, 0x0086, 0x009C, 0x00CA, 0x223F,
    0x0026, 0x00AA, 0x0046, 0x445D, 0x0086, 0x8CCD, 0x0018, 0x00DE,
    0x0026, 0x4FFD, 0x0046, 0xABFF, 0x0086, 0x009D, 0x005A, 0x006F,
    0x0026, 0x003A, 0x0046, 0x6EFF, 0x0086, 0x88AD, 0x0018, 0x2AAF,
    0x0026, 0x8FFD, 0x0046, 0x00EE, 0x0086, 0x888D, 0x00CA, 0x222F,
    0x0004, 0x00CA, 0x0088, 0x027D, 0x0004, 0x4CCD, 0x0028, 0x00FE,
    0x0004, 0x2AFD, 0x0048, 0x005C, 0x0004, 0x009D, 0x0018, 0x00DE,
    0x0004, 0x01BD, 0x0088, 0x006C, 0x0004, 0x88AD, 0x0028, 0x11DF,
    0x0004, 0x8AED, 0x0048, 0x003C, 0x0004, 0x888D, 0x0018, 0x111F,
    0x0004, 0x00CA, 0x0088, 0x006D, 0x0004, 0x88CD, 0x0028, 0x88FF,
    0x0004, 0x8BFD, 0x0048, 0x444D, 0x0004, 0x009C, 0x0018, 0x00BE,
    0x0004, 0x4EFD, 0x0088, 0x445D, 0x0004, 0x00AC, 0x0028, 0x00EE,
    0x0004, 0x45DD, 0x0048, 0x222D, 0x0004, 0x003D, 0x0018, 0x007E,
    0x0004, 0x00CA, 0x0088, 0x027D, 0x0004, 0x4CCD, 0x0028, 0x1FFF,
    0x0004, 0x2AFD, 0x0048, 0x005C, 0x0004, 0x009D, 0x0018, 0x11BF,
    0x0004, 0x01BD, 0x0088, 0x006C, 0x0004, 0x88AD, 0x0028, 0x22EF,
    0x0004, 0x8AED, 0x0048, 0x003C, 0x0004, 0x888D, 0x0018, 0x227F,
    0x0004, 0x00CA, 0x0088, 0x006D, 0x0004, 0x88CD, 0x0028, 0x4EEF,
    0x0004, 0x8BFD, 0x0048, 0x444D, 0x0004, 0x009C, 0x0018, 0x2AAF,
    0x0004, 0x4EFD, 0x0088, 0x445D, 0x0004, 0x00AC, 0x0028, 0x8DDF,
    0x0004, 0x45DD, 0x0048, 0x222D, 0x0004, 0x003D, 0x0018, 0x155F,
    0x0004, 0x005A, 0x0088, 0x006C, 0x0004, 0x88DD, 0x0028, 0x23FF,
    0x0004, 0x11FD, 0x0048, 0x444D, 0x0004, 0x00AD, 0x0018, 0x00BE,
    0x0004, 0x137D, 0x0088, 0x155D, 0x0004, 0x00CC, 0x0028, 0x00DE,
    0x0004, 0x02ED, 0x0048, 0x111D, 0x0004, 0x009D, 0x0018, 0x007E,
    0x0004, 0x005A, 0x0088, 0x455D, 0x0004, 0x44CD, 0x0028, 0x00EE,
    0x0004, 0x1FFD, 0x0048, 0x003C, 0x0004, 0x00AC, 0x0018, 0x555F,
    0x0004, 0x47FD, 0x0088, 0x113D, 0x0004, 0x02BD, 0x0028, 0x477F,
    0x0004, 0x4CDD, 0x0048, 0x8FFF, 0x0004, 0x009C, 0x0018, 0x222F,
    0x0004, 0x005A, 0x0088, 0x006C, 0x0004, 0x88DD, 0x0028, 0x00FE,
    0x0004, 0x11FD, 0x0048, 0x444D, 0x0004, 0x00AD, 0x0018, 0x888F,
    0x0004, 0x137D, 0x0088, 0x155D, 0x0004, 0x00CC, 0x0028, 0x8CCF,
    0x0004, 0x02ED, 0x0048, 0x111D, 0x0004, 0x009D, 0x0018, 0x006F,
    0x0004, 0x005A, 0x0088, 0x455D, 0x0004, 0x44CD, 0x0028, 0x1DDF,
    0x0004, 0x1FFD, 0x0048, 0x003C, 0x0004, 0x00AC, 0x0018, 0x227F,
    0x0004, 0x47FD, 0x0088, 0x113D, 0x0004, 0x02BD, 0x0028, 0x22BF,
    0x0004, 0x4CDD, 0x0048, 0x22EF, 0x0004, 0x009C, 0x0018, 0x233F,
    0x0006, 0x4DDD, 0x4FFB, 0xCFFF, 0x0018, 0x113D, 0x005A, 0x888F,
    0x0006, 0x23BD, 0x008A, 0x00EE, 0x002A, 0x155D, 0xAAFD, 0x277F,
    0x0006, 0x44CD, 0x8FFB, 0x44EF, 0x0018, 0x467D, 0x004A, 0x2AAF,
    0x0006, 0x00AC, 0x555B, 0x99DF, 0x1FFB, 0x003C, 0x5FFD, 0x266F,
    0x0006, 0x1DDD, 0x4FFB, 0x6EFF, 0x0018, 0x177D, 0x005A, 0x1BBF,
    0x0006, 0x88AD, 0x008A, 0x5DDF, 0x002A, 0x444D, 0x2FFD, 0x667F,
    0x0006, 0x00CC, 0x8FFB, 0x2EEF, 0x0018, 0x455D, 0x004A, 0x119F,
    0x0006, 0x009C, 0x555B, 0x8CCF, 0x1FFB, 0x111D, 0x8CED, 0x006E,
    0x0006, 0x4DDD, 0x4FFB, 0x3FFF, 0x0018, 0x113D, 0x005A, 0x11BF,
    0x0006, 0x23BD, 0x008A, 0x8DDF, 0x002A, 0x155D, 0xAAFD, 0x222F,
    0x0006, 0x44CD, 0x8FFB, 0x00FE, 0x0018, 0x467D, 0x004A, 0x899F,
    0x0006, 0x00AC, 0x555B, 0x00DE, 0x1FFB, 0x003C, 0x5FFD, 0x446F,
    0x0006, 0x1DDD, 0x4FFB, 0x9BFF, 0x0018, 0x177D, 0x005A, 0x00BE,
    0x0006, 0x88AD, 0x008A, 0xCDDF, 0x002A, 0x444D, 0x2FFD, 0x007E,
    0x0006, 0x00CC, 0x8FFB, 0x4EEF, 0x0018, 0x455D, 0x004A, 0x377F,
    0x0006, 0x009C, 0x555B, 0x8BBF, 0x1FFB, 0x111D, 0x8CED, 0x233F,
    0x0004, 0x00AA, 0x0088, 0x047D, 0x0004, 0x01DD, 0x0028, 0x11DF,
    0x0004, 0x27FD, 0x0048, 0x005C, 0x0004, 0x8AAD, 0x0018, 0x2BBF,
    0x0004, 0x009C, 0x0088, 0x006C, 0x0004, 0x00CC, 0x0028, 0x00EE,
    0x0004, 0x8CED, 0x0048, 0x222D, 0x0004, 0x888D, 0x0018, 0x007E,
    0x0004, 0x00AA, 0x0088, 0x006D, 0x0004, 0x88CD, 0x0028, 0x00FE,
    0x0004, 0x19FD, 0x0048, 0x003C, 0x0004, 0x2AAD, 0x0018, 0xAAAF,
    0x0004, 0x8BFD, 0x0088, 0x005D, 0x0004, 0x00BD, 0x0028, 0x4CCF,
    0x0004, 0x44ED, 0x0048, 0x4FFF, 0x0004, 0x223D, 0x0018, 0x111F,
    0x0004, 0x00AA, 0x0088, 0x047D, 0x0004, 0x01DD, 0x0028, 0x99FF,
    0x0004, 0x27FD, 0x0048, 0x005C, 0x0004, 0x8AAD, 0x0018, 0x00BE,
    0x0004, 0x009C, 0x0088, 0x006C, 0x0004, 0x00CC, 0x0028, 0x00DE,
    0x0004, 0x8CED, 0x0048, 0x222D, 0x0004, 0x888D, 0x0018, 0x444F,
    0x0004, 0x00AA, 0x0088, 0x006D, 0x0004, 0x88CD, 0x0028, 0x2EEF,
    0x0004, 0x19FD, 0x0048, 0x003C, 0x0004, 0x2AAD, 0x0018, 0x447F,
    0x0004, 0x8BFD, 0x0088, 0x005D, 0x0004, 0x00BD, 0x0028, 0x009F,
    0x0004, 0x44ED, 0x0048, 0x67FF, 0x0004, 0x223D, 0x0018, 0x133F,
    0x0006, 0x00CC, 0x008A, 0x9DFF, 0x2FFB, 0x467D, 0x1FFD, 0x99BF,
    0x0006, 0x2AAD, 0x002A, 0x66EF, 0x4FFB, 0x005C, 0x2EED, 0x377F,
    0x0006, 0x89BD, 0x004A, 0x00FE, 0x8FFB, 0x006C, 0x67FD, 0x889F,
    0x0006, 0x888D, 0x001A, 0x5DDF, 0x00AA, 0x222D, 0x89DD, 0x444F,
    0x0006, 0x2BBD, 0x008A, 0xCFFF, 0x2FFB, 0x226D, 0x009C, 0x00BE,
    0x0006, 0xAAAD, 0x002A, 0x1DDF, 0x4FFB, 0x003C, 0x4DDD, 0x466F,
    0x0006, 0x8AAD, 0x004A, 0xAEEF, 0x8FFB, 0x445D, 0x8EED, 0x177F,
    0x0006, 0x233D, 0x001A, 0x4CCF, 0x00AA, 0xAFFF, 0x88CD, 0x133F,
    0x0006, 0x00CC, 0x008A, 0x77FF, 0x2FFB, 0x467D, 0x1FFD, 0x3BBF,
    0x0006, 0x2AAD, 0x002A, 0x00EE, 0x4FFB, 0x005C, 0x2EED, 0x007E,
    0x0006, 0x89BD, 0x004A, 0x4EEF, 0x8FFB, 0x006C, 0x67FD, 0x667F,
    0x0006, 0x888D, 0x001A, 0x00DE, 0x00AA, 0x222D, 0x89DD, 0x333F,
    0x0006, 0x2BBD, 0x008A, 0x57FF, 0x2FFB, 0x226D, 0x009C, 0x199F,
    0x0006, 0xAAAD, 0x002A, 0x99DF, 0x4FFB, 0x003C, 0x4DDD, 0x155F,
    0x0006, 0x8AAD, 0x004A, 0xCEEF, 0x8FFB, 0x445D, 0x8EED, 0x277F,
    0x0006, 0x233D, 0x001A, 0x1BBF, 0x00AA, 0x3FFF, 0x88CD, 0x111F,
    0x0006, 0x45DD, 0x2FFB, 0x111D, 0x0018, 0x467D, 0x8FFD, 0xCCCF,
    0x0006, 0x19BD, 0x004A, 0x22EF, 0x002A, 0x222D, 0x3FFD, 0x888F,
    0x0006, 0x00CC, 0x008A, 0x00FE, 0x0018, 0x115D, 0xCFFD, 0x8AAF,
    0x0006, 0x00AC, 0x003A, 0x8CDF, 0x1FFB, 0x133D, 0x66FD, 0x466F,
    0x0006, 0x8CCD, 0x2FFB, 0x5FFF, 0x0018, 0x006C, 0x4FFD, 0xABBF,
    0x0006, 0x22AD, 0x004A, 0x00EE, 0x002A, 0x233D, 0xAEFD, 0x377F,
    0x0006, 0x2BBD, 0x008A, 0x55DF, 0x0018, 0x005C, 0x177D, 0x119F,
    0x0006, 0x009C, 0x003A, 0x4CCF, 0x1FFB, 0x333D, 0x8EED, 0x444F,
    0x0006, 0x45DD, 0x2FFB, 0x111D, 0x0018, 0x467D, 0x8FFD, 0x99BF,
    0x0006, 0x19BD, 0x004A, 0x2EEF, 0x002A, 0x222D, 0x3FFD, 0x667F,
    0x0006, 0x00CC, 0x008A, 0x4EEF, 0x0018, 0x115D, 0xCFFD, 0x899F,
    0x0006, 0x00AC, 0x003A, 0x00DE, 0x1FFB, 0x133D, 0x66FD, 0x226F,
    0x0006, 0x8CCD, 0x2FFB, 0x9BFF, 0x0018, 0x006C, 0x4FFD, 0x00BE,
    0x0006, 0x22AD, 0x004A, 0x1DDF, 0x002A, 0x233D, 0xAEFD, 0x007E,
    0x0006, 0x2BBD, 0x008A, 0xCEEF, 0x0018, 0x005C, 0x177D, 0x277F,
    0x0006, 0x009C, 0x003A, 0x8BBF, 0x1FFB, 0x333D, 0x8EED, 0x455F,
    0x1FF9, 0x1DDD, 0xAFFB, 0x00DE, 0x8FF9, 0x001C, 0xFFFB, 0x477F,
    0x4FF9, 0x177D, 0x3FFB, 0x3BBF, 0x2FF9, 0xAEEF, 0x8EED, 0x444F,
    0x1FF9, 0x22AD, 0x000A, 0x8BBF, 0x8FF9, 0x00FE, 0xCFFD, 0x007E,
    0x4FF9, 0x115D, 0x5FFB, 0x577F, 0x2FF9, 0x8DDF, 0x2EED, 0x333F,
    0x1FF9, 0x2BBD, 0xAFFB, 0x88CF, 0x8FF9, 0xBFFF, 0xFFFB, 0x377F,
    0x4FF9, 0x006D, 0x3FFB, 0x00BE, 0x2FF9, 0x66EF, 0x9FFD, 0x133F,
    0x1FF9, 0x009D, 0x000A, 0xABBF, 0x8FF9, 0xDFFF, 0x6FFD, 0x006E,
    0x4FF9, 0x002C, 0x5FFB, 0x888F, 0x2FF9, 0xCDDF, 0x4DDD, 0x222F,
    0x1FF9, 0x1DDD, 0xAFFB, 0x4CCF, 0x8FF9, 0x001C, 0xFFFB, 0x277F,
    0x4FF9, 0x177D, 0x3FFB, 0x99BF, 0x2FF9, 0xCEEF, 0x8EED, 0x004E,
    0x1FF9, 0x22AD, 0x000A, 0x00AE, 0x8FF9, 0x7FFF, 0xCFFD, 0x005E,
    0x4FF9, 0x115D, 0x5FFB, 0x009E, 0x2FF9, 0x5DDF, 0x2EED, 0x003E,
    0x1FF9, 0x2BBD, 0xAFFB, 0x00CE, 0x8FF9, 0xEFFF, 0xFFFB, 0x667F,
    0x4FF9, 0x006D, 0x3FFB, 0x8AAF, 0x2FF9, 0x00EE, 0x9FFD, 0x233F,
    0x1FF9, 0x009D, 0x000A, 0x1BBF, 0x8FF9, 0x4EEF, 0x6FFD, 0x455F,
    0x4FF9, 0x002C, 0x5FFB, 0x008E, 0x2FF9, 0x99DF, 0x4DDD, 0x111F,
];
