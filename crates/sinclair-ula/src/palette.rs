//! The ULA's 16 colours and attribute byte decoding.
//!
//! A colour index is `BRIGHT GRB`: bit 0 blue, bit 1 red, bit 2 green and
//! bit 3 the bright flag. Normal colours drive the guns at 0xCD, bright ones
//! at 0xFF. Black is the same with or without bright.

/// Gun level of a normal colour.
const NORMAL_LEVEL: u32 = 0xCD;
/// Gun level of a bright colour.
const BRIGHT_LEVEL: u32 = 0xFF;

const fn argb(index: usize) -> u32 {
    let level = if index & 0x08 != 0 {
        BRIGHT_LEVEL
    } else {
        NORMAL_LEVEL
    };
    let blue = if index & 0x01 != 0 { level } else { 0 };
    let red = if index & 0x02 != 0 { level } else { 0 };
    let green = if index & 0x04 != 0 { level } else { 0 };
    0xFF00_0000 | (red << 16) | (green << 8) | blue
}

/// ARGB32 value of each colour index.
pub const PALETTE: [u32; 16] = {
    let mut palette = [0; 16];
    let mut i = 0;
    while i < palette.len() {
        palette[i] = argb(i);
        i += 1;
    }
    palette
};

const INK_MASK: u8 = 0x07;
const PAPER_MASK: u8 = 0x38;
const BRIGHT_BIT: u8 = 0x40;
const FLASH_BIT: u8 = 0x80;

/// Bright flag of an attribute, moved to bit 3 of a colour index.
fn bright(attr: u8) -> u8 {
    (attr & BRIGHT_BIT) >> 3
}

/// Colour index used for set pixels.
#[must_use]
pub fn ink(attr: u8) -> u8 {
    (attr & INK_MASK) | bright(attr)
}

/// Colour index used for clear pixels.
#[must_use]
pub fn paper(attr: u8) -> u8 {
    ((attr & PAPER_MASK) >> 3) | bright(attr)
}

/// Colour index of one pixel. Flashing attributes swap ink and paper while
/// the flash phase is on.
#[must_use]
pub fn pixel_colour(pixel_set: bool, attr: u8, flash_phase: bool) -> u8 {
    let inverted = flash_phase && attr & FLASH_BIT != 0;
    if pixel_set != inverted {
        ink(attr)
    } else {
        paper(attr)
    }
}
