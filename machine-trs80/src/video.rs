//! VRAM rendering: 64x16 character cells into a 384x192 pixel buffer.
//!
//! Each VRAM byte is either a character (bit 7 clear: bits 0-6 index the
//! character generator) or a semigraphics cell (bit 7 set: bits 0-5 light
//! six 3x4 blocks). A cell is 6x12 pixels: 8 glyph rows plus 4 blank
//! inter-line rows.

pub const CHARS_PER_LINE: usize = 64;
pub const CHAR_LINES: usize = 16;
pub const CELL_W: usize = 6;
pub const CELL_H: usize = 12;
pub const WIDTH: usize = CHARS_PER_LINE * CELL_W; // 384
pub const HEIGHT: usize = CHAR_LINES * CELL_H; // 192

/// Phosphor green on black, 0RGB for the frontend framebuffer.
pub const FOREGROUND: u32 = 0x0033_FF33;
pub const BACKGROUND: u32 = 0x0000_0000;

/// Character generator: 64 glyphs (codes 0x20-0x5F), 8 rows each, 5 dots
/// wide in the low bits of every row. Pure data, mask-programmed on the
/// real machine.
#[rustfmt::skip]
const CHARGEN: [[u8; 8]; 64] = [
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00], // space
    [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04, 0x00], // !
    [0x0A, 0x0A, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00], // "
    [0x0A, 0x0A, 0x1F, 0x0A, 0x1F, 0x0A, 0x0A, 0x00], // #
    [0x04, 0x0F, 0x14, 0x0E, 0x05, 0x1E, 0x04, 0x00], // $
    [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03, 0x00], // %
    [0x0C, 0x12, 0x14, 0x08, 0x15, 0x12, 0x0D, 0x00], // &
    [0x04, 0x04, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00], // '
    [0x02, 0x04, 0x08, 0x08, 0x08, 0x04, 0x02, 0x00], // (
    [0x08, 0x04, 0x02, 0x02, 0x02, 0x04, 0x08, 0x00], // )
    [0x00, 0x04, 0x15, 0x0E, 0x15, 0x04, 0x00, 0x00], // *
    [0x00, 0x04, 0x04, 0x1F, 0x04, 0x04, 0x00, 0x00], // +
    [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08, 0x00], // ,
    [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00, 0x00], // -
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C, 0x00], // .
    [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00, 0x00], // /
    [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E, 0x00], // 0
    [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E, 0x00], // 1
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F, 0x00], // 2
    [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E, 0x00], // 3
    [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02, 0x00], // 4
    [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E, 0x00], // 5
    [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E, 0x00], // 6
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08, 0x00], // 7
    [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E, 0x00], // 8
    [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C, 0x00], // 9
    [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00, 0x00], // :
    [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x04, 0x08, 0x00], // ;
    [0x02, 0x04, 0x08, 0x10, 0x08, 0x04, 0x02, 0x00], // <
    [0x00, 0x00, 0x1F, 0x00, 0x1F, 0x00, 0x00, 0x00], // =
    [0x08, 0x04, 0x02, 0x01, 0x02, 0x04, 0x08, 0x00], // >
    [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04, 0x00], // ?
    [0x0E, 0x11, 0x01, 0x0D, 0x15, 0x15, 0x0E, 0x00], // @
    [0x0E, 0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x00], // A
    [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E, 0x00], // B
    [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E, 0x00], // C
    [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C, 0x00], // D
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F, 0x00], // E
    [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10, 0x00], // F
    [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F, 0x00], // G
    [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11, 0x00], // H
    [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E, 0x00], // I
    [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C, 0x00], // J
    [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11, 0x00], // K
    [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F, 0x00], // L
    [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11, 0x00], // M
    [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11, 0x00], // N
    [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E, 0x00], // O
    [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10, 0x00], // P
    [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D, 0x00], // Q
    [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11, 0x00], // R
    [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E, 0x00], // S
    [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04, 0x00], // T
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E, 0x00], // U
    [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04, 0x00], // V
    [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A, 0x00], // W
    [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11, 0x00], // X
    [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04, 0x00], // Y
    [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F, 0x00], // Z
    [0x0E, 0x08, 0x08, 0x08, 0x08, 0x08, 0x0E, 0x00], // [
    [0x00, 0x10, 0x08, 0x04, 0x02, 0x01, 0x00, 0x00], // backslash
    [0x0E, 0x02, 0x02, 0x02, 0x02, 0x02, 0x0E, 0x00], // ]
    [0x04, 0x0A, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00], // ^
    [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F, 0x00], // _
];

/// Map a display code to its generator glyph. An unmodified Model I has no
/// lowercase: 0x00-0x1F show as 0x40-0x5F and 0x60-0x7F mirror 0x20-0x3F.
fn glyph_index(code: u8) -> usize {
    let code = code & 0x7F;
    let mapped = match code {
        0x00..=0x1F => code + 0x40,
        0x60..=0x7F => code - 0x40,
        _ => code,
    };
    usize::from(mapped - 0x20)
}

/// One row (0-11) of a cell's pixels as 6 bits, leftmost pixel in bit 5.
#[must_use]
pub fn cell_row(code: u8, row: usize) -> u8 {
    if code & 0x80 != 0 {
        // Semigraphics: six 3x4 blocks, bit n lighting block n in a
        // 2-wide, 3-tall grid.
        let block_row = row / 4;
        let left = code & (1 << (block_row * 2)) != 0;
        let right = code & (1 << (block_row * 2 + 1)) != 0;
        (if left { 0b111_000 } else { 0 }) | (if right { 0b000_111 } else { 0 })
    } else if row < 8 {
        CHARGEN[glyph_index(code)][row] & 0x3F
    } else {
        0 // inter-line gap
    }
}

/// Render the full 1 KiB VRAM into a WIDTH x HEIGHT 0RGB buffer.
pub fn render_screen(vram: &[u8; 1024], buffer: &mut [u32]) {
    debug_assert!(buffer.len() >= WIDTH * HEIGHT);

    for (cell, &code) in vram.iter().enumerate() {
        let cx = (cell % CHARS_PER_LINE) * CELL_W;
        let cy = (cell / CHARS_PER_LINE) * CELL_H;
        for row in 0..CELL_H {
            let bits = cell_row(code, row);
            let base = (cy + row) * WIDTH + cx;
            for col in 0..CELL_W {
                buffer[base + col] = if bits & (0x20 >> col) != 0 {
                    FOREGROUND
                } else {
                    BACKGROUND
                };
            }
        }
    }
}
