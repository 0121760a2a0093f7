//! Cell types: glyph, colors, attribute flags, and the per-cell version stamp.

use std::time::Duration;

use bitflags::bitflags;

/// RGB color value.
///
/// All color sources (named 16-color, 256-color palette, true color) are
/// normalized to this representation when applied to a cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

/// Standard xterm palette for the 16 named colors.
const ANSI_COLORS: [Rgb; 16] = [
    Rgb::new(0, 0, 0),       // Black
    Rgb::new(205, 0, 0),     // Red
    Rgb::new(0, 205, 0),     // Green
    Rgb::new(205, 205, 0),   // Yellow
    Rgb::new(0, 0, 238),     // Blue
    Rgb::new(205, 0, 205),   // Magenta
    Rgb::new(0, 205, 205),   // Cyan
    Rgb::new(229, 229, 229), // White
    Rgb::new(127, 127, 127), // Bright Black
    Rgb::new(255, 0, 0),     // Bright Red
    Rgb::new(0, 255, 0),     // Bright Green
    Rgb::new(255, 255, 0),   // Bright Yellow
    Rgb::new(92, 92, 255),   // Bright Blue
    Rgb::new(255, 0, 255),   // Bright Magenta
    Rgb::new(0, 255, 255),   // Bright Cyan
    Rgb::new(255, 255, 255), // Bright White
];

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Resolve a 256-color palette index to its RGB value.
    ///
    /// Indices 0-15 use the named palette, 16-231 the 6x6x6 color cube,
    /// 232-255 the grayscale ramp.
    pub fn from_index(idx: u8) -> Self {
        let idx = idx as usize;
        if idx < 16 {
            ANSI_COLORS[idx]
        } else if idx < 232 {
            let n = idx - 16;
            let r = (n / 36) % 6;
            let g = (n / 6) % 6;
            let b = n % 6;
            let to_byte = |v: usize| if v == 0 { 0u8 } else { (55 + 40 * v) as u8 };
            Rgb::new(to_byte(r), to_byte(g), to_byte(b))
        } else {
            let v = (8 + 10 * (idx - 232)) as u8;
            Rgb::new(v, v, v)
        }
    }
}

bitflags! {
    /// Cell attribute flags, packed into a single byte.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct CellFlags: u8 {
        const BOLD          = 0b0000_0001;
        const ITALIC        = 0b0000_0010;
        const UNDERLINE     = 0b0000_0100;
        const STRIKETHROUGH = 0b0000_1000;
        const INVERSE       = 0b0001_0000;
        const DIM           = 0b0010_0000;
        const HIDDEN        = 0b0100_0000;
        const BLINK         = 0b1000_0000;
    }
}

/// A single cell in the terminal grid.
///
/// `seq` is a monotonically increasing stamp bumped on every mutation of the
/// cell, including mutations that leave the visible content unchanged (a
/// scroll, an erase of an already-blank cell). `seq == 0` means the cell has
/// never been written. `written_at` is the injected clock's reading at the
/// last bump.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Cell {
    /// The grapheme cluster displayed in this cell (possibly multi-codepoint).
    pub glyph: String,
    /// Foreground color; `None` means the terminal default.
    pub fg: Option<Rgb>,
    /// Background color; `None` means the terminal default.
    pub bg: Option<Rgb>,
    pub flags: CellFlags,
    /// Display width: 1 for normal, 2 for wide (CJK), 0 for the trailing
    /// half of a wide character.
    pub width: u8,
    pub seq: u64,
    pub written_at: Duration,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            glyph: " ".to_string(),
            fg: None,
            bg: None,
            flags: CellFlags::empty(),
            width: 1,
            seq: 0,
            written_at: Duration::ZERO,
        }
    }
}

impl Cell {
    /// Whether the cell holds no visible content and default styling.
    pub fn is_blank(&self) -> bool {
        self.glyph == " " && self.fg.is_none() && self.bg.is_none() && self.flags.is_empty()
    }
}
