//! The versioned cell grid driven by parsed tokens.
//!
//! The grid owns two cell arrays (primary and alternate), a cursor, a scroll
//! region, and the current pen (SGR state). [`CellGrid::apply`] mutates the
//! grid one token at a time; [`CellGrid::snapshot`] produces a consistent
//! read-only copy. Callers that share a grid between a writer and readers
//! wrap it in a mutex and keep the critical sections to single calls, which
//! makes every `apply` atomic from a snapshot reader's point of view.

use std::sync::Arc;

use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

use crate::cell::{Cell, CellFlags, Rgb};
use crate::clock::{Clock, MonotonicClock};
use crate::token::{CsiParams, Token};

/// Errors from grid operations.
#[derive(Debug)]
pub enum GridError {
    /// Width or height of zero was requested.
    InvalidDimensions { cols: u16, rows: u16 },
}

impl std::fmt::Display for GridError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GridError::InvalidDimensions { cols, rows } => {
                write!(f, "grid dimensions must be positive, got {cols}x{rows}")
            }
        }
    }
}

impl std::error::Error for GridError {}

/// Cursor position and visibility.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cursor {
    pub x: u16,
    pub y: u16,
    pub visible: bool,
}

/// Inclusive row range that scrolling operates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScrollRegion {
    pub top: u16,
    pub bottom: u16,
}

/// Current SGR state inherited by subsequently written text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Pen {
    fg: Option<Rgb>,
    bg: Option<Rgb>,
    flags: CellFlags,
}

/// A consistent, read-only copy of the active screen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GridSnapshot {
    pub width: u16,
    pub height: u16,
    pub cells: Vec<Cell>,
    pub cursor: Cursor,
    pub scroll: ScrollRegion,
    pub alternate_active: bool,
}

impl GridSnapshot {
    pub fn cell(&self, x: u16, y: u16) -> Option<&Cell> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells.get(y as usize * self.width as usize + x as usize)
    }

    /// The visible text of one row, continuation cells skipped.
    pub fn row_text(&self, y: u16) -> String {
        let mut out = String::new();
        for x in 0..self.width {
            if let Some(cell) = self.cell(x, y) {
                if cell.width > 0 {
                    out.push_str(&cell.glyph);
                }
            }
        }
        out
    }
}

/// The terminal screen model.
pub struct CellGrid {
    width: u16,
    height: u16,
    primary: Vec<Cell>,
    alternate: Vec<Cell>,
    alternate_active: bool,
    cursor: Cursor,
    scroll: ScrollRegion,
    pen: Pen,
    /// Stamp counter shared by both cell arrays; strictly increasing.
    next_seq: u64,
    clock: Arc<dyn Clock>,
}

impl CellGrid {
    /// Create a grid with the default monotonic clock.
    pub fn new(cols: u16, rows: u16) -> Result<Self, GridError> {
        Self::with_clock(cols, rows, Arc::new(MonotonicClock::new()))
    }

    /// Create a grid whose cell stamps read from the given clock.
    pub fn with_clock(cols: u16, rows: u16, clock: Arc<dyn Clock>) -> Result<Self, GridError> {
        if cols == 0 || rows == 0 {
            return Err(GridError::InvalidDimensions { cols, rows });
        }
        let size = cols as usize * rows as usize;
        Ok(Self {
            width: cols,
            height: rows,
            primary: vec![Cell::default(); size],
            alternate: vec![Cell::default(); size],
            alternate_active: false,
            cursor: Cursor {
                x: 0,
                y: 0,
                visible: true,
            },
            scroll: ScrollRegion {
                top: 0,
                bottom: rows - 1,
            },
            pen: Pen::default(),
            next_seq: 0,
            clock,
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn scroll_region(&self) -> ScrollRegion {
        self.scroll
    }

    pub fn alternate_active(&self) -> bool {
        self.alternate_active
    }

    /// Cell of the active array, or `None` out of bounds.
    pub fn cell(&self, x: u16, y: u16) -> Option<&Cell> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.active().get(y as usize * self.width as usize + x as usize)
    }

    /// Apply one token's full effect to the grid.
    pub fn apply(&mut self, token: &Token) {
        match token {
            Token::Text(s) => {
                for grapheme in s.graphemes(true) {
                    self.write_grapheme(grapheme);
                }
            }
            Token::Control(b) => self.apply_control(*b),
            Token::Csi(seq) => self.apply_csi(seq),
            // Opaque payloads and unrecognized bytes do not touch the grid;
            // the pipeline forwards them downstream untouched.
            Token::Osc(_) | Token::Dcs(_) | Token::Unknown(_) => {}
        }
    }

    /// Copy the active array and cursor/scroll state.
    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            width: self.width,
            height: self.height,
            cells: self.active().to_vec(),
            cursor: self.cursor,
            scroll: self.scroll,
            alternate_active: self.alternate_active,
        }
    }

    /// Resize both arrays, top-left aligned.
    ///
    /// Cells in the overlap keep their stamps; cells outside the new bounds
    /// are discarded along with their history. Resizing to the current
    /// dimensions is a no-op.
    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), GridError> {
        if cols == 0 || rows == 0 {
            return Err(GridError::InvalidDimensions { cols, rows });
        }
        if cols == self.width && rows == self.height {
            return Ok(());
        }
        let was_full_region = self.scroll.top == 0 && self.scroll.bottom == self.height - 1;
        self.primary = resized_buffer(&self.primary, self.width, self.height, cols, rows);
        self.alternate = resized_buffer(&self.alternate, self.width, self.height, cols, rows);
        self.width = cols;
        self.height = rows;
        self.cursor.x = self.cursor.x.min(cols - 1);
        self.cursor.y = self.cursor.y.min(rows - 1);
        if was_full_region {
            self.scroll = ScrollRegion {
                top: 0,
                bottom: rows - 1,
            };
        } else {
            self.scroll.top = self.scroll.top.min(rows - 1);
            self.scroll.bottom = self.scroll.bottom.min(rows - 1);
            if self.scroll.top >= self.scroll.bottom {
                self.scroll = ScrollRegion {
                    top: 0,
                    bottom: rows - 1,
                };
            }
        }
        Ok(())
    }

    fn active(&self) -> &[Cell] {
        if self.alternate_active {
            &self.alternate
        } else {
            &self.primary
        }
    }

    fn active_mut(&mut self) -> &mut Vec<Cell> {
        if self.alternate_active {
            &mut self.alternate
        } else {
            &mut self.primary
        }
    }

    fn index(&self, x: u16, y: u16) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Bump the stamp of the cell at `index`.
    fn stamp(&mut self, index: usize) {
        let now = self.clock.now();
        self.next_seq += 1;
        let seq = self.next_seq;
        let cell = &mut self.active_mut()[index];
        cell.seq = seq;
        cell.written_at = now;
    }

    /// Reset a cell to blank with default colors and bump its stamp.
    fn erase_cell(&mut self, index: usize) {
        let cell = &mut self.active_mut()[index];
        cell.glyph.clear();
        cell.glyph.push(' ');
        cell.fg = None;
        cell.bg = None;
        cell.flags = CellFlags::empty();
        cell.width = 1;
        self.stamp(index);
    }

    fn write_grapheme(&mut self, grapheme: &str) {
        let w = UnicodeWidthStr::width(grapheme).min(2) as u16;
        if w == 0 {
            // Combining mark: attach to the previously written cell.
            let (px, py) = if self.cursor.x > 0 {
                (self.cursor.x - 1, self.cursor.y)
            } else if self.cursor.y > 0 {
                (self.width - 1, self.cursor.y - 1)
            } else {
                return;
            };
            let index = self.index(px, py);
            self.active_mut()[index].glyph.push_str(grapheme);
            self.stamp(index);
            return;
        }
        if self.cursor.x + w > self.width {
            self.cursor.x = 0;
            self.advance_line();
        }
        let (x, y) = (self.cursor.x, self.cursor.y);
        let index = self.index(x, y);
        let pen = self.pen;
        {
            let cell = &mut self.active_mut()[index];
            cell.glyph.clear();
            cell.glyph.push_str(grapheme);
            cell.fg = pen.fg;
            cell.bg = pen.bg;
            cell.flags = pen.flags;
            cell.width = w as u8;
        }
        self.stamp(index);
        if w == 2 && x + 1 < self.width {
            let cont = self.index(x + 1, y);
            {
                let cell = &mut self.active_mut()[cont];
                cell.glyph.clear();
                cell.fg = pen.fg;
                cell.bg = pen.bg;
                cell.flags = pen.flags;
                cell.width = 0;
            }
            self.stamp(cont);
        }
        self.cursor.x += w;
        if self.cursor.x >= self.width {
            self.cursor.x = 0;
            self.advance_line();
        }
    }

    fn advance_line(&mut self) {
        if self.cursor.y == self.scroll.bottom {
            self.scroll_up(1);
        } else if self.cursor.y + 1 < self.height {
            self.cursor.y += 1;
        }
    }

    fn apply_control(&mut self, b: u8) {
        match b {
            0x0D => self.cursor.x = 0,
            0x0A => self.advance_line(),
            0x08 => self.cursor.x = self.cursor.x.saturating_sub(1),
            0x09 => {
                let next = (self.cursor.x / 8 + 1) * 8;
                self.cursor.x = next.min(self.width - 1);
            }
            _ => {}
        }
    }

    fn apply_csi(&mut self, seq: &CsiParams) {
        if seq.private == Some(b'?') {
            match seq.final_byte {
                b'h' => self.set_private_modes(&seq.params, true),
                b'l' => self.set_private_modes(&seq.params, false),
                _ => {}
            }
            return;
        }
        if seq.private.is_some() || seq.intermediate.is_some() {
            return;
        }
        match seq.final_byte {
            b'A' => self.cursor.y = self.cursor.y.saturating_sub(count(seq)),
            b'B' => self.cursor.y = self.cursor.y.saturating_add(count(seq)).min(self.height - 1),
            b'C' => self.cursor.x = self.cursor.x.saturating_add(count(seq)).min(self.width - 1),
            b'D' => self.cursor.x = self.cursor.x.saturating_sub(count(seq)),
            b'G' => self.cursor.x = (count(seq) - 1).min(self.width - 1),
            b'd' => self.cursor.y = (count(seq) - 1).min(self.height - 1),
            b'H' | b'f' => {
                let row = seq.param(0, 1).max(1);
                let col = seq.param(1, 1).max(1);
                self.cursor.y = (row - 1).min(self.height - 1);
                self.cursor.x = (col - 1).min(self.width - 1);
            }
            b'J' => self.erase_in_display(seq.param(0, 0)),
            b'K' => self.erase_in_line(seq.param(0, 0)),
            b'm' => self.apply_sgr(&seq.params),
            b'r' => self.set_scroll_region(seq),
            b'S' => self.scroll_up(count(seq)),
            b'T' => self.scroll_down(count(seq)),
            _ => {}
        }
    }

    fn set_private_modes(&mut self, params: &[Option<u16>], enable: bool) {
        for p in params.iter().copied().flatten() {
            match p {
                25 => self.cursor.visible = enable,
                // Switching the active array neither clears nor copies
                // either buffer; cursor and pen carry across.
                47 | 1047 | 1049 => self.alternate_active = enable,
                _ => {}
            }
        }
    }

    fn erase_in_display(&mut self, mode: u16) {
        let cursor_index = self.index(self.cursor.x, self.cursor.y);
        let len = self.active().len();
        let range = match mode {
            0 => cursor_index..len,
            1 => 0..cursor_index + 1,
            2 | 3 => 0..len,
            _ => return,
        };
        for index in range {
            self.erase_cell(index);
        }
    }

    fn erase_in_line(&mut self, mode: u16) {
        let row_start = self.index(0, self.cursor.y);
        let cursor_index = self.index(self.cursor.x, self.cursor.y);
        let row_end = row_start + self.width as usize;
        let range = match mode {
            0 => cursor_index..row_end,
            1 => row_start..cursor_index + 1,
            2 => row_start..row_end,
            _ => return,
        };
        for index in range {
            self.erase_cell(index);
        }
    }

    fn set_scroll_region(&mut self, seq: &CsiParams) {
        let top = seq.param(0, 1).max(1);
        let bottom = seq.param(1, self.height).max(1).min(self.height);
        if top < bottom {
            self.scroll = ScrollRegion {
                top: top - 1,
                bottom: bottom - 1,
            };
        }
    }

    /// Shift the scroll region up. Every row in the region, including the
    /// freshly blanked bottom row(s), gets a new stamp: a scroll counts as
    /// an update even where the visible character is unchanged.
    fn scroll_up(&mut self, count: u16) {
        let ScrollRegion { top, bottom } = self.scroll;
        let region_rows = bottom - top + 1;
        let count = count.min(region_rows);
        if count == 0 {
            return;
        }
        let w = self.width as usize;
        let start = self.index(0, top);
        let end = self.index(0, bottom) + w;
        let shift = w * count as usize;
        {
            let buf = self.active_mut();
            buf[start..end].rotate_left(shift);
            for cell in &mut buf[end - shift..end] {
                cell.glyph.clear();
                cell.glyph.push(' ');
                cell.fg = None;
                cell.bg = None;
                cell.flags = CellFlags::empty();
                cell.width = 1;
            }
        }
        for index in start..end {
            self.stamp(index);
        }
    }

    fn scroll_down(&mut self, count: u16) {
        let ScrollRegion { top, bottom } = self.scroll;
        let region_rows = bottom - top + 1;
        let count = count.min(region_rows);
        if count == 0 {
            return;
        }
        let w = self.width as usize;
        let start = self.index(0, top);
        let end = self.index(0, bottom) + w;
        let shift = w * count as usize;
        {
            let buf = self.active_mut();
            buf[start..end].rotate_right(shift);
            for cell in &mut buf[start..start + shift] {
                cell.glyph.clear();
                cell.glyph.push(' ');
                cell.fg = None;
                cell.bg = None;
                cell.flags = CellFlags::empty();
                cell.width = 1;
            }
        }
        for index in start..end {
            self.stamp(index);
        }
    }

    fn apply_sgr(&mut self, params: &[Option<u16>]) {
        if params.is_empty() {
            self.pen = Pen::default();
            return;
        }
        let mut i = 0;
        while i < params.len() {
            let code = params[i].unwrap_or(0);
            match code {
                0 => self.pen = Pen::default(),
                1 => self.pen.flags |= CellFlags::BOLD,
                2 => self.pen.flags |= CellFlags::DIM,
                3 => self.pen.flags |= CellFlags::ITALIC,
                4 => self.pen.flags |= CellFlags::UNDERLINE,
                5 => self.pen.flags |= CellFlags::BLINK,
                7 => self.pen.flags |= CellFlags::INVERSE,
                8 => self.pen.flags |= CellFlags::HIDDEN,
                9 => self.pen.flags |= CellFlags::STRIKETHROUGH,
                22 => self.pen.flags.remove(CellFlags::BOLD | CellFlags::DIM),
                23 => self.pen.flags.remove(CellFlags::ITALIC),
                24 => self.pen.flags.remove(CellFlags::UNDERLINE),
                25 => self.pen.flags.remove(CellFlags::BLINK),
                27 => self.pen.flags.remove(CellFlags::INVERSE),
                28 => self.pen.flags.remove(CellFlags::HIDDEN),
                29 => self.pen.flags.remove(CellFlags::STRIKETHROUGH),
                30..=37 => self.pen.fg = Some(Rgb::from_index((code - 30) as u8)),
                39 => self.pen.fg = None,
                40..=47 => self.pen.bg = Some(Rgb::from_index((code - 40) as u8)),
                49 => self.pen.bg = None,
                90..=97 => self.pen.fg = Some(Rgb::from_index((code - 90 + 8) as u8)),
                100..=107 => self.pen.bg = Some(Rgb::from_index((code - 100 + 8) as u8)),
                38 => match extended_color(params, i) {
                    Some((color, consumed)) => {
                        self.pen.fg = Some(color);
                        i += consumed;
                    }
                    None => break,
                },
                48 => match extended_color(params, i) {
                    Some((color, consumed)) => {
                        self.pen.bg = Some(color);
                        i += consumed;
                    }
                    None => break,
                },
                _ => {}
            }
            i += 1;
        }
    }
}

/// Count parameter defaulting to 1, with 0 meaning 1 (ECMA-48).
fn count(seq: &CsiParams) -> u16 {
    seq.param(0, 1).max(1)
}

/// Decode a `38;5;n` or `38;2;r;g;b` color introducer starting at `i`.
/// Returns the color and the number of extra parameters consumed.
fn extended_color(params: &[Option<u16>], i: usize) -> Option<(Rgb, usize)> {
    match params.get(i + 1).copied().flatten() {
        Some(5) => {
            let idx = params.get(i + 2).copied().flatten()?;
            Some((Rgb::from_index(idx.min(255) as u8), 2))
        }
        Some(2) => {
            let r = params.get(i + 2).copied().flatten()?;
            let g = params.get(i + 3).copied().flatten()?;
            let b = params.get(i + 4).copied().flatten()?;
            Some((
                Rgb::new(r.min(255) as u8, g.min(255) as u8, b.min(255) as u8),
                4,
            ))
        }
        _ => None,
    }
}

fn resized_buffer(old: &[Cell], old_cols: u16, old_rows: u16, cols: u16, rows: u16) -> Vec<Cell> {
    let mut new = vec![Cell::default(); cols as usize * rows as usize];
    let copy_rows = old_rows.min(rows) as usize;
    let copy_cols = old_cols.min(cols) as usize;
    for y in 0..copy_rows {
        for x in 0..copy_cols {
            new[y * cols as usize + x] = old[y * old_cols as usize + x].clone();
        }
    }
    new
}
