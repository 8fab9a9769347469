use std::collections::VecDeque;

use serde::Serialize;

use crate::config::DEFAULT_SCROLLBACK_LIMIT;

const TAB_WIDTH: usize = 8;

/// Stored cell color: the 8 base ANSI colors plus the terminal default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalColor {
    #[default]
    Default,
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
}

impl TerminalColor {
    const BASE: [TerminalColor; 8] = [
        TerminalColor::Black,
        TerminalColor::Red,
        TerminalColor::Green,
        TerminalColor::Yellow,
        TerminalColor::Blue,
        TerminalColor::Magenta,
        TerminalColor::Cyan,
        TerminalColor::White,
    ];

    /// Folds a 256-color (or bright, base+8) index onto the base palette.
    ///
    /// This is lossy on purpose: only `index mod 8` survives.
    pub fn from_index(index: u16) -> Self {
        Self::BASE[(index % 8) as usize]
    }

    /// Position in the base palette, `None` for the default color.
    pub fn palette_index(self) -> Option<u8> {
        Self::BASE.iter().position(|c| *c == self).map(|i| i as u8)
    }
}

/// Color as the renderer should paint it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderColor {
    DefaultForeground,
    DefaultBackground,
    /// 0-7 base colors, 8-15 their bright variants.
    Palette(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct EffectiveColors {
    pub foreground: RenderColor,
    pub background: RenderColor,
}

/// Resolves stored colors into painted colors.
///
/// Reverse video swaps the roles and bold brightens the foreground. The
/// stored colors are never touched.
pub fn effective_colors(
    foreground: TerminalColor,
    background: TerminalColor,
    reverse: bool,
    bold: bool,
) -> EffectiveColors {
    let fg = match foreground.palette_index() {
        Some(i) if bold => RenderColor::Palette(i + 8),
        Some(i) => RenderColor::Palette(i),
        None => RenderColor::DefaultForeground,
    };
    let bg = match background.palette_index() {
        Some(i) => RenderColor::Palette(i),
        None => RenderColor::DefaultBackground,
    };

    if reverse {
        let swap = |c: RenderColor| match c {
            RenderColor::DefaultForeground => RenderColor::DefaultBackground,
            RenderColor::DefaultBackground => RenderColor::DefaultForeground,
            other => other,
        };
        EffectiveColors {
            foreground: swap(bg),
            background: swap(fg),
        }
    } else {
        EffectiveColors {
            foreground: fg,
            background: bg,
        }
    }
}

/// A single grid position.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TerminalCell {
    pub character: char,
    pub foreground: TerminalColor,
    pub background: TerminalColor,
    pub bold: bool,
    pub dim: bool,
    pub underline: bool,
    pub blink: bool,
    pub reverse: bool,
    pub hidden: bool,
}

impl Default for TerminalCell {
    fn default() -> Self {
        Self {
            character: ' ',
            foreground: TerminalColor::Default,
            background: TerminalColor::Default,
            bold: false,
            dim: false,
            underline: false,
            blink: false,
            reverse: false,
            hidden: false,
        }
    }
}

impl TerminalCell {
    pub fn effective_colors(&self) -> EffectiveColors {
        effective_colors(self.foreground, self.background, self.reverse, self.bold)
    }

    /// Same attributes, different character.
    fn with_character(mut self, character: char) -> Self {
        self.character = character;
        self
    }
}

/// Consistent copy of the visible grid handed to renderers.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScreenSnapshot {
    pub rows: Vec<Vec<TerminalCell>>,
    pub cursor_row: usize,
    pub cursor_column: usize,
}

impl ScreenSnapshot {
    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_row, self.cursor_column)
    }

    pub fn line_text(&self, row: usize) -> String {
        self.rows
            .get(row)
            .map(|cells| cells.iter().map(|c| c.character).collect())
            .unwrap_or_default()
    }
}

/// Fixed-size character grid with cursor, attributes and scrollback.
#[derive(Clone, Debug)]
pub struct ScreenBuffer {
    rows: usize,
    columns: usize,
    grid: Vec<Vec<TerminalCell>>,
    cursor_row: usize,
    cursor_column: usize,
    saved_cursor: (usize, usize),
    current_attributes: TerminalCell,
    scrollback: VecDeque<Vec<TerminalCell>>,
    scrollback_limit: usize,
}

impl ScreenBuffer {
    pub fn new(rows: usize, columns: usize) -> Self {
        Self::with_scrollback_limit(rows, columns, DEFAULT_SCROLLBACK_LIMIT)
    }

    pub fn with_scrollback_limit(rows: usize, columns: usize, scrollback_limit: usize) -> Self {
        let rows = rows.max(1);
        let columns = columns.max(1);
        Self {
            rows,
            columns,
            grid: blank_grid(rows, columns),
            cursor_row: 0,
            cursor_column: 0,
            saved_cursor: (0, 0),
            current_attributes: TerminalCell::default(),
            scrollback: VecDeque::new(),
            scrollback_limit,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn columns(&self) -> usize {
        self.columns
    }

    /// `(row, column)`, 0-indexed.
    pub fn cursor(&self) -> (usize, usize) {
        (self.cursor_row, self.cursor_column)
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&TerminalCell> {
        self.grid.get(row).and_then(|r| r.get(column))
    }

    pub fn line_text(&self, row: usize) -> String {
        self.grid
            .get(row)
            .map(|cells| cells.iter().map(|c| c.character).collect())
            .unwrap_or_default()
    }

    pub fn current_attributes(&self) -> &TerminalCell {
        &self.current_attributes
    }

    /// Evicted rows, oldest first.
    pub fn scrollback(&self) -> &VecDeque<Vec<TerminalCell>> {
        &self.scrollback
    }

    pub fn scrollback_limit(&self) -> usize {
        self.scrollback_limit
    }

    pub fn clear_scrollback(&mut self) {
        self.scrollback.clear();
    }

    pub fn snapshot(&self) -> ScreenSnapshot {
        ScreenSnapshot {
            rows: self.grid.clone(),
            cursor_row: self.cursor_row,
            cursor_column: self.cursor_column,
        }
    }

    /// Reallocates the grid, keeping the overlapping top-left rectangle.
    pub fn resize(&mut self, rows: usize, columns: usize) {
        let rows = rows.max(1);
        let columns = columns.max(1);
        let mut grid = blank_grid(rows, columns);
        for (new_row, old_row) in grid.iter_mut().zip(self.grid.iter()) {
            let overlap = columns.min(old_row.len());
            new_row[..overlap].copy_from_slice(&old_row[..overlap]);
        }
        self.grid = grid;
        self.rows = rows;
        self.columns = columns;
        self.clamp_cursor();
    }

    /// Writes at the cursor and advances, wrapping onto the next line.
    pub fn write_character(&mut self, ch: char) {
        self.grid[self.cursor_row][self.cursor_column] = self.current_attributes.with_character(ch);
        self.cursor_column += 1;
        if self.cursor_column >= self.columns {
            self.new_line();
        }
    }

    /// Moves up `count` rows, stopping at the top.
    pub fn move_cursor_up(&mut self, count: usize) {
        self.cursor_row = self.cursor_row.saturating_sub(count);
    }

    /// Moves down `count` rows, stopping at the bottom.
    pub fn move_cursor_down(&mut self, count: usize) {
        self.cursor_row = self.cursor_row.saturating_add(count).min(self.rows - 1);
    }

    /// Moves left `count` columns, stopping at column 0.
    pub fn move_cursor_left(&mut self, count: usize) {
        self.cursor_column = self.cursor_column.saturating_sub(count);
    }

    /// Moves right `count` columns, stopping at the last column.
    pub fn move_cursor_right(&mut self, count: usize) {
        self.cursor_column = self.cursor_column.saturating_add(count).min(self.columns - 1);
    }

    /// Absolute 0-based position, clamped into the grid.
    pub fn set_cursor_position(&mut self, row: usize, column: usize) {
        self.cursor_row = row.min(self.rows - 1);
        self.cursor_column = column.min(self.columns - 1);
    }

    /// Absolute row, column unchanged.
    pub fn set_cursor_row(&mut self, row: usize) {
        self.cursor_row = row.min(self.rows - 1);
    }

    /// Absolute column, row unchanged.
    pub fn set_cursor_column(&mut self, column: usize) {
        self.cursor_column = column.min(self.columns - 1);
    }

    /// Line feed. On the last row the top row moves into scrollback.
    pub fn new_line(&mut self) {
        self.cursor_column = 0;
        if self.cursor_row + 1 >= self.rows {
            self.scroll_up();
        } else {
            self.cursor_row += 1;
        }
    }

    /// Back to column 0.
    pub fn carriage_return(&mut self) {
        self.cursor_column = 0;
    }

    /// Next tab stop (every 8 columns), clamped to the last column.
    pub fn tab(&mut self) {
        let next_stop = (self.cursor_column / TAB_WIDTH + 1) * TAB_WIDTH;
        self.cursor_column = next_stop.min(self.columns - 1);
    }

    /// Moves left one column and erases that cell.
    pub fn backspace(&mut self) {
        if self.cursor_column > 0 {
            self.cursor_column -= 1;
            self.grid[self.cursor_row][self.cursor_column] = TerminalCell::default();
        }
    }

    /// Blank grid, cursor at origin. Scrollback is kept.
    pub fn clear_screen(&mut self) {
        self.grid = blank_grid(self.rows, self.columns);
        self.cursor_row = 0;
        self.cursor_column = 0;
    }

    /// Blanks from the cursor (inclusive) to the end of the screen.
    pub fn erase_from_cursor_to_end(&mut self) {
        self.erase_line_from_cursor_to_end();
        for row in &mut self.grid[self.cursor_row + 1..] {
            row.fill(TerminalCell::default());
        }
    }

    /// Blanks from the top-left corner to the cursor (inclusive).
    pub fn erase_from_start_to_cursor(&mut self) {
        for row in &mut self.grid[..self.cursor_row] {
            row.fill(TerminalCell::default());
        }
        self.erase_line_from_start_to_cursor();
    }

    /// Blanks the cursor row.
    pub fn clear_line(&mut self) {
        self.grid[self.cursor_row].fill(TerminalCell::default());
    }

    /// Blanks the cursor row from the cursor on.
    pub fn erase_line_from_cursor_to_end(&mut self) {
        self.grid[self.cursor_row][self.cursor_column..].fill(TerminalCell::default());
    }

    /// Blanks the cursor row up to and including the cursor.
    pub fn erase_line_from_start_to_cursor(&mut self) {
        self.grid[self.cursor_row][..=self.cursor_column].fill(TerminalCell::default());
    }

    /// DEC save cursor.
    pub fn save_cursor_position(&mut self) {
        self.saved_cursor = (self.cursor_row, self.cursor_column);
    }

    /// DEC restore cursor, clamped to the current size.
    pub fn restore_cursor_position(&mut self) {
        let (row, column) = self.saved_cursor;
        self.set_cursor_position(row, column);
    }

    /// Bold for subsequent writes.
    pub fn set_bold(&mut self, on: bool) {
        self.current_attributes.bold = on;
    }

    /// Dim (faint) for subsequent writes.
    pub fn set_dim(&mut self, on: bool) {
        self.current_attributes.dim = on;
    }

    /// Underline for subsequent writes.
    pub fn set_underline(&mut self, on: bool) {
        self.current_attributes.underline = on;
    }

    /// Blink for subsequent writes.
    pub fn set_blink(&mut self, on: bool) {
        self.current_attributes.blink = on;
    }

    /// Reverse video; colors swap only when rendered.
    pub fn set_reverse(&mut self, on: bool) {
        self.current_attributes.reverse = on;
    }

    /// Concealed text for subsequent writes.
    pub fn set_hidden(&mut self, on: bool) {
        self.current_attributes.hidden = on;
    }

    /// Foreground for subsequent writes.
    pub fn set_foreground(&mut self, color: TerminalColor) {
        self.current_attributes.foreground = color;
    }

    /// Background for subsequent writes.
    pub fn set_background(&mut self, color: TerminalColor) {
        self.current_attributes.background = color;
    }

    /// Foreground from a 256-color index, folded onto the base palette.
    pub fn set_foreground_index(&mut self, index: u16) {
        self.current_attributes.foreground = TerminalColor::from_index(index);
    }

    /// Background from a 256-color index, folded onto the base palette.
    pub fn set_background_index(&mut self, index: u16) {
        self.current_attributes.background = TerminalColor::from_index(index);
    }

    /// SGR 0: default colors, every attribute off.
    pub fn reset_attributes(&mut self) {
        self.current_attributes = TerminalCell::default();
    }

    fn scroll_up(&mut self) {
        let evicted = self.grid.remove(0);
        if self.scrollback_limit > 0 {
            if self.scrollback.len() >= self.scrollback_limit {
                self.scrollback.pop_front();
            }
            self.scrollback.push_back(evicted);
        }
        self.grid.push(vec![TerminalCell::default(); self.columns]);
    }

    fn clamp_cursor(&mut self) {
        self.cursor_row = self.cursor_row.min(self.rows - 1);
        self.cursor_column = self.cursor_column.min(self.columns - 1);
    }
}

fn blank_grid(rows: usize, columns: usize) -> Vec<Vec<TerminalCell>> {
    vec![vec![TerminalCell::default(); columns]; rows]
}
