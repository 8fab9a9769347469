use std::sync::Arc;

use log::Level;
use vte::{Params, Parser, Perform};

use crate::logging::{LogFacade, SessionLogger};
use crate::terminal::screen::{ScreenBuffer, ScreenSnapshot, TerminalColor};

/// Parameter slots the mirror keeps, matching the parser's own capacity.
const MAX_PARAMETERS: usize = 32;

/// Where the parser stands in the byte stream; back to `Normal` once a
/// sequence is dispatched or cancelled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParserState {
    #[default]
    Normal,
    Escape,
    Csi,
    /// OSC and the other string sequences (DCS, PM, APC).
    Osc,
    Charset,
}

/// What a batch of input touched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Changes {
    /// Cell contents changed (writes, erases, scrolls).
    pub screen: bool,
    /// Cursor position changed.
    pub cursor: bool,
}

impl Changes {
    pub fn is_empty(&self) -> bool {
        !self.screen && !self.cursor
    }
}

/// Mirror of the parser position, kept for inspection only.
#[derive(Debug)]
struct SequenceTracker {
    state: ParserState,
    parameters: Vec<u16>,
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self {
            state: ParserState::Normal,
            parameters: vec![0],
        }
    }
}

impl SequenceTracker {
    fn observe(&mut self, data: &[u8]) {
        for &byte in data {
            self.step(byte);
        }
    }

    fn step(&mut self, byte: u8) {
        use ParserState::*;

        self.state = match (self.state, byte) {
            (_, 0x18 | 0x1a) => Normal,
            (_, 0x1b) => Escape,
            (Normal, _) => Normal,
            (Escape, b'[') => {
                self.parameters.clear();
                self.parameters.push(0);
                Csi
            }
            (Escape, b']' | b'P' | b'X' | b'^' | b'_') => Osc,
            (Escape, b'(' | b')' | b'*' | b'+') => Charset,
            (Escape, 0x30..=0x7e) => Normal,
            (Escape, _) => Escape,
            (Csi, b'0'..=b'9') => {
                let digit = u16::from(byte - b'0');
                if let Some(last) = self.parameters.last_mut() {
                    *last = last.saturating_mul(10).saturating_add(digit);
                }
                Csi
            }
            (Csi, b';' | b':') => {
                if self.parameters.len() < MAX_PARAMETERS {
                    self.parameters.push(0);
                }
                Csi
            }
            (Csi, 0x40..=0x7e) => Normal,
            (Csi, _) => Csi,
            (Osc, 0x07) => Normal,
            (Osc, _) => Osc,
            (Charset, 0x30..=0x7e) => Normal,
            (Charset, _) => Charset,
        };
    }
}

/// VT100/ANSI interpreter: `vte` does the tokenizing and UTF-8 decoding,
/// `ScreenPerformer` applies each action to the grid.
pub struct EscapeInterpreter {
    parser: Parser,
    tracker: SequenceTracker,
    replies: Vec<u8>,
    logger: Arc<dyn SessionLogger>,
}

impl Default for EscapeInterpreter {
    fn default() -> Self {
        Self::new(Arc::new(LogFacade))
    }
}

impl EscapeInterpreter {
    pub fn new(logger: Arc<dyn SessionLogger>) -> Self {
        Self {
            parser: Parser::new(),
            tracker: SequenceTracker::default(),
            replies: Vec::new(),
            logger,
        }
    }

    pub fn state(&self) -> ParserState {
        self.tracker.state
    }

    /// Parameters of the current (or most recent) CSI sequence.
    pub fn parameters(&self) -> &[u16] {
        &self.tracker.parameters
    }

    /// Bytes the terminal must send back to the child (status reports).
    pub fn take_replies(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.replies)
    }

    /// Feeds raw PTY output. Incomplete UTF-8 and unfinished sequences at
    /// the end are carried into the next call.
    pub fn process(&mut self, data: &[u8], screen: &mut ScreenBuffer) -> Changes {
        let mut performer = ScreenPerformer {
            screen,
            replies: &mut self.replies,
            logger: self.logger.as_ref(),
            changes: Changes::default(),
        };
        self.parser.advance(&mut performer, data);
        self.tracker.observe(data);
        performer.changes
    }
}

/// Applies parser actions to a `ScreenBuffer`.
struct ScreenPerformer<'a> {
    screen: &'a mut ScreenBuffer,
    replies: &'a mut Vec<u8>,
    logger: &'a dyn SessionLogger,
    changes: Changes,
}

impl<'a> ScreenPerformer<'a> {
    fn cursor_moved(&mut self) {
        self.changes.cursor = true;
    }

    fn dispatch_csi(&mut self, params: &[u16], action: char) -> bool {
        let param = |index: usize| params.get(index).copied().unwrap_or(0);
        // Count semantics: 0 or absent means 1.
        let count = |index: usize| usize::from(param(index).max(1));
        let screen = &mut *self.screen;

        match action {
            'A' => screen.move_cursor_up(count(0)),
            'B' => screen.move_cursor_down(count(0)),
            'C' => screen.move_cursor_right(count(0)),
            'D' => screen.move_cursor_left(count(0)),
            'H' | 'f' => screen.set_cursor_position(count(0) - 1, count(1) - 1),
            'G' => screen.set_cursor_column(count(0) - 1),
            'd' => screen.set_cursor_row(count(0) - 1),
            'J' => {
                match param(0) {
                    0 => screen.erase_from_cursor_to_end(),
                    1 => screen.erase_from_start_to_cursor(),
                    2 => {
                        screen.clear_screen();
                        self.changes.cursor = true;
                    }
                    3 => {
                        screen.clear_screen();
                        screen.clear_scrollback();
                        self.changes.cursor = true;
                    }
                    _ => return true,
                }
                self.changes.screen = true;
                return true;
            }
            'K' => {
                match param(0) {
                    0 => screen.erase_line_from_cursor_to_end(),
                    1 => screen.erase_line_from_start_to_cursor(),
                    2 => screen.clear_line(),
                    _ => return true,
                }
                self.changes.screen = true;
                return true;
            }
            'm' => {
                select_graphic_rendition(params, screen);
                return true;
            }
            's' => {
                screen.save_cursor_position();
                return true;
            }
            'u' => screen.restore_cursor_position(),
            'n' => {
                self.device_status_report(param(0));
                return true;
            }
            _ => return false,
        }
        self.cursor_moved();
        true
    }

    fn device_status_report(&mut self, kind: u16) {
        match kind {
            5 => self.replies.extend_from_slice(b"\x1b[0n"),
            6 => {
                let (row, column) = self.screen.cursor();
                self.replies
                    .extend_from_slice(format!("\x1b[{};{}R", row + 1, column + 1).as_bytes());
            }
            _ => {}
        }
    }
}

impl<'a> Perform for ScreenPerformer<'a> {
    fn print(&mut self, ch: char) {
        if ch.is_control() {
            return;
        }
        self.screen.write_character(ch);
        self.changes.screen = true;
        self.changes.cursor = true;
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' | 0x0b | 0x0c => {
                let before = self.screen.cursor();
                self.screen.new_line();
                // Scrolling leaves the cursor in place but moves every row.
                self.changes.screen |= before.0 == self.screen.cursor().0;
                self.changes.cursor = true;
            }
            b'\r' => {
                self.screen.carriage_return();
                self.changes.cursor = true;
            }
            b'\t' => {
                self.screen.tab();
                self.changes.cursor = true;
            }
            0x08 => {
                self.screen.backspace();
                self.changes.screen = true;
                self.changes.cursor = true;
            }
            // BEL, CAN, SUB and the rest.
            _ => {}
        }
    }

    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        // Parsed but not applied (window title and friends).
        let command = params.first().map(|p| String::from_utf8_lossy(p)).unwrap_or_default();
        self.logger.log(Level::Trace, format_args!("ignoring OSC {}", command));
    }

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], ignore: bool, action: char) {
        let values: Vec<u16> = params.iter().flatten().copied().collect();
        if ignore {
            self.logger.log(
                Level::Warn,
                format_args!("abandoning oversized control sequence ({} parameters)", values.len()),
            );
            return;
        }

        // Mode set/reset (including DEC private modes) is accepted but not applied.
        if matches!(action, 'h' | 'l') {
            return;
        }

        let handled = intermediates.is_empty() && self.dispatch_csi(&values, action);
        if !handled {
            self.logger.log(
                Level::Debug,
                format_args!("unhandled control sequence {}", describe_csi(&values, intermediates, action)),
            );
        }
    }

    fn esc_dispatch(&mut self, intermediates: &[u8], _ignore: bool, byte: u8) {
        match (intermediates, byte) {
            ([], b'7') => self.screen.save_cursor_position(),
            ([], b'8') => {
                self.screen.restore_cursor_position();
                self.cursor_moved();
            }
            // String terminator.
            ([], b'\\') => {}
            // Charset designation is accepted but not applied.
            ([b'(' | b')' | b'*' | b'+'], _) => {}
            _ => self.logger.log(
                Level::Trace,
                format_args!("discarding escape sequence ESC {}{}", String::from_utf8_lossy(intermediates), byte as char),
            ),
        }
    }
}

/// Printable form of a CSI sequence for diagnostics.
fn describe_csi(params: &[u16], intermediates: &[u8], action: char) -> String {
    let params: Vec<String> = params.iter().map(u16::to_string).collect();
    format!(
        "ESC[{}{}{}",
        String::from_utf8_lossy(intermediates),
        params.join(";"),
        action
    )
}

fn select_graphic_rendition(params: &[u16], screen: &mut ScreenBuffer) {
    // `ESC[m` is a reset.
    let params = if params.is_empty() { &[0][..] } else { params };
    let mut i = 0;
    while i < params.len() {
        match params[i] {
            0 => screen.reset_attributes(),
            1 => screen.set_bold(true),
            2 => screen.set_dim(true),
            4 => screen.set_underline(true),
            5 | 6 => screen.set_blink(true),
            7 => screen.set_reverse(true),
            8 => screen.set_hidden(true),
            22 => {
                screen.set_bold(false);
                screen.set_dim(false);
            }
            24 => screen.set_underline(false),
            25 => screen.set_blink(false),
            27 => screen.set_reverse(false),
            28 => screen.set_hidden(false),
            code @ 30..=37 => screen.set_foreground(TerminalColor::from_index(code - 30)),
            38 => i += extended_color(&params[i + 1..], |index| screen.set_foreground_index(index)),
            39 => screen.set_foreground(TerminalColor::Default),
            code @ 40..=47 => screen.set_background(TerminalColor::from_index(code - 40)),
            48 => i += extended_color(&params[i + 1..], |index| screen.set_background_index(index)),
            49 => screen.set_background(TerminalColor::Default),
            code @ 90..=97 => screen.set_foreground_index(code - 90 + 8),
            code @ 100..=107 => screen.set_background_index(code - 100 + 8),
            _ => {}
        }
        i += 1;
    }
}

/// Applies `5;N` indexed colors and skips `2;R;G;B`. Returns how many
/// parameters after the 38/48 introducer were consumed.
fn extended_color(rest: &[u16], apply: impl FnOnce(u16)) -> usize {
    match rest.first() {
        Some(5) => {
            if let Some(index) = rest.get(1) {
                apply(*index);
            }
            2
        }
        Some(2) => 4,
        _ => 0,
    }
}

/// Screen buffer paired with the interpreter that drives it.
pub struct VtEmulator {
    screen: ScreenBuffer,
    interpreter: EscapeInterpreter,
}

impl VtEmulator {
    pub fn new(rows: usize, columns: usize, scrollback_limit: usize, logger: Arc<dyn SessionLogger>) -> Self {
        Self {
            screen: ScreenBuffer::with_scrollback_limit(rows, columns, scrollback_limit),
            interpreter: EscapeInterpreter::new(logger),
        }
    }

    /// Feed raw bytes from the PTY into the parser.
    pub fn process(&mut self, bytes: &[u8]) -> Changes {
        self.interpreter.process(bytes, &mut self.screen)
    }

    pub fn resize(&mut self, rows: usize, columns: usize) {
        self.screen.resize(rows, columns);
    }

    /// Puts back a grid saved before a resize that could not be applied.
    pub fn restore_screen(&mut self, screen: ScreenBuffer) {
        self.screen = screen;
    }

    pub fn screen(&self) -> &ScreenBuffer {
        &self.screen
    }

    pub fn screen_mut(&mut self) -> &mut ScreenBuffer {
        &mut self.screen
    }

    pub fn interpreter(&self) -> &EscapeInterpreter {
        &self.interpreter
    }

    pub fn take_replies(&mut self) -> Vec<u8> {
        self.interpreter.take_replies()
    }

    pub fn snapshot(&self) -> ScreenSnapshot {
        self.screen.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::testing::RecordingLogger;
    use crate::logging::NullLogger;
    use crate::terminal::screen::TerminalCell;

    fn emulator(rows: usize, columns: usize) -> VtEmulator {
        VtEmulator::new(rows, columns, 100, Arc::new(NullLogger))
    }

    #[test]
    fn test_print_basic() {
        let mut emu = emulator(24, 80);
        emu.process(b"Hello, IDE!");
        assert_eq!(emu.screen().line_text(0).trim_end(), "Hello, IDE!");
        assert_eq!(emu.screen().cursor(), (0, 11));
    }

    #[test]
    fn test_colored_run() {
        let mut emu = emulator(1, 10);
        emu.process(b"A\x1b[31mB\x1b[0mC");
        let screen = emu.screen();
        assert_eq!(screen.cell(0, 0), Some(&TerminalCell { character: 'A', ..TerminalCell::default() }));
        assert_eq!(
            screen.cell(0, 1),
            Some(&TerminalCell {
                character: 'B',
                foreground: TerminalColor::Red,
                ..TerminalCell::default()
            })
        );
        assert_eq!(screen.cell(0, 2), Some(&TerminalCell { character: 'C', ..TerminalCell::default() }));
        assert_eq!(screen.cursor(), (0, 3));
    }

    #[test]
    fn test_crlf() {
        let mut emu = emulator(5, 20);
        emu.process(b"line1\r\nline2");
        assert_eq!(emu.screen().cursor(), (1, 5));
        assert_eq!(emu.screen().line_text(0).trim_end(), "line1");
        assert_eq!(emu.screen().line_text(1).trim_end(), "line2");
    }

    #[test]
    fn test_cursor_position() {
        let mut emu = emulator(24, 80);
        emu.process(b"\x1b[5;10HX");
        assert_eq!(emu.screen().cell(4, 9).map(|c| c.character), Some('X'));

        emu.process(b"\x1b[H");
        assert_eq!(emu.screen().cursor(), (0, 0));
        emu.process(b"\x1b[;7f");
        assert_eq!(emu.screen().cursor(), (0, 6));
    }

    #[test]
    fn test_cursor_motion_defaults_and_clamps() {
        let mut emu = emulator(10, 10);
        emu.process(b"\x1b[5;5H\x1b[A");
        assert_eq!(emu.screen().cursor(), (3, 4));
        emu.process(b"\x1b[0B");
        assert_eq!(emu.screen().cursor(), (4, 4));
        emu.process(b"\x1b[1000D");
        assert_eq!(emu.screen().cursor(), (4, 0));
        emu.process(b"\x1b[1000C\x1b[1000B");
        assert_eq!(emu.screen().cursor(), (9, 9));
        emu.process(b"\x1b[3G\x1b[2d");
        assert_eq!(emu.screen().cursor(), (1, 2));
    }

    #[test]
    fn test_erase_sequences() {
        let mut emu = emulator(3, 5);
        emu.process(b"abcd\r\nefgh\r\nijkl");
        emu.process(b"\x1b[2;3H\x1b[K");
        assert_eq!(emu.screen().line_text(1), "ef   ");
        emu.process(b"\x1b[1K");
        assert_eq!(emu.screen().line_text(1), "     ");
        emu.process(b"\x1b[1J");
        assert_eq!(emu.screen().line_text(0), "     ");
        assert_eq!(emu.screen().line_text(2), "ijkl ");
        emu.process(b"\x1b[J");
        assert_eq!(emu.screen().line_text(2), "     ");
    }

    #[test]
    fn test_clear_screen() {
        let mut emu = emulator(24, 80);
        emu.process(b"Some text");
        let changes = emu.process(b"\x1b[2J");
        assert_eq!(emu.screen().line_text(0).trim(), "");
        assert_eq!(emu.screen().cursor(), (0, 0));
        assert!(changes.screen && changes.cursor);
    }

    #[test]
    fn test_erase_display_mode_three_drops_scrollback() {
        let mut emu = emulator(1, 4);
        emu.process(b"a\nb\nc");
        assert_eq!(emu.screen().scrollback().len(), 2);
        emu.process(b"\x1b[3J");
        assert!(emu.screen().scrollback().is_empty());
    }

    #[test]
    fn test_sgr_reset_restores_defaults() {
        let mut emu = emulator(1, 10);
        emu.process(b"\x1b[1;2;4;5;7;8;33;44m\x1b[38;5;3m\x1b[0mZ");
        assert_eq!(emu.screen().current_attributes(), &TerminalCell::default());
        assert_eq!(emu.screen().cell(0, 0), Some(&TerminalCell { character: 'Z', ..TerminalCell::default() }));
    }

    #[test]
    fn test_sgr_attributes_and_cancels() {
        let mut emu = emulator(1, 10);
        emu.process(b"\x1b[1;2;4;6;7;8m");
        let attrs = *emu.screen().current_attributes();
        assert!(attrs.bold && attrs.dim && attrs.underline && attrs.blink && attrs.reverse && attrs.hidden);

        emu.process(b"\x1b[22;24;25;27;28m");
        assert_eq!(emu.screen().current_attributes(), &TerminalCell::default());

        // Empty parameter list means reset.
        emu.process(b"\x1b[1m\x1b[m");
        assert!(!emu.screen().current_attributes().bold);
    }

    #[test]
    fn test_sgr_colors() {
        let mut emu = emulator(1, 10);
        emu.process(b"\x1b[32;45m");
        assert_eq!(emu.screen().current_attributes().foreground, TerminalColor::Green);
        assert_eq!(emu.screen().current_attributes().background, TerminalColor::Magenta);

        emu.process(b"\x1b[39;49m");
        assert_eq!(emu.screen().current_attributes().foreground, TerminalColor::Default);
        assert_eq!(emu.screen().current_attributes().background, TerminalColor::Default);

        // Bright variants fold back onto the base color.
        emu.process(b"\x1b[91;106m");
        assert_eq!(emu.screen().current_attributes().foreground, TerminalColor::Red);
        assert_eq!(emu.screen().current_attributes().background, TerminalColor::Cyan);
    }

    #[test]
    fn test_sgr_256_color_folds_modulo_eight() {
        let mut emu = emulator(1, 10);
        emu.process(b"\x1b[38;5;196;48;5;10m");
        assert_eq!(emu.screen().current_attributes().foreground, TerminalColor::Blue);
        assert_eq!(emu.screen().current_attributes().background, TerminalColor::Green);
    }

    #[test]
    fn test_sgr_true_color_is_skipped() {
        let mut emu = emulator(1, 10);
        emu.process(b"\x1b[38;2;1;2;3;4m");
        let attrs = emu.screen().current_attributes();
        assert_eq!(attrs.foreground, TerminalColor::Default);
        assert!(attrs.underline);
    }

    #[test]
    fn test_save_restore_cursor() {
        let mut emu = emulator(10, 10);
        emu.process(b"\x1b[3;4H\x1b[s\x1b[H\x1b[u");
        assert_eq!(emu.screen().cursor(), (2, 3));
        emu.process(b"\x1b[5;5H\x1b7\x1b[H\x1b8");
        assert_eq!(emu.screen().cursor(), (4, 4));
    }

    #[test]
    fn test_charset_designation_consumed() {
        let mut emu = emulator(1, 10);
        emu.process(b"\x1b(Bok\x1b)0!");
        assert_eq!(emu.screen().line_text(0).trim_end(), "ok!");
        assert_eq!(emu.interpreter().state(), ParserState::Normal);
    }

    #[test]
    fn test_osc_is_swallowed() {
        let mut emu = emulator(1, 20);
        emu.process(b"\x1b]0;window title\x07a\x1b]2;other\x1b\\b");
        assert_eq!(emu.screen().line_text(0).trim_end(), "ab");
        assert_eq!(emu.interpreter().state(), ParserState::Normal);
    }

    #[test]
    fn test_osc_followed_by_new_escape() {
        let mut emu = emulator(1, 20);
        emu.process(b"\x1b]0;title\x1b[31mx");
        assert_eq!(emu.screen().cell(0, 0).map(|c| c.foreground), Some(TerminalColor::Red));
    }

    #[test]
    fn test_modes_are_accepted() {
        let mut emu = emulator(1, 10);
        let changes = emu.process(b"\x1b[?25l\x1b[?1049h\x1b[4l");
        assert!(changes.is_empty());
        assert_eq!(emu.screen().line_text(0).trim_end(), "");
    }

    #[test]
    fn test_unknown_escape_discarded() {
        let mut emu = emulator(1, 10);
        emu.process(b"\x1bMx");
        assert_eq!(emu.screen().line_text(0).trim_end(), "x");
    }

    #[test]
    fn test_sequence_split_across_reads() {
        let mut emu = emulator(1, 10);
        emu.process(b"\x1b[3");
        assert_eq!(emu.interpreter().state(), ParserState::Csi);
        assert_eq!(emu.interpreter().parameters(), &[3]);
        emu.process(b"1mR");
        assert_eq!(emu.screen().cell(0, 0).map(|c| c.foreground), Some(TerminalColor::Red));
    }

    #[test]
    fn test_parameters_reset_per_sequence() {
        let mut emu = emulator(5, 5);
        emu.process(b"\x1b[3;3H\x1b[");
        assert_eq!(emu.interpreter().parameters(), &[0]);
    }

    #[test]
    fn test_utf8_split_across_reads() {
        let mut emu = emulator(1, 10);
        let bytes = "é✓".as_bytes();
        emu.process(&bytes[..1]);
        assert_eq!(emu.screen().cursor(), (0, 0));
        emu.process(&bytes[1..4]);
        emu.process(&bytes[4..]);
        assert_eq!(emu.screen().line_text(0).trim_end(), "é✓");
    }

    #[test]
    fn test_invalid_utf8_replaced() {
        let mut emu = emulator(1, 10);
        emu.process(b"a\xffb");
        assert_eq!(emu.screen().line_text(0).trim_end(), "a\u{fffd}b");
    }

    #[test]
    fn test_device_status_report() {
        let mut emu = emulator(10, 10);
        emu.process(b"\x1b[4;7H\x1b[6n\x1b[5n");
        assert_eq!(emu.take_replies(), b"\x1b[4;7R\x1b[0n".to_vec());
        assert!(emu.take_replies().is_empty());
    }

    #[test]
    fn test_controls_inside_csi_execute() {
        let mut emu = emulator(3, 10);
        emu.process(b"ab\x1b[\r2C");
        assert_eq!(emu.screen().cursor(), (0, 2));
    }

    #[test]
    fn test_cancel_aborts_sequence() {
        let mut emu = emulator(1, 10);
        emu.process(b"\x1b[31\x18x");
        assert_eq!(emu.screen().cell(0, 0).map(|c| c.foreground), Some(TerminalColor::Default));
        assert_eq!(emu.screen().line_text(0).trim_end(), "x");
    }

    #[test]
    fn test_oversized_sequence_abandoned() {
        let logger = Arc::new(RecordingLogger::default());
        let mut emu = VtEmulator::new(1, 10, 0, logger.clone());
        let mut data = b"\x1b[".to_vec();
        for _ in 0..MAX_PARAMETERS + 8 {
            data.extend_from_slice(b"1;");
        }
        data.extend_from_slice(b"mx");
        emu.process(&data);
        assert_eq!(emu.interpreter().state(), ParserState::Normal);
        assert!(logger.contains("oversized"));
        assert_eq!(emu.screen().cell(0, 0).map(|c| (c.character, c.bold)), Some(('x', false)));
    }

    #[test]
    fn test_non_letter_final_bytes_end_sequence() {
        let logger = Arc::new(RecordingLogger::default());
        let mut emu = VtEmulator::new(1, 10, 0, logger.clone());
        emu.process(b"ab\x1b[1@xy");
        assert_eq!(emu.screen().line_text(0).trim_end(), "abxy");
        assert_eq!(emu.interpreter().state(), ParserState::Normal);
        assert!(logger.contains("unhandled control sequence ESC[1@"));

        emu.process(b"\r\x1b[5`\x1b[2~\x1b[{\x1b[|z");
        assert_eq!(emu.screen().line_text(0).trim_end(), "zbxy");
        assert_eq!(emu.interpreter().state(), ParserState::Normal);
    }

    #[test]
    fn test_string_sequences_tracked_until_terminated() {
        let mut emu = emulator(1, 10);
        emu.process(b"\x1b]0;ti");
        assert_eq!(emu.interpreter().state(), ParserState::Osc);
        emu.process(b"tle\x1b");
        assert_eq!(emu.interpreter().state(), ParserState::Escape);
        emu.process(b"\\k");
        assert_eq!(emu.interpreter().state(), ParserState::Normal);
        assert_eq!(emu.screen().line_text(0).trim_end(), "k");
    }

    #[test]
    fn test_change_flags() {
        let mut emu = emulator(3, 10);
        assert_eq!(emu.process(b"\x1b[2;2H"), Changes { screen: false, cursor: true });
        assert_eq!(emu.process(b"\x1b[1m"), Changes::default());
        assert_eq!(emu.process(b"x"), Changes { screen: true, cursor: true });
        assert_eq!(emu.process(b"\x07"), Changes::default());
    }

    #[test]
    fn test_backspace_and_bell() {
        let mut emu = emulator(1, 10);
        emu.process(b"abc\x08\x07");
        assert_eq!(emu.screen().line_text(0).trim_end(), "ab");
        assert_eq!(emu.screen().cursor(), (0, 2));
    }
}
