//! IDE Terminal Core: embedded terminal engine for the IDE
//!
//! Runs a login shell on a pseudo-terminal, interprets its VT100/ANSI
//! output into a cell grid and encodes key presses, exposed to Swift
//! through a C FFI interface.

pub mod config;
pub mod ffi;
pub mod logging;
mod runtime;
pub mod terminal;

pub use config::TerminalConfig;
pub use terminal::input::{Key, Modifiers};
pub use terminal::screen::{ScreenSnapshot, TerminalCell, TerminalColor};
pub use terminal::{SessionState, TerminalError, TerminalObserver, TerminalSession};
