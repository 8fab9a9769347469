//! C FFI interface for the host application.
//!
//! All functions exported here are callable from Swift via the C bridge.
//! Naming convention: ide_<module>_<action>

use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::TerminalConfig;
use crate::logging::default_logger;
use crate::terminal::input::{Key, Modifiers};
use crate::terminal::screen::ScreenSnapshot;
use crate::terminal::{SessionState, TerminalError, TerminalObserver, TerminalSession};

// ═══════════════════════════════════════════════════════════
// Terminal FFI
// ═══════════════════════════════════════════════════════════

/// Opaque pointer to a TerminalSession.
pub type IdeTerminalHandle = *mut TerminalSession;

/// Key codes accepted by `ide_terminal_send_key`.
pub const IDE_KEY_CHARACTER: u32 = 0;
pub const IDE_KEY_ENTER: u32 = 1;
pub const IDE_KEY_TAB: u32 = 2;
pub const IDE_KEY_BACKSPACE: u32 = 3;
pub const IDE_KEY_ESCAPE: u32 = 4;
pub const IDE_KEY_DELETE: u32 = 5;
pub const IDE_KEY_LEFT: u32 = 6;
pub const IDE_KEY_RIGHT: u32 = 7;
pub const IDE_KEY_UP: u32 = 8;
pub const IDE_KEY_DOWN: u32 = 9;
pub const IDE_KEY_PAGE_UP: u32 = 10;
pub const IDE_KEY_PAGE_DOWN: u32 = 11;
pub const IDE_KEY_HOME: u32 = 12;
pub const IDE_KEY_END: u32 = 13;
/// `argument` carries the function key number (1-12).
pub const IDE_KEY_FUNCTION: u32 = 14;

/// Host callbacks. Any entry may be null. Strings passed to callbacks are
/// only valid for the duration of the call.
#[repr(C)]
pub struct IdeTerminalCallbacks {
    pub user_data: *mut c_void,
    /// Receives the screen snapshot as JSON.
    pub on_screen_updated: Option<extern "C" fn(user_data: *mut c_void, snapshot_json: *const c_char)>,
    pub on_cursor_updated: Option<extern "C" fn(user_data: *mut c_void, row: u32, column: u32)>,
    /// `exit_status` is -1 when it could not be determined.
    pub on_terminated: Option<extern "C" fn(user_data: *mut c_void, exit_status: i32)>,
}

struct FfiObserver {
    user_data: *mut c_void,
    on_screen_updated: Option<extern "C" fn(*mut c_void, *const c_char)>,
    on_cursor_updated: Option<extern "C" fn(*mut c_void, u32, u32)>,
    on_terminated: Option<extern "C" fn(*mut c_void, i32)>,
}

// Safety: the host guarantees user_data may be used from any thread.
unsafe impl Send for FfiObserver {}
unsafe impl Sync for FfiObserver {}

impl FfiObserver {
    fn from_callbacks(callbacks: *const IdeTerminalCallbacks) -> Self {
        match unsafe { callbacks.as_ref() } {
            Some(cb) => Self {
                user_data: cb.user_data,
                on_screen_updated: cb.on_screen_updated,
                on_cursor_updated: cb.on_cursor_updated,
                on_terminated: cb.on_terminated,
            },
            None => Self {
                user_data: std::ptr::null_mut(),
                on_screen_updated: None,
                on_cursor_updated: None,
                on_terminated: None,
            },
        }
    }
}

impl TerminalObserver for FfiObserver {
    fn screen_updated(&self, snapshot: &ScreenSnapshot) {
        let Some(callback) = self.on_screen_updated else {
            return;
        };
        match serde_json::to_string(snapshot).map(CString::new) {
            Ok(Ok(json)) => callback(self.user_data, json.as_ptr()),
            Ok(Err(e)) => log::error!("Snapshot contains NUL: {}", e),
            Err(e) => log::error!("Failed to serialize snapshot: {}", e),
        }
    }

    fn cursor_updated(&self, row: usize, column: usize) {
        if let Some(callback) = self.on_cursor_updated {
            callback(self.user_data, row as u32, column as u32);
        }
    }

    fn process_terminated(&self, exit_status: Option<i32>) {
        if let Some(callback) = self.on_terminated {
            callback(self.user_data, exit_status.unwrap_or(-1));
        }
    }
}

/// Reads an optional UTF-8 C string argument.
fn optional_str<'a>(ptr: *const c_char) -> Result<Option<&'a str>, TerminalError> {
    if ptr.is_null() {
        return Ok(None);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map(Some)
        .map_err(|e| TerminalError::InvalidData(e.to_string()))
}

fn start_session(config: TerminalConfig, callbacks: *const IdeTerminalCallbacks) -> IdeTerminalHandle {
    let observer = Arc::new(FfiObserver::from_callbacks(callbacks));
    let session = TerminalSession::with_capabilities(config, observer, default_logger());
    match session.start() {
        Ok(()) => Box::into_raw(Box::new(session)),
        Err(e) => {
            log::error!("Failed to create terminal: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Create and start a terminal session.
/// `shell` may be null to use the user's default shell.
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn ide_terminal_create(
    rows: u16,
    cols: u16,
    shell: *const c_char,
    callbacks: *const IdeTerminalCallbacks,
) -> IdeTerminalHandle {
    let shell = match optional_str(shell) {
        Ok(shell) => shell.map(PathBuf::from),
        Err(e) => {
            log::error!("Invalid shell path: {}", e);
            return std::ptr::null_mut();
        }
    };

    let config = TerminalConfig {
        rows,
        columns: cols,
        shell,
        ..TerminalConfig::default()
    }
    .normalized();
    start_session(config, callbacks)
}

/// Create and start a terminal session from a JSON `TerminalConfig`.
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn ide_terminal_create_with_config(
    config_json: *const c_char,
    callbacks: *const IdeTerminalCallbacks,
) -> IdeTerminalHandle {
    let json = match optional_str(config_json) {
        Ok(json) => json.unwrap_or("{}"),
        Err(e) => {
            log::error!("Invalid terminal config: {}", e);
            return std::ptr::null_mut();
        }
    };

    match TerminalConfig::from_json(json) {
        Ok(config) => start_session(config, callbacks),
        Err(e) => {
            log::error!("Failed to parse terminal config: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Destroy a terminal session, terminating its shell.
#[no_mangle]
pub extern "C" fn ide_terminal_destroy(handle: IdeTerminalHandle) {
    if !handle.is_null() {
        unsafe {
            drop(Box::from_raw(handle));
        }
    }
}

/// Write user input to the terminal.
/// Returns 0 on success, -1 on failure.
#[no_mangle]
pub extern "C" fn ide_terminal_write(handle: IdeTerminalHandle, data: *const u8, len: usize) -> i32 {
    if handle.is_null() || data.is_null() {
        return -1;
    }

    let session = unsafe { &*handle };
    let bytes = unsafe { std::slice::from_raw_parts(data, len) };

    match session.write(bytes) {
        Ok(()) => 0,
        Err(e) => {
            log::warn!("Terminal write failed: {}", e);
            -1
        }
    }
}

/// Resize the terminal.
/// Returns 0 on success, -1 on failure (the previous size stays in effect).
#[no_mangle]
pub extern "C" fn ide_terminal_resize(handle: IdeTerminalHandle, rows: u16, cols: u16) -> i32 {
    if handle.is_null() {
        return -1;
    }

    let session = unsafe { &*handle };
    match session.resize(rows, cols) {
        Ok(()) => 0,
        Err(e) => {
            log::warn!("Terminal resize failed: {}", e);
            -1
        }
    }
}

fn key_from_code(code: u32, argument: u32) -> Option<Key> {
    let key = match code {
        IDE_KEY_CHARACTER => Key::Char(char::from_u32(argument)?),
        IDE_KEY_ENTER => Key::Enter,
        IDE_KEY_TAB => Key::Tab,
        IDE_KEY_BACKSPACE => Key::Backspace,
        IDE_KEY_ESCAPE => Key::Escape,
        IDE_KEY_DELETE => Key::Delete,
        IDE_KEY_LEFT => Key::Left,
        IDE_KEY_RIGHT => Key::Right,
        IDE_KEY_UP => Key::Up,
        IDE_KEY_DOWN => Key::Down,
        IDE_KEY_PAGE_UP => Key::PageUp,
        IDE_KEY_PAGE_DOWN => Key::PageDown,
        IDE_KEY_HOME => Key::Home,
        IDE_KEY_END => Key::End,
        IDE_KEY_FUNCTION => Key::Function(u8::try_from(argument).ok()?),
        _ => return None,
    };
    Some(key)
}

/// Send a key event. `modifiers` bits: 1 = shift, 2 = control, 4 = option.
/// Returns 1 if handled, 0 if the host should apply its default behavior,
/// -1 on failure.
#[no_mangle]
pub extern "C" fn ide_terminal_send_key(
    handle: IdeTerminalHandle,
    key_code: u32,
    argument: u32,
    modifiers: u32,
) -> i32 {
    if handle.is_null() {
        return -1;
    }
    let Some(key) = key_from_code(key_code, argument) else {
        return 0;
    };

    let session = unsafe { &*handle };
    match session.send_key(key, Modifiers::from_bits(modifiers)) {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(e) => {
            log::warn!("Key delivery failed: {}", e);
            -1
        }
    }
}

/// Deliver a POSIX signal to the shell.
/// Returns 0 on success, -1 on failure.
#[no_mangle]
pub extern "C" fn ide_terminal_send_signal(handle: IdeTerminalHandle, signal: i32) -> i32 {
    if handle.is_null() {
        return -1;
    }

    let session = unsafe { &*handle };
    match session.send_signal(signal) {
        Ok(()) => 0,
        Err(e) => {
            log::warn!("Signal delivery failed: {}", e);
            -1
        }
    }
}

/// Clear the visible screen.
/// Returns 0 on success, -1 on failure.
#[no_mangle]
pub extern "C" fn ide_terminal_clear(handle: IdeTerminalHandle) -> i32 {
    if handle.is_null() {
        return -1;
    }

    let session = unsafe { &*handle };
    match session.clear() {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// Current screen contents and cursor as JSON.
/// Caller must free with ide_string_free.
#[no_mangle]
pub extern "C" fn ide_terminal_snapshot(handle: IdeTerminalHandle) -> *mut c_char {
    if handle.is_null() {
        return std::ptr::null_mut();
    }

    let session = unsafe { &*handle };
    let Some(snapshot) = session.snapshot() else {
        return std::ptr::null_mut();
    };

    match serde_json::to_string(&snapshot) {
        Ok(json) => CString::new(json).unwrap_or_default().into_raw(),
        Err(e) => {
            log::error!("Failed to serialize snapshot: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Session state: 0 uninitialized, 1 initializing, 2 ready, 3 terminated,
/// -1 on invalid handle.
#[no_mangle]
pub extern "C" fn ide_terminal_state(handle: IdeTerminalHandle) -> i32 {
    if handle.is_null() {
        return -1;
    }
    let session = unsafe { &*handle };
    state_code(session.state())
}

fn state_code(state: SessionState) -> i32 {
    match state {
        SessionState::Uninitialized => 0,
        SessionState::Initializing => 1,
        SessionState::Ready => 2,
        SessionState::Terminated => 3,
    }
}

/// Get the shell's process id, or -1.
#[no_mangle]
pub extern "C" fn ide_terminal_pid(handle: IdeTerminalHandle) -> i32 {
    if handle.is_null() {
        return -1;
    }
    let session = unsafe { &*handle };
    session.child_pid().unwrap_or(-1)
}

// ═══════════════════════════════════════════════════════════
// Utility FFI
// ═══════════════════════════════════════════════════════════

/// Free a string allocated by Rust.
#[no_mangle]
pub extern "C" fn ide_string_free(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}

/// Initialize the Rust logger.
#[no_mangle]
pub extern "C" fn ide_terminal_init() {
    let _ = env_logger::try_init();
    log::info!("IDE terminal core initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_handles_are_rejected() {
        let null: IdeTerminalHandle = std::ptr::null_mut();
        assert_eq!(ide_terminal_write(null, b"x".as_ptr(), 1), -1);
        assert_eq!(ide_terminal_resize(null, 10, 10), -1);
        assert_eq!(ide_terminal_send_key(null, IDE_KEY_ENTER, 0, 0), -1);
        assert_eq!(ide_terminal_send_signal(null, libc::SIGINT), -1);
        assert_eq!(ide_terminal_clear(null), -1);
        assert_eq!(ide_terminal_state(null), -1);
        assert_eq!(ide_terminal_pid(null), -1);
        assert!(ide_terminal_snapshot(null).is_null());
        ide_terminal_destroy(null);
        ide_string_free(std::ptr::null_mut());
    }

    #[test]
    fn test_key_codes() {
        assert_eq!(key_from_code(IDE_KEY_CHARACTER, 'q' as u32), Some(Key::Char('q')));
        assert_eq!(key_from_code(IDE_KEY_CHARACTER, 0xD800), None);
        assert_eq!(key_from_code(IDE_KEY_LEFT, 0), Some(Key::Left));
        assert_eq!(key_from_code(IDE_KEY_FUNCTION, 5), Some(Key::Function(5)));
        assert_eq!(key_from_code(IDE_KEY_FUNCTION, 300), None);
        assert_eq!(key_from_code(99, 0), None);
    }

    #[test]
    fn test_invalid_utf8_argument() {
        let bytes = [0xffu8, 0x00];
        let err = optional_str(bytes.as_ptr() as *const c_char).unwrap_err();
        assert!(matches!(err, TerminalError::InvalidData(_)));
        assert_eq!(optional_str(std::ptr::null()).unwrap(), None);
    }

    #[test]
    fn test_create_with_missing_shell_fails() {
        let shell = CString::new("/no/such/shell").unwrap();
        let handle = ide_terminal_create(24, 80, shell.as_ptr(), std::ptr::null());
        assert!(handle.is_null());
    }

    #[test]
    fn test_create_with_bad_config_fails() {
        let json = CString::new("{\"rows\": \"many\"}").unwrap();
        assert!(ide_terminal_create_with_config(json.as_ptr(), std::ptr::null()).is_null());
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(state_code(SessionState::Uninitialized), 0);
        assert_eq!(state_code(SessionState::Ready), 2);
        assert_eq!(state_code(SessionState::Terminated), 3);
    }

    #[test]
    fn test_session_round_trip_through_ffi() {
        let shell = CString::new("/bin/sh").unwrap();
        let handle = ide_terminal_create(12, 40, shell.as_ptr(), std::ptr::null());
        assert!(!handle.is_null());
        assert_eq!(ide_terminal_state(handle), 2);
        assert!(ide_terminal_pid(handle) > 0);

        assert_eq!(ide_terminal_resize(handle, 15, 50), 0);
        let json = ide_terminal_snapshot(handle);
        assert!(!json.is_null());
        let value: serde_json::Value =
            serde_json::from_str(unsafe { CStr::from_ptr(json) }.to_str().unwrap()).unwrap();
        assert_eq!(value["rows"].as_array().unwrap().len(), 15);
        assert_eq!(value["rows"][0].as_array().unwrap().len(), 50);
        ide_string_free(json);

        assert_eq!(ide_terminal_send_key(handle, IDE_KEY_FUNCTION, 99, 0), 0);
        ide_terminal_destroy(handle);
    }
}
