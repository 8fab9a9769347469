//! Embedded terminal: PTY-backed shell, VT100 emulation and key encoding.
//!
//! ```text
//! TerminalSession
//! ├── PtySession (login shell on a pseudo-terminal)
//! └── VtEmulator
//!     ├── ScreenBuffer (cell grid, cursor, scrollback)
//!     └── EscapeInterpreter (escape-sequence state machine)
//! ```

pub mod emulator;
pub mod error;
pub mod input;
pub mod pty;
pub mod screen;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::Level;
use serde::Serialize;

use crate::config::TerminalConfig;
use crate::logging::{default_logger, SessionLogger};
use crate::runtime::io_handle;
use crate::terminal::emulator::{Changes, VtEmulator};
use crate::terminal::input::{encode_key, Key, KeyAction, Modifiers};
use crate::terminal::pty::{resolve_shell, PtyEvent, PtySession};
use crate::terminal::screen::{ScreenSnapshot, TerminalCell};

pub use error::TerminalError;

pub type Result<T> = std::result::Result<T, TerminalError>;

/// How long to wait for the child to become reapable after EOF.
const EXIT_REAP_TIMEOUT: Duration = Duration::from_millis(100);

/// Lifecycle of a session. Only `Ready` accepts input.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    Initializing,
    Ready,
    Terminated,
}

/// Consumer of session events, typically the renderer.
///
/// Callbacks run on the PTY I/O context, never with session locks held.
pub trait TerminalObserver: Send + Sync {
    /// After every batch of output that changed the screen or cursor, and
    /// after resize or clear.
    fn screen_updated(&self, snapshot: &ScreenSnapshot);

    fn cursor_updated(&self, _row: usize, _column: usize) {}

    /// Fired once when the child process goes away.
    fn process_terminated(&self, _exit_status: Option<i32>) {}
}

struct NoopObserver;

impl TerminalObserver for NoopObserver {
    fn screen_updated(&self, _snapshot: &ScreenSnapshot) {}
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct SessionInner {
    config: TerminalConfig,
    state: Mutex<SessionState>,
    emulator: Mutex<Option<VtEmulator>>,
    pty: Mutex<Option<PtySession>>,
    observer: Arc<dyn TerminalObserver>,
    logger: Arc<dyn SessionLogger>,
}

impl SessionInner {
    fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    fn set_state(&self, state: SessionState) {
        *lock(&self.state) = state;
    }

    /// Returns true only for the call that actually made the transition.
    fn mark_terminated(&self) -> bool {
        let mut state = lock(&self.state);
        if *state == SessionState::Terminated {
            return false;
        }
        *state = SessionState::Terminated;
        true
    }

    fn require_ready(&self) -> Result<()> {
        match self.state() {
            SessionState::Ready => Ok(()),
            SessionState::Terminated => Err(TerminalError::Terminated),
            SessionState::Uninitialized | SessionState::Initializing => Err(TerminalError::NotInitialized),
        }
    }

    fn handle_pty_event(&self, event: PtyEvent) {
        match event {
            PtyEvent::Data(bytes) => self.handle_output(&bytes),
            PtyEvent::Terminated => {
                let exit_status = lock(&self.pty)
                    .as_mut()
                    .and_then(|pty| pty.wait_for_exit(EXIT_REAP_TIMEOUT));
                if self.mark_terminated() {
                    self.logger.log(
                        Level::Info,
                        format_args!("shell exited with status {:?}", exit_status),
                    );
                    self.observer.process_terminated(exit_status);
                }
            }
        }
    }

    fn handle_output(&self, bytes: &[u8]) {
        let (changes, snapshot, replies) = {
            let mut guard = lock(&self.emulator);
            let Some(emulator) = guard.as_mut() else {
                return;
            };
            let changes = emulator.process(bytes);
            let snapshot = (!changes.is_empty()).then(|| emulator.snapshot());
            (changes, snapshot, emulator.take_replies())
        };

        // Best effort: this runs on the I/O runtime and must not block.
        if !replies.is_empty() {
            match lock(&self.pty).as_ref() {
                Some(pty) => {
                    if let Err(e) = pty.try_write(&replies) {
                        self.logger.log(Level::Warn, format_args!("failed to answer status query: {}", e));
                    }
                }
                None => self.logger.log(Level::Debug, format_args!("dropping status reply, pty not attached")),
            }
        }

        if let Some(snapshot) = snapshot {
            self.notify(changes, &snapshot);
        }
    }

    fn notify(&self, changes: Changes, snapshot: &ScreenSnapshot) {
        if changes.cursor {
            self.observer.cursor_updated(snapshot.cursor_row, snapshot.cursor_column);
        }
        self.observer.screen_updated(snapshot);
    }

    /// Prompt nudge: some shells hold their first prompt until input arrives.
    fn nudge_prompt(&self) {
        if self.state() != SessionState::Ready {
            return;
        }
        if let Some(pty) = lock(&self.pty).as_ref() {
            if let Err(e) = pty.write(b"\r") {
                self.logger.log(Level::Debug, format_args!("prompt nudge failed: {}", e));
            }
        }
    }
}

/// One shell on one PTY, with the screen it draws into.
pub struct TerminalSession {
    inner: Arc<SessionInner>,
}

impl TerminalSession {
    pub fn new(config: TerminalConfig) -> Self {
        Self::with_capabilities(config, Arc::new(NoopObserver), default_logger())
    }

    pub fn with_capabilities(
        config: TerminalConfig,
        observer: Arc<dyn TerminalObserver>,
        logger: Arc<dyn SessionLogger>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                config: config.normalized(),
                state: Mutex::new(SessionState::Uninitialized),
                emulator: Mutex::new(None),
                pty: Mutex::new(None),
                observer,
                logger,
            }),
        }
    }

    pub fn config(&self) -> &TerminalConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    /// Initializes with the configured size and shell.
    pub fn start(&self) -> Result<()> {
        let config = &self.inner.config;
        self.initialize(config.rows, config.columns, config.shell.as_deref())
    }

    /// Builds the screen first so early shell output is never lost, then
    /// spawns the shell. Any failure leaves the session `Terminated` with
    /// nothing attached.
    pub fn initialize(&self, rows: u16, columns: u16, shell: Option<&Path>) -> Result<()> {
        {
            let mut state = lock(&self.inner.state);
            match *state {
                SessionState::Uninitialized => *state = SessionState::Initializing,
                SessionState::Terminated => return Err(TerminalError::Terminated),
                _ => return Err(TerminalError::AlreadyInitialized),
            }
        }

        match self.wire(rows.max(1), columns.max(1), shell) {
            Ok(()) => {
                let mut state = lock(&self.inner.state);
                // The shell may already have exited during wiring.
                if *state == SessionState::Initializing {
                    *state = SessionState::Ready;
                }
                drop(state);
                self.schedule_prompt_nudge();
                Ok(())
            }
            Err(e) => {
                self.inner.logger.log(Level::Error, format_args!("terminal initialization failed: {}", e));
                lock(&self.inner.pty).take();
                *lock(&self.inner.emulator) = None;
                self.inner.set_state(SessionState::Terminated);
                Err(e)
            }
        }
    }

    fn wire(&self, rows: u16, columns: u16, shell: Option<&Path>) -> Result<()> {
        let config = &self.inner.config;
        let shell = resolve_shell(shell.or(config.shell.as_deref()));
        if !shell.is_file() {
            return Err(TerminalError::ShellNotFound(shell));
        }

        *lock(&self.inner.emulator) = Some(VtEmulator::new(
            rows as usize,
            columns as usize,
            config.scrollback_limit,
            self.inner.logger.clone(),
        ));

        // Held until wiring is done, so early termination sees the child.
        let mut pty_guard = lock(&self.inner.pty);
        let pty = pty_guard.insert(PtySession::new(
            rows,
            columns,
            config.term.clone(),
            self.inner.logger.clone(),
        ));
        let weak: Weak<SessionInner> = Arc::downgrade(&self.inner);
        pty.initialize(
            Some(&shell),
            Box::new(move |event| {
                if let Some(inner) = weak.upgrade() {
                    inner.handle_pty_event(event);
                }
            }),
            &io_handle(),
        )?;

        if let Err(e) = pty.resize(rows, columns) {
            self.inner.logger.log(Level::Warn, format_args!("initial resize failed: {}", e));
        }
        Ok(())
    }

    fn schedule_prompt_nudge(&self) {
        let delay = self.inner.config.prompt_nudge_delay();
        if delay.is_zero() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        io_handle().spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.nudge_prompt();
            }
        });
    }

    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        self.inner.require_ready()?;
        let pty = lock(&self.inner.pty);
        pty.as_ref().ok_or(TerminalError::NotInitialized)?.write(bytes)
    }

    pub fn write_str(&self, text: &str) -> Result<()> {
        self.write(text.as_bytes())
    }

    /// Encodes and delivers a key. `Ok(false)` means the key is not
    /// handled and the UI may apply its default behavior.
    pub fn send_key(&self, key: Key, modifiers: Modifiers) -> Result<bool> {
        match encode_key(key, modifiers) {
            Some(KeyAction::Bytes(bytes)) => self.write(&bytes).map(|_| true),
            Some(KeyAction::Signal(signal)) => self.send_signal(signal).map(|_| true),
            None => Ok(false),
        }
    }

    pub fn send_signal(&self, signal: libc::c_int) -> Result<()> {
        self.inner.require_ready()?;
        let pty = lock(&self.inner.pty);
        pty.as_ref().ok_or(TerminalError::NotInitialized)?.send_signal(signal)
    }

    /// Resizes the screen, then the PTY. TIOCSWINSZ itself raises SIGWINCH,
    /// so the screen must already have the new size and stay locked until
    /// the ioctl returns; the child's redraw then parses against it. On
    /// ioctl failure the previous screen is put back.
    pub fn resize(&self, rows: u16, columns: u16) -> Result<()> {
        self.inner.require_ready()?;
        let (rows, columns) = (rows.max(1), columns.max(1));

        let mut pty_guard = lock(&self.inner.pty);
        let pty = pty_guard.as_mut().ok_or(TerminalError::NotInitialized)?;

        let snapshot = {
            let mut emulator = lock(&self.inner.emulator);
            let emulator = emulator.as_mut().ok_or(TerminalError::NotInitialized)?;
            let previous = emulator.screen().clone();
            emulator.resize(rows as usize, columns as usize);
            if let Err(e) = pty.apply_window_size(rows, columns) {
                emulator.restore_screen(previous);
                self.inner.logger.log(Level::Warn, format_args!("resize to {}x{} failed: {}", rows, columns, e));
                return Err(e);
            }
            emulator.snapshot()
        };
        // Reaches children that left the terminal's foreground group.
        pty.signal_window_change();
        drop(pty_guard);

        self.inner.notify(Changes { screen: true, cursor: true }, &snapshot);
        Ok(())
    }

    /// Clears the visible screen (scrollback is kept).
    pub fn clear(&self) -> Result<()> {
        let snapshot = {
            let mut emulator = lock(&self.inner.emulator);
            let emulator = emulator.as_mut().ok_or(TerminalError::NotInitialized)?;
            emulator.screen_mut().clear_screen();
            emulator.snapshot()
        };
        self.inner.notify(Changes { screen: true, cursor: true }, &snapshot);
        Ok(())
    }

    /// Consistent copy of the grid and cursor.
    pub fn snapshot(&self) -> Option<ScreenSnapshot> {
        lock(&self.inner.emulator).as_ref().map(VtEmulator::snapshot)
    }

    /// Rows evicted off the top, oldest first.
    pub fn scrollback(&self) -> Vec<Vec<TerminalCell>> {
        lock(&self.inner.emulator)
            .as_ref()
            .map(|e| e.screen().scrollback().iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn child_pid(&self) -> Option<libc::pid_t> {
        lock(&self.inner.pty).as_ref().and_then(PtySession::child_pid)
    }

    /// Tears down the PTY and child. Idempotent.
    pub fn close(&self) {
        self.inner.mark_terminated();
        let pty = lock(&self.inner.pty).take();
        if let Some(mut pty) = pty {
            pty.teardown();
        }
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        self.close();
    }
}
