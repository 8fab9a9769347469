use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the terminal subsystem.
///
/// Process termination is not represented here: end-of-file on the PTY
/// is a lifecycle transition reported through the observer.
#[derive(Error, Debug)]
pub enum TerminalError {
    #[error("failed to create pseudo-terminal (errno {0})")]
    PtyCreationFailed(i32),

    #[error("terminal is not initialized")]
    NotInitialized,

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("failed to resize pseudo-terminal (errno {0})")]
    ResizeFailed(i32),

    #[error("shell not found: {}", .0.display())]
    ShellNotFound(PathBuf),

    #[error("terminal is already initialized")]
    AlreadyInitialized,

    #[error("terminal process has terminated")]
    Terminated,

    #[error("failed to write to pseudo-terminal: {0}")]
    WriteFailed(#[source] std::io::Error),

    #[error("failed to deliver signal {signal} (errno {errno})")]
    SignalFailed { signal: i32, errno: i32 },
}

impl TerminalError {
    /// Returns the OS error number carried by this error, if any.
    pub fn errno(&self) -> Option<i32> {
        match self {
            TerminalError::PtyCreationFailed(errno) | TerminalError::ResizeFailed(errno) => {
                Some(*errno)
            }
            TerminalError::SignalFailed { errno, .. } => Some(*errno),
            TerminalError::WriteFailed(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// Whether the session is still usable after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            TerminalError::PtyCreationFailed(_)
                | TerminalError::ShellNotFound(_)
                | TerminalError::Terminated
        )
    }
}

/// Last OS error number, for wrapping libc failures.
pub(crate) fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}
