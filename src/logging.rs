//! Logging capability handed to terminal sessions.
//!
//! Sessions never reach for a process-wide logger directly; they hold a
//! `SessionLogger` so hosts and tests can substitute their own sink.

use std::fmt;
use std::sync::Arc;

use log::Level;

pub const LOG_TARGET: &str = "ide_terminal";

/// Sink for terminal diagnostics.
pub trait SessionLogger: Send + Sync {
    fn log(&self, level: Level, message: fmt::Arguments<'_>);
}

/// Forwards to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacade;

impl SessionLogger for LogFacade {
    fn log(&self, level: Level, message: fmt::Arguments<'_>) {
        log::log!(target: LOG_TARGET, level, "{}", message);
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl SessionLogger for NullLogger {
    fn log(&self, _level: Level, _message: fmt::Arguments<'_>) {}
}

pub fn default_logger() -> Arc<dyn SessionLogger> {
    Arc::new(LogFacade)
}
