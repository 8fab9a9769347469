use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default number of evicted rows kept above the visible grid.
pub const DEFAULT_SCROLLBACK_LIMIT: usize = 1000;

/// Terminal session configuration, usually supplied by the host as JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub rows: u16,
    pub columns: u16,
    /// Explicit shell; falls back to `$SHELL`, then the passwd entry.
    pub shell: Option<PathBuf>,
    pub scrollback_limit: usize,
    /// Delay before the carriage return that forces the first prompt.
    pub prompt_nudge_delay_ms: u64,
    /// Value exported as `TERM` to the child.
    pub term: String,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            rows: 24,
            columns: 80,
            shell: None,
            scrollback_limit: DEFAULT_SCROLLBACK_LIMIT,
            prompt_nudge_delay_ms: 100,
            term: "xterm-256color".to_string(),
        }
    }
}

impl TerminalConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: TerminalConfig = serde_json::from_str(json)?;
        Ok(config.normalized())
    }

    /// Grid dimensions are never allowed to reach zero.
    pub fn normalized(mut self) -> Self {
        self.rows = self.rows.max(1);
        self.columns = self.columns.max(1);
        self
    }

    pub fn prompt_nudge_delay(&self) -> Duration {
        Duration::from_millis(self.prompt_nudge_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = TerminalConfig::from_json(r#"{"rows": 40, "shell": "/bin/bash"}"#).unwrap();
        assert_eq!(config.rows, 40);
        assert_eq!(config.columns, 80);
        assert_eq!(config.shell, Some(PathBuf::from("/bin/bash")));
        assert_eq!(config.scrollback_limit, DEFAULT_SCROLLBACK_LIMIT);
        assert_eq!(config.term, "xterm-256color");
    }

    #[test]
    fn test_zero_dimensions_normalized() {
        let config = TerminalConfig::from_json(r#"{"rows": 0, "columns": 0}"#).unwrap();
        assert_eq!((config.rows, config.columns), (1, 1));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(TerminalConfig::from_json("{rows: 3").is_err());
    }
}
