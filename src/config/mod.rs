//! Session spawn configuration
//!
//! Controls how shells are spawned: which shell binary, whether it runs as
//! a login shell, the default PTY size, and extra environment variables.
//! Loaded from a JSON file when present, otherwise defaults apply.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration applied to every session a registry spawns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Shell binary to spawn. `None` resolves `$SHELL`, then `/bin/sh`.
    #[serde(default)]
    pub shell: Option<String>,
    /// Start the shell as a login shell (`-l`).
    #[serde(default = "default_login_shell")]
    pub login_shell: bool,
    /// Default PTY rows.
    #[serde(default = "default_rows")]
    pub rows: u16,
    /// Default PTY columns.
    #[serde(default = "default_cols")]
    pub cols: u16,
    /// Extra environment variables for spawned shells.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_login_shell() -> bool {
    true
}

fn default_rows() -> u16 {
    24
}

fn default_cols() -> u16 {
    80
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: None,
            login_shell: default_login_shell(),
            rows: default_rows(),
            cols: default_cols(),
            env: HashMap::new(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from a JSON file. A missing file yields the
    /// defaults; an unreadable or malformed file is an error.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Set an explicit shell binary.
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = Some(shell.into());
        self
    }

    /// Set whether the shell runs as a login shell.
    pub fn with_login_shell(mut self, login_shell: bool) -> Self {
        self.login_shell = login_shell;
        self
    }

    /// Set the default PTY size.
    pub fn with_size(mut self, rows: u16, cols: u16) -> Self {
        self.rows = rows;
        self.cols = cols;
        self
    }

    /// Add an environment variable for spawned shells.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Resolve the shell to spawn: explicit path, then `$SHELL`, then
    /// `/bin/sh`.
    pub fn resolve_shell(&self) -> String {
        if let Some(ref shell) = self.shell {
            return shell.clone();
        }
        std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
    }
}
