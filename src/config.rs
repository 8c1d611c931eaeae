//! TOML-based configuration.
//!
//! Settings are loaded explicitly and passed to components at
//! construction. Nothing in the core reads environment variables or any
//! other process-wide state.
//!
//! Example configuration:
//! ```toml
//! [engine]
//! memory_limit_mb = 2048
//! exception_sample_limit = 100
//!
//! [ledger]
//! path = "data/audit.db"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::engine::EngineConfig;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub engine: EngineSettings,
    pub ledger: LedgerSettings,
}

/// Execution engine settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Memory ceiling per analytical session, in megabytes.
    pub memory_limit_mb: Option<u64>,
    /// Exception rows retained on each report.
    pub exception_sample_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            memory_limit_mb: None,
            exception_sample_limit: 100,
        }
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        EngineConfig {
            memory_limit_mb: settings.memory_limit_mb,
            exception_sample_limit: settings.exception_sample_limit,
        }
    }
}

/// Audit ledger settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Path to the SQLite ledger file.
    pub path: PathBuf,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/audit.db"),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse settings from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }
}
