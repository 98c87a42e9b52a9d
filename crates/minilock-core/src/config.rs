use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MiniLockError, MiniLockResult};

/// Top-level client configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MiniLockConfig {
    pub log: LogConfig,
    pub identity: IdentityConfig,
    pub files: FilesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Email used as the scrypt salt when deriving the user's key pair
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Where encrypted files go (default: current directory)
    pub encrypted_dir: Option<PathBuf>,
    /// Where decrypted files go (default: current directory)
    pub decrypted_dir: Option<PathBuf>,
    /// Remove the source file after a successful encrypt/decrypt
    pub delete_source: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl MiniLockConfig {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> MiniLockResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| MiniLockError::Config(format!("parsing {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> MiniLockResult<()> {
        match self.log.format.as_str() {
            "json" | "text" => Ok(()),
            other => Err(MiniLockError::Config(format!(
                "unknown log format '{other}' (expected \"json\" or \"text\")"
            ))),
        }
    }
}
