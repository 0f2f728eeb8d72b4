use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{BuildError, Result};
use crate::identity::IdentityMapping;

/// Default prefix for remote download staging directories
pub const DEFAULT_DOWNLOAD_PREFIX: &str = "a3s-remote";

/// Configuration for COPY/ADD source resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CopyConfig {
    /// Parent directory for remote download staging (defaults to the system temp dir)
    pub download_dir: Option<PathBuf>,

    /// Prefix of each download staging directory
    pub download_prefix: String,

    /// User-Agent sent with remote source requests
    pub user_agent: String,

    /// Skip extended attributes that cannot be applied while extracting archives
    pub best_effort_xattrs: bool,

    /// Container to host uid/gid translation
    pub id_mapping: IdentityMapping,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            download_dir: None,
            download_prefix: DEFAULT_DOWNLOAD_PREFIX.to_string(),
            user_agent: format!("a3s-build/{}", crate::VERSION),
            best_effort_xattrs: true,
            id_mapping: IdentityMapping::default(),
            log_level: LogLevel::Info,
        }
    }
}

impl CopyConfig {
    /// Parse a configuration from YAML text.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BuildError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    fn validate(&self) -> Result<()> {
        if self.download_prefix.is_empty() || self.download_prefix.contains('/') {
            return Err(BuildError::Config(format!(
                "download_prefix must be a non-empty file name, got '{}'",
                self.download_prefix
            )));
        }
        Ok(())
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}
