//! Pipeline configuration, loadable from TOML.
//!
//! Every field has a default, so an empty file is a valid config. Credentials
//! are plain strings handed to the providers; nothing here stores or refreshes
//! them.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// FRED API key. Without it the FRED strategies are skipped.
    pub economic_data_credential: Option<String>,

    /// Alpha Vantage API key, used as the last market-benchmark source.
    pub secondary_credential: Option<String>,

    /// Total calls per source, including the first.
    pub max_attempts: u32,

    pub request_timeout_secs: u64,

    pub retry_delay_ms: u64,

    /// Response cache lifetime. `None` disables the cache.
    pub cache_ttl_secs: Option<u64>,

    /// Serve expired cache entries (with a warning) instead of refetching.
    pub serve_stale_cache: bool,

    /// Fetch batch identifiers on the rayon pool.
    pub parallel: bool,

    /// Read series from `{dir}/{ID}.csv` instead of Yahoo Finance.
    pub csv_dir: Option<PathBuf>,

    /// Identifiers sampled by the health check.
    pub probe_identifiers: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            economic_data_credential: None,
            secondary_credential: None,
            max_attempts: crate::fetch::DEFAULT_MAX_ATTEMPTS,
            request_timeout_secs: 30,
            retry_delay_ms: 0,
            cache_ttl_secs: None,
            serve_stale_cache: false,
            parallel: false,
            csv_dir: None,
            probe_identifiers: vec!["AAPL".into(), "MSFT".into(), "GOOGL".into()],
        }
    }
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "request_timeout_secs must be positive".into(),
            ));
        }
        if self.cache_ttl_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "cache_ttl_secs must be positive when set".into(),
            ));
        }
        if self.probe_identifiers.is_empty() {
            return Err(ConfigError::Invalid("probe_identifiers is empty".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_secs.map(Duration::from_secs)
    }

    /// Credential with blank strings treated as absent.
    pub fn economic_credential(&self) -> Option<&str> {
        non_blank(self.economic_data_credential.as_deref())
    }

    pub fn secondary_credential(&self) -> Option<&str> {
        non_blank(self.secondary_credential.as_deref())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
