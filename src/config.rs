use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::reader::DEFAULT_MAX_DEPTH;

/// Name of the receipt cache directory under the shared container.
pub const CACHE_DIR_NAME: &str = "com.batch.displayreceipts";
/// Most cached receipts picked up by one batch.
pub const DEFAULT_MAX_FILES: usize = 5;
/// Cached receipts older than this are discarded (30 days).
pub const DEFAULT_MAX_AGE_SECS: u64 = 30 * 24 * 60 * 60;

pub const ENV_CACHE_DIR: &str = "RECEIPTPACK_CACHE_DIR";
pub const ENV_MAX_FILES: &str = "RECEIPTPACK_MAX_FILES";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse {path}: {source}")]
    Parse { path: PathBuf, source: toml::de::Error },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub cache:  CacheConfig,
    pub decode: DecodeConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub dir:          PathBuf,
    pub max_files:    usize,
    pub max_age_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir:          std::env::temp_dir().join(CACHE_DIR_NAME),
            max_files:    DEFAULT_MAX_FILES,
            max_age_secs: DEFAULT_MAX_AGE_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub max_depth: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self { max_depth: DEFAULT_MAX_DEPTH }
    }
}

impl Config {
    pub fn from_toml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Load `path` if given and present, else defaults; then apply environment
/// overrides.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(path) if path.exists() => {
            let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            Config::from_toml(&contents, path)?
        }
        Some(path) => {
            tracing::debug!("config {} not found, using defaults", path.display());
            Config::default()
        }
        None => Config::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

pub fn apply_env_overrides(config: &mut Config) {
    if let Ok(raw) = std::env::var(ENV_CACHE_DIR) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            config.cache.dir = PathBuf::from(trimmed);
        }
    }

    if let Ok(raw) = std::env::var(ENV_MAX_FILES) {
        let trimmed = raw.trim();
        if !trimmed.is_empty() {
            match trimmed.parse::<usize>() {
                Ok(value) => config.cache.max_files = value,
                Err(err) => {
                    tracing::warn!("invalid {ENV_MAX_FILES}, ignoring: {err}");
                }
            }
        }
    }
}
