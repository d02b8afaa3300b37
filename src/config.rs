// ABOUTME: Configuration loading and validation for the notecache binary.
// ABOUTME: Reads NOTECACHE_* environment variables and maps them onto the core CacheConfig.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notecache_core::config::CacheConfig;
use thiserror::Error;

/// Name of the render store that holds note excerpts.
pub const STORE_NAME: &str = "note-gallery-render-store";
pub const DEFAULT_SCHEMA_VERSION: u32 = 1;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a non-negative integer, got {value:?}")]
    InvalidNumber { var: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("no vault directory configured; set NOTECACHE_VAULT or pass --vault")]
    MissingVault,
}

/// Runtime configuration for the notecache binary.
#[derive(Debug, Clone)]
pub struct NotecacheConfig {
    pub home: PathBuf,
    pub vault: Option<PathBuf>,
    pub schema_version: u32,
    pub flush_period: Duration,
    pub notify_period: Duration,
}

impl NotecacheConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - NOTECACHE_HOME: data directory (default: ~/.notecache)
    /// - NOTECACHE_VAULT: markdown vault to index (required to run)
    /// - NOTECACHE_SCHEMA_VERSION: version of the cached value shape (default: 1)
    /// - NOTECACHE_FLUSH_MS: write-back debounce in milliseconds (default: 1000)
    /// - NOTECACHE_NOTIFY_MS: update notification debounce in milliseconds (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let home = get("NOTECACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                get("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".notecache")
            });

        let vault = get("NOTECACHE_VAULT").map(PathBuf::from);

        let schema_version = match get("NOTECACHE_SCHEMA_VERSION") {
            Some(v) => parse_number("NOTECACHE_SCHEMA_VERSION", &v)?,
            None => DEFAULT_SCHEMA_VERSION,
        };
        if schema_version == 0 {
            return Err(ConfigError::Zero("NOTECACHE_SCHEMA_VERSION"));
        }

        let flush_ms = match get("NOTECACHE_FLUSH_MS") {
            Some(v) => parse_number("NOTECACHE_FLUSH_MS", &v)?,
            None => 1000,
        };
        let notify_ms = match get("NOTECACHE_NOTIFY_MS") {
            Some(v) => parse_number("NOTECACHE_NOTIFY_MS", &v)?,
            None => 100,
        };

        Ok(Self {
            home,
            vault,
            schema_version,
            flush_period: Duration::from_millis(flush_ms.into()),
            notify_period: Duration::from_millis(notify_ms.into()),
        })
    }

    /// Configuration rooted at explicit directories, all else default.
    pub fn for_paths(home: impl Into<PathBuf>, vault: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            vault: Some(vault.into()),
            schema_version: DEFAULT_SCHEMA_VERSION,
            flush_period: Duration::from_millis(1000),
            notify_period: Duration::from_millis(100),
        }
    }

    pub fn vault(&self) -> Result<&Path, ConfigError> {
        self.vault.as_deref().ok_or(ConfigError::MissingVault)
    }

    /// The core cache configuration for the render store.
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new(STORE_NAME, self.schema_version)
            .with_title("Render Store")
            .with_description(
                "Stores the text and rendered HTML of each note for the note gallery",
            )
            .with_flush_period(self.flush_period)
            .with_notify_period(self.notify_period)
    }
}

fn parse_number(var: &'static str, value: &str) -> Result<u32, ConfigError> {
    value
        .trim()
        .parse::<u32>()
        .map_err(|_| ConfigError::InvalidNumber {
            var,
            value: value.to_string(),
        })
}
