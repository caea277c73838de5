//! Configuration for refbib-core
//!
//! Centralized configuration for bibliography sources, the remote
//! reference manager, citation style and locale, and cache behavior.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Style fetched when nothing else is configured.
pub const DEFAULT_STYLE_URL: &str =
    "https://raw.githubusercontent.com/citation-style-language/styles/master/apa.csl";

/// Locale used when nothing else is configured.
pub const DEFAULT_LOCALE: &str = "en-US";

/// Default port of the local reference-manager RPC endpoint.
pub const DEFAULT_REMOTE_PORT: u16 = 23119;

/// System-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ResolverConfig {
    /// Local bibliography sources
    pub sources: SourceConfig,
    /// Remote reference-manager sync
    pub remote: RemoteConfig,
    /// Citation style and locale
    pub style: StyleConfig,
    /// Cache sizing and timing
    pub cache: CacheConfig,
}

/// Local bibliography source configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SourceConfig {
    /// Bibliography files loaded into the global record cache.
    pub bibliography_paths: Vec<PathBuf>,
    /// External converter binary for non-native formats.
    pub converter_path: Option<PathBuf>,
    /// Root that relative bibliography paths are retried against.
    pub project_root: Option<PathBuf>,
}

/// Remote reference-manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// When true, the global cache loads from the remote instead of the
    /// local bibliography files.
    pub enabled: bool,
    pub port: u16,
    /// Library groups pulled from the remote.
    pub groups: Vec<RemoteGroup>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: DEFAULT_REMOTE_PORT,
            groups: Vec::new(),
        }
    }
}

/// One remote library group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteGroup {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    /// Last successful sync, epoch milliseconds.
    #[serde(default)]
    pub last_sync: Option<i64>,
}

/// Citation style and locale configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleConfig {
    /// Style id or URL; falls back to [`DEFAULT_STYLE_URL`].
    pub style_url: Option<String>,
    /// Explicit on-disk style file; takes precedence over `style_url`.
    pub style_path: Option<PathBuf>,
    pub locale: String,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            style_url: None,
            style_path: None,
            locale: DEFAULT_LOCALE.to_string(),
        }
    }
}

/// Cache sizing and timing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory for content-hash artifacts, remote snapshots, and cached
    /// styles/locales.
    pub cache_dir: PathBuf,
    /// Capacity of the per-document snapshot cache.
    pub snapshot_capacity: usize,
    /// Window for collapsing rapid source-change events, milliseconds.
    pub debounce_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".refbib-cache"),
            snapshot_capacity: 10,
            debounce_ms: 500,
        }
    }
}

impl ResolverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON string
    pub fn from_json(json_str: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json_str)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// The style key the global engine binds to.
    pub fn style_key(&self) -> String {
        if let Some(path) = &self.style.style_path {
            return path.to_string_lossy().into_owned();
        }
        self.style
            .style_url
            .clone()
            .unwrap_or_else(|| DEFAULT_STYLE_URL.to_string())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.snapshot_capacity == 0 {
            return Err(ConfigError::OutOfRange(
                "snapshot_capacity must be positive".to_string(),
            ));
        }
        if self.remote.enabled && self.remote.groups.is_empty() {
            return Err(ConfigError::MissingField(
                "remote.groups must not be empty when remote sync is enabled".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration validation error
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("value out of range: {0}")]
    OutOfRange(String),
    #[error("missing field: {0}")]
    MissingField(String),
}
