//! Catalog configuration
//!
//! Loaded from `<root>/config.yaml` when present, otherwise built-in defaults.
//! Every field is optional in the file:
//!
//! ```yaml
//! download:
//!   timeout_secs: 1800
//!   max_redirects: 5
//!   progress_interval_ms: 100
//! registry:
//!   enabled: true
//!   feed_url: https://example.com/DistributionInfo.json
//!   sync_interval_secs: 3600
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::paths::StoragePaths;

/// Default registry feed (WSL distribution list)
pub const DEFAULT_FEED_URL: &str =
    "https://raw.githubusercontent.com/microsoft/WSL/master/distributions/DistributionInfo.json";

/// Top-level configuration
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    /// Storage layout
    pub paths: StoragePaths,

    /// File-backed settings
    pub settings: Settings,
}

/// Settings read from `config.yaml`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub download: DownloadSettings,

    #[serde(default)]
    pub registry: RegistrySettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Deadline for a whole download (connect, redirects and body).
    /// `null` disables the deadline.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: Option<u64>,

    /// Redirect hops followed before giving up
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,

    /// Minimum wall time between two progress reports
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_feed_url")]
    pub feed_url: String,

    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
}

fn default_timeout_secs() -> Option<u64> {
    Some(30 * 60)
}

fn default_max_redirects() -> usize {
    5
}

fn default_progress_interval_ms() -> u64 {
    100
}

fn default_user_agent() -> String {
    concat!("distrocat/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_true() -> bool {
    true
}

fn default_feed_url() -> String {
    DEFAULT_FEED_URL.to_string()
}

fn default_sync_interval_secs() -> u64 {
    60 * 60
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            max_redirects: default_max_redirects(),
            progress_interval_ms: default_progress_interval_ms(),
            user_agent: default_user_agent(),
        }
    }
}

impl DownloadSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            feed_url: default_feed_url(),
            sync_interval_secs: default_sync_interval_secs(),
        }
    }
}

impl RegistrySettings {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

impl Settings {
    /// Load settings from a file, or defaults if it does not exist
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }
}

impl CatalogConfig {
    /// Discover the storage root and load its `config.yaml`
    pub fn load() -> Result<Self> {
        Self::load_at(StoragePaths::discover())
    }

    /// Load configuration for an explicit storage layout
    pub fn load_at(paths: StoragePaths) -> Result<Self> {
        let settings = Settings::load_from_path(&paths.config_file())?;
        Ok(Self { paths, settings })
    }

    /// Default settings rooted at `root`, ignoring any config file
    pub fn with_root(root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            paths: StoragePaths::at(root),
            settings: Settings::default(),
        }
    }
}
