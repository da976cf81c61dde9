//! Storage root discovery and on-disk layout
//!
//! ```text
//! <root>/
//! ├── catalog.json          # Persisted catalog index
//! ├── config.yaml           # Optional user configuration
//! ├── registry-cache.json   # Last fetched registry feed
//! └── distros/
//!     └── <name>.<ext>      # One artifact per template, ext from the source
//! ```
//!
//! Resolution order for `<root>`:
//!
//! 1. `DISTROCAT_HOME` (absolute paths only)
//! 2. Platform data directory (`directories::ProjectDirs`)
//! 3. `~/.distrocat` from the home directory
//! 4. `<system temp>/distrocat` when no home directory can be resolved
//!
//! The current working directory is never consulted.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{CatalogError, Result};

/// Environment variable overriding the storage root
pub const HOME_ENV_VAR: &str = "DISTROCAT_HOME";

/// Recognized archive extensions, longest match first
pub const ARCHIVE_EXTENSIONS: [&str; 7] = ["tar.gz", "tar.xz", "tar.zst", "tar.bz2", "tgz", "tar", "wsl"];

/// Used when the source names no recognized archive type
pub const DEFAULT_ARCHIVE_EXTENSION: &str = "tar.gz";

/// Suffix of in-progress staging files
pub const STAGING_SUFFIX: &str = ".partial";

const CATALOG_FILE: &str = "catalog.json";
const CONFIG_FILE: &str = "config.yaml";
const REGISTRY_CACHE_FILE: &str = "registry-cache.json";
const DISTROS_DIR: &str = "distros";

const MAX_NAME_LEN: usize = 64;

/// Resolved storage layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    /// Use an explicit storage root
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Discover the storage root from the environment and platform conventions
    pub fn discover() -> Self {
        Self::at(resolve_root())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_file(&self) -> PathBuf {
        self.root.join(CATALOG_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn registry_cache_file(&self) -> PathBuf {
        self.root.join(REGISTRY_CACHE_FILE)
    }

    pub fn artifact_dir(&self) -> PathBuf {
        self.root.join(DISTROS_DIR)
    }

    /// Artifact location for a template name and archive extension.
    ///
    /// The name must already have passed [`validate_name`].
    pub fn artifact_path(&self, name: &str, extension: &str) -> PathBuf {
        self.artifact_dir().join(format!("{name}.{extension}"))
    }

    /// Every location an artifact for `name` may occupy
    pub fn artifact_candidates(&self, name: &str) -> Vec<PathBuf> {
        ARCHIVE_EXTENSIONS
            .iter()
            .map(|extension| self.artifact_path(name, extension))
            .collect()
    }

    /// The first candidate that exists as a regular file
    pub fn find_artifact(&self, name: &str) -> Option<PathBuf> {
        self.artifact_candidates(name)
            .into_iter()
            .find(|path| path.is_file())
    }

    /// Create the root and artifact directories if missing
    pub fn ensure_dirs(&self) -> Result<()> {
        let dir = self.artifact_dir();
        std::fs::create_dir_all(&dir)
            .map_err(|e| CatalogError::io("", &dir, "Failed to create storage directory", e))
    }

    /// Delete staging files left behind by an interrupted process.
    ///
    /// Returns the number of files removed.
    pub fn sweep_staging_files(&self) -> usize {
        let dir = self.artifact_dir();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return 0;
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_staging = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.') && n.ends_with(STAGING_SUFFIX))
                .unwrap_or(false);

            if is_staging && path.is_file() {
                match std::fs::remove_file(&path) {
                    Ok(()) => {
                        warn!("Removed stale staging file: {}", path.display());
                        removed += 1;
                    }
                    Err(e) => warn!("Failed to remove stale staging file {}: {}", path.display(), e),
                }
            }
        }
        removed
    }
}

/// Check that a template name is usable as a catalog key and file name
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(CatalogError::InvalidName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return invalid("name is empty");
    }
    if name.len() > MAX_NAME_LEN {
        return invalid("name is longer than 64 characters");
    }
    if name.starts_with('.') {
        return invalid("name must not start with '.'");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return invalid("only ASCII letters, digits, '-', '_' and '.' are allowed");
    }
    Ok(())
}

/// Archive extension named by a URL or file name.
///
/// Query strings and fragments are ignored; unknown types fall back to
/// [`DEFAULT_ARCHIVE_EXTENSION`].
pub fn archive_extension(location: &str) -> &'static str {
    let end = location.find(['?', '#']).unwrap_or(location.len());
    let lowered = location[..end].to_ascii_lowercase();

    ARCHIVE_EXTENSIONS
        .iter()
        .copied()
        .find(|extension| {
            lowered
                .strip_suffix(extension)
                .is_some_and(|stem| stem.ends_with('.'))
        })
        .unwrap_or(DEFAULT_ARCHIVE_EXTENSION)
}

fn resolve_root() -> PathBuf {
    if let Some(value) = std::env::var_os(HOME_ENV_VAR) {
        let path = PathBuf::from(value);
        if path.is_absolute() {
            debug!("Using {} override: {}", HOME_ENV_VAR, path.display());
            return path;
        }
        warn!(
            "Ignoring {} because it is not an absolute path: {}",
            HOME_ENV_VAR,
            path.display()
        );
    }

    if let Some(dirs) = directories::ProjectDirs::from("dev", "distrocat", "distrocat") {
        return dirs.data_dir().to_path_buf();
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".distrocat");
    }

    let fallback = std::env::temp_dir().join("distrocat");
    warn!(
        "Could not determine a home directory, storing templates in {}",
        fallback.display()
    );
    fallback
}
