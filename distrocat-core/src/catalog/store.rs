//! Catalog persistence (`catalog.json`)
//!
//! The store never fails a load: a missing, unreadable or malformed file
//! degrades to the built-in defaults and the recovery is logged. Saves are
//! atomic (temporary file in the same directory, then rename).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::TemplateDescriptor;
use crate::error::{CatalogError, Result};

/// Current catalog document version
pub const FORMAT_VERSION: u32 = 1;

/// Name used in I/O errors that concern the catalog file itself
const CATALOG_ERROR_NAME: &str = "catalog";

/// The persisted catalog document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Catalog {
    #[serde(default = "default_format_version")]
    pub format_version: u32,

    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,

    /// Ordered entries, unique by name once loaded
    #[serde(default)]
    pub distributions: Vec<TemplateDescriptor>,
}

fn default_format_version() -> u32 {
    FORMAT_VERSION
}

impl Catalog {
    pub fn new(distributions: Vec<TemplateDescriptor>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            last_updated: Utc::now(),
            distributions,
        }
    }

    pub fn get(&self, name: &str) -> Option<&TemplateDescriptor> {
        self.distributions.iter().find(|d| d.name == name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut TemplateDescriptor> {
        self.distributions.iter_mut().find(|d| d.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace the entry with the same name in place, or append it
    pub fn upsert(&mut self, descriptor: TemplateDescriptor) {
        match self.get_mut(&descriptor.name) {
            Some(existing) => *existing = descriptor,
            None => self.distributions.push(descriptor),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<TemplateDescriptor> {
        let position = self.distributions.iter().position(|d| d.name == name)?;
        Some(self.distributions.remove(position))
    }

    pub fn len(&self) -> usize {
        self.distributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distributions.is_empty()
    }
}

/// Result of reconciling persisted entries with the built-in defaults
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub entries: Vec<TemplateDescriptor>,
    /// Default names that were missing and have been re-inserted
    pub restored: Vec<String>,
    /// Names that appeared more than once in the persisted entries
    pub duplicates: Vec<String>,
}

/// Union of persisted entries and defaults, keyed by name.
///
/// Persisted entries keep their order and win on conflict (the first
/// occurrence of a repeated name is kept). Defaults only fill genuine gaps and
/// are appended in default order, marked unavailable. Applying the merge to
/// its own output changes nothing.
pub fn merge_defaults(
    persisted: Vec<TemplateDescriptor>,
    defaults: &[TemplateDescriptor],
) -> MergeOutcome {
    let mut seen = HashSet::new();
    let mut entries = Vec::with_capacity(persisted.len() + defaults.len());
    let mut duplicates = Vec::new();

    for descriptor in persisted {
        if seen.insert(descriptor.name.clone()) {
            entries.push(descriptor);
        } else {
            duplicates.push(descriptor.name);
        }
    }

    let mut restored = Vec::new();
    for default in defaults {
        if seen.insert(default.name.clone()) {
            let mut descriptor = default.clone();
            descriptor.clear_local();
            restored.push(descriptor.name.clone());
            entries.push(descriptor);
        }
    }

    MergeOutcome {
        entries,
        restored,
        duplicates,
    }
}

/// A loaded catalog and whether it differs from what is on disk
#[derive(Debug, Clone)]
pub struct LoadedCatalog {
    pub catalog: Catalog,
    /// True when the file was missing, unreadable, or the merge changed it
    pub needs_save: bool,
}

/// Reads and writes the catalog file
#[derive(Debug, Clone)]
pub struct CatalogStore {
    path: PathBuf,
}

impl CatalogStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the catalog and merge in the defaults. Never fails.
    pub fn load(&self, defaults: &[TemplateDescriptor]) -> LoadedCatalog {
        let (persisted, mut needs_save) = match self.read() {
            Ok(Some(catalog)) => {
                if catalog.format_version > FORMAT_VERSION {
                    warn!(
                        "Catalog {} has format version {} (supported: {}); reading known fields only",
                        self.path.display(),
                        catalog.format_version,
                        FORMAT_VERSION
                    );
                }
                (catalog.distributions, false)
            }
            Ok(None) => {
                info!(
                    "No catalog at {}, seeding from built-in defaults",
                    self.path.display()
                );
                (Vec::new(), true)
            }
            Err(e) => {
                warn!("{}; falling back to built-in defaults", e);
                self.quarantine();
                (Vec::new(), true)
            }
        };

        let outcome = merge_defaults(persisted, defaults);

        if !outcome.duplicates.is_empty() {
            warn!(
                "Dropped duplicate catalog entries (first occurrence kept): {:?}",
                outcome.duplicates
            );
            needs_save = true;
        }
        if !outcome.restored.is_empty() {
            warn!(
                "Restored {} built-in template(s) missing from the catalog: {:?}",
                outcome.restored.len(),
                outcome.restored
            );
            needs_save = true;
        }

        LoadedCatalog {
            catalog: Catalog::new(outcome.entries),
            needs_save,
        }
    }

    /// Read the raw file. `Ok(None)` if it does not exist.
    fn read(&self) -> std::result::Result<Option<Catalog>, CatalogError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(CatalogError::CorruptCatalog {
                    path: self.path.clone(),
                    message: format!("unreadable: {e}"),
                })
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CatalogError::CorruptCatalog {
                path: self.path.clone(),
                message: e.to_string(),
            })
    }

    /// Keep a copy of an unparseable catalog next to it for inspection
    fn quarantine(&self) {
        if !self.path.exists() {
            return;
        }
        let mut target = self.path.clone().into_os_string();
        target.push(".corrupt");
        let target = PathBuf::from(target);

        match std::fs::rename(&self.path, &target) {
            Ok(()) => warn!("Moved unreadable catalog to {}", target.display()),
            Err(e) => warn!("Failed to move unreadable catalog aside: {}", e),
        }
    }

    /// Atomically write the catalog, stamping `lastUpdated`
    pub fn save(&self, catalog: &Catalog) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir).map_err(|e| {
            CatalogError::io(CATALOG_ERROR_NAME, dir, "Failed to create catalog directory", e)
        })?;

        let mut document = catalog.clone();
        document.format_version = FORMAT_VERSION;
        document.last_updated = Utc::now();

        let content = serde_json::to_vec_pretty(&document).map_err(|e| {
            CatalogError::io(
                CATALOG_ERROR_NAME,
                &self.path,
                "Failed to serialize catalog",
                e.into(),
            )
        })?;

        let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| {
            CatalogError::io(CATALOG_ERROR_NAME, dir, "Failed to create temporary catalog", e)
        })?;
        temp.write_all(&content)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| {
                CatalogError::io(CATALOG_ERROR_NAME, temp.path(), "Failed to write catalog", e)
            })?;
        temp.persist(&self.path).map_err(|e| {
            CatalogError::io(CATALOG_ERROR_NAME, &self.path, "Failed to replace catalog", e.error)
        })?;

        debug!(
            "Saved catalog with {} entries to {}",
            document.distributions.len(),
            self.path.display()
        );
        Ok(())
    }
}
