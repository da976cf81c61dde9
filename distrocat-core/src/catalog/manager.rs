//! Catalog manager - the single entry point for collaborators
//!
//! The manager exclusively owns the in-memory catalog. Every mutation runs
//! through [`CatalogManager::commit`], which holds the catalog lock for the
//! whole read-modify-write, persists the result, and restores the previous
//! state if anything fails. New artifacts are published only after the record
//! describing them is saved. The lock is never held across an `.await`; only
//! the download engine suspends, and it does not see the catalog.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use super::store::{Catalog, CatalogStore};
use super::{builtin_defaults, Architecture, TemplateDescriptor};
use crate::config::CatalogConfig;
use crate::download::{CancelToken, DownloadEngine, DownloadOptions, DownloadRequest, StagedArtifact};
use crate::error::{CatalogError, Result};
use crate::hasher::{self, digests_match, normalize_digest};
use crate::paths::{archive_extension, validate_name, StoragePaths, STAGING_SUFFIX};

/// Metadata for [`CatalogManager::import_external_artifact`].
///
/// Unset fields keep the value of the descriptor being replaced, if any.
#[derive(Debug, Clone, Default)]
pub struct ImportMetadata {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub version: Option<String>,
    pub architecture: Option<Architecture>,
    pub source_url: Option<String>,
    pub tags: Option<BTreeSet<String>>,
    /// Reject the import if the file does not hash to this value
    pub expected_sha256: Option<String>,
}

/// A new source URL for one descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUpdate {
    pub name: String,
    pub source_url: String,
}

/// Orchestrates the catalog store and the download engine
pub struct CatalogManager {
    config: CatalogConfig,
    store: CatalogStore,
    defaults: Vec<TemplateDescriptor>,
    engine: DownloadEngine,
    catalog: Mutex<Catalog>,
    active: Mutex<HashMap<String, CancelToken>>,
}

impl CatalogManager {
    /// Open the catalog with the built-in default templates
    pub fn open(config: CatalogConfig) -> Result<Self> {
        Self::open_with_defaults(config, builtin_defaults())
    }

    /// Open the catalog with a custom default set
    pub fn open_with_defaults(
        config: CatalogConfig,
        defaults: Vec<TemplateDescriptor>,
    ) -> Result<Self> {
        for descriptor in &defaults {
            validate_name(&descriptor.name)?;
        }

        config.paths.ensure_dirs()?;
        config.paths.sweep_staging_files();

        let store = CatalogStore::new(config.paths.catalog_file());
        let loaded = store.load(&defaults);
        let mut catalog = loaded.catalog;
        let mut needs_save = loaded.needs_save;

        let before = catalog.len();
        catalog.distributions.retain(|d| match validate_name(&d.name) {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping catalog entry: {}", e);
                false
            }
        });
        needs_save |= catalog.len() != before;

        if needs_save {
            store.save(&catalog)?;
        }

        let engine = DownloadEngine::new(&config.settings.download)?;

        info!(
            "Opened catalog at {} ({} templates)",
            store.path().display(),
            catalog.len()
        );

        Ok(Self {
            config,
            store,
            defaults,
            engine,
            catalog: Mutex::new(catalog),
            active: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    pub fn storage_paths(&self) -> &StoragePaths {
        &self.config.paths
    }

    /// All templates, available first, then by display name
    pub fn list_templates(&self) -> Vec<TemplateDescriptor> {
        let mut descriptors = self.lock_catalog().distributions.clone();
        for descriptor in &mut descriptors {
            self.refresh_availability(descriptor);
        }

        descriptors.sort_by(|a, b| {
            b.available
                .cmp(&a.available)
                .then_with(|| {
                    a.display_name
                        .to_lowercase()
                        .cmp(&b.display_name.to_lowercase())
                })
                .then_with(|| a.name.cmp(&b.name))
        });
        descriptors
    }

    pub fn get_template(&self, name: &str) -> Option<TemplateDescriptor> {
        let mut descriptor = self.lock_catalog().get(name).cloned()?;
        self.refresh_availability(&mut descriptor);
        Some(descriptor)
    }

    pub fn is_available(&self, name: &str) -> bool {
        self.get_local_path(name).is_some()
    }

    pub fn get_local_path(&self, name: &str) -> Option<PathBuf> {
        let descriptor = self.lock_catalog().get(name).cloned()?;
        self.locate_artifact(&descriptor)
    }

    pub fn is_downloading(&self, name: &str) -> bool {
        self.lock_active().contains_key(name)
    }

    /// Signal the in-flight download for `name`. Returns false if none is running.
    pub fn cancel_download(&self, name: &str) -> bool {
        match self.lock_active().get(name) {
            Some(token) => {
                info!("Cancelling download of {}", name);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Download a template and record it in the catalog.
    ///
    /// The artifact keeps the archive extension named by the source URL. On
    /// any error the catalog and the artifact directory are unchanged.
    pub async fn download(
        &self,
        name: &str,
        options: DownloadOptions,
    ) -> Result<TemplateDescriptor> {
        validate_name(name)?;
        let descriptor = self.get_template(name).ok_or_else(|| CatalogError::NotFound {
            name: name.to_string(),
        })?;

        let active = self.begin_operation(name)?;

        let url = descriptor
            .source_url
            .clone()
            .ok_or_else(|| CatalogError::NoSourceUrl {
                name: name.to_string(),
            })?;

        if descriptor.available && !options.overwrite {
            return Err(CatalogError::AlreadyAvailable {
                name: name.to_string(),
            });
        }

        let expected_sha256 = if options.verify_checksum {
            options
                .expected_checksum
                .clone()
                .or_else(|| descriptor.sha256.clone())
        } else {
            None
        };

        let request = DownloadRequest {
            name: name.to_string(),
            destination: self.config.paths.artifact_path(name, archive_extension(&url)),
            url,
            expected_sha256,
            timeout: options
                .timeout
                .or_else(|| self.config.settings.download.timeout()),
            on_progress: options.on_progress.clone(),
        };

        let staged = self.engine.fetch(&request, &active.token).await?;
        let verified = request.expected_sha256.is_some();
        let recorded = self.record_download(name, staged, verified);
        drop(active);
        recorded
    }

    fn record_download(
        &self,
        name: &str,
        staged: StagedArtifact,
        verified: bool,
    ) -> Result<TemplateDescriptor> {
        let path = staged.destination().to_path_buf();
        let size_bytes = staged.size_bytes;
        let sha256 = staged.sha256.clone();

        let mut descriptor = self.commit(
            |catalog| {
                let descriptor = catalog.get_mut(name).ok_or_else(|| CatalogError::NotFound {
                    name: name.to_string(),
                })?;

                descriptor.local_file_path = Some(path);
                descriptor.size_bytes = Some(size_bytes);
                if verified || descriptor.sha256.is_none() {
                    descriptor.sha256 = Some(sha256);
                }
                descriptor.available = true;
                descriptor.added_timestamp.get_or_insert_with(Utc::now);
                Ok(descriptor.clone())
            },
            || self.publish_artifact(name, staged),
        )?;

        self.refresh_availability(&mut descriptor);
        Ok(descriptor)
    }

    /// Delete a template's artifact.
    ///
    /// Built-in templates keep their descriptor, including any synchronized
    /// source URL, with only the local path and availability cleared. Custom
    /// templates are removed from the catalog.
    pub fn remove_template(&self, name: &str) -> Result<()> {
        validate_name(name)?;

        // Held for the whole removal so no download or import can start meanwhile
        let active = self.lock_active();
        if active.contains_key(name) {
            return Err(CatalogError::AlreadyInProgress {
                name: name.to_string(),
            });
        }

        let builtin = self.defaults.iter().any(|d| d.name == name);

        self.mutate(|catalog| {
            if !catalog.contains(name) {
                return Err(CatalogError::NotFound {
                    name: name.to_string(),
                });
            }

            let mut deleted = false;
            for artifact in self.config.paths.artifact_candidates(name) {
                match std::fs::remove_file(&artifact) {
                    Ok(()) => {
                        info!("Deleted artifact {}", artifact.display());
                        deleted = true;
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(CatalogError::io(name, &artifact, "Failed to delete artifact", e))
                    }
                }
            }
            if !deleted {
                debug!("No artifact to delete for {}", name);
            }

            if builtin {
                if let Some(descriptor) = catalog.get_mut(name) {
                    descriptor.clear_local();
                }
                info!("Cleared local artifact of built-in template {}", name);
            } else {
                catalog.remove(name);
                info!("Removed custom template {}", name);
            }
            Ok(())
        })?;

        drop(active);
        Ok(())
    }

    /// Recompute the artifact's hash and compare it with the recorded one.
    ///
    /// Returns false when verification is impossible (unknown name, no
    /// artifact, no recorded hash, unreadable file) as well as on mismatch.
    pub async fn verify_template(&self, name: &str) -> bool {
        let Some(descriptor) = self.get_template(name) else {
            warn!("Cannot verify {}: not in the catalog", name);
            return false;
        };
        let Some(path) = descriptor.local_file_path.filter(|_| descriptor.available) else {
            warn!("Cannot verify {}: no local artifact", name);
            return false;
        };
        let Some(expected) = descriptor.sha256 else {
            warn!("Cannot verify {}: no recorded sha256", name);
            return false;
        };

        match hasher::hash_file(&path).await {
            Ok(actual) if digests_match(&expected, &actual) => {
                debug!("Verified {}: {}", name, actual);
                true
            }
            Ok(actual) => {
                warn!(
                    "Checksum mismatch for {}: expected {}, actual {}",
                    name,
                    normalize_digest(&expected),
                    actual
                );
                false
            }
            Err(e) => {
                warn!("Cannot verify {}: failed to read {}: {}", name, path.display(), e);
                false
            }
        }
    }

    /// Register a local archive under `name` without any network access.
    ///
    /// The file is copied into a staging file in the artifact directory and
    /// hashed. Once the descriptor is saved the copy is renamed into place,
    /// keeping the source's archive extension. An existing descriptor with the
    /// same name is replaced, never duplicated.
    pub async fn import_external_artifact(
        &self,
        path: &Path,
        name: &str,
        metadata: ImportMetadata,
    ) -> Result<TemplateDescriptor> {
        validate_name(name)?;

        let source_meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| CatalogError::io(name, path, "Failed to read import source", e))?;
        if !source_meta.is_file() {
            return Err(CatalogError::io(
                name,
                path,
                "Import source is not a regular file",
                std::io::Error::from(std::io::ErrorKind::InvalidInput),
            ));
        }

        let active = self.begin_operation(name)?;

        let source = path.to_path_buf();
        let extension = archive_extension(&path.to_string_lossy());
        let destination = self.config.paths.artifact_path(name, extension);
        let staged_name = name.to_string();
        let expected = metadata.expected_sha256.clone();
        let staged = tokio::task::spawn_blocking(move || {
            copy_verified(&source, destination, &staged_name, expected.as_deref())
        })
        .await
        .map_err(|e| {
            CatalogError::io(name, path, "Import task failed", std::io::Error::other(e))
        })??;

        let artifact = staged.destination().to_path_buf();
        let size_bytes = staged.size_bytes;
        let sha256 = staged.sha256.clone();
        let update = |catalog: &mut Catalog| -> Result<TemplateDescriptor> {
            let existing = catalog.get(name).cloned();
            let base = existing
                .clone()
                .unwrap_or_else(|| TemplateDescriptor::new(name, name));

            let descriptor = TemplateDescriptor {
                name: name.to_string(),
                display_name: metadata.display_name.clone().unwrap_or(base.display_name),
                description: metadata.description.clone().unwrap_or(base.description),
                version: metadata.version.clone().unwrap_or(base.version),
                architecture: metadata.architecture.unwrap_or(base.architecture),
                size_bytes: Some(size_bytes),
                sha256: Some(sha256),
                source_url: metadata.source_url.clone().or(base.source_url),
                local_file_path: Some(artifact),
                added_timestamp: Some(Utc::now()),
                tags: metadata.tags.clone().unwrap_or(base.tags),
                available: true,
            };

            if existing.is_some() {
                info!("Replacing template {} with imported artifact", name);
            } else {
                info!("Imported new template {}", name);
            }
            catalog.upsert(descriptor.clone());
            Ok(descriptor)
        };
        let mut descriptor = self.commit(update, || self.publish_artifact(name, staged))?;
        drop(active);

        self.refresh_availability(&mut descriptor);
        Ok(descriptor)
    }

    /// Register a custom descriptor. Fails if the name is taken.
    pub fn add_template(&self, descriptor: TemplateDescriptor) -> Result<TemplateDescriptor> {
        validate_name(&descriptor.name)?;

        let mut descriptor = self.mutate(|catalog| {
            if catalog.contains(&descriptor.name) {
                return Err(CatalogError::DuplicateName {
                    name: descriptor.name.clone(),
                });
            }

            let mut descriptor = descriptor;
            descriptor.clear_local();
            descriptor.added_timestamp.get_or_insert_with(Utc::now);
            info!("Added template {}", descriptor.name);
            catalog.upsert(descriptor.clone());
            Ok(descriptor)
        })?;

        self.refresh_availability(&mut descriptor);
        Ok(descriptor)
    }

    /// Update source URLs in place. Unknown names are ignored.
    ///
    /// Returns how many descriptors changed; persists only if any did.
    pub fn apply_source_updates(&self, updates: &[SourceUpdate]) -> Result<usize> {
        self.mutate(|catalog| {
            let mut changed = 0;
            for update in updates {
                let Some(descriptor) = catalog.get_mut(&update.name) else {
                    debug!("Skipping source update for unknown template {}", update.name);
                    continue;
                };
                if descriptor.source_url.as_deref() == Some(update.source_url.as_str()) {
                    continue;
                }
                info!(
                    "Updating source URL for {}: {} -> {}",
                    update.name,
                    descriptor.source_url.as_deref().unwrap_or("<none>"),
                    update.source_url
                );
                descriptor.source_url = Some(update.source_url.clone());
                changed += 1;
            }
            Ok(changed)
        })
    }

    /// Run a read-modify-write against the catalog and persist it.
    ///
    /// If `f` fails or the save fails, the in-memory catalog is restored.
    fn mutate<T>(&self, f: impl FnOnce(&mut Catalog) -> Result<T>) -> Result<T> {
        self.commit(f, || Ok(()))
    }

    /// Like [`mutate`](Self::mutate), then run `publish` once the new state is
    /// saved. If `publish` fails, the previous catalog is restored in memory
    /// and on disk.
    fn commit<T>(
        &self,
        update: impl FnOnce(&mut Catalog) -> Result<T>,
        publish: impl FnOnce() -> Result<()>,
    ) -> Result<T> {
        let mut catalog = self.lock_catalog();
        let snapshot = catalog.clone();

        let value = match update(&mut *catalog) {
            Ok(value) => value,
            Err(e) => {
                *catalog = snapshot;
                return Err(e);
            }
        };

        let changed = *catalog != snapshot;
        if changed {
            if let Err(e) = self.store.save(&*catalog) {
                *catalog = snapshot;
                return Err(e);
            }
        }

        if let Err(e) = publish() {
            if changed {
                if let Err(save_err) = self.store.save(&snapshot) {
                    warn!("Failed to restore catalog after a failed publish: {}", save_err);
                }
            }
            *catalog = snapshot;
            return Err(e);
        }
        Ok(value)
    }

    /// Move a staged artifact into place and delete copies of the same
    /// template stored under other archive extensions
    fn publish_artifact(&self, name: &str, staged: StagedArtifact) -> Result<()> {
        let published = staged.publish()?;

        for stale in self.config.paths.artifact_candidates(name) {
            if stale == published {
                continue;
            }
            match std::fs::remove_file(&stale) {
                Ok(()) => info!("Deleted superseded artifact {}", stale.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(
                    "Failed to delete superseded artifact {}: {}",
                    stale.display(),
                    e
                ),
            }
        }
        Ok(())
    }

    fn begin_operation(&self, name: &str) -> Result<ActiveOperation<'_>> {
        let mut active = self.lock_active();
        if active.contains_key(name) {
            return Err(CatalogError::AlreadyInProgress {
                name: name.to_string(),
            });
        }

        let token = CancelToken::new();
        active.insert(name.to_string(), token.clone());
        Ok(ActiveOperation {
            active: &self.active,
            name: name.to_string(),
            token,
        })
    }

    fn refresh_availability(&self, descriptor: &mut TemplateDescriptor) {
        match self.locate_artifact(descriptor) {
            Some(path) => {
                descriptor.available = true;
                descriptor.local_file_path = Some(path);
            }
            None => descriptor.clear_local(),
        }
    }

    /// The recorded path if it is a canonical location that exists, else
    /// whichever canonical location exists
    fn locate_artifact(&self, descriptor: &TemplateDescriptor) -> Option<PathBuf> {
        validate_name(&descriptor.name).ok()?;
        let paths = &self.config.paths;

        let recorded = descriptor.local_file_path.as_ref().filter(|path| {
            paths.artifact_candidates(&descriptor.name).contains(path) && path.is_file()
        });
        match recorded {
            Some(path) => Some(path.clone()),
            None => paths.find_artifact(&descriptor.name),
        }
    }

    fn lock_catalog(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_active(&self) -> MutexGuard<'_, HashMap<String, CancelToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registration of an in-flight download or import; unregisters on drop
struct ActiveOperation<'a> {
    active: &'a Mutex<HashMap<String, CancelToken>>,
    name: String,
    token: CancelToken,
}

impl Drop for ActiveOperation<'_> {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

/// Copy `source` into a staging file next to `destination`, hashing on the way
fn copy_verified(
    source: &Path,
    destination: PathBuf,
    name: &str,
    expected_sha256: Option<&str>,
) -> Result<StagedArtifact> {
    let dir = destination.parent().unwrap_or_else(|| Path::new("."));

    let mut input = std::fs::File::open(source)
        .map_err(|e| CatalogError::io(name, source, "Failed to open import source", e))?;

    let staging = tempfile::Builder::new()
        .prefix(&format!(".{name}."))
        .suffix(STAGING_SUFFIX)
        .tempfile_in(dir)
        .map_err(|e| CatalogError::io(name, dir, "Failed to create staging file", e))?;
    let (mut output, staging_path) = staging.into_parts();

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];
    let mut copied: u64 = 0;
    loop {
        let read = input
            .read(&mut buffer)
            .map_err(|e| CatalogError::io(name, source, "Failed to read import source", e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        output
            .write_all(&buffer[..read])
            .map_err(|e| CatalogError::io(name, &*staging_path, "Failed to write staging file", e))?;
        copied += read as u64;
    }
    output
        .sync_all()
        .map_err(|e| CatalogError::io(name, &*staging_path, "Failed to sync staging file", e))?;
    drop(output);

    let actual = hex::encode(hasher.finalize());
    if let Some(expected) = expected_sha256 {
        if !digests_match(expected, &actual) {
            return Err(CatalogError::ChecksumMismatch {
                name: name.to_string(),
                expected: normalize_digest(expected),
                actual,
            });
        }
    }

    Ok(StagedArtifact::new(name, staging_path, destination, copied, actual))
}
