//! distrocat - a catalog of pristine rootfs templates
//!
//! [`CatalogManager`] is the entry point: it lists templates, downloads them
//! with checksum verification and atomic publish, imports local archives and
//! keeps `catalog.json` in step with the `distros/` directory.
//! [`RegistrySynchronizer`] refreshes source URLs from a remote feed.

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod hasher;
pub mod paths;
pub mod registry;

pub use catalog::{
    builtin_defaults, Architecture, CatalogManager, ImportMetadata, SourceUpdate,
    TemplateDescriptor,
};
pub use config::{CatalogConfig, DownloadSettings, RegistrySettings, Settings};
pub use download::{CancelToken, DownloadOptions, DownloadProgress, ProgressCallback};
pub use error::{CatalogError, ErrorKind, Result};
pub use paths::StoragePaths;
pub use registry::{RegistrySynchronizer, SyncReport};
