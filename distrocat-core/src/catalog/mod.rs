//! Template catalog
//!
//! A catalog is the list of known rootfs templates plus the state of their
//! local artifacts.
//!
//! ```text
//! <root>/
//!     ├── catalog.json           ← CatalogStore (format version + descriptors)
//!     ├── config.yaml            ← optional settings
//!     ├── registry-cache.json    ← last fetched registry feed
//!     └── distros/
//!         └── <name>.<ext>       ← one artifact per available template
//! ```
//!
//! [`CatalogManager`] is the only writer. It merges the built-in defaults on
//! load, serializes every mutation and persists after each one.

mod defaults;
mod descriptor;
mod manager;
mod store;

pub use defaults::builtin_defaults;
pub use descriptor::{Architecture, TemplateDescriptor};
pub use manager::{CatalogManager, ImportMetadata, SourceUpdate};
pub use store::{merge_defaults, Catalog, CatalogStore, LoadedCatalog, MergeOutcome, FORMAT_VERSION};
