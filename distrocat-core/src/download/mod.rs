//! Template downloads
//!
//! [`DownloadEngine`] performs one fetch: redirects, streaming and hashing
//! into a staging file. It never touches the catalog; the manager records the
//! returned [`StagedArtifact`] and publishes it once the record is saved.

mod cancel;
mod engine;
mod progress;

pub use cancel::CancelToken;
pub use engine::{DownloadEngine, DownloadRequest, StagedArtifact};
pub use progress::{DownloadProgress, ProgressCallback};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Caller options for [`CatalogManager::download`](crate::CatalogManager::download)
#[derive(Clone)]
pub struct DownloadOptions {
    /// Throttled progress reports
    pub on_progress: Option<ProgressCallback>,

    /// Verify against the expected checksum when one is known
    pub verify_checksum: bool,

    /// Overrides the descriptor's `sha256`
    pub expected_checksum: Option<String>,

    /// Overrides the configured download deadline
    pub timeout: Option<Duration>,

    /// Replace an artifact that is already available
    pub overwrite: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            on_progress: None,
            verify_checksum: true,
            expected_checksum: None,
            timeout: None,
            overwrite: false,
        }
    }
}

impl fmt::Debug for DownloadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("verify_checksum", &self.verify_checksum)
            .field("expected_checksum", &self.expected_checksum)
            .field("timeout", &self.timeout)
            .field("overwrite", &self.overwrite)
            .finish()
    }
}

impl DownloadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(DownloadProgress) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    pub fn expected_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.expected_checksum = Some(checksum.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }
}
