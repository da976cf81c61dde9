//! Single-template download engine
//!
//! ```text
//! Idle → Requesting → (Redirect ≤ max) → Streaming → Verifying → Published
//!                   ╲________________ Failed / Cancelled / TimedOut
//! ```
//!
//! The body is streamed chunk by chunk into a staging file next to the final
//! artifact and hashed on the way. The staging file is owned by a
//! [`tempfile::TempPath`], so every early return deletes it. A complete,
//! verified download comes back as a [`StagedArtifact`]; the caller decides
//! when to rename it over the destination, and any previous artifact stays
//! intact until then.

use reqwest::header::LOCATION;
use reqwest::Url;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, info};

use super::cancel::CancelToken;
use super::progress::{ProgressCallback, ProgressTracker};
use crate::config::DownloadSettings;
use crate::error::{CatalogError, Result};
use crate::hasher::{digests_match, normalize_digest};
use crate::paths::STAGING_SUFFIX;

/// What to fetch and where it will be published
#[derive(Clone)]
pub struct DownloadRequest {
    pub name: String,
    pub url: String,
    pub destination: PathBuf,
    /// Verified against the streamed content when set
    pub expected_sha256: Option<String>,
    /// Deadline for the whole exchange
    pub timeout: Option<Duration>,
    pub on_progress: Option<ProgressCallback>,
}

/// A complete, verified artifact still in its staging file.
///
/// Dropping it without calling [`publish`](Self::publish) deletes the
/// staging file and leaves the destination untouched.
#[derive(Debug)]
pub struct StagedArtifact {
    name: String,
    staging: TempPath,
    destination: PathBuf,
    pub size_bytes: u64,
    pub sha256: String,
}

impl StagedArtifact {
    pub(crate) fn new(
        name: &str,
        staging: TempPath,
        destination: PathBuf,
        size_bytes: u64,
        sha256: String,
    ) -> Self {
        Self {
            name: name.to_string(),
            staging,
            destination,
            size_bytes,
            sha256,
        }
    }

    /// Where [`publish`](Self::publish) will put the file
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Atomically rename the staging file over the destination
    pub fn publish(self) -> Result<PathBuf> {
        let Self {
            name,
            staging,
            destination,
            size_bytes,
            ..
        } = self;

        staging.persist(&destination).map_err(|e| {
            CatalogError::io(&name, &destination, "Failed to publish artifact", e.error)
        })?;

        info!(
            "Published {} ({} bytes) to {}",
            name,
            size_bytes,
            destination.display()
        );
        Ok(destination)
    }
}

/// HTTP download engine. Holds no per-download state.
#[derive(Debug, Clone)]
pub struct DownloadEngine {
    client: reqwest::Client,
    max_redirects: usize,
    progress_interval: Duration,
}

impl DownloadEngine {
    pub fn new(settings: &DownloadSettings) -> Result<Self> {
        // Redirects are followed by hand so cancellation is observed between hops
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CatalogError::network_from("", "Failed to create HTTP client", e))?;

        Ok(Self {
            client,
            max_redirects: settings.max_redirects,
            progress_interval: settings.progress_interval(),
        })
    }

    /// Download and verify one artifact into a staging file
    pub async fn fetch(
        &self,
        request: &DownloadRequest,
        cancel: &CancelToken,
    ) -> Result<StagedArtifact> {
        // A timeout too large to represent means no deadline
        let interrupts = Interrupts {
            name: &request.name,
            cancel,
            timeout: request.timeout,
            deadline: request
                .timeout
                .and_then(|t| Instant::now().checked_add(t)),
        };

        info!("Downloading {} from {}", request.name, request.url);

        let response = self.send_following_redirects(request, &interrupts).await?;
        self.stream_to_staging(request, response, &interrupts).await
    }

    async fn send_following_redirects(
        &self,
        request: &DownloadRequest,
        interrupts: &Interrupts<'_>,
    ) -> Result<reqwest::Response> {
        let name = request.name.as_str();
        let mut url = Url::parse(&request.url).map_err(|e| {
            CatalogError::network(name, format!("invalid source URL '{}': {e}", request.url))
        })?;

        for hop in 0..=self.max_redirects {
            interrupts.check()?;

            let response = interrupts
                .run(self.client.get(url.clone()).send())
                .await?
                .map_err(|e| CatalogError::network_from(name, format!("request to {url} failed"), e))?;

            let status = response.status();
            if status.is_redirection() {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        CatalogError::network(
                            name,
                            format!("HTTP {status} from {url} without a Location header"),
                        )
                    })?;

                let next = url.join(location).map_err(|e| {
                    CatalogError::network(name, format!("invalid redirect target '{location}': {e}"))
                })?;

                debug!(
                    "Redirect {}/{} for {}: {} -> {}",
                    hop + 1,
                    self.max_redirects,
                    name,
                    url,
                    next
                );
                url = next;
                continue;
            }

            if !status.is_success() {
                return Err(CatalogError::network(
                    name,
                    format!("HTTP {status} from {url}"),
                ));
            }

            return Ok(response);
        }

        Err(CatalogError::network(
            name,
            format!("too many redirects (more than {})", self.max_redirects),
        ))
    }

    async fn stream_to_staging(
        &self,
        request: &DownloadRequest,
        mut response: reqwest::Response,
        interrupts: &Interrupts<'_>,
    ) -> Result<StagedArtifact> {
        let name = request.name.as_str();
        let destination = request.destination.as_path();
        let dir = destination.parent().unwrap_or_else(|| Path::new("."));

        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| CatalogError::io(name, dir, "Failed to create artifact directory", e))?;

        let staging = tempfile::Builder::new()
            .prefix(&format!(".{name}."))
            .suffix(STAGING_SUFFIX)
            .tempfile_in(dir)
            .map_err(|e| CatalogError::io(name, dir, "Failed to create staging file", e))?;
        let (std_file, staging_path) = staging.into_parts();
        // Declared after `staging_path` so the handle closes before the file is removed
        let mut file = tokio::fs::File::from_std(std_file);

        let total_bytes = response.content_length();
        let mut progress = ProgressTracker::new(
            request.on_progress.clone(),
            self.progress_interval,
            total_bytes,
        );
        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;

        loop {
            interrupts.check()?;

            let chunk = interrupts.run(response.chunk()).await?.map_err(|e| {
                CatalogError::network_from(
                    name,
                    format!("connection lost after {downloaded} bytes"),
                    e,
                )
            })?;
            let Some(chunk) = chunk else {
                break;
            };

            hasher.update(&chunk);
            file.write_all(&chunk).await.map_err(|e| {
                CatalogError::io(name, &*staging_path, "Failed to write staging file", e)
            })?;
            downloaded += chunk.len() as u64;
            progress.update(downloaded);
        }

        file.flush()
            .await
            .map_err(|e| CatalogError::io(name, &*staging_path, "Failed to flush staging file", e))?;
        file.sync_all()
            .await
            .map_err(|e| CatalogError::io(name, &*staging_path, "Failed to sync staging file", e))?;
        drop(file);

        if let Some(total) = total_bytes {
            if downloaded != total {
                return Err(CatalogError::network(
                    name,
                    format!("body ended after {downloaded} of {total} bytes"),
                ));
            }
        }
        progress.finish(downloaded);

        let actual = hex::encode(hasher.finalize());
        if let Some(expected) = &request.expected_sha256 {
            if !digests_match(expected, &actual) {
                return Err(CatalogError::ChecksumMismatch {
                    name: name.to_string(),
                    expected: normalize_digest(expected),
                    actual,
                });
            }
            debug!("Verified sha256 for {}: {}", name, actual);
        }

        interrupts.check()?;

        Ok(StagedArtifact::new(
            name,
            staging_path,
            destination.to_path_buf(),
            downloaded,
            actual,
        ))
    }
}

/// Cancellation and deadline shared by every suspension point of one download
struct Interrupts<'a> {
    name: &'a str,
    cancel: &'a CancelToken,
    timeout: Option<Duration>,
    deadline: Option<Instant>,
}

impl Interrupts<'_> {
    fn check(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(self.cancelled());
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(self.timed_out());
            }
        }
        Ok(())
    }

    /// Await `fut` unless cancellation or the deadline comes first
    async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        let expiry = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(self.cancelled()),
            _ = expiry => Err(self.timed_out()),
            output = fut => Ok(output),
        }
    }

    fn cancelled(&self) -> CatalogError {
        info!("Download of {} cancelled", self.name);
        CatalogError::Cancelled {
            name: self.name.to_string(),
        }
    }

    fn timed_out(&self) -> CatalogError {
        info!("Download of {} timed out", self.name);
        CatalogError::TimedOut {
            name: self.name.to_string(),
            after: self.timeout.unwrap_or_default(),
        }
    }
}
