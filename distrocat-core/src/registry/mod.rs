//! Registry synchronizer
//!
//! Reconciles descriptor source URLs against a remote distribution feed. The
//! synchronizer only ever changes `sourceUrl`, and only through
//! [`CatalogManager::apply_source_updates`]; descriptors missing from the feed
//! are left alone.
//!
//! The last fetched feed is cached in `registry-cache.json`. A non-forced sync
//! within the configured interval reuses it instead of hitting the network.

mod feed;

pub use feed::{normalize_name, plan_updates, FeedEntry, RegistryFeed};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogManager, SourceUpdate};
use crate::config::{CatalogConfig, RegistrySettings};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Where the feed used by a sync came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    Network,
    Cache,
}

/// Result of one sync pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub source: FeedSource,
    pub feed_entries: usize,
    /// Changes computed from the catalog as listed before applying
    pub planned: Vec<SourceUpdate>,
    /// Descriptors whose source URL was actually changed and saved
    pub applied: usize,
}

/// On-disk copy of the last fetched feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedFeed {
    cached_at: DateTime<Utc>,
    feed_url: String,
    feed: RegistryFeed,
}

pub struct RegistrySynchronizer {
    settings: RegistrySettings,
    cache_path: PathBuf,
    client: reqwest::Client,
}

impl RegistrySynchronizer {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.settings.download.user_agent.clone())
            .timeout(FETCH_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            settings: config.settings.registry.clone(),
            cache_path: config.paths.registry_cache_file(),
            client,
        })
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    /// Fetch the feed (or reuse the cache) and apply any source URL changes.
    ///
    /// A fetch failure is returned to the caller with the catalog untouched.
    pub async fn sync(&self, manager: &CatalogManager, force: bool) -> Result<SyncReport> {
        let (feed, source) = self.feed(force).await?;

        let updates = plan_updates(&feed, &manager.list_templates());
        let applied = manager
            .apply_source_updates(&updates)
            .context("Failed to record registry updates")?;

        info!(
            "Registry sync: {} feed entries, {} source URLs updated",
            feed.len(),
            applied
        );

        Ok(SyncReport {
            source,
            feed_entries: feed.len(),
            planned: updates,
            applied,
        })
    }

    /// Run [`sync`](Self::sync) every interval until the handle is aborted.
    ///
    /// Returns `None` when the registry is disabled in the configuration.
    pub fn spawn_periodic(self: Arc<Self>, manager: Arc<CatalogManager>) -> Option<JoinHandle<()>> {
        if !self.settings.enabled {
            info!("Registry sync disabled");
            return None;
        }

        let period = self.settings.sync_interval().max(Duration::from_secs(1));
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sync(&manager, false).await {
                    warn!("Registry sync failed: {:#}", e);
                }
            }
        }))
    }

    async fn feed(&self, force: bool) -> Result<(RegistryFeed, FeedSource)> {
        if !force {
            match self.load_cached() {
                Ok(Some(feed)) => return Ok((feed, FeedSource::Cache)),
                Ok(None) => {}
                Err(e) => debug!("Ignoring registry cache: {:#}", e),
            }
        }

        let feed = self.fetch().await?;

        // Caching is best effort
        if let Err(e) = self.save_cache(&feed) {
            warn!("Failed to save registry cache: {:#}", e);
        }

        Ok((feed, FeedSource::Network))
    }

    async fn fetch(&self) -> Result<RegistryFeed> {
        let url = &self.settings.feed_url;
        debug!("Fetching registry feed from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch registry feed from {url}"))?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Failed to fetch registry feed: HTTP {} from {}",
                response.status(),
                url
            );
        }

        let content = response
            .text()
            .await
            .context("Failed to read registry feed body")?;

        RegistryFeed::from_json(&content)
            .with_context(|| format!("Failed to parse registry feed from {url}"))
    }

    fn load_cached(&self) -> Result<Option<RegistryFeed>> {
        if !self.cache_path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&self.cache_path)
            .with_context(|| format!("Failed to read cache: {}", self.cache_path.display()))?;
        let cached: CachedFeed = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse cache: {}", self.cache_path.display()))?;

        if cached.feed_url != self.settings.feed_url {
            debug!("Registry cache is for a different feed URL");
            return Ok(None);
        }

        let age = Utc::now().signed_duration_since(cached.cached_at);
        let age = age.to_std().unwrap_or_default();
        if age >= self.settings.sync_interval() {
            debug!("Registry cache expired (age: {:?})", age);
            return Ok(None);
        }

        debug!("Using cached registry feed (age: {:?})", age);
        Ok(Some(cached.feed))
    }

    fn save_cache(&self, feed: &RegistryFeed) -> Result<()> {
        let cached = CachedFeed {
            cached_at: Utc::now(),
            feed_url: self.settings.feed_url.clone(),
            feed: feed.clone(),
        };
        let content =
            serde_json::to_string_pretty(&cached).context("Failed to serialize registry cache")?;

        std::fs::write(&self.cache_path, content)
            .with_context(|| format!("Failed to write cache: {}", self.cache_path.display()))?;
        debug!("Saved registry cache to {}", self.cache_path.display());
        Ok(())
    }
}
