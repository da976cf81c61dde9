//! Registry feed format and reconciliation

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{Architecture, SourceUpdate, TemplateDescriptor};

/// The distribution list published by the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFeed {
    #[serde(rename = "Distributions", default)]
    pub distributions: Vec<FeedEntry>,
}

/// One distribution in the feed. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedEntry {
    #[serde(rename = "Name")]
    pub name: String,

    #[serde(rename = "FriendlyName", default)]
    pub friendly_name: String,

    #[serde(rename = "Amd64PackageUrl", default, skip_serializing_if = "Option::is_none")]
    pub amd64_url: Option<String>,

    #[serde(rename = "Arm64PackageUrl", default, skip_serializing_if = "Option::is_none")]
    pub arm64_url: Option<String>,
}

impl RegistryFeed {
    pub fn from_json(content: &str) -> serde_json::Result<Self> {
        serde_json::from_str(content)
    }

    pub fn len(&self) -> usize {
        self.distributions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.distributions.is_empty()
    }

    /// Exact name match first, then a fuzzy match on names and display names
    pub fn find_match(&self, descriptor: &TemplateDescriptor) -> Option<&FeedEntry> {
        if let Some(entry) = self.distributions.iter().find(|e| e.name == descriptor.name) {
            return Some(entry);
        }

        let local_keys = [
            normalize_name(&descriptor.name),
            normalize_name(&descriptor.display_name),
        ];
        self.distributions.iter().find(|entry| {
            [normalize_name(&entry.name), normalize_name(&entry.friendly_name)]
                .iter()
                .filter(|key| !key.is_empty())
                .any(|key| local_keys.contains(key))
        })
    }
}

impl FeedEntry {
    /// Package URL for an architecture, falling back to whichever exists
    pub fn url_for(&self, architecture: Architecture) -> Option<&str> {
        let (preferred, fallback) = match architecture {
            Architecture::Arm64 => (&self.arm64_url, &self.amd64_url),
            Architecture::X64 | Architecture::Both => (&self.amd64_url, &self.arm64_url),
        };
        fn usable(url: &Option<String>) -> Option<&str> {
            url.as_deref().filter(|url| !url.trim().is_empty())
        }
        usable(preferred).or_else(|| usable(fallback))
    }
}

/// Lowercase and drop everything that is not alphanumeric
pub fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Source URL changes needed to bring `descriptors` in line with `feed`.
///
/// Descriptors without a feed entry, or whose URL already matches, produce
/// nothing.
pub fn plan_updates(feed: &RegistryFeed, descriptors: &[TemplateDescriptor]) -> Vec<SourceUpdate> {
    descriptors
        .iter()
        .filter_map(|descriptor| {
            let entry = feed.find_match(descriptor)?;
            let url = entry.url_for(descriptor.architecture)?;
            if descriptor.source_url.as_deref() == Some(url) {
                return None;
            }

            debug!("Feed entry {} matches template {}", entry.name, descriptor.name);
            Some(SourceUpdate {
                name: descriptor.name.clone(),
                source_url: url.to_string(),
            })
        })
        .collect()
}
