//! Catalog error types
//!
//! Every failure names the template it concerns and keeps its underlying cause,
//! so callers can decide whether to retry. `Cancelled` and `TimedOut` are kept
//! apart from hard failures so a user-initiated cancel is never shown as an error.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Flat classification of a [`CatalogError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    NoSourceUrl,
    AlreadyAvailable,
    AlreadyInProgress,
    DuplicateName,
    InvalidName,
    Network,
    TimedOut,
    Cancelled,
    ChecksumMismatch,
    Io,
    CorruptCatalog,
}

/// Errors raised by the catalog manager, store and download engine
#[derive(Error, Debug)]
pub enum CatalogError {
    /// No descriptor with this name exists
    #[error("Template '{name}' is not in the catalog")]
    NotFound { name: String },

    /// Download requested for a descriptor without a source URL
    #[error("Template '{name}' has no source URL to download from")]
    NoSourceUrl { name: String },

    /// Download requested without overwrite while the artifact already exists
    #[error("Template '{name}' is already available locally (pass overwrite to replace it)")]
    AlreadyAvailable { name: String },

    /// A download for this name is already in flight
    #[error("A download for template '{name}' is already in progress")]
    AlreadyInProgress { name: String },

    /// A custom descriptor was added under a name that already exists
    #[error("Template '{name}' already exists in the catalog")]
    DuplicateName { name: String },

    /// The name cannot be used as a catalog key or artifact file name
    #[error("Invalid template name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Connection failure, non-success status, truncated body or too many redirects
    #[error("Network error while downloading '{name}': {message}")]
    Network {
        name: String,
        message: String,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// The overall download deadline expired
    #[error("Download of '{name}' timed out after {after:?}")]
    TimedOut { name: String, after: Duration },

    /// The download was cancelled by the caller
    #[error("Download of '{name}' was cancelled")]
    Cancelled { name: String },

    /// The artifact's SHA-256 does not match the expected digest
    #[error("Checksum mismatch for '{name}'\nExpected: {expected}\nActual:   {actual}")]
    ChecksumMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    /// Local filesystem failure (disk full, permission denied, invalid path)
    #[error("I/O error for '{name}' at {}: {context}", .path.display())]
    Io {
        name: String,
        path: PathBuf,
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The persisted catalog could not be parsed. Recovered internally by
    /// falling back to the built-in defaults; never returned to callers.
    #[error("Catalog file {} is corrupt: {message}", .path.display())]
    CorruptCatalog { path: PathBuf, message: String },
}

pub type Result<T> = std::result::Result<T, CatalogError>;

impl CatalogError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CatalogError::NotFound { .. } => ErrorKind::NotFound,
            CatalogError::NoSourceUrl { .. } => ErrorKind::NoSourceUrl,
            CatalogError::AlreadyAvailable { .. } => ErrorKind::AlreadyAvailable,
            CatalogError::AlreadyInProgress { .. } => ErrorKind::AlreadyInProgress,
            CatalogError::DuplicateName { .. } => ErrorKind::DuplicateName,
            CatalogError::InvalidName { .. } => ErrorKind::InvalidName,
            CatalogError::Network { .. } => ErrorKind::Network,
            CatalogError::TimedOut { .. } => ErrorKind::TimedOut,
            CatalogError::Cancelled { .. } => ErrorKind::Cancelled,
            CatalogError::ChecksumMismatch { .. } => ErrorKind::ChecksumMismatch,
            CatalogError::Io { .. } => ErrorKind::Io,
            CatalogError::CorruptCatalog { .. } => ErrorKind::CorruptCatalog,
        }
    }

    /// True for `Cancelled` and `TimedOut`, the outcomes that are not failures
    /// of the transfer itself
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            CatalogError::Cancelled { .. } | CatalogError::TimedOut { .. }
        )
    }

    /// The template this error concerns, if any
    pub fn template_name(&self) -> Option<&str> {
        match self {
            CatalogError::NotFound { name }
            | CatalogError::NoSourceUrl { name }
            | CatalogError::AlreadyAvailable { name }
            | CatalogError::AlreadyInProgress { name }
            | CatalogError::DuplicateName { name }
            | CatalogError::InvalidName { name, .. }
            | CatalogError::Network { name, .. }
            | CatalogError::TimedOut { name, .. }
            | CatalogError::Cancelled { name }
            | CatalogError::ChecksumMismatch { name, .. }
            | CatalogError::Io { name, .. } => Some(name),
            CatalogError::CorruptCatalog { .. } => None,
        }
    }

    pub(crate) fn io(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        context: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        CatalogError::Io {
            name: name.into(),
            path: path.into(),
            context: context.into(),
            source,
        }
    }

    pub(crate) fn network(name: impl Into<String>, message: impl Into<String>) -> Self {
        CatalogError::Network {
            name: name.into(),
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn network_from(
        name: impl Into<String>,
        message: impl Into<String>,
        source: reqwest::Error,
    ) -> Self {
        CatalogError::Network {
            name: name.into(),
            message: message.into(),
            source: Some(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_a_hard_failure() {
        let cancelled = CatalogError::Cancelled {
            name: "alpine-3.19".to_string(),
        };
        let timed_out = CatalogError::TimedOut {
            name: "alpine-3.19".to_string(),
            after: Duration::from_secs(5),
        };
        let network = CatalogError::network("alpine-3.19", "connection reset");

        assert!(cancelled.is_cancellation());
        assert!(timed_out.is_cancellation());
        assert!(!network.is_cancellation());
        assert_ne!(cancelled.kind(), timed_out.kind());
    }

    #[test]
    fn test_errors_carry_template_name() {
        let err = CatalogError::ChecksumMismatch {
            name: "debian-12".to_string(),
            expected: "aa".to_string(),
            actual: "bb".to_string(),
        };
        assert_eq!(err.template_name(), Some("debian-12"));
        assert!(err.to_string().contains("Expected: aa"));

        let corrupt = CatalogError::CorruptCatalog {
            path: PathBuf::from("/tmp/catalog.json"),
            message: "expected value".to_string(),
        };
        assert_eq!(corrupt.template_name(), None);
        assert_eq!(corrupt.kind(), ErrorKind::CorruptCatalog);
    }
}
