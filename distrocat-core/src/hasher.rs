//! SHA-256 helpers for artifact verification
//!
//! Digests are stored as bare lowercase hex. Inputs may carry a `sha256:`
//! prefix and any case; they are normalized before comparison.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

const DIGEST_PREFIX: &str = "sha256:";

/// Hash a file's contents in 64 KiB blocks
pub fn hash_file_sync(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;

    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file on the blocking pool
pub async fn hash_file(path: &Path) -> std::io::Result<String> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || hash_file_sync(&path))
        .await
        .map_err(std::io::Error::other)?
}

/// Hash an in-memory buffer
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Strip an optional `sha256:` prefix, trim and lowercase
pub fn normalize_digest(digest: &str) -> String {
    let trimmed = digest.trim();
    let has_prefix = trimmed
        .get(..DIGEST_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(DIGEST_PREFIX));
    let bare = if has_prefix {
        &trimmed[DIGEST_PREFIX.len()..]
    } else {
        trimmed
    };
    bare.to_ascii_lowercase()
}

pub fn digests_match(expected: &str, actual: &str) -> bool {
    normalize_digest(expected) == normalize_digest(actual)
}
