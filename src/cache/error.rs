//! Error types for cache operations.

use std::path::PathBuf;

/// Errors from writing to the cache.
///
/// Reads never produce these: an unreadable or incomplete entry is a miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// An I/O error occurred while writing cache files.
    #[error("cache I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Metadata could not be serialized.
    #[error("failed to serialize cache metadata for {key}: {source}")]
    Serialization {
        key: String,
        source: serde_json::Error,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CacheError::Io {
            path: path.into(),
            source,
        }
    }
}
