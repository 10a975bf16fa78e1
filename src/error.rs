//! Error types for the work-item cache
//!
//! Provides unified error handling using thiserror.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
///
/// Reads never produce one of these: a failed or corrupt read is a miss.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Filesystem operation failed
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Value or record could not be encoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Category name did not match a known partition
    #[error("Unknown cache category: {0}")]
    UnknownCategory(String),

    /// Operation attempted before `init()`
    #[error("Cache not initialized; call init() first")]
    NotInitialized,

    /// The caller-supplied fetcher failed during a batch preload
    #[error("Preload fetch failed: {0:#}")]
    Fetch(anyhow::Error),
}

impl CacheError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        CacheError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
