//! Cache Entry Module
//!
//! Durable `(category, key) -> value` storage with TTL expiry checked on read.
//!
//! Each value lives in `<root>/<category>/<sha256(key)>.json`. An optional TTL
//! override lives in `<root>/metadata/<category>-<sha256(key)>.json` so expiry
//! can be decided without parsing the payload. The file's modified time is the
//! entry's age.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::category::Category;
use super::clock::Clock;
use super::fs::{CacheFs, FileMeta};
use super::METADATA_DIR;
use crate::error::{CacheError, Result};

const ENTRY_EXTENSION: &str = "json";

// == Stored Records ==
#[derive(Serialize)]
struct StoredRecordRef<'a, T> {
    key: &'a str,
    value: &'a T,
}

#[derive(Deserialize)]
struct StoredRecord<T> {
    key: String,
    value: T,
}

/// Per-entry TTL override, stored apart from the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// TTL in milliseconds
    pub ttl_ms: u64,
    /// When the override was written
    pub created_at: DateTime<Utc>,
}

impl EntryMetadata {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

// == Stored Entry ==
/// A value file found while walking the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub category: Category,
    pub path: PathBuf,
    pub meta: FileMeta,
}

/// Stable filename stem for a key.
pub fn key_hash(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

// == Entry Store ==
/// Category-partitioned value storage on a [`CacheFs`].
#[derive(Debug)]
pub struct EntryStore {
    root: PathBuf,
    fs: Arc<dyn CacheFs>,
    clock: Arc<dyn Clock>,
    default_ttl: Duration,
}

impl EntryStore {
    // == Constructor ==
    /// Creates a store rooted at `root`.
    ///
    /// # Arguments
    /// * `default_ttl` - TTL for entries with no metadata override
    pub fn new(
        root: impl Into<PathBuf>,
        fs: Arc<dyn CacheFs>,
        clock: Arc<dyn Clock>,
        default_ttl: Duration,
    ) -> Self {
        Self {
            root: root.into(),
            fs,
            clock,
            default_ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn category_dir(&self, category: Category) -> PathBuf {
        self.root.join(category.dir_name())
    }

    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(METADATA_DIR)
    }

    /// Location of the value file for `(category, key)`.
    pub fn entry_path(&self, key: &str, category: Category) -> PathBuf {
        self.category_dir(category)
            .join(format!("{}.{}", key_hash(key), ENTRY_EXTENSION))
    }

    /// Location of the TTL metadata record for `(category, key)`.
    pub fn metadata_path(&self, key: &str, category: Category) -> PathBuf {
        self.metadata_stem_path(category, &key_hash(key))
    }

    fn metadata_stem_path(&self, category: Category, hash: &str) -> PathBuf {
        self.metadata_dir()
            .join(format!("{}-{}.{}", category.dir_name(), hash, ENTRY_EXTENSION))
    }

    // == Layout ==
    /// Creates every category directory and the metadata directory.
    pub async fn create_layout(&self) -> Result<()> {
        let dirs = Category::ALL
            .into_iter()
            .map(|c| self.category_dir(c))
            .chain(std::iter::once(self.metadata_dir()));

        for dir in dirs {
            self.fs
                .create_dir_all(&dir)
                .await
                .map_err(|e| CacheError::io(&dir, e))?;
        }
        Ok(())
    }

    // == Get ==
    /// Returns the stored value, or `None` on miss, expiry or any read failure.
    ///
    /// An expired entry is deleted before returning.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, category: Category) -> Option<T> {
        let path = self.entry_path(key, category);
        let meta = self.stat(&path).await?;

        if self.is_expired(meta, self.ttl_for(key, category).await) {
            debug!(%category, key, "entry expired");
            if let Err(e) = self.remove(key, category).await {
                warn!(%category, key, error = %e, "failed to remove expired entry");
            }
            return None;
        }

        let bytes = match self.fs.read(&path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "entry unreadable, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice::<StoredRecord<T>>(&bytes) {
            Ok(record) if record.key == key => Some(record.value),
            Ok(record) => {
                warn!(%category, key, stored = %record.key, "key hash collision, treating as miss");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt cache entry, treating as miss");
                None
            }
        }
    }

    // == Contains ==
    /// True if a fresh entry exists. Never parses the payload or deletes anything.
    pub async fn contains(&self, key: &str, category: Category) -> bool {
        match self.stat(&self.entry_path(key, category)).await {
            Some(meta) => !self.is_expired(meta, self.ttl_for(key, category).await),
            None => false,
        }
    }

    // == Set ==
    /// Writes `value`, plus a metadata record when `ttl` is given.
    ///
    /// Without a TTL, any stale override from an earlier write is removed so the
    /// default applies again.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        category: Category,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<()> {
        let record = serde_json::to_vec(&StoredRecordRef { key, value })?;
        let path = self.entry_path(key, category);
        self.fs
            .write(&path, &record)
            .await
            .map_err(|e| CacheError::io(&path, e))?;

        // A value must never outlive a TTL record that failed to land
        if let Err(e) = self.write_ttl(key, category, ttl).await {
            if let Err(cleanup) = remove_if_present(self.fs.as_ref(), &path).await {
                warn!(%category, key, error = %cleanup, "failed to drop entry after TTL write failure");
            }
            return Err(e);
        }

        debug!(%category, key, bytes = record.len(), "entry stored");
        Ok(())
    }

    async fn write_ttl(&self, key: &str, category: Category, ttl: Option<Duration>) -> Result<()> {
        let meta_path = self.metadata_path(key, category);
        match ttl {
            Some(ttl) => {
                let metadata = EntryMetadata {
                    ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
                    created_at: self.clock.now(),
                };
                self.fs
                    .write(&meta_path, &serde_json::to_vec(&metadata)?)
                    .await
                    .map_err(|e| CacheError::io(&meta_path, e))
            }
            None => remove_if_present(self.fs.as_ref(), &meta_path).await,
        }
    }

    // == Remove ==
    /// Deletes the value and its metadata. Returns whether a value existed.
    pub async fn remove(&self, key: &str, category: Category) -> Result<bool> {
        let path = self.entry_path(key, category);
        let existed = match self.fs.remove_file(&path).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(CacheError::io(&path, e)),
        };
        remove_if_present(self.fs.as_ref(), &self.metadata_path(key, category)).await?;
        Ok(existed)
    }

    /// Deletes a value file found by [`EntryStore::list_entries`] and its metadata.
    pub async fn remove_stored(&self, entry: &StoredEntry) -> io::Result<()> {
        self.fs.remove_file(&entry.path).await?;

        if let Some(hash) = entry.path.file_stem().and_then(|s| s.to_str()) {
            let meta_path = self.metadata_stem_path(entry.category, hash);
            match self.fs.remove_file(&meta_path).await {
                Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
                _ => {}
            }
        }
        Ok(())
    }

    // == List Entries ==
    /// Every value file across all categories. Unlistable partitions are skipped.
    pub async fn list_entries(&self) -> Vec<StoredEntry> {
        let mut entries = Vec::new();

        for category in Category::ALL {
            let dir = self.category_dir(category);
            match self.fs.read_dir(&dir).await {
                Ok(files) => entries.extend(
                    files
                        .into_iter()
                        .filter(|f| {
                            f.path.extension().and_then(|e| e.to_str()) == Some(ENTRY_EXTENSION)
                        })
                        .map(|f| StoredEntry {
                            category,
                            path: f.path,
                            meta: f.meta,
                        }),
                ),
                Err(e) => debug!(dir = %dir.display(), error = %e, "skipping unlistable category"),
            }
        }

        entries
    }

    // == Expiry Helpers ==
    async fn stat(&self, path: &Path) -> Option<FileMeta> {
        match self.fs.metadata(path).await {
            Ok(meta) => Some(meta),
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    debug!(path = %path.display(), error = %e, "entry stat failed, treating as miss");
                }
                None
            }
        }
    }

    /// TTL override for the entry, falling back to the default.
    async fn ttl_for(&self, key: &str, category: Category) -> Duration {
        let path = self.metadata_path(key, category);
        let Ok(bytes) = self.fs.read(&path).await else {
            return self.default_ttl;
        };
        match serde_json::from_slice::<EntryMetadata>(&bytes) {
            Ok(metadata) => metadata.ttl(),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "corrupt ttl metadata, using default");
                self.default_ttl
            }
        }
    }

    /// Expired once the age strictly exceeds the TTL.
    fn is_expired(&self, meta: FileMeta, ttl: Duration) -> bool {
        let age = (self.clock.now() - meta.modified)
            .to_std()
            .unwrap_or_default();
        age > ttl
    }
}

async fn remove_if_present(fs: &dyn CacheFs, path: &Path) -> Result<()> {
    match fs.remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}
