//! Cache Statistics Module
//!
//! Disk usage figures computed from a walk of the entry store, plus
//! in-process hit, miss and eviction counters.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::entry::StoredEntry;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

// == File Stamp ==
/// A value file and its last modification time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStamp {
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

// == Cache Stats ==
/// Snapshot of cache usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Number of value files across all categories
    pub total_files: usize,
    /// Sum of value file sizes in bytes
    pub total_size: u64,
    /// `total_size` in megabytes, two decimals
    #[serde(rename = "totalSizeMB")]
    pub total_size_mb: f64,
    /// Least recently modified value file
    pub oldest_file: Option<FileStamp>,
    /// Most recently modified value file
    pub newest_file: Option<FileStamp>,
    /// Share of the size budget in use, two decimals
    pub utilization_percent: f64,
    /// Hits since this process opened the cache
    pub hits: u64,
    /// Misses since this process opened the cache
    pub misses: u64,
    /// Entries evicted since this process opened the cache
    pub evictions: u64,
    /// hits / (hits + misses), or 0.0 before any lookup
    pub hit_rate: f64,
}

impl CacheStats {
    // == From Entries ==
    /// Builds the disk figures from a store walk.
    pub fn from_entries(entries: &[StoredEntry], max_size: u64) -> Self {
        let total_size: u64 = entries.iter().map(|e| e.meta.len).sum();

        let stamp = |e: &StoredEntry| FileStamp {
            path: e.path.clone(),
            modified: e.meta.modified,
        };
        let oldest_file = entries
            .iter()
            .min_by(|a, b| a.meta.modified.cmp(&b.meta.modified))
            .map(stamp);
        let newest_file = entries
            .iter()
            .max_by(|a, b| a.meta.modified.cmp(&b.meta.modified))
            .map(stamp);

        let utilization_percent = if max_size == 0 {
            if total_size == 0 {
                0.0
            } else {
                100.0
            }
        } else {
            round2(total_size as f64 / max_size as f64 * 100.0)
        };

        Self {
            total_files: entries.len(),
            total_size,
            total_size_mb: round2(total_size as f64 / BYTES_PER_MB),
            oldest_file,
            newest_file,
            utilization_percent,
            ..Self::default()
        }
    }

    /// Fills in the session counters.
    pub fn with_counters(mut self, counters: &SessionCounters) -> Self {
        self.hits = counters.hits();
        self.misses = counters.misses();
        self.evictions = counters.evictions();
        self.hit_rate = counters.hit_rate();
        self
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// == Session Counters ==
/// Lock-free counters shared by concurrent cache operations.
#[derive(Debug, Default)]
pub struct SessionCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no lookups have been made.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}
