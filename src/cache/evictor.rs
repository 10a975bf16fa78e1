//! Evictor Module
//!
//! Keeps the total on-disk size of all value files under a byte budget by
//! removing the least recently modified entries first.

use std::io;

use tracing::{debug, info, warn};

use super::entry::EntryStore;

// == Eviction Report ==
/// Outcome of one [`Evictor::enforce_size`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Total size before the pass
    pub size_before: u64,
    /// Total size after the pass
    pub size_after: u64,
    /// Entries removed
    pub evicted: usize,
    /// Entries whose deletion failed and were skipped
    pub failed: usize,
}

// == Evictor ==
/// Size-budget enforcement over an [`EntryStore`].
#[derive(Debug, Clone, Copy)]
pub struct Evictor {
    max_size: u64,
}

impl Evictor {
    pub fn new(max_size: u64) -> Self {
        Self { max_size }
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    // == Enforce Size ==
    /// Deletes oldest-modified entries until the total is at or below budget.
    ///
    /// Never fails: a deletion error is logged and the next candidate tried.
    /// An entry that is already gone counts as freed.
    pub async fn enforce_size(&self, store: &EntryStore) -> EvictionReport {
        let mut entries = store.list_entries().await;
        let total: u64 = entries.iter().map(|e| e.meta.len).sum();

        let mut report = EvictionReport {
            size_before: total,
            size_after: total,
            ..EvictionReport::default()
        };

        if total <= self.max_size {
            return report;
        }

        // Oldest first; path breaks ties so the order is deterministic
        entries.sort_by(|a, b| {
            a.meta
                .modified
                .cmp(&b.meta.modified)
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut running = total;
        for entry in &entries {
            if running <= self.max_size {
                break;
            }

            match store.remove_stored(entry).await {
                Ok(()) => {
                    running = running.saturating_sub(entry.meta.len);
                    report.evicted += 1;
                    debug!(path = %entry.path.display(), bytes = entry.meta.len, "evicted entry");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    running = running.saturating_sub(entry.meta.len);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(path = %entry.path.display(), error = %e, "eviction failed, skipping entry");
                }
            }
        }

        report.size_after = running;
        info!(
            "Eviction: removed {} entries, {} -> {} bytes (budget {})",
            report.evicted, report.size_before, report.size_after, self.max_size
        );
        report
    }
}
