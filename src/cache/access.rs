//! Access Tracker Module
//!
//! Rolling 24-hour history of cache hits per `category:key`. Feeds preloading
//! and access insight only; eviction and expiry never look at it.

use std::collections::HashMap;
use std::io;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::category::Category;
use super::fs::CacheFs;
use crate::error::{CacheError, Result};

/// Length, in hours, of the trailing window kept per key.
pub const ACCESS_WINDOW_HOURS: i64 = 24;

/// Record name for an access history: `category:key`.
pub fn record_key(key: &str, category: Category) -> String {
    format!("{}:{}", category, key)
}

fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(ACCESS_WINDOW_HOURS)
}

// == Access Tracker ==
/// Per-key access timestamps, oldest first.
///
/// Serialized as a plain JSON object of `"category:key" -> [timestamps]`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessTracker {
    records: HashMap<String, Vec<DateTime<Utc>>>,
}

impl AccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    // == Track Access ==
    /// Appends `now` to the key's history and prunes anything older than the
    /// window relative to the newest access.
    ///
    /// A clock that steps backwards is clamped to the last recorded access so
    /// the history stays non-decreasing.
    pub fn track(&mut self, key: &str, category: Category, now: DateTime<Utc>) {
        let history = self.records.entry(record_key(key, category)).or_default();

        let stamp = history.last().map_or(now, |last| now.max(*last));
        history.push(stamp);

        let cutoff = window_start(stamp);
        history.retain(|t| *t >= cutoff);
    }

    /// Recorded accesses for a key, oldest first.
    pub fn accesses(&self, key: &str, category: Category) -> &[DateTime<Utc>] {
        self.records
            .get(&record_key(key, category))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Accesses to a key within the window ending at `now`.
    pub fn access_count(&self, key: &str, category: Category, now: DateTime<Utc>) -> usize {
        let cutoff = window_start(now);
        self.accesses(key, category)
            .iter()
            .filter(|t| **t >= cutoff)
            .count()
    }

    /// Number of distinct keys with a history.
    pub fn tracked_keys(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    // == Most Accessed ==
    /// The `limit` busiest records within the window ending at `now`, by
    /// access count then name. Records with no access in the window are left out.
    pub fn most_accessed(&self, limit: usize, now: DateTime<Utc>) -> Vec<(String, usize)> {
        let cutoff = window_start(now);
        let mut ranked: Vec<(String, usize)> = self
            .records
            .iter()
            .map(|(name, history)| {
                let count = history.iter().filter(|t| **t >= cutoff).count();
                (name.clone(), count)
            })
            .filter(|(_, count)| *count > 0)
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(limit);
        ranked
    }

    // == Persistence ==
    /// Loads a persisted log. A missing or corrupt file yields an empty tracker.
    pub async fn load(fs: &dyn CacheFs, path: &Path) -> Self {
        let bytes = match fs.read(path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "access log unreadable, starting empty");
                }
                return Self::new();
            }
        };

        match serde_json::from_slice::<Self>(&bytes) {
            Ok(tracker) => {
                debug!(keys = tracker.tracked_keys(), "access log loaded");
                tracker
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "access log corrupt, starting empty");
                Self::new()
            }
        }
    }

    /// Writes the whole log to `path`.
    pub async fn save(&self, fs: &dyn CacheFs, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(self)?;
        fs.write(path, &bytes)
            .await
            .map_err(|e| CacheError::io(path, e))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::{Clock, ManualClock};
    use crate::cache::fs::MemoryFs;
    use std::sync::Arc;

    #[test]
    fn test_track_appends_in_order() {
        let mut tracker = AccessTracker::new();
        let t0 = Utc::now();

        tracker.track("7", Category::WorkItems, t0);
        tracker.track("7", Category::WorkItems, t0 + Duration::minutes(1));

        assert_eq!(
            tracker.accesses("7", Category::WorkItems),
            &[t0, t0 + Duration::minutes(1)]
        );
        assert!(tracker.accesses("7", Category::Queries).is_empty());
    }

    #[test]
    fn test_track_prunes_outside_window() {
        let mut tracker = AccessTracker::new();
        let t0 = Utc::now();

        tracker.track("7", Category::WorkItems, t0);
        tracker.track("7", Category::WorkItems, t0 + Duration::hours(12));
        tracker.track("7", Category::WorkItems, t0 + Duration::hours(25));

        assert_eq!(
            tracker.accesses("7", Category::WorkItems),
            &[t0 + Duration::hours(12), t0 + Duration::hours(25)]
        );
    }

    #[test]
    fn test_track_clamps_backwards_clock() {
        let mut tracker = AccessTracker::new();
        let t0 = Utc::now();

        tracker.track("k", Category::General, t0);
        tracker.track("k", Category::General, t0 - Duration::minutes(5));

        assert_eq!(tracker.accesses("k", Category::General), &[t0, t0]);
    }

    #[test]
    fn test_most_accessed_ranking() {
        let mut tracker = AccessTracker::new();
        let now = Utc::now();
        for _ in 0..3 {
            tracker.track("1", Category::WorkItems, now);
        }
        tracker.track("2", Category::WorkItems, now);
        tracker.track("open", Category::Queries, now);

        let top = tracker.most_accessed(2, now);
        assert_eq!(top[0], ("workitems:1".to_string(), 3));
        assert_eq!(top[1], ("queries:open".to_string(), 1));
    }

    #[test]
    fn test_queries_ignore_accesses_outside_window() {
        let mut tracker = AccessTracker::new();
        let t0 = Utc::now();
        tracker.track("1", Category::General, t0);
        tracker.track("1", Category::General, t0 + Duration::hours(20));
        tracker.track("2", Category::General, t0 + Duration::hours(20));

        let later = t0 + Duration::hours(30);
        assert_eq!(tracker.access_count("1", Category::General, later), 1);
        assert_eq!(
            tracker.most_accessed(10, later),
            vec![("general:1".to_string(), 1), ("general:2".to_string(), 1)]
        );

        let idle = t0 + Duration::hours(48);
        assert_eq!(tracker.access_count("1", Category::General, idle), 0);
        assert!(tracker.most_accessed(10, idle).is_empty());
        // Stored history is only pruned on the next track
        assert_eq!(tracker.accesses("1", Category::General).len(), 2);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let clock = Arc::new(ManualClock::default());
        let fs = MemoryFs::new(clock.clone());
        fs.create_dir_all(Path::new("/cache/metadata")).await.unwrap();
        let path = Path::new("/cache/metadata/access.log");

        let mut tracker = AccessTracker::new();
        tracker.track("42", Category::WorkItems, clock.now());
        tracker.save(&fs, path).await.unwrap();

        let loaded = AccessTracker::load(&fs, path).await;
        assert_eq!(loaded, tracker);
    }

    #[tokio::test]
    async fn test_load_fails_open() {
        let clock = Arc::new(ManualClock::default());
        let fs = MemoryFs::new(clock);
        let path = Path::new("/cache/metadata/access.log");

        assert!(AccessTracker::load(&fs, path).await.is_empty());

        fs.create_dir_all(Path::new("/cache/metadata")).await.unwrap();
        fs.write(path, b"[garbage").await.unwrap();
        assert!(AccessTracker::load(&fs, path).await.is_empty());
    }
}
