//! Preload Module
//!
//! Predicts which entries will be requested next and records them as pending
//! so the calling layer can fetch them in one batch.
//!
//! Cache hits are submitted to a bounded queue as bare `(key, category)`
//! pairs. The background worker (see [`crate::tasks`]) runs the strategy, so
//! prediction cost never lands on the hit.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::category::Category;
use super::clock::Clock;
use super::entry::EntryStore;
use crate::config::MAX_PRELOAD_WINDOW;
use crate::tasks::spawn_preload_worker;

// == Strategy ==
/// Decides which keys are worth preloading after a hit on `key`.
pub trait PreloadStrategy: Send + Sync + Debug {
    fn candidates(&self, key: &str, category: Category) -> Vec<String>;
}

/// Treats work-item keys as points in a numeric ID space and predicts the
/// `window` IDs on either side.
///
/// Only applies to [`Category::WorkItems`] and keys made purely of ASCII
/// digits that fit in a `u64`. The window is capped at [`MAX_PRELOAD_WINDOW`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdjacentIds {
    window: u64,
}

impl AdjacentIds {
    pub fn new(window: u64) -> Self {
        Self {
            window: window.min(MAX_PRELOAD_WINDOW),
        }
    }

    pub fn window(&self) -> u64 {
        self.window
    }
}

impl PreloadStrategy for AdjacentIds {
    fn candidates(&self, key: &str, category: Category) -> Vec<String> {
        if category != Category::WorkItems
            || key.is_empty()
            || !key.bytes().all(|b| b.is_ascii_digit())
        {
            return Vec::new();
        }
        let Ok(id) = key.parse::<u64>() else {
            return Vec::new();
        };

        let low = id.saturating_sub(self.window);
        let high = id.saturating_add(self.window);
        (low..=high)
            .filter(|n| *n != id)
            .map(|n| n.to_string())
            .collect()
    }
}

/// Never predicts anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPreload;

impl PreloadStrategy for NoPreload {
    fn candidates(&self, _key: &str, _category: Category) -> Vec<String> {
        Vec::new()
    }
}

// == Batch Item Keys ==
/// Extracts the cache key from an item handed to a batch preload.
pub trait PreloadKey {
    fn preload_key(&self) -> Option<String>;
}

impl PreloadKey for String {
    fn preload_key(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl PreloadKey for &str {
    fn preload_key(&self) -> Option<String> {
        Some((*self).to_string())
    }
}

impl PreloadKey for u64 {
    fn preload_key(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl PreloadKey for u32 {
    fn preload_key(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl PreloadKey for i64 {
    fn preload_key(&self) -> Option<String> {
        Some(self.to_string())
    }
}

/// Strings and numbers are the key; objects use their `id` field.
impl PreloadKey for Value {
    fn preload_key(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Object(map) => map.get("id").and_then(|id| match id {
                Value::Object(_) => None,
                other => other.preload_key(),
            }),
            _ => None,
        }
    }
}

// == Pending Preloads ==
/// A key predicted to be needed soon and not yet cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPreload {
    pub category: Category,
    pub key: String,
    pub marked_at: DateTime<Utc>,
}

/// Set of pending preload marks.
#[derive(Debug, Default)]
pub struct PendingPreloads {
    marks: Mutex<HashMap<(Category, String), DateTime<Utc>>>,
}

impl PendingPreloads {
    fn lock(&self) -> MutexGuard<'_, HashMap<(Category, String), DateTime<Utc>>> {
        self.marks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a mark. Returns false if the key was already pending.
    pub fn mark(&self, category: Category, key: String, at: DateTime<Utc>) -> bool {
        let mut marks = self.lock();
        if marks.contains_key(&(category, key.clone())) {
            return false;
        }
        marks.insert((category, key), at);
        true
    }

    pub fn is_pending(&self, category: Category, key: &str) -> bool {
        self.lock().contains_key(&(category, key.to_string()))
    }

    pub fn unmark(&self, category: Category, key: &str) -> bool {
        self.lock().remove(&(category, key.to_string())).is_some()
    }

    /// All marks, oldest first.
    pub fn snapshot(&self) -> Vec<PendingPreload> {
        let mut pending: Vec<PendingPreload> = self
            .lock()
            .iter()
            .map(|((category, key), marked_at)| PendingPreload {
                category: *category,
                key: key.clone(),
                marked_at: *marked_at,
            })
            .collect();
        pending.sort_by(|a, b| {
            a.marked_at
                .cmp(&b.marked_at)
                .then_with(|| a.category.cmp(&b.category))
                .then_with(|| a.key.cmp(&b.key))
        });
        pending
    }

    /// Removes and returns every pending key of `category`, oldest mark first.
    pub fn take(&self, category: Category) -> Vec<String> {
        let mut marks = self.lock();
        let mut taken: Vec<(DateTime<Utc>, String)> = marks
            .iter()
            .filter(|((c, _), _)| *c == category)
            .map(|((_, key), at)| (*at, key.clone()))
            .collect();
        marks.retain(|(c, _), _| *c != category);
        drop(marks);

        taken.sort();
        taken.into_iter().map(|(_, key)| key).collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

// == Preload Jobs ==
/// Work item for the background preload worker.
#[derive(Debug)]
pub enum PreloadJob {
    /// A cache hit to predict from
    Hit { key: String, category: Category },
    /// Reply once every job queued before this one has been handled
    Flush(oneshot::Sender<()>),
}

// == Preloader ==
/// Front end of the bounded preload queue.
#[derive(Debug)]
pub struct Preloader {
    strategy: Arc<dyn PreloadStrategy>,
    pending: Arc<PendingPreloads>,
    sender: Mutex<Option<mpsc::Sender<PreloadJob>>>,
    receiver: Mutex<Option<mpsc::Receiver<PreloadJob>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Preloader {
    /// Creates the queue. No task is spawned until [`Preloader::start`].
    pub fn new(strategy: Arc<dyn PreloadStrategy>, capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            strategy,
            pending: Arc::new(PendingPreloads::default()),
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
        }
    }

    pub fn pending(&self) -> &PendingPreloads {
        &self.pending
    }

    /// Spawns the worker on the current runtime. Later calls are no-ops.
    pub fn start(&self, store: Arc<EntryStore>, clock: Arc<dyn Clock>) {
        let Some(receiver) = lock(&self.receiver).take() else {
            return;
        };
        let handle = spawn_preload_worker(
            receiver,
            Arc::clone(&self.strategy),
            store,
            Arc::clone(&self.pending),
            clock,
        );
        *lock(&self.worker) = Some(handle);
    }

    // == Submit ==
    /// Queues a hit for preload marking without waiting.
    ///
    /// Returns false when nothing was queued because the queue is full or the
    /// preloader has shut down.
    pub fn submit(&self, key: &str, category: Category) -> bool {
        let guard = lock(&self.sender);
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        match sender.try_send(PreloadJob::Hit {
            key: key.to_string(),
            category,
        }) {
            Ok(()) => true,
            Err(e) => {
                debug!(%category, key, error = %e, "preload job dropped");
                false
            }
        }
    }

    // == Flush ==
    /// Waits until every job submitted so far has been handled.
    pub async fn flush(&self) {
        if lock(&self.worker).is_none() {
            return;
        }
        let Some(sender) = lock(&self.sender).clone() else {
            return;
        };

        let (done, wait) = oneshot::channel();
        if sender.send(PreloadJob::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    // == Shutdown ==
    /// Closes the queue and waits for the worker to drain what is left.
    pub async fn shutdown(&self) {
        lock(&self.sender).take();
        lock(&self.receiver).take();

        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!(error = %e, "preload worker ended abnormally");
            }
            info!("Preloader shut down");
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::clock::ManualClock;
    use crate::cache::fs::MemoryFs;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_adjacent_ids_window() {
        let strategy = AdjacentIds::new(2);
        assert_eq!(
            strategy.candidates("42", Category::WorkItems),
            vec!["40", "41", "43", "44"]
        );
    }

    #[test]
    fn test_adjacent_ids_near_zero() {
        let strategy = AdjacentIds::new(2);
        assert_eq!(strategy.candidates("0", Category::WorkItems), vec!["1", "2"]);
        assert_eq!(
            strategy.candidates("1", Category::WorkItems),
            vec!["0", "2", "3"]
        );
    }

    #[test]
    fn test_adjacent_ids_ignores_other_keys_and_categories() {
        let strategy = AdjacentIds::new(2);
        assert!(strategy.candidates("42", Category::Queries).is_empty());
        assert!(strategy.candidates("PROJ-42", Category::WorkItems).is_empty());
        assert!(strategy.candidates("-3", Category::WorkItems).is_empty());
        assert!(strategy.candidates("", Category::WorkItems).is_empty());
        assert!(strategy
            .candidates("99999999999999999999999", Category::WorkItems)
            .is_empty());
    }

    #[test]
    fn test_no_preload() {
        assert!(NoPreload.candidates("42", Category::WorkItems).is_empty());
    }

    #[test]
    fn test_preload_keys() {
        assert_eq!("7".preload_key().as_deref(), Some("7"));
        assert_eq!(7u64.preload_key().as_deref(), Some("7"));
        assert_eq!(json!(7).preload_key().as_deref(), Some("7"));
        assert_eq!(json!({"id": 12, "title": "x"}).preload_key().as_deref(), Some("12"));
        assert_eq!(json!({"id": "PROJ-1"}).preload_key().as_deref(), Some("PROJ-1"));
        assert_eq!(json!({"title": "no id"}).preload_key(), None);
        assert_eq!(json!(null).preload_key(), None);
    }

    #[test]
    fn test_pending_mark_take_and_unmark() {
        let pending = PendingPreloads::default();
        let t0 = Utc::now();

        assert!(pending.mark(Category::WorkItems, "2".into(), t0));
        assert!(!pending.mark(Category::WorkItems, "2".into(), t0));
        assert!(pending.mark(Category::WorkItems, "1".into(), t0 + chrono::Duration::seconds(1)));
        assert!(pending.mark(Category::Queries, "q".into(), t0));

        assert!(pending.unmark(Category::Queries, "q"));
        assert_eq!(pending.take(Category::WorkItems), vec!["2", "1"]);
        assert!(pending.is_empty());
    }

    async fn store(clock: Arc<ManualClock>) -> Arc<EntryStore> {
        let fs = Arc::new(MemoryFs::new(clock.clone()));
        let store = EntryStore::new("/cache", fs, clock, Duration::from_secs(3600));
        store.create_layout().await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_worker_marks_uncached_neighbours() {
        let clock = Arc::new(ManualClock::default());
        let store = store(clock.clone()).await;
        store.set("41", Category::WorkItems, &"cached", None).await.unwrap();

        let preloader = Preloader::new(Arc::new(AdjacentIds::new(1)), 8);
        preloader.start(store, clock.clone());

        assert!(preloader.submit("42", Category::WorkItems));
        preloader.flush().await;

        let pending = preloader.pending().snapshot();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key, "43");
        assert_eq!(pending[0].marked_at, clock.now());
    }

    #[test]
    fn test_adjacent_ids_window_is_capped() {
        let strategy = AdjacentIds::new(u64::MAX);
        assert_eq!(strategy.window(), MAX_PRELOAD_WINDOW);

        let candidates = strategy.candidates("5000000", Category::WorkItems);
        assert_eq!(candidates.len() as u64, 2 * MAX_PRELOAD_WINDOW);
    }

    #[derive(Debug)]
    struct CountingStrategy {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl PreloadStrategy for CountingStrategy {
        fn candidates(&self, key: &str, category: Category) -> Vec<String> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            AdjacentIds::new(1).candidates(key, category)
        }
    }

    #[tokio::test]
    async fn test_submit_defers_strategy_to_worker() {
        let clock = Arc::new(ManualClock::default());
        let store = store(clock.clone()).await;
        let strategy = Arc::new(CountingStrategy {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let preloader = Preloader::new(strategy.clone(), 8);

        // Nothing runs the strategy until the worker is started
        assert!(preloader.submit("42", Category::WorkItems));
        assert!(preloader.submit("open-bugs", Category::Queries));
        assert_eq!(strategy.calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        preloader.start(store, clock);
        preloader.flush().await;

        assert_eq!(strategy.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
        let mut keys: Vec<String> = preloader
            .pending()
            .snapshot()
            .into_iter()
            .map(|p| p.key)
            .collect();
        keys.sort();
        assert_eq!(keys, vec!["41", "43"]);
    }

    #[tokio::test]
    async fn test_full_queue_drops_jobs() {
        // No worker started, so nothing drains the queue
        let preloader = Preloader::new(Arc::new(AdjacentIds::new(1)), 1);
        assert!(preloader.submit("10", Category::WorkItems));
        assert!(!preloader.submit("20", Category::WorkItems));
        preloader.flush().await;
    }

    #[tokio::test]
    async fn test_shutdown_drains_and_closes() {
        let clock = Arc::new(ManualClock::default());
        let store = store(clock.clone()).await;
        let preloader = Preloader::new(Arc::new(AdjacentIds::new(1)), 8);
        preloader.start(store, clock);

        assert!(preloader.submit("5", Category::WorkItems));
        preloader.shutdown().await;

        assert_eq!(preloader.pending().len(), 2);
        assert!(!preloader.submit("9", Category::WorkItems));
    }
}
