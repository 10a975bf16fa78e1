//! Cache Manager Module
//!
//! Facade composing the entry store, access tracker, evictor and preloader
//! behind `init` / `get` / `set` / `preload` / `clear` / `stats`.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::access::AccessTracker;
use super::category::Category;
use super::clock::{Clock, SystemClock};
use super::entry::EntryStore;
use super::evictor::Evictor;
use super::fs::{CacheFs, TokioFs};
use super::preload::{AdjacentIds, PendingPreload, PreloadKey, PreloadStrategy, Preloader};
use super::stats::{CacheStats, SessionCounters};
use super::ACCESS_LOG_FILE;
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};

// == Cache Manager ==
/// The cache's public surface.
///
/// Construct once, call [`CacheManager::init`], then share by reference (or
/// behind an `Arc`) with whatever needs caching.
///
/// # Example
/// ```no_run
/// # async fn demo() -> workitem_cache::Result<()> {
/// use workitem_cache::{CacheConfig, CacheManager, Category};
///
/// let cache = CacheManager::new(CacheConfig::from_env());
/// cache.init().await?;
/// cache.set("42", &"Fix bug", Category::WorkItems, None).await?;
/// let title: Option<String> = cache.get("42", Category::WorkItems).await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct CacheManager {
    config: CacheConfig,
    fs: Arc<dyn CacheFs>,
    clock: Arc<dyn Clock>,
    store: Arc<EntryStore>,
    evictor: Evictor,
    access: Mutex<AccessTracker>,
    preloader: Preloader,
    counters: SessionCounters,
    initialized: AtomicBool,
}

impl CacheManager {
    // == Constructors ==
    /// Creates a manager on the real filesystem and wall clock, predicting
    /// adjacent work-item IDs.
    pub fn new(config: CacheConfig) -> Self {
        let strategy = Arc::new(AdjacentIds::new(config.preload_window));
        Self::with_dependencies(config, Arc::new(TokioFs), Arc::new(SystemClock), strategy)
    }

    /// Creates a manager with every collaborator injected.
    pub fn with_dependencies(
        config: CacheConfig,
        fs: Arc<dyn CacheFs>,
        clock: Arc<dyn Clock>,
        strategy: Arc<dyn PreloadStrategy>,
    ) -> Self {
        let store = Arc::new(EntryStore::new(
            config.cache_dir.clone(),
            Arc::clone(&fs),
            Arc::clone(&clock),
            config.max_age,
        ));

        Self {
            evictor: Evictor::new(config.max_size),
            preloader: Preloader::new(strategy, config.preload_queue_capacity),
            access: Mutex::new(AccessTracker::new()),
            counters: SessionCounters::new(),
            initialized: AtomicBool::new(false),
            config,
            fs,
            clock,
            store,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn access_log_path(&self) -> PathBuf {
        self.store.metadata_dir().join(ACCESS_LOG_FILE)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CacheError::NotInitialized)
        }
    }

    // == Init ==
    /// Creates the directory layout, loads the access log and starts the
    /// preload worker. Must run inside a tokio runtime.
    pub async fn init(&self) -> Result<()> {
        self.store.create_layout().await?;

        let tracker = AccessTracker::load(self.fs.as_ref(), &self.access_log_path()).await;
        let tracked = tracker.tracked_keys();
        *self.access.lock().await = tracker;

        self.preloader
            .start(Arc::clone(&self.store), Arc::clone(&self.clock));
        self.initialized.store(true, Ordering::SeqCst);

        info!(
            "Cache initialized at {} (max_age={}s, max_size={} bytes, tracked_keys={})",
            self.config.cache_dir.display(),
            self.config.max_age.as_secs(),
            self.config.max_size,
            tracked
        );
        Ok(())
    }

    // == Get ==
    /// Returns the cached value, or `None` on miss, expiry or read failure.
    ///
    /// A hit is recorded in the access log and queued for preload prediction.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, category: Category) -> Option<T> {
        if self.ensure_initialized().is_err() {
            warn!(%category, key, "get before init, treating as miss");
            return None;
        }

        let Some(value) = self.store.get(key, category).await else {
            self.counters.record_miss();
            debug!(%category, key, "cache miss");
            return None;
        };

        self.counters.record_hit();
        debug!(%category, key, "cache hit");
        self.track_access(key, category).await;
        self.preloader.submit(key, category);
        Some(value)
    }

    async fn track_access(&self, key: &str, category: Category) {
        let mut tracker = self.access.lock().await;
        tracker.track(key, category, self.clock.now());
        if let Err(e) = tracker.save(self.fs.as_ref(), &self.access_log_path()).await {
            warn!(error = %e, "failed to persist access log");
        }
    }

    // == Set ==
    /// Stores `value` and then enforces the size budget before returning.
    ///
    /// # Arguments
    /// * `ttl` - Per-entry TTL; the configured `max_age` applies when `None`
    ///
    /// # Errors
    /// Write and encoding failures propagate. Eviction never fails the call.
    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        category: Category,
        ttl: Option<Duration>,
    ) -> Result<()> {
        self.ensure_initialized()?;
        self.store.set(key, category, value, ttl).await?;

        let report = self.evictor.enforce_size(&self.store).await;
        if report.evicted > 0 {
            self.counters.record_evictions(report.evicted as u64);
        }
        Ok(())
    }

    // == Remove ==
    /// Invalidates a single entry. Returns whether a value was stored.
    pub async fn remove(&self, key: &str, category: Category) -> Result<bool> {
        self.ensure_initialized()?;
        let removed = self.store.remove(key, category).await?;
        self.preloader.pending().unmark(category, key);
        Ok(removed)
    }

    // == Preload ==
    /// Returns values for every item, fetching the uncached ones in one call.
    ///
    /// `fetcher` receives the uncached items in input order and must return
    /// their values in the same order. It is not called when everything is
    /// cached. Fetched values are stored with the default TTL. The result holds
    /// cached values first, then fetched ones.
    ///
    /// # Errors
    /// A fetcher failure is returned as [`CacheError::Fetch`]; a failure storing
    /// a fetched value propagates as from [`CacheManager::set`].
    pub async fn preload<I, T, F, Fut>(
        &self,
        items: Vec<I>,
        fetcher: F,
        category: Category,
    ) -> Result<Vec<T>>
    where
        I: PreloadKey,
        T: Serialize + DeserializeOwned,
        F: FnOnce(Vec<I>) -> Fut,
        Fut: Future<Output = anyhow::Result<Vec<T>>>,
    {
        self.ensure_initialized()?;

        let mut results = Vec::with_capacity(items.len());
        let mut missing_items = Vec::new();
        let mut missing_keys = Vec::new();

        for item in items {
            let Some(key) = item.preload_key() else {
                warn!(%category, "preload item has no key, skipping");
                continue;
            };
            match self.store.get::<T>(&key, category).await {
                Some(value) => results.push(value),
                None => {
                    missing_keys.push(key);
                    missing_items.push(item);
                }
            }
        }

        if missing_items.is_empty() {
            debug!(%category, cached = results.len(), "preload fully cached");
            return Ok(results);
        }

        debug!(%category, cached = results.len(), missing = missing_keys.len(), "preload fetching");
        let fetched = fetcher(missing_items).await.map_err(CacheError::Fetch)?;

        if fetched.len() != missing_keys.len() {
            warn!(
                %category,
                requested = missing_keys.len(),
                returned = fetched.len(),
                "fetcher returned a different number of values"
            );
        }

        let stored = missing_keys.len().min(fetched.len());
        for (key, value) in missing_keys.iter().zip(&fetched) {
            self.set(key, value, category, None).await?;
            self.preloader.pending().unmark(category, key);
        }

        results.extend(fetched.into_iter().take(stored));
        Ok(results)
    }

    // == Pending Preloads ==
    /// Keys predicted by recent hits and not yet cached.
    pub fn pending_preloads(&self) -> Vec<PendingPreload> {
        self.preloader.pending().snapshot()
    }

    /// Removes and returns the pending keys of one category.
    pub fn take_pending(&self, category: Category) -> Vec<String> {
        self.preloader.pending().take(category)
    }

    /// Waits until every queued preload prediction has been handled.
    pub async fn flush_preloads(&self) {
        self.preloader.flush().await;
    }

    // == Clear ==
    /// Deletes the whole cache directory, forgets pending preloads and
    /// re-initializes.
    pub async fn clear(&self) -> Result<()> {
        self.ensure_initialized()?;

        let root = self.store.root();
        match self.fs.remove_dir_all(root).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(root, e)),
        }
        self.preloader.pending().clear();
        info!("Cache cleared at {}", root.display());

        self.init().await
    }

    // == Stats ==
    /// Walks the store and reports usage.
    pub async fn stats(&self) -> Result<CacheStats> {
        self.ensure_initialized()?;
        let entries = self.store.list_entries().await;
        Ok(CacheStats::from_entries(&entries, self.config.max_size).with_counters(&self.counters))
    }

    // == Access Insight ==
    /// Writes the access log to `metadata/access.log`.
    pub async fn save_access_log(&self) -> Result<()> {
        self.access
            .lock()
            .await
            .save(self.fs.as_ref(), &self.access_log_path())
            .await
    }

    /// Accesses to a key within the trailing window.
    pub async fn access_count(&self, key: &str, category: Category) -> usize {
        self.access
            .lock()
            .await
            .access_count(key, category, self.clock.now())
    }

    /// The busiest `category:key` records within the trailing window.
    pub async fn most_accessed(&self, limit: usize) -> Vec<(String, usize)> {
        self.access
            .lock()
            .await
            .most_accessed(limit, self.clock.now())
    }

    // == Shutdown ==
    /// Drains queued preload predictions and persists the access log.
    pub async fn shutdown(&self) {
        self.preloader.shutdown().await;
        if self.initialized.load(Ordering::SeqCst) {
            if let Err(e) = self.save_access_log().await {
                warn!(error = %e, "failed to persist access log on shutdown");
            }
        }
        info!("Cache manager shut down");
    }
}
