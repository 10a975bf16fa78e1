//! Cache Module
//!
//! Local disk cache for work-item data with TTL expiry, size-bounded eviction,
//! access tracking and predictive preloading.
//!
//! # Layout
//! ```text
//! <cache_dir>/
//!   workitems/  queries/  general/     value files, one per (category, key)
//!   metadata/                          TTL overrides and access.log
//! ```

mod access;
mod category;
mod clock;
mod entry;
mod evictor;
mod fs;
mod manager;
mod preload;
mod stats;


// Re-export public types
pub use access::{record_key, AccessTracker, ACCESS_WINDOW_HOURS};
pub use category::Category;
pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{key_hash, EntryMetadata, EntryStore, StoredEntry};
pub use evictor::{EvictionReport, Evictor};
pub use fs::{CacheFs, FileEntry, FileMeta, MemoryFs, TokioFs};
pub use manager::CacheManager;
pub use preload::{
    AdjacentIds, NoPreload, PendingPreload, PendingPreloads, PreloadJob, PreloadKey,
    PreloadStrategy, Preloader,
};
pub use stats::{CacheStats, FileStamp, SessionCounters};

// == Public Constants ==
/// Directory holding TTL metadata records and the access log
pub const METADATA_DIR: &str = "metadata";

/// File name of the persisted access log inside [`METADATA_DIR`]
pub const ACCESS_LOG_FILE: &str = "access.log";
