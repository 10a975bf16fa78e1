//! Background Tasks Module
//!
//! Contains background tasks that run alongside the cache.
//!
//! # Tasks
//! - Preload worker: drains the bounded preload queue and marks predicted keys

mod preload;

pub use preload::spawn_preload_worker;
