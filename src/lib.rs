//! Work-item cache - a local disk cache for remote project-management data
//!
//! Reduces redundant API round-trips with TTL-based expiry, bounds disk usage
//! with oldest-first eviction, and predicts the next work items to fetch from
//! recent hits.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{CacheManager, CacheStats, Category};
pub use config::CacheConfig;
pub use error::{CacheError, Result};
