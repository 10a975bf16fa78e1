//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default TTL applied to entries stored without one (one hour).
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60 * 60);

/// Default on-disk size budget (100 MB).
pub const DEFAULT_MAX_SIZE: u64 = 100 * 1024 * 1024;

/// Default number of neighbouring IDs considered on each side of a hit.
pub const DEFAULT_PRELOAD_WINDOW: u64 = 2;

/// Upper bound on the preload window; larger settings are clamped.
pub const MAX_PRELOAD_WINDOW: u64 = 100;

/// Default capacity of the background preload queue.
pub const DEFAULT_PRELOAD_QUEUE_CAPACITY: usize = 64;

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory holding the category partitions and metadata
    pub cache_dir: PathBuf,
    /// Default TTL for entries without an explicit TTL
    pub max_age: Duration,
    /// Total size budget in bytes across all categories
    pub max_size: u64,
    /// How many IDs on each side of a numeric hit are considered for preloading
    pub preload_window: u64,
    /// Bounded capacity of the background preload queue
    pub preload_queue_capacity: usize,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `WORKITEM_CACHE_DIR` - Cache root directory (default: platform cache dir)
    /// - `WORKITEM_CACHE_MAX_AGE` - Default TTL in seconds (default: 3600)
    /// - `WORKITEM_CACHE_MAX_SIZE` - Size budget in bytes (default: 100 MB)
    /// - `WORKITEM_CACHE_PRELOAD_WINDOW` - Adjacent IDs per side (default: 2, max: 100)
    /// - `WORKITEM_CACHE_PRELOAD_QUEUE` - Preload queue capacity (default: 64)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source, such as a map in tests.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse_var = |name: &str| lookup(name).map(|v| v.trim().to_string());

        Self {
            cache_dir: lookup("WORKITEM_CACHE_DIR")
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            max_age: parse_var("WORKITEM_CACHE_MAX_AGE")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_age),
            max_size: parse_var("WORKITEM_CACHE_MAX_SIZE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_size),
            preload_window: parse_var("WORKITEM_CACHE_PRELOAD_WINDOW")
                .and_then(|v| v.parse::<u64>().ok())
                .map(|window| window.min(MAX_PRELOAD_WINDOW))
                .unwrap_or(defaults.preload_window),
            preload_queue_capacity: parse_var("WORKITEM_CACHE_PRELOAD_QUEUE")
                .and_then(|v| v.parse().ok())
                .filter(|capacity: &usize| *capacity > 0)
                .unwrap_or(defaults.preload_queue_capacity),
        }
    }

    /// Overrides the cache root directory.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = cache_dir.into();
        self
    }

    /// Overrides the default TTL.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Overrides the size budget in bytes.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    /// Overrides the adjacent-ID preload window, clamped to [`MAX_PRELOAD_WINDOW`].
    pub fn with_preload_window(mut self, window: u64) -> Self {
        self.preload_window = window.min(MAX_PRELOAD_WINDOW);
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        let base = dirs::cache_dir().unwrap_or_else(env::temp_dir);

        Self {
            cache_dir: base.join("workitem-cache"),
            max_age: DEFAULT_MAX_AGE,
            max_size: DEFAULT_MAX_SIZE,
            preload_window: DEFAULT_PRELOAD_WINDOW,
            preload_queue_capacity: DEFAULT_PRELOAD_QUEUE_CAPACITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_config_default() {
        let config = CacheConfig::default();
        assert_eq!(config.max_age, Duration::from_secs(3600));
        assert_eq!(config.max_size, 100 * 1024 * 1024);
        assert_eq!(config.preload_window, 2);
        assert_eq!(config.preload_queue_capacity, 64);
        assert!(config.cache_dir.ends_with("workitem-cache"));
    }

    #[test]
    fn test_config_from_lookup() {
        let config = CacheConfig::from_lookup(lookup(&[
            ("WORKITEM_CACHE_DIR", "/tmp/wi-cache-test"),
            ("WORKITEM_CACHE_MAX_AGE", " 120 "),
            ("WORKITEM_CACHE_MAX_SIZE", "not-a-number"),
            ("WORKITEM_CACHE_PRELOAD_WINDOW", "5"),
            ("WORKITEM_CACHE_PRELOAD_QUEUE", "0"),
        ]));

        assert_eq!(config.cache_dir, PathBuf::from("/tmp/wi-cache-test"));
        assert_eq!(config.max_age, Duration::from_secs(120));
        assert_eq!(config.max_size, DEFAULT_MAX_SIZE);
        assert_eq!(config.preload_window, 5);
        assert_eq!(config.preload_queue_capacity, DEFAULT_PRELOAD_QUEUE_CAPACITY);
    }

    #[test]
    fn test_config_from_empty_lookup_uses_defaults() {
        let config = CacheConfig::from_lookup(lookup(&[]));
        let defaults = CacheConfig::default();

        assert_eq!(config.cache_dir, defaults.cache_dir);
        assert_eq!(config.max_age, DEFAULT_MAX_AGE);
        assert_eq!(config.preload_window, DEFAULT_PRELOAD_WINDOW);
    }

    #[test]
    fn test_preload_window_is_capped() {
        let config = CacheConfig::from_lookup(lookup(&[(
            "WORKITEM_CACHE_PRELOAD_WINDOW",
            "18446744073709551615",
        )]));
        assert_eq!(config.preload_window, MAX_PRELOAD_WINDOW);

        let config = CacheConfig::default().with_preload_window(3_000_000);
        assert_eq!(config.preload_window, MAX_PRELOAD_WINDOW);
    }

    #[test]
    fn test_config_builders() {
        let config = CacheConfig::default()
            .with_cache_dir("/var/cache/wi")
            .with_max_age(Duration::from_secs(5))
            .with_max_size(1024)
            .with_preload_window(0);

        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/wi"));
        assert_eq!(config.max_age, Duration::from_secs(5));
        assert_eq!(config.max_size, 1024);
        assert_eq!(config.preload_window, 0);
    }
}
