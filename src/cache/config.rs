//! Configuration for the in-memory comment cache

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`MemoryCache`](super::MemoryCache)
///
/// TTL jitter spreads the expiry of entries written in the same burst so they do not all
/// fall out of the cache at once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Time-to-live for cache entries
    pub default_ttl: Duration,

    /// Maximum number of entries in the cache
    pub max_entries: usize,

    /// Maximum total size of cached data in bytes
    pub max_size_bytes: usize,

    /// TTL jitter factor (0.0 - 1.0)
    pub ttl_jitter: f64,

    /// Interval for the background cleanup loop
    pub cleanup_interval: Duration,

    /// Refresh recency on reads; when false eviction is insertion order
    pub enable_lru_eviction: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(1800),
            max_entries: 10_000,
            // 64 MB
            max_size_bytes: 64 * 1024 * 1024,
            ttl_jitter: 0.1,
            cleanup_interval: Duration::from_secs(300),
            enable_lru_eviction: true,
        }
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("cache max_entries must be greater than 0".to_string());
        }

        if self.max_size_bytes == 0 {
            return Err("cache max_size_bytes must be greater than 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err("cache ttl_jitter must be between 0.0 and 1.0".to_string());
        }

        if self.default_ttl.is_zero() {
            return Err("cache default_ttl must be greater than 0".to_string());
        }

        Ok(())
    }

    /// TTL for a new entry, with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.default_ttl;
        }

        let base_secs = self.default_ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(0.001);

        Duration::from_secs_f64(final_secs)
    }

    /// Small cache for tests and local runs
    pub fn small() -> Self {
        Self {
            max_entries: 1_000,
            max_size_bytes: 8 * 1024 * 1024,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    default_ttl: Option<Duration>,
    max_entries: Option<usize>,
    max_size_bytes: Option<usize>,
    ttl_jitter: Option<f64>,
    cleanup_interval: Option<Duration>,
    enable_lru_eviction: Option<bool>,
}

impl CacheConfigBuilder {
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn max_size_bytes(mut self, size: usize) -> Self {
        self.max_size_bytes = Some(size);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    pub fn enable_lru_eviction(mut self, enable: bool) -> Self {
        self.enable_lru_eviction = Some(enable);
        self
    }

    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            max_entries: self.max_entries.unwrap_or(defaults.max_entries),
            max_size_bytes: self.max_size_bytes.unwrap_or(defaults.max_size_bytes),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            enable_lru_eviction: self
                .enable_lru_eviction
                .unwrap_or(defaults.enable_lru_eviction),
        }
    }
}
