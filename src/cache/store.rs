//! In-memory cache backend with TTL expiry and LRU eviction

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::{
    config::CacheConfig, entry::CacheEntry, key::CacheKey, types::CacheStats, CacheError,
    CacheGateway, CachedResult,
};

/// Process-local [`CacheGateway`]
///
/// Cloning shares the underlying store.
#[derive(Clone)]
pub struct MemoryCache {
    config: CacheConfig,
    store: Arc<RwLock<CacheStore>>,
}

#[derive(Default)]
struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    /// Front is the next eviction candidate
    lru_queue: VecDeque<String>,
    stats: CacheStats,
    current_size_bytes: usize,
}

impl CacheStore {
    fn remove_entry(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.lru_queue.retain(|k| k != key);
        self.current_size_bytes = self.current_size_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }

    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }

    fn sync_stats(&mut self) {
        self.stats.entries = self.entries.len();
        self.stats.size_bytes = self.current_size_bytes;
    }
}

impl MemoryCache {
    pub fn new(config: CacheConfig) -> Self {
        info!("Initializing comment cache with config: {:?}", config);

        Self {
            config,
            store: Arc::new(RwLock::new(CacheStore::default())),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Store an encoded value under `key`, evicting older entries as needed.
    pub async fn insert(&self, key: &str, value: String) -> Result<(), CacheError> {
        let ttl = self.config.ttl_with_jitter();
        let entry = CacheEntry::new(key, value, ttl);
        let needed = entry.size_bytes;

        if needed > self.config.max_size_bytes {
            warn!(
                "Cache entry of {} bytes exceeds the {} byte limit, not stored",
                needed, self.config.max_size_bytes
            );
            return Err(CacheError::CapacityExceeded {
                needed,
                limit: self.config.max_size_bytes,
            });
        }

        let mut store = self.store.write().await;

        // A replaced entry frees its own slot first
        store.remove_entry(key);
        self.evict_if_needed(&mut store, needed);

        debug!("Caching comment: {}", key);
        store.entries.insert(key.to_string(), entry);
        store.lru_queue.push_back(key.to_string());
        store.current_size_bytes += needed;
        store.sync_stats();

        Ok(())
    }

    /// Encoded value for `key`, if present and not expired
    pub async fn lookup(&self, key: &str) -> Option<String> {
        let mut store = self.store.write().await;

        let expired = match store.entries.get(key) {
            None => {
                debug!("Cache miss: {}", key);
                store.stats.misses += 1;
                return None;
            }
            Some(entry) => entry.is_expired(),
        };

        if expired {
            debug!("Cache entry expired: {}", key);
            store.remove_entry(key);
            store.stats.misses += 1;
            store.stats.evictions_ttl += 1;
            store.sync_stats();
            return None;
        }

        let value = store.entries.get_mut(key).map(|entry| {
            entry.mark_accessed();
            entry.value.clone()
        });
        if self.config.enable_lru_eviction {
            store.touch(key);
        }
        store.stats.hits += 1;

        debug!("Cache hit: {}", key);
        value
    }

    /// Drop one entry. Returns whether it existed.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let mut store = self.store.write().await;
        let removed = store.remove_entry(key.as_str()).is_some();
        if removed {
            store.stats.invalidations += 1;
            store.sync_stats();
            debug!("Removed cache entry: {}", key);
        }
        removed
    }

    /// Drop everything
    pub async fn clear(&self) {
        let mut store = self.store.write().await;

        let count = store.entries.len();
        store.entries.clear();
        store.lru_queue.clear();
        store.current_size_bytes = 0;
        store.stats.invalidations += count as u64;
        store.sync_stats();

        info!("Cleared {} entries from comment cache", count);
    }

    /// Remove expired entries, returning how many were dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let mut store = self.store.write().await;

        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            store.remove_entry(key);
        }
        store.stats.evictions_ttl += expired.len() as u64;
        store.sync_stats();

        if !expired.is_empty() {
            debug!("Cleaned up {} expired entries", expired.len());
        }
        expired.len()
    }

    pub async fn stats(&self) -> CacheStats {
        self.store.read().await.stats.clone()
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.entries.is_empty()
    }

    fn evict_if_needed(&self, store: &mut CacheStore, needed_size: usize) {
        while store.entries.len() >= self.config.max_entries
            || store.current_size_bytes + needed_size > self.config.max_size_bytes
        {
            match store.lru_queue.pop_front() {
                Some(key) => {
                    debug!("Evicting cache entry: {}", key);
                    store.remove_entry(&key);
                    store.stats.evictions_size += 1;
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl CacheGateway for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResult>, CacheError> {
        match self.lookup(key.as_str()).await {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &CacheKey, value: CachedResult) -> Result<(), CacheError> {
        let raw = serde_json::to_string(&value)?;
        self.insert(key.as_str(), raw).await
    }
}

/// Periodically drop expired entries. Runs until the task is aborted.
pub async fn start_auto_cleanup(cache: MemoryCache) {
    let interval = cache.config.cleanup_interval;

    info!("Starting comment cache cleanup task (interval: {:?})", interval);

    loop {
        tokio::time::sleep(interval).await;
        let removed = cache.cleanup_expired().await;
        if removed > 0 {
            debug!("Auto cleanup removed {} entries", removed);
        }
    }
}
