//! # Comment result cache
//!
//! The orchestrator reads and writes generated comments through the [`CacheGateway`] trait.
//! Any backend works as long as absence is reported as `Ok(None)` and failures as
//! [`CacheError`]; the orchestrator treats a failing cache as a miss and carries on.
//!
//! [`MemoryCache`] is the in-process backend: TTL with jitter, LRU eviction by entry count
//! and total size, and hit/miss statistics.
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_comment::cache::{CacheConfig, CacheGateway, CacheKey, CachedResult, MemoryCache};
//! use ouroboros_comment::{CommentRequest, RequestContext};
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let cache = MemoryCache::new(
//!     CacheConfig::builder()
//!         .default_ttl(Duration::from_secs(1800))
//!         .max_entries(10_000)
//!         .build(),
//! );
//!
//! let request = CommentRequest::new("fn add(a: i32, b: i32) -> i32 { a + b }");
//! let key = CacheKey::for_request(&request, "m1", &RequestContext::new("alice"));
//!
//! cache.put(&key, CachedResult::new("/// Adds two numbers", "m1")).await?;
//! assert!(cache.get(&key).await?.is_some());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod entry;
pub mod key;
pub mod store;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use entry::CacheEntry;
pub use key::CacheKey;
pub use store::{start_auto_cleanup, MemoryCache};
pub use types::CacheStats;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a cache backend
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backend unreachable or failed the operation
    #[error("Cache backend error: {0}")]
    Backend(String),

    /// Stored value could not be encoded or decoded
    #[error("Cache codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Entry cannot fit even after evicting everything else
    #[error("Cache size limit exceeded: entry of {needed} bytes, limit {limit} bytes")]
    CapacityExceeded { needed: usize, limit: usize },
}

/// What gets cached for a request. Request id and timings are never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedResult {
    pub content: String,
    pub model_used: String,
    pub cached_at: DateTime<Utc>,
}

impl CachedResult {
    pub fn new(content: impl Into<String>, model_used: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model_used: model_used.into(),
            cached_at: Utc::now(),
        }
    }
}

/// Storage used by the orchestrator to look up and remember generated comments
#[async_trait]
pub trait CacheGateway: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<CachedResult>, CacheError>;

    async fn put(&self, key: &CacheKey, value: CachedResult) -> Result<(), CacheError>;
}
