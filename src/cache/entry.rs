//! Cache entries with TTL

use chrono::{DateTime, Utc};
use std::time::Duration;

/// A stored comment with its expiry and access bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// JSON-encoded [`CachedResult`](super::CachedResult)
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub size_bytes: usize,
}

impl CacheEntry {
    pub fn new(key: &str, value: String, ttl: Duration) -> Self {
        let now = Utc::now();
        let expires_at =
            now + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(1800));
        let size_bytes = key.len() + value.len() + std::mem::size_of::<Self>();

        Self {
            value,
            created_at: now,
            accessed_at: now,
            expires_at,
            access_count: 0,
            size_bytes,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Record a read
    pub fn mark_accessed(&mut self) {
        self.accessed_at = Utc::now();
        self.access_count += 1;
    }

    pub fn age(&self) -> Duration {
        (Utc::now() - self.created_at)
            .to_std()
            .unwrap_or(Duration::from_secs(0))
    }
}
