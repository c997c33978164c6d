// Copyright (c) Questline, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Generic TTL (Time-To-Live) cache for reducing RPC calls.
//!
//! The transaction builder reads slow-changing ledger facts (the minter
//! account's existence and active flag, the chain id) on every build; a
//! short TTL keeps those reads off the hot path without ever caching the
//! freshness anchor, which must be fetched per submission attempt.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

#[derive(Debug)]
pub struct TtlCache<T: Clone + Send + Sync> {
    slot: RwLock<Option<(T, Instant)>>,
    cache_duration: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<T: Clone + Send + Sync> TtlCache<T> {
    pub fn new(cache_duration: Duration) -> Self {
        Self {
            slot: RwLock::new(None),
            cache_duration,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn with_secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    /// Return the cached value if it has not expired.
    pub async fn get_if_valid(&self) -> Option<T> {
        let slot = self.slot.read().await;
        if let Some((value, updated_at)) = slot.as_ref() {
            if updated_at.elapsed() < self.cache_duration {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(value.clone());
            }
        }
        None
    }

    /// Store a fresh value, restarting the TTL.
    pub async fn update(&self, value: T) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        let mut slot = self.slot.write().await;
        *slot = Some((value, Instant::now()));
    }

    /// Force the next access to fetch fresh data.
    pub async fn invalidate(&self) {
        let mut slot = self.slot.write().await;
        *slot = None;
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_update_and_get() {
        let cache = TtlCache::<bool>::with_secs(10);
        assert!(cache.get_if_valid().await.is_none());

        cache.update(true).await;
        assert_eq!(cache.get_if_valid().await, Some(true));

        cache.update(false).await;
        assert_eq!(cache.get_if_valid().await, Some(false));
    }

    #[tokio::test]
    async fn test_expiration() {
        let cache = TtlCache::<u64>::new(Duration::from_millis(50));
        cache.update(100).await;
        assert_eq!(cache.get_if_valid().await, Some(100));

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(cache.get_if_valid().await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = TtlCache::<u8>::with_secs(100);
        cache.update(7).await;
        cache.invalidate().await;
        assert!(cache.get_if_valid().await.is_none());
    }

    #[tokio::test]
    async fn test_stats() {
        let cache = TtlCache::<u64>::with_secs(100);
        cache.update(42).await;
        let _ = cache.get_if_valid().await;
        let _ = cache.get_if_valid().await;
        let _ = cache.get_if_valid().await;

        let stats = cache.stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 0.75).abs() < 0.01);
    }
}
