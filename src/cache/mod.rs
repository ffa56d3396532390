//! Listing and content caches
//!
//! Two independent cache roles back every storage backend:
//!
//! - **Listing cache**: directory or prefix → children found when it was
//!   scanned. The data file tree grows without bound, so every entry expires.
//! - **Content cache**: record identifier → raw file content. Data files are
//!   immutable once written, so entries are evicted only by capacity or by an
//!   explicit [`ContentCache::discard`] on write intent.
//!
//! Each role can be held in process memory, in a shared Redis service, or (for
//! content) mirrored to a local directory. Caches are created once at startup
//! with [`Caches::from_config`] and shared by every query.

pub mod filesystem;
pub mod memory;
pub mod remote;

pub use filesystem::FileSystemContentCache;
pub use memory::{MemoryContentCache, MemoryListingCache};
pub use remote::{RedisContentCache, RedisListingCache};

use crate::config::{CacheBackendKind, CacheConfig};
use crate::error::Result;
use crate::metrics;
use crate::redis::{RedisConfig, RedisPool};
use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Hit and miss counters of one cache
#[derive(Debug)]
pub struct CacheStats {
    role: &'static str,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    /// Create counters for a cache role (`"listing"` or `"content"`)
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Record a hit
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(self.role, true);
    }

    /// Record a miss
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_lookup(self.role, false);
    }

    /// Record the outcome of a lookup and pass it through
    pub fn record<T>(&self, result: Option<T>) -> Option<T> {
        if result.is_some() {
            self.record_hit();
        } else {
            self.record_miss();
        }
        result
    }

    /// Total hits
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits();
        let misses = self.misses();
        let total = hits + misses;
        CacheStatsSnapshot {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    /// Total cache hits
    pub hits: u64,
    /// Total cache misses
    pub misses: u64,
    /// Hit rate (0.0 to 1.0)
    pub hit_rate: f64,
}

/// Cache of directory or prefix listings
#[async_trait]
pub trait ListingCache: Send + Sync + 'static {
    /// Children cached for `key`, if present and not expired
    async fn get(&self, key: &str) -> Option<Vec<String>>;

    /// Cache the children of `key` for `ttl`; false if the entry was not stored
    async fn set(&self, key: &str, children: &[String], ttl: Duration) -> bool;

    /// Remove the entry for `key`
    async fn discard(&self, key: &str);

    /// Hit and miss counters
    fn stats(&self) -> &CacheStats;
}

/// Cache of immutable file content
#[async_trait]
pub trait ContentCache: Send + Sync + 'static {
    /// Content cached for `key`
    async fn get(&self, key: &str) -> Option<Bytes>;

    /// Cache content under `key`; false if the entry was not stored
    async fn set(&self, key: &str, content: Bytes) -> bool;

    /// Remove the entry for `key` (write intent)
    async fn discard(&self, key: &str);

    /// Hit and miss counters
    fn stats(&self) -> &CacheStats;
}

impl dyn ListingCache {
    /// Return the cached listing of `key`, scanning and caching it on a miss
    ///
    /// With `ttl` of `None` the listing is not cacheable and is always scanned.
    pub async fn read_through<F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        scan: F,
    ) -> Result<Vec<String>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<String>>> + Send,
    {
        let Some(ttl) = ttl else {
            return scan().await;
        };

        if let Some(children) = self.get(key).await {
            return Ok(children);
        }

        self.populate(key, ttl, scan).await
    }

    /// Scan `key` and (re)set its cache entry regardless of what is cached
    pub async fn populate<F, Fut>(&self, key: &str, ttl: Duration, scan: F) -> Result<Vec<String>>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Vec<String>>> + Send,
    {
        let children = scan().await?;

        if !self.set(key, &children, ttl).await {
            warn!(key, "listing not cached");
        }

        Ok(children)
    }
}

impl dyn ContentCache {
    /// Return cached content of `key`, fetching and caching it on a miss
    pub async fn read_through<F, Fut>(&self, key: &str, fetch: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Bytes>> + Send,
    {
        if let Some(content) = self.get(key).await {
            return Ok(content);
        }

        self.populate(key, fetch).await
    }

    /// Fetch `key` and (re)set its cache entry
    pub async fn populate<F, Fut>(&self, key: &str, fetch: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<Bytes>> + Send,
    {
        let content = fetch().await?;

        if !self.set(key, content.clone()).await {
            debug!(key, "content not cached");
        }

        Ok(content)
    }
}

/// The process-wide pair of caches
#[derive(Clone)]
pub struct Caches {
    /// Listing cache
    pub listing: Arc<dyn ListingCache>,
    /// Content cache
    pub content: Arc<dyn ContentCache>,
}

impl Caches {
    /// In-process caches: TTL listings and an LRU of `content_capacity` entries
    pub fn in_memory(content_capacity: usize) -> Self {
        Self {
            listing: Arc::new(MemoryListingCache::new()),
            content: Arc::new(MemoryContentCache::new(content_capacity)),
        }
    }

    /// Build the configured caches
    ///
    /// A remote cache connects to its Redis service here, so an unreachable
    /// service fails at startup rather than on the first query.
    pub async fn from_config(config: &CacheConfig) -> Result<Self> {
        match config.backend {
            CacheBackendKind::Local => {
                let listing: Arc<dyn ListingCache> = Arc::new(MemoryListingCache::new());
                let content: Arc<dyn ContentCache> = match &config.content_dir {
                    Some(dir) => Arc::new(FileSystemContentCache::new(dir.clone())),
                    None => Arc::new(MemoryContentCache::new(config.content_capacity)),
                };
                Ok(Self { listing, content })
            },
            CacheBackendKind::Remote => {
                let url = config.remote_url.clone().unwrap_or_default();
                let pool = Arc::new(RedisPool::new(RedisConfig::with_url(url)).await?);
                Ok(Self {
                    listing: Arc::new(RedisListingCache::new(pool.clone())),
                    content: Arc::new(RedisContentCache::new(pool, config.content_ttl())),
                })
            },
        }
    }

    /// Log both caches' counters
    pub fn log_stats(&self) {
        let listing = self.listing.stats();
        let content = self.content.stats();
        debug!(
            "listing cache hits={} misses={}",
            listing.hits(),
            listing.misses()
        );
        debug!("get cache hits={} misses={}", content.hits(), content.misses());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_stats_snapshot() {
        let stats = CacheStats::new("listing");
        assert_eq!(stats.snapshot().hit_rate, 0.0);

        stats.record(Some(()));
        stats.record::<()>(None);
        stats.record(Some(()));

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert!((snapshot.hit_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_listing_read_through_scans_once() {
        let cache: Arc<dyn ListingCache> = Arc::new(MemoryListingCache::new());
        let scans = AtomicUsize::new(0);
        let ttl = Some(Duration::from_secs(60));

        for _ in 0..2 {
            let children = cache
                .read_through("dir", ttl, || async {
                    scans.fetch_add(1, Ordering::SeqCst);
                    Ok(vec!["a".to_string(), "b".to_string()])
                })
                .await
                .unwrap();
            assert_eq!(children, vec!["a", "b"]);
        }

        assert_eq!(scans.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 1);
    }

    #[tokio::test]
    async fn test_listing_uncacheable_always_scans() {
        let cache: Arc<dyn ListingCache> = Arc::new(MemoryListingCache::new());
        let scans = AtomicUsize::new(0);

        for _ in 0..3 {
            cache
                .read_through("open", None, || async {
                    scans.fetch_add(1, Ordering::SeqCst);
                    Ok(Vec::new())
                })
                .await
                .unwrap();
        }

        assert_eq!(scans.load(Ordering::SeqCst), 3);
        assert_eq!(cache.stats().hits() + cache.stats().misses(), 0);
    }

    #[tokio::test]
    async fn test_populate_overwrites() {
        let cache: Arc<dyn ListingCache> = Arc::new(MemoryListingCache::new());
        let ttl = Duration::from_secs(60);

        cache.set("dir", &["old".to_string()], ttl).await;
        cache
            .populate("dir", ttl, || async { Ok(vec!["new".to_string()]) })
            .await
            .unwrap();

        assert_eq!(cache.get("dir").await, Some(vec!["new".to_string()]));
    }

    #[tokio::test]
    async fn test_content_read_through_propagates_fetch_error() {
        let cache: Arc<dyn ContentCache> = Arc::new(MemoryContentCache::new(4));
        let result = cache
            .read_through("k", || async {
                Err::<Bytes, _>(crate::error::Error::from(
                    crate::error::StorageError::unavailable("test", "down"),
                ))
            })
            .await;

        assert!(result.is_err());
        assert!(cache.get("k").await.is_none());
    }
}
