//! In-process caches
//!
//! - [`MemoryListingCache`]: TTL-expiring listings, bounded in entry count.
//! - [`MemoryContentCache`]: LRU of file contents, bounded in entry count.
//!
//! Both guard their maps with a `parking_lot::Mutex`; no lock is ever held
//! across an await point.

use super::{CacheStats, ContentCache, ListingCache};
use async_trait::async_trait;
use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// Default maximum number of cached listings
pub const DEFAULT_MAX_LISTINGS: usize = 10_000;

/// Cached listing with its expiry
#[derive(Clone, Debug)]
struct ExpiringEntry {
    children: Vec<String>,
    cached_at: Instant,
    expires_at: Instant,
}

impl ExpiringEntry {
    fn new(children: Vec<String>, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            children,
            cached_at: now,
            expires_at: now + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory listing cache with per-entry TTL
///
/// When full, expired entries are evicted first, then the oldest entry.
pub struct MemoryListingCache {
    entries: Mutex<HashMap<String, ExpiringEntry>>,
    max_entries: usize,
    stats: CacheStats,
}

impl MemoryListingCache {
    /// Create a cache holding up to [`DEFAULT_MAX_LISTINGS`] listings
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_LISTINGS)
    }

    /// Create a cache holding up to `max_entries` listings
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            stats: CacheStats::new("listing"),
        }
    }

    /// Current entry count (including expired)
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Default for MemoryListingCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListingCache for MemoryListingCache {
    async fn get(&self, key: &str) -> Option<Vec<String>> {
        let found = {
            let mut entries = self.entries.lock();
            match entries.get(key) {
                Some(entry) if entry.is_expired() => {
                    entries.remove(key);
                    None
                },
                Some(entry) => Some(entry.children.clone()),
                None => None,
            }
        };

        self.stats.record(found)
    }

    async fn set(&self, key: &str, children: &[String], ttl: Duration) -> bool {
        let mut entries = self.entries.lock();

        if entries.len() >= self.max_entries && !entries.contains_key(key) {
            entries.retain(|_, v| !v.is_expired());

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, v)| v.cached_at)
                    .map(|(k, _)| k.clone());

                if let Some(k) = oldest {
                    entries.remove(&k);
                }
            }
        }

        entries.insert(key.to_string(), ExpiringEntry::new(children.to_vec(), ttl));
        true
    }

    async fn discard(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

/// In-memory LRU content cache
///
/// Capacity should be at least the query file limit, or a single query evicts
/// its own earliest records before the next query can reuse them.
pub struct MemoryContentCache {
    entries: Mutex<LruCache<String, Bytes>>,
    stats: CacheStats,
}

impl MemoryContentCache {
    /// Create a cache of `capacity` entries (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            stats: CacheStats::new("content"),
        }
    }

    /// Current entry count
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl ContentCache for MemoryContentCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let found = self.entries.lock().get(key).cloned();
        self.stats.record(found)
    }

    async fn set(&self, key: &str, content: Bytes) -> bool {
        self.entries.lock().put(key.to_string(), content);
        true
    }

    async fn discard(&self, key: &str) {
        self.entries.lock().pop(key);
    }

    fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
