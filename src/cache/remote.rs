//! Caches held in a shared Redis service
//!
//! Listings are stored as sets under `0:{key}` and content as strings under
//! `1:{key}`. An empty listing is stored as a set holding only the empty
//! string, since Redis drops empty sets. Sets carry no order: readers of a
//! listing sort it themselves. Every Redis failure degrades to a miss (reads)
//! or an unstored entry (writes) with a warning.

use super::{CacheStats, ContentCache, ListingCache};
use crate::metrics;
use crate::redis::RedisPool;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Namespace of listing keys
pub const LISTING_NAMESPACE: &str = "0";

/// Namespace of content keys
pub const CONTENT_NAMESPACE: &str = "1";

/// Member standing in for an empty listing
const EMPTY_SENTINEL: &str = "";

fn namespaced(namespace: &str, key: &str) -> String {
    format!("{}:{}", namespace, key)
}

/// Set members standing for `children`
fn encode_listing(children: &[String]) -> Vec<String> {
    if children.is_empty() {
        vec![EMPTY_SENTINEL.to_string()]
    } else {
        children.to_vec()
    }
}

/// Listing held by a set; `None` when the key is absent
fn decode_listing(members: Vec<String>) -> Option<Vec<String>> {
    // a missing key reads back as an empty set
    if members.is_empty() {
        return None;
    }
    Some(members.into_iter().filter(|m| m != EMPTY_SENTINEL).collect())
}

/// Replace the listing at `redis_key` and set its expiry in one transaction
fn listing_write(redis_key: &str, members: Vec<String>, ttl_secs: u64) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .del(redis_key)
        .ignore()
        .sadd(redis_key, members)
        .ignore()
        .expire(redis_key, ttl_secs as i64)
        .ignore();
    pipe
}

/// Read content and push its expiry back by `ttl_secs`
fn content_read(redis_key: &str, ttl_secs: u64) -> redis::Cmd {
    let mut cmd = redis::cmd("GETEX");
    cmd.arg(redis_key).arg("EX").arg(ttl_secs);
    cmd
}

fn content_write(redis_key: &str, content: &[u8], ttl_secs: u64) -> redis::Cmd {
    let mut cmd = redis::cmd("SET");
    cmd.arg(redis_key).arg(content).arg("EX").arg(ttl_secs);
    cmd
}

/// Listing cache stored in Redis sets
pub struct RedisListingCache {
    pool: Arc<RedisPool>,
    stats: CacheStats,
}

impl RedisListingCache {
    /// Create a listing cache on a shared pool
    pub fn new(pool: Arc<RedisPool>) -> Self {
        Self {
            pool,
            stats: CacheStats::new("listing"),
        }
    }
}

#[async_trait]
impl ListingCache for RedisListingCache {
    async fn get(&self, key: &str) -> Option<Vec<String>> {
        let redis_key = namespaced(LISTING_NAMESPACE, key);

        let result = self
            .pool
            .execute(|mut conn| {
                let redis_key = redis_key.clone();
                async move {
                    redis::cmd("SMEMBERS")
                        .arg(&redis_key)
                        .query_async::<Vec<String>>(&mut conn)
                        .await
                }
            })
            .await;

        let found = match result {
            Ok(members) => decode_listing(members),
            Err(e) => {
                warn!(key, "listing cache read failed: {}", e);
                None
            },
        };

        self.stats.record(found)
    }

    async fn set(&self, key: &str, children: &[String], ttl: Duration) -> bool {
        let redis_key = namespaced(LISTING_NAMESPACE, key);
        let pipe = listing_write(&redis_key, encode_listing(children), ttl.as_secs().max(1));

        let result = self
            .pool
            .execute(|mut conn| {
                let pipe = pipe.clone();
                async move { pipe.query_async::<()>(&mut conn).await }
            })
            .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(key, "listing cache write failed: {}", e);
                metrics::record_cache_write_failure("listing");
                false
            },
        }
    }

    async fn discard(&self, key: &str) {
        let redis_key = namespaced(LISTING_NAMESPACE, key);
        let result = self
            .pool
            .execute(|mut conn| {
                let redis_key = redis_key.clone();
                async move { redis::cmd("DEL").arg(&redis_key).query_async::<i64>(&mut conn).await }
            })
            .await;

        if let Err(e) = result {
            warn!(key, "listing cache discard failed: {}", e);
        }
    }

    fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

/// Content cache stored in Redis strings
///
/// Reading an entry refreshes its expiry, so content in active use stays cached.
pub struct RedisContentCache {
    pool: Arc<RedisPool>,
    ttl: Duration,
    stats: CacheStats,
}

impl RedisContentCache {
    /// Create a content cache on a shared pool with entry lifetime `ttl`
    pub fn new(pool: Arc<RedisPool>, ttl: Duration) -> Self {
        Self {
            pool,
            ttl,
            stats: CacheStats::new("content"),
        }
    }

    fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }
}

#[async_trait]
impl ContentCache for RedisContentCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let cmd = content_read(&namespaced(CONTENT_NAMESPACE, key), self.ttl_secs());

        let result = self
            .pool
            .execute(|mut conn| {
                let cmd = cmd.clone();
                async move { cmd.query_async::<Option<Vec<u8>>>(&mut conn).await }
            })
            .await;

        let found = match result {
            Ok(content) => content.map(Bytes::from),
            Err(e) => {
                warn!(key, "content cache read failed: {}", e);
                None
            },
        };

        self.stats.record(found)
    }

    async fn set(&self, key: &str, content: Bytes) -> bool {
        let cmd = content_write(&namespaced(CONTENT_NAMESPACE, key), &content, self.ttl_secs());

        let result = self
            .pool
            .execute(|mut conn| {
                let cmd = cmd.clone();
                async move { cmd.query_async::<()>(&mut conn).await }
            })
            .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(key, "content cache write failed: {}", e);
                metrics::record_cache_write_failure("content");
                false
            },
        }
    }

    async fn discard(&self, key: &str) {
        let redis_key = namespaced(CONTENT_NAMESPACE, key);
        let result = self
            .pool
            .execute(|mut conn| {
                let redis_key = redis_key.clone();
                async move { redis::cmd("DEL").arg(&redis_key).query_async::<i64>(&mut conn).await }
            })
            .await;

        if let Err(e) = result {
            warn!(key, "content cache discard failed: {}", e);
        }
    }

    fn stats(&self) -> &CacheStats {
        &self.stats
    }
}
