//! Storage backend primitives
//!
//! Data files live either in local directories ([`local`]) or under keys of an
//! object store ([`ObjectStore`]). Both only ever need two operations: list the
//! immediate children of a directory or prefix, and read one entry in full.
//!
//! # Object store keys
//!
//! Keys use `/` as separator and never carry a trailing slash. Listing
//! `base/exp` returns full child keys such as `base/exp/topic`, whether the
//! child is a common prefix ("directory") or an object.

pub mod local;
pub mod s3;

pub use s3::S3ObjectStore;

use crate::error::{Result, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// Read access to a hierarchical key namespace
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Identifier used in logs and cache keys (e.g. the bucket name)
    fn name(&self) -> &str;

    /// Immediate children of `prefix` (`""` lists the root)
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Full content of the object at `key`
    async fn get(&self, key: &str) -> Result<Bytes>;
}

/// Join a prefix and a child name into a key
pub fn join_key(prefix: &str, name: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let name = name.trim_start_matches('/');
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// Final segment of a key
pub fn basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

// =============================================================================
// MemoryObjectStore
// =============================================================================

/// Object store held entirely in memory
///
/// Behaves like a delimiter listing of S3: common prefixes and objects are
/// both reported as children. Counts `list` and `get` calls so that tests can
/// observe caching.
///
/// # Example
///
/// ```rust
/// use datafile_bank::storage::{MemoryObjectStore, ObjectStore};
///
/// # async fn example() -> datafile_bank::Result<()> {
/// let store = MemoryObjectStore::new("bucket");
/// store.put("base/exp/topic/file.json", "{}");
///
/// assert_eq!(store.list("base").await?, vec!["base/exp"]);
/// # Ok(())
/// # }
/// ```
pub struct MemoryObjectStore {
    name: String,
    objects: RwLock<BTreeMap<String, Bytes>>,
    list_calls: AtomicU64,
    get_calls: AtomicU64,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            objects: RwLock::new(BTreeMap::new()),
            list_calls: AtomicU64::new(0),
            get_calls: AtomicU64::new(0),
        }
    }

    /// Store an object
    pub fn put(&self, key: impl Into<String>, content: impl Into<Bytes>) {
        let key = key.into().trim_matches('/').to_string();
        self.objects.write().insert(key, content.into());
    }

    /// Remove an object
    pub fn remove(&self, key: &str) -> bool {
        self.objects.write().remove(key.trim_matches('/')).is_some()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Check if store is empty
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Number of `list` calls served
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Number of `get` calls served
    pub fn get_calls(&self) -> u64 {
        self.get_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);

        let prefix = prefix.trim_matches('/');
        let start = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        let objects = self.objects.read();
        let children: BTreeSet<String> = objects
            .range(start.clone()..)
            .take_while(|(key, _)| key.starts_with(&start))
            .filter_map(|(key, _)| key[start.len()..].split('/').next())
            .filter(|name| !name.is_empty())
            .map(|name| join_key(prefix, name))
            .collect();

        Ok(children.into_iter().collect())
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        self.get_calls.fetch_add(1, Ordering::Relaxed);

        self.objects
            .read()
            .get(key.trim_matches('/'))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(key.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_join_key() {
        assert_eq!(join_key("", "exp"), "exp");
        assert_eq!(join_key("base/", "exp"), "base/exp");
        assert_eq!(join_key("base", "/exp"), "base/exp");
        assert_eq!(basename("a/b/c.json"), "c.json");
        assert_eq!(basename("c.json"), "c.json");
    }

    #[tokio::test]
    async fn test_memory_list_reports_prefixes_and_objects() {
        let store = MemoryObjectStore::new("bucket");
        store.put("base/a/1.json", "1");
        store.put("base/a/2.json", "2");
        store.put("base/b/x/3.json", "3");
        store.put("base/top.json", "t");
        store.put("based/other.json", "o");

        assert_eq!(
            store.list("base").await.unwrap(),
            vec!["base/a", "base/b", "base/top.json"]
        );
        assert_eq!(
            store.list("base/a").await.unwrap(),
            vec!["base/a/1.json", "base/a/2.json"]
        );
        assert_eq!(store.list("").await.unwrap(), vec!["base", "based"]);
        assert!(store.list("missing").await.unwrap().is_empty());
        assert_eq!(store.list_calls(), 4);
    }

    #[tokio::test]
    async fn test_memory_get() {
        let store = MemoryObjectStore::new("bucket");
        store.put("k/v.json", "{}");

        assert_eq!(store.get("k/v.json").await.unwrap(), Bytes::from("{}"));
        assert!(matches!(
            store.get("k/none.json").await,
            Err(Error::Storage(StorageError::NotFound(_)))
        ));
        assert_eq!(store.get_calls(), 2);
    }
}
