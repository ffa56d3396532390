//! Content cache mirrored to a local directory
//!
//! Each key maps to a relative path under the cache directory, so an S3 key
//! `bucket/base/exp/…/file.json` is stored at `cache_dir/bucket/base/exp/…/file.json`.
//! Failing to create a directory or write a file is not an error: the entry
//! simply isn't cached.

use super::{CacheStats, ContentCache};
use crate::metrics;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::{error, warn};

/// Content cache backed by files under a directory
pub struct FileSystemContentCache {
    cache_dir: PathBuf,
    stats: CacheStats,
}

impl FileSystemContentCache {
    /// Create a cache rooted at `cache_dir` (created lazily)
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            stats: CacheStats::new("content"),
        }
    }

    /// Cache root
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Location of `key` under the cache root
    ///
    /// Returns `None` for keys which would escape the cache root.
    fn key_path(&self, key: &str) -> Option<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));

        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }

        Some(self.cache_dir.join(relative))
    }
}

#[async_trait]
impl ContentCache for FileSystemContentCache {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let found = match self.key_path(key) {
            Some(path) => match fs::read(&path).await {
                Ok(content) => Some(Bytes::from(content)),
                Err(e) if e.kind() == ErrorKind::NotFound => None,
                Err(e) => {
                    warn!("failed to read cached content {:?}: {}", path, e);
                    None
                },
            },
            None => None,
        };

        self.stats.record(found)
    }

    async fn set(&self, key: &str, content: Bytes) -> bool {
        let Some(path) = self.key_path(key) else {
            warn!(key, "refusing to cache key outside cache directory");
            metrics::record_cache_write_failure("content");
            return false;
        };

        if let Some(dir) = path.parent() {
            if let Err(e) = fs::create_dir_all(dir).await {
                error!("failed to create cache directory {:?}: {}", dir, e);
                metrics::record_cache_write_failure("content");
                return false;
            }
        }

        match fs::write(&path, &content).await {
            Ok(()) => true,
            Err(e) => {
                warn!("failed to write cached content {:?}: {}", path, e);
                metrics::record_cache_write_failure("content");
                false
            },
        }
    }

    async fn discard(&self, key: &str) {
        if let Some(path) = self.key_path(key) {
            match fs::remove_file(&path).await {
                Ok(()) => {},
                Err(e) if e.kind() == ErrorKind::NotFound => {},
                Err(e) => warn!("failed to discard cached content {:?}: {}", path, e),
            }
        }
    }

    fn stats(&self) -> &CacheStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_set_get_discard() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileSystemContentCache::new(temp_dir.path().to_path_buf());

        assert!(cache.get("bucket/a/b.json").await.is_none());
        assert!(cache.set("bucket/a/b.json", Bytes::from_static(b"{}")).await);
        assert!(temp_dir.path().join("bucket/a/b.json").exists());
        assert_eq!(
            cache.get("bucket/a/b.json").await,
            Some(Bytes::from_static(b"{}"))
        );

        cache.discard("bucket/a/b.json").await;
        assert!(cache.get("bucket/a/b.json").await.is_none());

        assert_eq!(cache.stats().hits(), 1);
        assert_eq!(cache.stats().misses(), 2);
    }

    #[tokio::test]
    async fn test_absolute_keys_are_rooted() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileSystemContentCache::new(temp_dir.path().to_path_buf());

        assert!(cache.set("/data/pending/1.json", Bytes::from_static(b"1")).await);
        assert!(temp_dir.path().join("data/pending/1.json").exists());
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let cache = FileSystemContentCache::new(temp_dir.path().join("cache"));

        assert!(!cache.set("../escape.json", Bytes::from_static(b"x")).await);
        assert!(!temp_dir.path().join("escape.json").exists());
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        // a regular file where the cache directory should be
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();

        let cache = FileSystemContentCache::new(blocker);
        assert!(!cache.set("a/b.json", Bytes::from_static(b"x")).await);
        assert!(cache.get("a/b.json").await.is_none());
    }
}
