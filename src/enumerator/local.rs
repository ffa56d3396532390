//! Local filesystem backend
//!
//! Reads the configured directories in order (pending before archive).
//! Within each directory files are produced in descending name order, and
//! each directory is only asked for as many files as the limit still allows:
//!
//! ```text
//! file_limit = 5
//! pending/  [900 800]          → 900 800
//! archive/  [700 600 500 400]  → 700 600 500   (top 3 only)
//! ```
//!
//! Listings are cached for [`listing_ttl`](LocalEnumerator::listing_ttl)
//! under `"{dir}:{limit}"`, since the same limit recurs on every query.
//! Cached listings carry no order (Redis keeps them as sets), so every
//! listing is sorted again on its way out of the cache.

use super::PathEnumerator;
use crate::cache::Caches;
use crate::error::{Error, Result, StorageError};
use crate::metrics::RECORDS_OPENED_TOTAL;
use crate::storage::local::{read_file, sorted_dir};
use crate::types::RecordPath;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const BACKEND: &str = "local";

/// Summary of a cache warm-up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PopulateReport {
    /// Directories re-listed
    pub dirs_listed: usize,
    /// Files read into the content cache
    pub files_read: usize,
}

/// Enumerator over local data directories
#[derive(Clone)]
pub struct LocalEnumerator {
    inner: Arc<Inner>,
}

struct Inner {
    dirs: Vec<PathBuf>,
    file_limit: usize,
    caches: Caches,
    listing_ttl: Duration,
}

impl Inner {
    fn listing_key(dir: &Path, limit: usize) -> String {
        format!("{}:{}", dir.display(), limit)
    }

    async fn sorted_dir(&self, dir: &Path, limit: usize) -> Result<Vec<String>> {
        let key = Self::listing_key(dir, limit);
        let mut paths = self
            .caches
            .listing
            .read_through(&key, Some(self.listing_ttl), || sorted_dir(dir, limit))
            .await?;

        paths.sort_unstable_by(|a, b| b.cmp(a));
        Ok(paths)
    }
}

impl LocalEnumerator {
    /// Create an enumerator over `dirs`, read in the given order
    pub fn new(dirs: Vec<PathBuf>, file_limit: usize, caches: Caches, listing_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                dirs,
                file_limit,
                caches,
                listing_ttl,
            }),
        }
    }

    /// Configured directories
    pub fn dirs(&self) -> &[PathBuf] {
        &self.inner.dirs
    }

    /// Lifetime of cached directory listings
    pub fn listing_ttl(&self) -> Duration {
        self.inner.listing_ttl
    }

    /// Re-list every directory and re-read every file up to the file limit
    ///
    /// Resets the listing cache entries a query would use and fills the
    /// content cache. Files which disappear or cannot be read are skipped.
    pub async fn populate_caches(&self) -> Result<PopulateReport> {
        let inner = &self.inner;
        let mut report = PopulateReport::default();

        debug!(
            "initial sizes | listing hits={} misses={} | content hits={} misses={}",
            inner.caches.listing.stats().hits(),
            inner.caches.listing.stats().misses(),
            inner.caches.content.stats().hits(),
            inner.caches.content.stats().misses(),
        );

        for dir in &inner.dirs {
            let remaining = inner.file_limit - report.files_read;
            if remaining == 0 {
                break;
            }

            let key = Inner::listing_key(dir, remaining);
            let paths = inner
                .caches
                .listing
                .populate(&key, inner.listing_ttl, || sorted_dir(dir, remaining))
                .await?;
            report.dirs_listed += 1;

            for path in paths {
                let result = inner
                    .caches
                    .content
                    .populate(&path, || read_file(Path::new(&path)))
                    .await;

                match result {
                    Ok(_) => {},
                    Err(Error::Storage(StorageError::NotFound(_))) => {},
                    Err(e) => warn!("failed to read {} while populating caches: {}", path, e),
                }
                report.files_read += 1;
            }
        }

        info!(
            "populated caches: {} directories, {} files",
            report.dirs_listed, report.files_read
        );
        Ok(report)
    }
}

struct DirWalk {
    inner: Arc<Inner>,
    pending: VecDeque<PathBuf>,
    remaining: usize,
}

impl DirWalk {
    /// List the next directory within the remaining limit
    async fn next_dir(mut self) -> Result<Option<(Vec<String>, DirWalk)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let Some(dir) = self.pending.pop_front() else {
            return Ok(None);
        };

        let paths = self.inner.sorted_dir(&dir, self.remaining).await?;
        self.remaining = self.remaining.saturating_sub(paths.len());
        Ok(Some((paths, self)))
    }
}

#[async_trait]
impl PathEnumerator for LocalEnumerator {
    fn backend_id(&self) -> &'static str {
        BACKEND
    }

    fn file_limit(&self) -> usize {
        self.inner.file_limit
    }

    fn caches(&self) -> &Caches {
        &self.inner.caches
    }

    fn paths(&self, _read_keys: &[String]) -> BoxStream<'static, Result<RecordPath>> {
        let walk = DirWalk {
            inner: self.inner.clone(),
            pending: self.inner.dirs.iter().cloned().collect(),
            remaining: self.inner.file_limit,
        };

        stream::try_unfold(walk, DirWalk::next_dir)
        .map_ok(|paths| {
            stream::iter(
                paths
                    .into_iter()
                    .map(|p| Ok::<_, Error>(RecordPath::new(p))),
            )
        })
        .try_flatten()
        .boxed()
    }

    async fn read(&self, path: &RecordPath) -> Result<Option<Bytes>> {
        RECORDS_OPENED_TOTAL.with_label_values(&[BACKEND]).inc();

        let file = path.to_path_buf();
        let result = self
            .inner
            .caches
            .content
            .read_through(path.as_str(), || read_file(&file))
            .await;

        match result {
            Ok(content) => Ok(Some(content)),
            Err(Error::Storage(StorageError::NotFound(_))) => {
                debug!("data file {} vanished before read", path);
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    async fn discard(&self, path: &RecordPath) {
        self.inner.caches.content.discard(path.as_str()).await;
    }
}
