//! S3 backend
//!
//! Data files of one device are spread over a key hierarchy:
//!
//! ```text
//! {base}/{experiment}/{topic}/{cohort}-{device_id}/{YYYYMMDD}/json/{file}
//! ```
//!
//! Enumeration walks experiments, topics and device directories (each level
//! listed concurrently on the listing pool), collects every date partition of
//! the device, then lists partitions newest first. Partitions sharing a date
//! (across experiments and topics) are listed together and their files merged
//! in descending name order, so files come out in time order even though they
//! are spread over several directories.
//!
//! Listings of experiments, topics and devices are cached for the listing
//! TTL. Partitions old enough to be closed are cached for the longer closed
//! TTL; recent partitions and the partition lists themselves are always
//! re-listed.

use super::patterns::FileFilter;
use super::PathEnumerator;
use crate::cache::Caches;
use crate::config::{Config, S3_FILE_LIMIT};
use crate::error::{Error, Result, StorageError};
use crate::metrics::RECORDS_OPENED_TOTAL;
use crate::pipeline::{list_concurrent, read_ahead};
use crate::progress::ProgressExt;
use crate::storage::{basename, join_key, ObjectStore};
use crate::types::RecordPath;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{NaiveDate, Utc};
use futures::future;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const BACKEND: &str = "s3";

/// Where and how the S3 backend looks for one device's files
#[derive(Debug, Clone)]
pub struct S3Layout {
    /// Prefix holding experiments
    pub base: String,
    /// Experiment or topic prefixes (relative to `base`) which are skipped
    pub ignore: Vec<String>,
    /// Device whose files are read
    pub device_id: String,
    /// Maximum files produced per enumeration
    pub file_limit: usize,
    /// Listing concurrency
    pub max_workers_list: usize,
    /// Fetch concurrency
    pub max_workers_get: usize,
    /// TTL of experiment, topic and device listings
    pub listing_ttl: Duration,
    /// TTL of closed date partition listings
    pub closed_listing_ttl: Duration,
    /// Age in days at which a date partition is closed
    pub closed_partition_age_days: i64,
}

impl S3Layout {
    /// Layout with default limits and TTLs
    pub fn new(base: impl Into<String>, device_id: &str) -> Self {
        let mut layout = Self::from_config(&Config::default(), device_id);
        layout.base = base.into();
        layout
    }

    /// Layout from configuration for one device
    pub fn from_config(config: &Config, device_id: &str) -> Self {
        Self {
            base: config.s3.base.clone(),
            ignore: config.s3.ignore.clone(),
            device_id: device_id.to_string(),
            file_limit: config.bank.file_limit.unwrap_or(S3_FILE_LIMIT),
            max_workers_list: config.s3.effective_max_workers_list(),
            max_workers_get: config.s3.effective_max_workers_get(),
            listing_ttl: config.cache.listing_ttl(),
            closed_listing_ttl: config.cache.closed_listing_ttl(),
            closed_partition_age_days: config.s3.closed_partition_age_days,
        }
    }
}

struct Tree {
    store: Arc<dyn ObjectStore>,
    caches: Caches,
    layout: S3Layout,
    base: String,
    ignored: HashSet<String>,
    device_suffix: String,
}

impl Tree {
    fn cache_key(&self, key: &str) -> String {
        format!("{}/{}", self.store.name(), key)
    }

    async fn list(&self, prefix: &str, ttl: Option<Duration>) -> Result<Vec<String>> {
        let key = self.cache_key(prefix);
        self.caches
            .listing
            .read_through(&key, ttl, || self.store.list(prefix))
            .await
    }

    async fn list_unignored(&self, prefix: &str) -> Result<Vec<String>> {
        let mut children = self.list(prefix, Some(self.layout.listing_ttl)).await?;
        children.retain(|child| !self.ignored.contains(child));
        Ok(children)
    }

    /// Every date partition of the device
    async fn date_dirs(&self) -> Result<Vec<String>> {
        let experiments = self.list_unignored(&self.base).await?;
        list_concurrent(experiments, self.layout.max_workers_list, |experiment| {
            self.search_experiment(experiment)
        })
        .await
    }

    async fn search_experiment(&self, experiment: String) -> Result<Vec<String>> {
        let topics = self.list_unignored(&experiment).await?;
        list_concurrent(topics, self.layout.max_workers_list, |topic| {
            self.search_topic(topic)
        })
        .await
    }

    async fn search_topic(&self, topic: String) -> Result<Vec<String>> {
        let mut devices = self.list(&topic, Some(self.layout.listing_ttl)).await?;
        devices.retain(|device| basename(device).ends_with(&self.device_suffix));

        list_concurrent(devices, self.layout.max_workers_list, |device| {
            self.search_device(device)
        })
        .await
    }

    async fn search_device(&self, device: String) -> Result<Vec<String>> {
        let mut dates = self.list(&device, None).await?;
        dates.retain(|date| is_date_name(basename(date)));
        Ok(dates)
    }

    async fn search_date(&self, date_dir: String, today: NaiveDate) -> Result<Vec<String>> {
        let ttl = if self.is_closed(basename(&date_dir), today) {
            Some(self.layout.closed_listing_ttl)
        } else {
            None
        };
        self.list(&join_key(&date_dir, "json"), ttl).await
    }

    fn is_closed(&self, date_name: &str, today: NaiveDate) -> bool {
        match NaiveDate::parse_from_str(date_name, "%Y%m%d") {
            Ok(date) => {
                today.signed_duration_since(date)
                    >= chrono::Duration::days(self.layout.closed_partition_age_days)
            },
            Err(_) => false,
        }
    }

    /// All files of the device, newest first, listed one date at a time
    fn files(self: Arc<Self>, today: NaiveDate) -> BoxStream<'static, Result<RecordPath>> {
        stream::once(async move {
            let mut dates = self.date_dirs().await?;
            dates.sort_by(|a, b| basename(b).cmp(basename(a)));
            debug!("found {} date partitions for device", dates.len());

            let groups = group_by_basename(dates);
            let tree = self.clone();
            let files = stream::iter(groups)
                .then(move |group| {
                    let tree = tree.clone();
                    async move {
                        let workers = tree.layout.max_workers_list;
                        let mut files = list_concurrent(group, workers, |date_dir| {
                            tree.search_date(date_dir, today)
                        })
                        .await?;
                        files.sort_by(|a, b| basename(b).cmp(basename(a)));

                        let paths = files
                            .into_iter()
                            .map(|f| Ok::<_, Error>(RecordPath::new(f)));
                        Ok::<_, Error>(stream::iter(paths))
                    }
                })
                .try_flatten();

            Ok::<_, Error>(files)
        })
        .try_flatten()
        .boxed()
    }
}

fn is_date_name(name: &str) -> bool {
    name.len() == 8 && name.bytes().all(|b| b.is_ascii_digit())
}

/// Split keys sorted by basename into runs sharing a basename
fn group_by_basename(sorted: Vec<String>) -> Vec<Vec<String>> {
    let mut groups: Vec<Vec<String>> = Vec::new();
    for key in sorted {
        match groups.last_mut() {
            Some(group) if group.first().map(|k| basename(k)) == Some(basename(&key)) => {
                group.push(key)
            },
            _ => groups.push(vec![key]),
        }
    }
    groups
}

/// Enumerator over one device's files in S3
#[derive(Clone)]
pub struct S3Enumerator {
    tree: Arc<Tree>,
}

impl S3Enumerator {
    /// Create an enumerator, rejecting unusable layouts
    pub fn new(store: Arc<dyn ObjectStore>, caches: Caches, layout: S3Layout) -> Result<Self> {
        if layout.device_id.is_empty() {
            return Err(Error::Configuration("device_id must not be empty".to_string()));
        }
        for (name, workers) in [
            ("max_workers_list", layout.max_workers_list),
            ("max_workers_get", layout.max_workers_get),
        ] {
            if workers < 1 {
                return Err(Error::Configuration(format!(
                    "{} expects natural number not: {}",
                    name, workers
                )));
            }
        }

        let base = layout.base.trim_matches('/').to_string();
        let ignored = layout
            .ignore
            .iter()
            .map(|prefix| join_key(&base, prefix.trim_matches('/')))
            .collect();
        let device_suffix = format!("-{}", layout.device_id);

        Ok(Self {
            tree: Arc::new(Tree {
                store,
                caches,
                layout,
                base,
                ignored,
                device_suffix,
            }),
        })
    }

    /// Layout in use
    pub fn layout(&self) -> &S3Layout {
        &self.tree.layout
    }

    fn content_key(&self, path: &RecordPath) -> String {
        self.tree.cache_key(path.as_str())
    }
}

#[async_trait]
impl PathEnumerator for S3Enumerator {
    fn backend_id(&self) -> &'static str {
        BACKEND
    }

    fn file_limit(&self) -> usize {
        self.tree.layout.file_limit
    }

    fn caches(&self) -> &Caches {
        &self.tree.caches
    }

    fn paths(&self, read_keys: &[String]) -> BoxStream<'static, Result<RecordPath>> {
        let filter = FileFilter::for_read_keys(read_keys.iter().map(String::as_str));
        let today = Utc::now().date_naive();

        let limited = self
            .tree
            .clone()
            .files(today)
            .take(self.tree.layout.file_limit)
            .boxed();

        if filter.is_filtering() {
            limited
                .log_progress("datapaths")
                .try_filter(move |path| future::ready(filter.accepts(path.name())))
                .boxed()
                .log_progress("datapaths>filtered")
                .boxed()
        } else {
            limited.log_progress("datapaths").boxed()
        }
    }

    async fn read(&self, path: &RecordPath) -> Result<Option<Bytes>> {
        RECORDS_OPENED_TOTAL.with_label_values(&[BACKEND]).inc();

        let key = self.content_key(path);
        let result = self
            .tree
            .caches
            .content
            .read_through(&key, || self.tree.store.get(path.as_str()))
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
        self.tree.caches.content.discard(&self.content_key(path)).await;
    }

    fn contents(self: Arc<Self>, read_keys: &[String]) -> BoxStream<'static, Result<Bytes>> {
        let paths = self.paths(read_keys);
        let workers = self.tree.layout.max_workers_get;

        read_ahead(paths, workers, move |path| {
            let this = self.clone();
            async move { this.read(&path).await }
        })
        .try_filter_map(|content| async move { Ok(content) })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryObjectStore;

    fn tree_layout() -> S3Layout {
        S3Layout::new("base", "dev1")
    }

    #[test]
    fn test_is_date_name() {
        assert!(is_date_name("20240131"));
        assert!(!is_date_name("2024013"));
        assert!(!is_date_name("2024-01-31"));
        assert!(!is_date_name("json"));
    }

    #[test]
    fn test_group_by_basename() {
        let groups = group_by_basename(vec![
            "a/20240102".to_string(),
            "b/20240102".to_string(),
            "a/20240101".to_string(),
        ]);
        assert_eq!(
            groups,
            vec![
                vec!["a/20240102".to_string(), "b/20240102".to_string()],
                vec!["a/20240101".to_string()],
            ]
        );
    }

    #[test]
    fn test_new_rejects_bad_layout() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new("bucket"));

        let mut layout = tree_layout();
        layout.device_id.clear();
        assert!(S3Enumerator::new(store.clone(), Caches::in_memory(10), layout).is_err());

        let mut layout = tree_layout();
        layout.max_workers_get = 0;
        assert!(S3Enumerator::new(store, Caches::in_memory(10), layout).is_err());
    }

    #[test]
    fn test_closed_partitions() {
        let store: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new("bucket"));
        let e = S3Enumerator::new(store, Caches::in_memory(10), tree_layout()).unwrap();
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();

        assert!(e.tree.is_closed("20240308", today));
        assert!(!e.tree.is_closed("20240309", today));
        assert!(!e.tree.is_closed("20240310", today));
        assert!(!e.tree.is_closed("garbage!", today));
    }
}
