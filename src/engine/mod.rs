//! Streaming aggregation engine
//!
//! A [`DataFileBank`] runs a [`Query`] (named aggregators) over the records of
//! one backend. Records are consumed newest first, one at a time, and every
//! aggregator still awaiting completion sees each record. The walk stops as
//! soon as every aggregator has finished, so no further records are fetched.
//!
//! ```text
//! enumerator.contents()  →  parse  →  Dataset  →  [Last, WindowedCollect, …]
//!                                          ↑ one-ahead lookahead sets `last`
//! ```
//!
//! Records that fail to parse, or lack the measurement subtree, are skipped
//! but still count against the backend's file limit.

pub mod builder;
pub mod flat;

pub use builder::from_config;
pub use flat::FlatDataFileBank;

use crate::aggregation::{round_value, Accumulator, Aggregator, Step, StepContext};
use crate::config::{BankConfig, DATAFILE_PREFIX, META_PREFIX};
use crate::enumerator::PathEnumerator;
use crate::error::{Error, Result};
use crate::metrics::{QUERY_DURATION, RECORDS_SKIPPED_TOTAL};
use crate::progress::ProgressExt;
use crate::types::{Dataset, RecordPath};
use futures::future;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

/// Named aggregators evaluated together over one pass of the records
#[derive(Default)]
pub struct Query {
    ops: Vec<(String, Box<dyn Aggregator>)>,
}

impl Query {
    /// An empty query
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an aggregator keyed by its read keys joined with `__`
    pub fn add(self, aggregator: impl Aggregator + 'static) -> Self {
        let name = aggregator.default_name();
        self.named(name, aggregator)
    }

    /// Add an aggregator under `name`, replacing any aggregator of that name
    pub fn named(mut self, name: impl Into<String>, aggregator: impl Aggregator + 'static) -> Self {
        let name = name.into();
        let aggregator: Box<dyn Aggregator> = Box::new(aggregator);

        match self.ops.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = aggregator,
            None => self.ops.push((name, aggregator)),
        }
        self
    }

    /// Result names, in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().map(|(name, _)| name.as_str())
    }

    /// Union of every aggregator's read keys, first occurrence first
    pub fn read_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        for (_, aggregator) in &self.ops {
            for key in aggregator.read_key().keys() {
                if !keys.contains(key) {
                    keys.push(key.clone());
                }
            }
        }
        keys
    }

    /// Number of aggregators
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Whether the query has no aggregators
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Record layout and result formatting of a bank
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankOptions {
    /// Root key of the measurement subtree; empty selects the whole record
    pub prefix: String,
    /// Root key of the metadata subtree
    pub meta_prefix: String,
    /// Decimal places of float results
    pub round_to: Option<u32>,
}

impl Default for BankOptions {
    fn default() -> Self {
        Self {
            prefix: DATAFILE_PREFIX.to_string(),
            meta_prefix: META_PREFIX.to_string(),
            round_to: None,
        }
    }
}

impl From<&BankConfig> for BankOptions {
    fn from(config: &BankConfig) -> Self {
        Self {
            prefix: config.prefix.clone(),
            meta_prefix: config.meta_prefix.clone(),
            round_to: config.round_to,
        }
    }
}

/// Query interface over one backend's records
#[derive(Clone)]
pub struct DataFileBank {
    enumerator: Arc<dyn PathEnumerator>,
    options: BankOptions,
}

impl DataFileBank {
    /// Create a bank over `enumerator`
    pub fn new(enumerator: Arc<dyn PathEnumerator>, options: BankOptions) -> Self {
        Self { enumerator, options }
    }

    /// The backend
    pub fn enumerator(&self) -> &Arc<dyn PathEnumerator> {
        &self.enumerator
    }

    /// Record layout and result formatting
    pub fn options(&self) -> &BankOptions {
        &self.options
    }

    /// A bank returning single results unwrapped
    pub fn flat(&self) -> FlatDataFileBank {
        FlatDataFileBank::new(self.clone())
    }

    /// Evaluate `query` as of now
    ///
    /// Every name of the query appears in the result; aggregators which never
    /// finished hold null.
    pub async fn query(&self, query: Query) -> Result<Map<String, Value>> {
        self.query_at(query, now()).await
    }

    /// Evaluate `query` as of `now` (epoch seconds)
    pub async fn query_at(&self, query: Query, now: f64) -> Result<Map<String, Value>> {
        self.run(query, now, false).await
    }

    /// Drop cached content of `path` ahead of it being rewritten
    pub async fn discard(&self, path: &RecordPath) {
        self.enumerator.discard(path).await;
    }

    pub(crate) async fn run(&self, query: Query, now: f64, flat: bool) -> Result<Map<String, Value>> {
        let backend = self.enumerator.backend_id();
        let _timer = QUERY_DURATION.with_label_values(&[backend]).start_timer();

        let mut results: Map<String, Value> = query.names().map(|name| (name.to_string(), Value::Null)).collect();
        if query.is_empty() {
            return Ok(results);
        }

        let read_keys = query.read_keys();
        let mut ops: Vec<(String, Box<dyn Aggregator>, Accumulator)> = query
            .ops
            .into_iter()
            .map(|(name, aggregator)| (name, aggregator, Accumulator::new()))
            .collect();

        let file_limit = self.enumerator.file_limit();
        let mut datasets = self.datasets(&read_keys).peekable();
        let mut visited = 0usize;

        while let Some(dataset) = datasets.next().await {
            let dataset = dataset?;
            let last = Pin::new(&mut datasets).peek().await.is_none();
            visited += 1;

            let mut remaining = Vec::with_capacity(ops.len());
            for (name, aggregator, acc) in ops.drain(..) {
                let ctx = StepContext {
                    full: &dataset.full,
                    results: &results,
                    name: &name,
                    file_limit,
                    last,
                    meta_prefix: &self.options.meta_prefix,
                    flat,
                    now,
                };

                match aggregator.step(&dataset.data, acc, &ctx) {
                    Step::Continue(acc) => remaining.push((name, aggregator, acc)),
                    Step::Done(value) => {
                        results.insert(name, round_value(value, self.options.round_to));
                    },
                }
            }
            ops = remaining;

            if ops.is_empty() {
                break;
            }
        }

        debug!(
            backend,
            datasets = visited,
            unfinished = ops.len(),
            "query complete"
        );
        self.enumerator.caches().log_stats();

        Ok(results)
    }

    fn datasets(&self, read_keys: &[String]) -> BoxStream<'static, Result<Dataset>> {
        let prefix = self.options.prefix.clone();
        self.enumerator
            .clone()
            .contents(read_keys)
            .try_filter_map(move |content| future::ready(Ok::<_, Error>(parse_dataset(&content, &prefix))))
            .log_progress("datasets")
            .boxed()
    }
}

/// Evaluation time, epoch seconds
pub fn now() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

fn parse_dataset(content: &[u8], prefix: &str) -> Option<Dataset> {
    let full: Value = match serde_json::from_slice(content) {
        Ok(full) => full,
        Err(e) => {
            RECORDS_SKIPPED_TOTAL.with_label_values(&["malformed"]).inc();
            debug!("skipping malformed data file: {}", e);
            return None;
        },
    };

    let dataset = Dataset::extract(full, prefix);
    if dataset.is_none() {
        RECORDS_SKIPPED_TOTAL.with_label_values(&["missing_subtree"]).inc();
        debug!("skipping data file without {} subtree", prefix);
    }
    dataset
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::cache::Caches;
    use crate::enumerator::PathEnumerator;
    use crate::error::Result;
    use crate::types::RecordPath;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::stream::{self, BoxStream, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records held in memory, newest first
    pub(crate) struct VecEnumerator {
        records: Vec<(String, String)>,
        file_limit: usize,
        caches: Caches,
        reads: AtomicUsize,
    }

    impl VecEnumerator {
        pub fn new(records: Vec<(&str, String)>, file_limit: usize) -> Self {
            Self {
                records: records.into_iter().map(|(n, c)| (n.to_string(), c)).collect(),
                file_limit,
                caches: Caches::in_memory(10),
                reads: AtomicUsize::new(0),
            }
        }

        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PathEnumerator for VecEnumerator {
        fn backend_id(&self) -> &'static str {
            "memory"
        }

        fn file_limit(&self) -> usize {
            self.file_limit
        }

        fn caches(&self) -> &Caches {
            &self.caches
        }

        fn paths(&self, _read_keys: &[String]) -> BoxStream<'static, Result<RecordPath>> {
            let names: Vec<Result<RecordPath>> = self
                .records
                .iter()
                .take(self.file_limit)
                .map(|(name, _)| Ok(RecordPath::new(name.clone())))
                .collect();
            stream::iter(names).boxed()
        }

        async fn read(&self, path: &RecordPath) -> Result<Option<Bytes>> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok(self
                .records
                .iter()
                .find(|(name, _)| name == path.as_str())
                .map(|(_, content)| Bytes::from(content.clone())))
        }

        async fn discard(&self, _path: &RecordPath) {}
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::VecEnumerator;
    use super::*;
    use crate::aggregation::{Last, WindowedCollect, WindowedStdDev};
    use serde_json::json;

    const NOW: f64 = 1_700_000_000.0;

    fn record(time: f64, data: Value) -> String {
        json!({"Measurements": data, "Meta": {"Time": time}}).to_string()
    }

    fn bank(records: Vec<(&str, String)>, file_limit: usize) -> (DataFileBank, Arc<VecEnumerator>) {
        let enumerator = Arc::new(VecEnumerator::new(records, file_limit));
        let bank = DataFileBank::new(enumerator.clone(), BankOptions::default());
        (bank, enumerator)
    }

    #[tokio::test]
    async fn test_stops_once_every_aggregator_is_done() {
        let (bank, enumerator) = bank(
            vec![
                ("4", record(NOW, json!({"x": 4}))),
                ("3", record(NOW - 1.0, json!({"x": 3, "y": 3}))),
                ("2", record(NOW - 2.0, json!({"x": 2, "y": 2}))),
                ("1", record(NOW - 3.0, json!({"x": 1, "y": 1}))),
            ],
            100,
        );

        let query = Query::new().add(Last::new("x")).add(Last::new("y"));
        let results = bank.query_at(query, NOW).await.unwrap();

        assert_eq!(results["x"], json!(4));
        assert_eq!(results["y"], json!(3));
        // "3" completes the query; only the lookahead reaches "2"
        assert_eq!(enumerator.reads(), 3);
    }

    #[tokio::test]
    async fn test_unfinished_aggregators_hold_null() {
        let (bank, _) = bank(vec![("1", record(NOW, json!({"x": 1})))], 100);

        let query = Query::new().named("missing", Last::new("nope")).add(Last::new("x"));
        let results = bank.query_at(query, NOW).await.unwrap();

        assert_eq!(results["missing"], Value::Null);
        assert_eq!(results["x"], json!(1));
    }

    #[tokio::test]
    async fn test_malformed_and_foreign_records_are_skipped() {
        let (bank, _) = bank(
            vec![
                ("3", "not json".to_string()),
                ("2", json!({"Other": {"x": 9}}).to_string()),
                ("1", record(NOW, json!({"x": 1}))),
            ],
            100,
        );

        let results = bank.query_at(Query::new().add(Last::new("x")), NOW).await.unwrap();
        assert_eq!(results["x"], json!(1));
    }

    #[tokio::test]
    async fn test_window_finalizes_at_last_record() {
        let (bank, _) = bank(
            vec![
                ("2", record(NOW, json!({"x": 1.0}))),
                ("1", record(NOW - 10.0, json!({"x": 3.0}))),
            ],
            100,
        );

        let query = Query::new()
            .named("values", WindowedCollect::new("x", 3600))
            .named("spread", WindowedStdDev::new("x", 3600));
        let results = bank.query_at(query, NOW).await.unwrap();

        assert_eq!(results["values"], json!([1.0, 3.0]));
        assert_eq!(results["spread"], json!(1.0));
    }

    #[tokio::test]
    async fn test_no_records_gives_nulls() {
        let (bank, _) = bank(vec![], 100);

        let query = Query::new().add(Last::new("x")).add(WindowedCollect::new("y", 60));
        let results = bank.query_at(query, NOW).await.unwrap();

        assert_eq!(results["x"], Value::Null);
        assert_eq!(results["y"], Value::Null);
    }

    #[tokio::test]
    async fn test_results_are_rounded() {
        let enumerator = Arc::new(VecEnumerator::new(vec![("1", record(NOW, json!({"x": 1.23456})))], 10));
        let options = BankOptions {
            round_to: Some(2),
            ..BankOptions::default()
        };
        let bank = DataFileBank::new(enumerator, options);

        let results = bank.query_at(Query::new().add(Last::new("x")), NOW).await.unwrap();
        assert_eq!(results["x"], json!(1.23));
    }

    #[test]
    fn test_query_names_and_read_keys() {
        let query = Query::new()
            .add(Last::new(["a", "b"]))
            .named("b", Last::new("b"))
            .named("b", Last::new("c"));

        assert_eq!(query.names().collect::<Vec<_>>(), vec!["a__b", "b"]);
        assert_eq!(query.read_keys(), vec!["a", "b", "c"]);
        assert_eq!(query.len(), 2);
    }
}
