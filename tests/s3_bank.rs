//! Integration tests for the S3 backend over an in-memory object store
//!
//! These tests validate the key hierarchy walk end to end:
//! - Device and ignore-prefix selection
//! - Date partition ordering across experiments
//! - File name filtering by read key, and its fallback
//! - Closed partition listing cache
//! - Bounded read-ahead stopping early

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use datafile_bank::aggregation::{Last, WindowedCollect};
use datafile_bank::cache::Caches;
use datafile_bank::enumerator::{PathEnumerator, S3Enumerator, S3Layout};
use datafile_bank::storage::{MemoryObjectStore, ObjectStore};
use datafile_bank::{BankOptions, DataFileBank, Query};
use futures::TryStreamExt;
use serde_json::{json, Value};

const NOW: f64 = 1_700_000_000.0;

// ============================================================================
// Helper Functions
// ============================================================================

/// Store one data file at `base/{experiment}/{topic}/{device}/{date}/json/{name}`
fn put_record(store: &MemoryObjectStore, location: &str, date: &str, name: &str, measurements: Value) {
    let record = json!({
        "Measurements": measurements,
        "Meta": {"Time": NOW},
    });
    store.put(format!("base/{}/{}/json/{}", location, date, name), record.to_string());
}

fn enumerator(store: Arc<MemoryObjectStore>, layout: S3Layout) -> Arc<S3Enumerator> {
    let store: Arc<dyn ObjectStore> = store;
    Arc::new(S3Enumerator::new(store, Caches::in_memory(1000), layout).expect("Failed to build enumerator"))
}

fn bank(enumerator: Arc<S3Enumerator>) -> DataFileBank {
    DataFileBank::new(enumerator, BankOptions::default())
}

async fn path_names(enumerator: &S3Enumerator, read_keys: &[&str]) -> Vec<String> {
    let read_keys: Vec<String> = read_keys.iter().map(|k| k.to_string()).collect();
    enumerator
        .paths(&read_keys)
        .map_ok(|path| path.as_str().to_string())
        .try_collect()
        .await
        .expect("Listing failed")
}

/// Compact `YYYYMMDD` name of the day `days` before today (UTC)
fn days_ago(days: i64) -> String {
    (Utc::now().date_naive() - ChronoDuration::days(days))
        .format("%Y%m%d")
        .to_string()
}

// ============================================================================
// Hierarchy Walk
// ============================================================================

#[tokio::test]
async fn test_paths_descend_across_experiments() {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    put_record(&store, "exp1/topic/a-dev1", "20240101", "result-0101-ping.json", json!({}));
    put_record(&store, "exp1/topic/a-dev1", "20240103", "result-0103b-ping.json", json!({}));
    put_record(&store, "exp2/topic/b-dev1", "20240103", "result-0103a-ping.json", json!({}));
    put_record(&store, "exp2/topic/b-dev1", "20240103", "result-0103c-ping.json", json!({}));
    put_record(&store, "exp2/topic/b-dev1", "20240102", "result-0102-ping.json", json!({}));

    let e = enumerator(store, S3Layout::new("base", "dev1"));

    assert_eq!(
        path_names(&e, &[]).await,
        vec![
            "base/exp2/topic/b-dev1/20240103/json/result-0103c-ping.json",
            "base/exp1/topic/a-dev1/20240103/json/result-0103b-ping.json",
            "base/exp2/topic/b-dev1/20240103/json/result-0103a-ping.json",
            "base/exp2/topic/b-dev1/20240102/json/result-0102-ping.json",
            "base/exp1/topic/a-dev1/20240101/json/result-0101-ping.json",
        ]
    );
}

#[tokio::test]
async fn test_other_devices_and_ignored_prefixes_are_skipped() {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    put_record(&store, "exp/topic/a-dev1", "20240101", "result-1-ping.json", json!({}));
    put_record(&store, "exp/topic/a-dev2", "20240102", "result-2-ping.json", json!({}));
    put_record(&store, "exp/topic/a-xdev1x", "20240103", "result-3-ping.json", json!({}));
    put_record(&store, "exp/stale/a-dev1", "20240104", "result-4-ping.json", json!({}));
    put_record(&store, "old/topic/a-dev1", "20240105", "result-5-ping.json", json!({}));
    put_record(&store, "exp/topic/a-dev1", "not-a-date", "result-6-ping.json", json!({}));

    let mut layout = S3Layout::new("base", "dev1");
    layout.ignore = vec!["old".to_string(), "exp/stale".to_string()];
    let e = enumerator(store, layout);

    assert_eq!(
        path_names(&e, &[]).await,
        vec!["base/exp/topic/a-dev1/20240101/json/result-1-ping.json"]
    );
}

#[tokio::test]
async fn test_file_limit_caps_paths() {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    for i in 0..5 {
        put_record(&store, "exp/topic/a-dev1", "20240101", &format!("result-{}-ping.json", i), json!({}));
    }

    let mut layout = S3Layout::new("base", "dev1");
    layout.file_limit = 3;
    let e = enumerator(store, layout);

    assert_eq!(path_names(&e, &[]).await.len(), 3);
}

// ============================================================================
// File Name Filtering
// ============================================================================

#[tokio::test]
async fn test_read_keys_select_file_names() {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    let device = "exp/topic/a-dev1";
    put_record(&store, device, "20240101", "result-3-ookla.json", json!({"ookla": {"download": 90}}));
    put_record(&store, device, "20240101", "result-2-ping.json", json!({"ping_latency": {"google": 12}}));
    put_record(&store, device, "20240101", "result-1-ndt7.json", json!({"ndt7": {"download": 80}}));

    let e = enumerator(store.clone(), S3Layout::new("base", "dev1"));

    let names = path_names(&e, &["ping_latency.google"]).await;
    assert_eq!(names, vec!["base/exp/topic/a-dev1/20240101/json/result-2-ping.json"]);

    let results = bank(e.clone())
        .query_at(Query::new().add(Last::new("ping_latency.google")), NOW)
        .await
        .expect("Query failed");
    assert_eq!(results["ping_latency.google"], json!(12));
    assert_eq!(store.get_calls(), 1, "only the ping file is fetched");
}

#[tokio::test]
async fn test_unmapped_read_key_disables_filtering() {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    let device = "exp/topic/a-dev1";
    put_record(&store, device, "20240101", "result-2-ping.json", json!({"ping_latency": {"google": 12}}));
    put_record(&store, device, "20240101", "result-1-custom.json", json!({"custom": {"x": 1}}));

    let e = enumerator(store, S3Layout::new("base", "dev1"));

    assert_eq!(path_names(&e, &["ping_latency.google", "custom.x"]).await.len(), 2);

    let query = Query::new()
        .add(Last::new("ping_latency.google"))
        .add(Last::new("custom.x"));
    let results = bank(e).query_at(query, NOW).await.expect("Query failed");
    assert_eq!(results["ping_latency.google"], json!(12));
    assert_eq!(results["custom.x"], json!(1));
}

// ============================================================================
// Caching
// ============================================================================

#[tokio::test]
async fn test_closed_partitions_are_cached() {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    let device = "exp/topic/a-dev1";
    let closed = days_ago(10);
    let open = days_ago(0);
    put_record(&store, device, &closed, "result-1-ping.json", json!({}));
    put_record(&store, device, &open, "result-2-ping.json", json!({}));

    let e = enumerator(store.clone(), S3Layout::new("base", "dev1"));

    // base, experiment, topic, device, and both date partitions
    assert_eq!(path_names(&e, &[]).await.len(), 2);
    assert_eq!(store.list_calls(), 6);

    // only the device and the open partition are listed again
    assert_eq!(path_names(&e, &[]).await.len(), 2);
    assert_eq!(store.list_calls(), 8);
}

#[tokio::test]
async fn test_content_is_cached_across_queries() {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    put_record(&store, "exp/topic/a-dev1", "20240101", "result-1-ping.json", json!({"x": 1}));

    let e = enumerator(store.clone(), S3Layout::new("base", "dev1"));
    let bank = bank(e.clone());

    for _ in 0..3 {
        let results = bank
            .query_at(Query::new().add(Last::new("x")), NOW)
            .await
            .expect("Query failed");
        assert_eq!(results["x"], json!(1));
    }

    assert_eq!(store.get_calls(), 1);
    assert_eq!(e.caches().content.stats().hits(), 2);
}

// ============================================================================
// Read-ahead
// ============================================================================

#[tokio::test]
async fn test_early_stop_limits_fetches() {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    for i in 0..50 {
        put_record(
            &store,
            "exp/topic/a-dev1",
            "20240101",
            &format!("result-{:03}-ping.json", i),
            json!({"x": i}),
        );
    }

    let mut layout = S3Layout::new("base", "dev1");
    layout.max_workers_get = 2;
    let e = enumerator(store.clone(), layout);

    let results = bank(e)
        .query_at(Query::new().add(Last::new("x")), NOW)
        .await
        .expect("Query failed");
    assert_eq!(results["x"], json!(49));
    assert!(store.get_calls() < 10, "fetched {} files", store.get_calls());
}

#[tokio::test]
async fn test_windowed_collect_over_partitions() {
    let store = Arc::new(MemoryObjectStore::new("bucket"));
    for (date, name, value) in [
        ("20240102", "result-4-ping.json", 4),
        ("20240102", "result-3-ping.json", 3),
        ("20240101", "result-2-ping.json", 2),
        ("20240101", "result-1-ping.json", 1),
    ] {
        put_record(&store, "exp/topic/a-dev1", date, name, json!({"x": value}));
    }

    let e = enumerator(store, S3Layout::new("base", "dev1"));
    let results = bank(e)
        .query_at(Query::new().add(WindowedCollect::new("x", 60).reverse(true)), NOW)
        .await
        .expect("Query failed");

    assert_eq!(results["x"], json!([1, 2, 3, 4]));
}
