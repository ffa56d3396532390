//! Prometheus metrics for the data file bank
//!
//! Tracks records opened and skipped, cache effectiveness, and query latency.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    /// Records opened by each backend
    pub static ref RECORDS_OPENED_TOTAL: CounterVec = register_counter_vec!(
        "datafile_records_opened_total",
        "Data files opened for reading",
        &["backend"]
    ).expect("register datafile_records_opened_total");

    /// Records skipped during a query
    pub static ref RECORDS_SKIPPED_TOTAL: CounterVec = register_counter_vec!(
        "datafile_records_skipped_total",
        "Data files skipped as malformed or lacking the measurement subtree",
        &["reason"]
    ).expect("register datafile_records_skipped_total");

    /// Cache lookups by role and outcome
    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = register_counter_vec!(
        "datafile_cache_lookups_total",
        "Cache lookups",
        &["cache", "result"]
    ).expect("register datafile_cache_lookups_total");

    /// Cache writes which could not be persisted
    pub static ref CACHE_WRITE_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "datafile_cache_write_failures_total",
        "Cache writes which failed",
        &["cache"]
    ).expect("register datafile_cache_write_failures_total");

    /// Queries which could not filter data files by name
    pub static ref FILTER_FALLBACK_TOTAL: CounterVec = register_counter_vec!(
        "datafile_filter_fallback_total",
        "Queries inspecting every data file because a read key has no file pattern",
        &["read_key"]
    ).expect("register datafile_filter_fallback_total");

    /// Query duration
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "datafile_query_duration_seconds",
        "Query latency in seconds",
        &["backend"],
        vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).expect("register datafile_query_duration_seconds");
}

/// Touch every metric so that it appears in the exposition before first use
pub fn init() {
    lazy_static::initialize(&RECORDS_OPENED_TOTAL);
    lazy_static::initialize(&RECORDS_SKIPPED_TOTAL);
    lazy_static::initialize(&CACHE_LOOKUPS_TOTAL);
    lazy_static::initialize(&CACHE_WRITE_FAILURES_TOTAL);
    lazy_static::initialize(&FILTER_FALLBACK_TOTAL);
    lazy_static::initialize(&QUERY_DURATION);
}

/// Record a cache lookup
pub fn record_cache_lookup(cache: &str, hit: bool) {
    CACHE_LOOKUPS_TOTAL
        .with_label_values(&[cache, if hit { "hit" } else { "miss" }])
        .inc();
}

/// Record a failed cache write
pub fn record_cache_write_failure(cache: &str) {
    CACHE_WRITE_FAILURES_TOTAL.with_label_values(&[cache]).inc();
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
