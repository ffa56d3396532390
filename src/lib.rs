//! Datafile Bank - streaming aggregation over timestamped JSON data files
//!
//! This library answers "latest" and "windowed" questions about named metrics
//! held in a large, growing archive of JSON records, without reading the whole
//! archive:
//! - Local directory and S3 key-hierarchy backends
//! - Lazy, early-stopping aggregation (latest value, windowed series, stddev)
//! - Expiring listing caches and immutable content caches (memory, disk, Redis)
//! - Bounded read-ahead for remote content
//!
//! # Example
//!
//! ```rust,no_run
//! use datafile_bank::aggregation::{Last, WindowedCollect};
//! use datafile_bank::{Config, Query, ONE_WEEK_S};
//!
//! # async fn run() -> datafile_bank::Result<()> {
//! let config = Config::from_file_with_env("datafile.toml")?;
//! let bank = datafile_bank::engine::from_config(&config, None).await?;
//!
//! let results = bank
//!     .query(
//!         Query::new()
//!             .named("download", Last::new("ookla.download").decorate("Time"))
//!             .add(WindowedCollect::new("ping_latency.google", ONE_WEEK_S)),
//!     )
//!     .await?;
//! println!("{}", serde_json::Value::Object(results));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod aggregation;
pub mod cache;
pub mod error;
pub mod storage;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Query engine: named aggregators over one backend's records
pub mod engine;

/// Backends producing record identifiers newest first
pub mod enumerator;

/// Bounded concurrency for remote listing and content retrieval
pub mod pipeline;

/// Progress logging for long enumerations
pub mod progress;

/// Redis connection pool backing the remote caches
pub mod redis;

// Re-export main types
pub use config::Config;
pub use engine::{BankOptions, DataFileBank, FlatDataFileBank, Query};
pub use enumerator::PathEnumerator;
pub use error::{Error, Result};
pub use types::{KeySpec, RecordPath, ONE_WEEK_S};
