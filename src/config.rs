//! Configuration management for the data file bank
//!
//! Configuration is read from a TOML file, with environment variable
//! overrides and sensible defaults. Every section may be omitted.
//!
//! ```toml
//! [bank]
//! backend = "s3"
//! file_limit = 50000
//! round_to = 2
//!
//! [s3]
//! bucket = "measurements"
//! base = "netrics/v1"
//! ignore = ["scratch"]
//!
//! [cache]
//! backend = "remote"
//! remote_url = "redis://127.0.0.1:6379"
//! ```

use crate::error::{Error, Result, ValidationError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default root key of the measurement subtree
pub const DATAFILE_PREFIX: &str = "Measurements";

/// Default root key of the metadata subtree
pub const META_PREFIX: &str = "Meta";

/// Default record cap for the local backend
pub const LOCAL_FILE_LIMIT: usize = 5_000;

/// Default record cap for the S3 backend
pub const S3_FILE_LIMIT: usize = 50_000;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Query and record settings
    #[serde(default)]
    pub bank: BankConfig,

    /// Local filesystem backend
    #[serde(default)]
    pub local: LocalConfig,

    /// S3 backend
    #[serde(default)]
    pub s3: S3Config,

    /// Listing and content caches
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which storage backend produces data files
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Directories on locally attached disk
    #[default]
    Local,
    /// Hierarchical keys in an S3 bucket
    S3,
}

/// Where cache entries are stored
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// In-process memory (and optionally a local directory for content)
    #[default]
    Local,
    /// Shared Redis-compatible service
    Remote,
}

/// Query and record settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BankConfig {
    /// Storage backend
    #[serde(default)]
    pub backend: BackendKind,

    /// Dotted path of the measurement subtree (empty reads whole records)
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Root key of the metadata subtree
    #[serde(default = "default_meta_prefix")]
    pub meta_prefix: String,

    /// Maximum records opened per query (backend default when unset)
    #[serde(default)]
    pub file_limit: Option<usize>,

    /// Decimal places applied to numeric results
    #[serde(default)]
    pub round_to: Option<u32>,
}

/// Local filesystem backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocalConfig {
    /// Directory of recently written files (read first)
    #[serde(default)]
    pub pending: Option<PathBuf>,

    /// Directory of archived files (read second)
    #[serde(default)]
    pub archive: Option<PathBuf>,

    /// Lifetime of cached directory listings in seconds
    #[serde(default = "default_local_listing_ttl_secs")]
    pub listing_ttl_secs: u64,
}

/// S3 backend
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct S3Config {
    /// Bucket holding data files
    #[serde(default)]
    pub bucket: String,

    /// Common prefix under which experiments are found
    #[serde(default)]
    pub base: String,

    /// Prefixes (relative to `base`) which are never walked
    #[serde(default)]
    pub ignore: Vec<String>,

    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Region override
    #[serde(default)]
    pub region: Option<String>,

    /// Total connection budget shared by listing and fetching
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Listing concurrency (defaults to two thirds of the budget)
    #[serde(default)]
    pub max_workers_list: Option<usize>,

    /// Fetch concurrency (defaults to the rest of the budget)
    #[serde(default)]
    pub max_workers_get: Option<usize>,

    /// Age after which a date partition no longer receives files
    #[serde(default = "default_closed_partition_age_days")]
    pub closed_partition_age_days: i64,
}

/// Listing and content caches
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Cache store
    #[serde(default)]
    pub backend: CacheBackendKind,

    /// Mirror fetched content into this directory (local cache only)
    #[serde(default)]
    pub content_dir: Option<PathBuf>,

    /// Capacity of the in-memory content cache
    #[serde(default = "default_content_capacity")]
    pub content_capacity: usize,

    /// Redis URL (remote cache only)
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Lifetime of cached S3 listings in seconds
    #[serde(default = "default_listing_ttl_secs")]
    pub listing_ttl_secs: u64,

    /// Lifetime of cached listings of closed date partitions in seconds
    #[serde(default = "default_closed_listing_ttl_secs")]
    pub closed_listing_ttl_secs: u64,

    /// Lifetime of remotely cached content in seconds
    #[serde(default = "default_content_ttl_secs")]
    pub content_ttl_secs: u64,
}

/// Logging
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_prefix() -> String { DATAFILE_PREFIX.to_string() }
fn default_meta_prefix() -> String { META_PREFIX.to_string() }
fn default_local_listing_ttl_secs() -> u64 { 24 * 3600 }
fn default_max_workers() -> usize { 30 }
fn default_closed_partition_age_days() -> i64 { 2 }
fn default_content_capacity() -> usize { LOCAL_FILE_LIMIT }
fn default_listing_ttl_secs() -> u64 { 2 * 3600 }
fn default_closed_listing_ttl_secs() -> u64 { 14 * 24 * 3600 }
fn default_content_ttl_secs() -> u64 { 14 * 24 * 3600 }
fn default_log_level() -> String { "info".to_string() }

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            prefix: default_prefix(),
            meta_prefix: default_meta_prefix(),
            file_limit: None,
            round_to: None,
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            pending: None,
            archive: None,
            listing_ttl_secs: default_local_listing_ttl_secs(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            base: String::new(),
            ignore: Vec::new(),
            endpoint: None,
            region: None,
            max_workers: default_max_workers(),
            max_workers_list: None,
            max_workers_get: None,
            closed_partition_age_days: default_closed_partition_age_days(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::default(),
            content_dir: None,
            content_capacity: default_content_capacity(),
            remote_url: None,
            listing_ttl_secs: default_listing_ttl_secs(),
            closed_listing_ttl_secs: default_closed_listing_ttl_secs(),
            content_ttl_secs: default_content_ttl_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl BankConfig {
    /// Record cap in effect for the configured backend
    pub fn effective_file_limit(&self) -> usize {
        self.file_limit.unwrap_or(match self.backend {
            BackendKind::Local => LOCAL_FILE_LIMIT,
            BackendKind::S3 => S3_FILE_LIMIT,
        })
    }
}

impl LocalConfig {
    /// Configured directories in read order
    pub fn dirs(&self) -> Vec<PathBuf> {
        self.pending
            .iter()
            .chain(self.archive.iter())
            .cloned()
            .collect()
    }

    /// TTL of directory listings
    pub fn listing_ttl(&self) -> Duration {
        Duration::from_secs(self.listing_ttl_secs)
    }
}

impl S3Config {
    /// Listing concurrency in effect
    pub fn effective_max_workers_list(&self) -> usize {
        self.max_workers_list
            .unwrap_or_else(|| (self.max_workers as f64 * 0.67) as usize)
    }

    /// Fetch concurrency in effect
    pub fn effective_max_workers_get(&self) -> usize {
        self.max_workers_get.unwrap_or_else(|| {
            self.max_workers
                .saturating_sub(self.effective_max_workers_list())
        })
    }
}

impl CacheConfig {
    /// TTL of S3 listings
    pub fn listing_ttl(&self) -> Duration {
        Duration::from_secs(self.listing_ttl_secs)
    }

    /// TTL of closed date-partition listings
    pub fn closed_listing_ttl(&self) -> Duration {
        Duration::from_secs(self.closed_listing_ttl_secs)
    }

    /// TTL of remotely cached content
    pub fn content_ttl(&self) -> Duration {
        Duration::from_secs(self.content_ttl_secs)
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {}: {}", path, e))
        })?;

        Self::from_toml(&contents)
            .map_err(|e| Error::Configuration(format!("Failed to parse config file {}: {}", path, e)))
    }

    /// Parse configuration from a TOML document
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::Configuration(e.to_string()))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(backend) = std::env::var("DATAFILE_BACKEND") {
            self.bank.backend = match backend.as_str() {
                "local" => BackendKind::Local,
                "s3" => BackendKind::S3,
                other => {
                    return Err(ValidationError::InvalidFormat {
                        field: "DATAFILE_BACKEND".to_string(),
                        message: format!("expects either 'local' or 's3' not: {:?}", other),
                    }
                    .into())
                },
            };
        }
        if let Ok(limit) = std::env::var("DATAFILE_LIMIT") {
            if let Ok(l) = limit.parse() {
                self.bank.file_limit = Some(l);
            }
        }

        // Local
        if let Ok(pending) = std::env::var("DATAFILE_PENDING") {
            self.local.pending = Some(PathBuf::from(pending));
        }
        if let Ok(archive) = std::env::var("DATAFILE_ARCHIVE") {
            self.local.archive = Some(PathBuf::from(archive));
        }

        // S3
        if let Ok(bucket) = std::env::var("DATAFILE_S3_BUCKET") {
            self.s3.bucket = bucket;
        }
        if let Ok(base) = std::env::var("DATAFILE_S3_BASE") {
            self.s3.base = base;
        }
        if let Ok(ignore) = std::env::var("DATAFILE_S3_IGNORE") {
            self.s3.ignore = ignore
                .split(':')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        // Cache
        if let Ok(backend) = std::env::var("DATAFILE_S3_CACHE_BACKEND") {
            self.cache.backend = match backend.as_str() {
                "local" => CacheBackendKind::Local,
                "remote" => CacheBackendKind::Remote,
                other => {
                    return Err(ValidationError::InvalidFormat {
                        field: "DATAFILE_S3_CACHE_BACKEND".to_string(),
                        message: format!("expects either 'local' or 'remote' not: {:?}", other),
                    }
                    .into())
                },
            };
        }
        if let Ok(path) = std::env::var("DATAFILE_S3_CACHE_PATH") {
            self.cache.content_dir = Some(PathBuf::from(path));
        }
        if let Ok(url) = std::env::var("DATAFILE_S3_CACHE_REMOTE") {
            self.cache.remote_url = Some(url);
        }

        // Logging
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.logging.level = level;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.bank.effective_file_limit() == 0 {
            return Err(ValidationError::OutOfRange {
                field: "bank.file_limit".to_string(),
                value: "0".to_string(),
                min: "1".to_string(),
                max: usize::MAX.to_string(),
            }
            .into());
        }

        if self.bank.meta_prefix.is_empty() {
            return Err(ValidationError::MissingField("bank.meta_prefix".to_string()).into());
        }

        if self.bank.backend == BackendKind::S3 {
            if self.s3.bucket.trim_matches('/').is_empty() {
                return Err(ValidationError::MissingField("s3.bucket".to_string()).into());
            }
            for (field, value) in [
                ("s3.max_workers_list", self.s3.effective_max_workers_list()),
                ("s3.max_workers_get", self.s3.effective_max_workers_get()),
            ] {
                if value == 0 {
                    return Err(ValidationError::OutOfRange {
                        field: field.to_string(),
                        value: value.to_string(),
                        min: "1".to_string(),
                        max: self.s3.max_workers.to_string(),
                    }
                    .into());
                }
            }
        }

        if self.cache.backend == CacheBackendKind::Remote
            && self.cache.remote_url.as_deref().unwrap_or("").is_empty()
        {
            return Err(ValidationError::MissingField("cache.remote_url".to_string()).into());
        }

        if self.cache.content_capacity == 0 {
            return Err(ValidationError::OutOfRange {
                field: "cache.content_capacity".to_string(),
                value: "0".to_string(),
                min: "1".to_string(),
                max: usize::MAX.to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: &str) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents).map_err(|e| {
            Error::Configuration(format!("Failed to write config file {}: {}", path, e))
        })
    }
}
