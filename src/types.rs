//! Core data types

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::{Path, PathBuf};

/// Seconds in one week, the usual window for time-series columns
pub const ONE_WEEK_S: u64 = 60 * 60 * 24 * 7;

/// Handle of a single data file
///
/// Either a local filesystem path or an S3 key. Record identifiers embed a
/// timestamp-like component in their name, so lexical order of the file name
/// is chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordPath(String);

impl RecordPath {
    /// Wrap a key or path string
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The full key or path
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// As a local filesystem path
    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }
}

impl From<&Path> for RecordPath {
    fn from(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One key or several keys
///
/// Used both for an aggregator's read key (a composite key yields a list of
/// values) and for its decoration (a single decoration yields a bare value in
/// flat output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySpec {
    /// A single dotted key
    One(String),
    /// Several dotted keys, read together
    Many(Vec<String>),
}

impl KeySpec {
    /// The keys as a slice
    pub fn keys(&self) -> &[String] {
        match self {
            KeySpec::One(key) => std::slice::from_ref(key),
            KeySpec::Many(keys) => keys,
        }
    }

    /// Whether this is a single key
    pub fn is_single(&self) -> bool {
        matches!(self, KeySpec::One(_))
    }

    /// Number of keys
    pub fn len(&self) -> usize {
        self.keys().len()
    }

    /// Whether no keys are named
    pub fn is_empty(&self) -> bool {
        self.keys().is_empty()
    }
}

impl From<&str> for KeySpec {
    fn from(key: &str) -> Self {
        KeySpec::One(key.to_string())
    }
}

impl From<String> for KeySpec {
    fn from(key: String) -> Self {
        KeySpec::One(key)
    }
}

impl From<Vec<String>> for KeySpec {
    fn from(keys: Vec<String>) -> Self {
        KeySpec::Many(keys)
    }
}

impl From<Vec<&str>> for KeySpec {
    fn from(keys: Vec<&str>) -> Self {
        KeySpec::Many(keys.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for KeySpec {
    fn from(keys: [&str; N]) -> Self {
        KeySpec::Many(keys.iter().map(|k| k.to_string()).collect())
    }
}

/// Look up a dotted key (`"ookla.download"`) in a JSON value
///
/// Returns `None` if any segment is missing or traverses a non-object.
pub fn get_multikey<'a>(multikey: &str, values: &'a Value) -> Option<&'a Value> {
    multikey
        .split('.')
        .try_fold(values, |value, key| value.as_object()?.get(key))
}

/// A parsed record
///
/// Pairs the measurement subtree selected by the configured prefix with the
/// full record (from which metadata is read).
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Measurement subtree
    pub data: Value,
    /// Full record
    pub full: Value,
}

impl Dataset {
    /// Build a dataset from a full record
    ///
    /// Returns `None` if the record lacks the prefix subtree. An empty prefix
    /// selects the whole record.
    pub fn extract(full: Value, prefix: &str) -> Option<Self> {
        if prefix.is_empty() {
            return Some(Self {
                data: full.clone(),
                full,
            });
        }

        let data = get_multikey(prefix, &full)?.clone();
        Some(Self { data, full })
    }

    /// The metadata subtree, if present
    pub fn meta(&self, meta_prefix: &str) -> Option<&Value> {
        self.full.get(meta_prefix)
    }
}
