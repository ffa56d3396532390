//! Read-key to file-name patterns
//!
//! Each measurement kind is written to its own file, so a query reading only
//! `ookla.*` keys never needs to open ping or ndt7 files. A read key which
//! matches no entry disables filtering for the whole query.

use crate::metrics::FILTER_FALLBACK_TOTAL;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, warn};

lazy_static! {
    /// `(read key pattern, file name pattern)` pairs
    static ref FILE_PATTERNS: Vec<(Regex, Regex)> = [
        (r"^ping_latency\.", r"^result-.+-ping.json$"),
        (r"^ookla\.", r"^result-.+-ookla(?:-metadata)?.json$"),
        (r"^ndt7\.", r"^result-.+-ndt7(?:-metadata)?.json$"),
    ]
    .iter()
    .map(|(key, file)| {
        (
            Regex::new(key).expect("valid read key pattern"),
            Regex::new(file).expect("valid file name pattern"),
        )
    })
    .collect();
}

/// Which data files a query needs to open
#[derive(Debug, Clone)]
pub enum FileFilter {
    /// Every file
    All,
    /// Files whose name matches any of these patterns
    Matching(Vec<&'static Regex>),
}

impl FileFilter {
    /// Build the filter for a set of read keys
    ///
    /// Logs a warning and counts a fallback if any key has no pattern.
    pub fn for_read_keys<'a>(read_keys: impl IntoIterator<Item = &'a str>) -> Self {
        let mut patterns: Vec<&'static Regex> = Vec::new();

        for key in read_keys {
            let found = FILE_PATTERNS
                .iter()
                .find(|(key_pattern, _)| key_pattern.is_match(key))
                .map(|(_, file_pattern)| file_pattern);

            match found {
                Some(pattern) => {
                    if !patterns.iter().any(|p| p.as_str() == pattern.as_str()) {
                        patterns.push(pattern);
                    }
                },
                None => {
                    warn!(
                        "inspecting every data file in sequence as no file pattern matches key {:?}",
                        key
                    );
                    FILTER_FALLBACK_TOTAL.with_label_values(&[key]).inc();
                    return FileFilter::All;
                },
            }
        }

        if patterns.is_empty() {
            return FileFilter::All;
        }

        debug!(
            "datapaths | filtering to files matching: {}",
            patterns
                .iter()
                .map(|p| p.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        FileFilter::Matching(patterns)
    }

    /// Whether a file named `name` may hold data for the query
    pub fn accepts(&self, name: &str) -> bool {
        match self {
            FileFilter::All => true,
            FileFilter::Matching(patterns) => patterns.iter().any(|p| p.is_match(name)),
        }
    }

    /// Whether any file can be excluded
    pub fn is_filtering(&self) -> bool {
        matches!(self, FileFilter::Matching(_))
    }
}
