//! Local directory primitives
//!
//! Data files are named by their timestamp, so the most recent files of a
//! directory are the lexically greatest names. Directories may hold far more
//! files than a query can use; [`sorted_dir`] keeps only the top `limit`.

use crate::error::{Result, StorageError};
use bytes::Bytes;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// The `limit` greatest file paths of `dir`, in descending order
///
/// Only regular files (or links to them) are listed. A missing directory
/// lists as empty.
pub async fn sorted_dir(dir: &Path, limit: usize) -> Result<Vec<String>> {
    if limit == 0 {
        return Ok(Vec::new());
    }

    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("data directory {:?} does not exist", dir);
            return Ok(Vec::new());
        },
        Err(e) => return Err(StorageError::Io(e).into()),
    };

    // min-heap of the greatest names seen so far
    let mut top: BinaryHeap<Reverse<String>> = BinaryHeap::with_capacity(limit + 1);

    while let Some(entry) = entries.next_entry().await.map_err(StorageError::Io)? {
        let path = entry.path();
        let is_file = match fs::metadata(&path).await {
            Ok(meta) => meta.is_file(),
            Err(_) => false,
        };
        if !is_file {
            continue;
        }

        top.push(Reverse(path.to_string_lossy().into_owned()));
        if top.len() > limit {
            top.pop();
        }
    }

    // ascending order of Reverse is descending order of names
    Ok(top.into_sorted_vec().into_iter().map(|Reverse(p)| p).collect())
}

/// Read a data file in full
pub async fn read_file(path: &Path) -> Result<Bytes> {
    match fs::read(path).await {
        Ok(content) => Ok(Bytes::from(content)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            Err(StorageError::NotFound(path.to_string_lossy().into_owned()).into())
        },
        Err(e) => Err(StorageError::Io(e).into()),
    }
}
