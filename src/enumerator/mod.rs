//! Path enumerators
//!
//! A [`PathEnumerator`] produces the record identifiers of one backend in
//! strictly descending time order, capped at the backend's file limit, and
//! reads each record's raw content through the content cache.
//!
//! - [`LocalEnumerator`]: files of one or more local directories.
//! - [`S3Enumerator`]: files of one device under an S3 key hierarchy.
//!
//! The backend is chosen once, from configuration, by [`from_config`]. Callers
//! only ever see `Arc<dyn PathEnumerator>`.

pub mod local;
pub mod patterns;
pub mod remote;

pub use local::LocalEnumerator;
pub use patterns::FileFilter;
pub use remote::{S3Enumerator, S3Layout};

use crate::cache::Caches;
use crate::config::{BackendKind, Config};
use crate::error::{Error, Result};
use crate::storage::{ObjectStore, S3ObjectStore};
use crate::types::RecordPath;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use std::sync::Arc;

/// Source of record identifiers and contents for one backend
#[async_trait]
pub trait PathEnumerator: Send + Sync + 'static {
    /// Backend identifier for logs and metrics
    fn backend_id(&self) -> &'static str;

    /// Maximum number of records any query may open
    fn file_limit(&self) -> usize;

    /// Caches used by this backend
    fn caches(&self) -> &Caches;

    /// Record identifiers in descending time order, at most `file_limit`
    ///
    /// `read_keys` is a hint: backends may skip records which cannot hold any
    /// of the keys.
    fn paths(&self, read_keys: &[String]) -> BoxStream<'static, Result<RecordPath>>;

    /// Raw content of one record; `None` if it vanished since listing
    async fn read(&self, path: &RecordPath) -> Result<Option<Bytes>>;

    /// Drop any cached content of `path` ahead of it being rewritten
    async fn discard(&self, path: &RecordPath);

    /// Raw contents of [`paths`](Self::paths), in the same order
    ///
    /// Reads one record at a time unless the backend overrides it.
    fn contents(self: Arc<Self>, read_keys: &[String]) -> BoxStream<'static, Result<Bytes>> {
        let this = self.clone();
        self.paths(read_keys)
            .and_then(move |path| {
                let this = this.clone();
                async move { this.read(&path).await }
            })
            .try_filter_map(|content| async move { Ok(content) })
            .boxed()
    }
}

/// Build the configured backend
///
/// `device_id` selects the device whose files the S3 backend reads; it is
/// required for S3 and ignored by the local backend.
pub async fn from_config(
    config: &Config,
    caches: Caches,
    device_id: Option<&str>,
) -> Result<Arc<dyn PathEnumerator>> {
    let file_limit = config.bank.effective_file_limit();

    match config.bank.backend {
        BackendKind::Local => Ok(Arc::new(LocalEnumerator::new(
            config.local.dirs(),
            file_limit,
            caches,
            config.local.listing_ttl(),
        ))),
        BackendKind::S3 => {
            let device_id = device_id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| Error::Configuration("device_id must not be empty".to_string()))?;

            let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::from_config(&config.s3).await?);
            let layout = S3Layout::from_config(config, device_id);
            Ok(Arc::new(S3Enumerator::new(store, caches, layout)?))
        },
    }
}
