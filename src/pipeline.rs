//! Bounded concurrent fetching
//!
//! - [`read_ahead`]: turns a stream of record paths into a stream of fetched
//!   contents, in the same order, with a bounded number of fetches in flight.
//! - [`list_concurrent`]: lists many prefixes at once and concatenates the
//!   children in completion order.
//!
//! Each call owns its own permits, so a pool lives exactly as long as the
//! enumeration or fetch it serves.
//!
//! # Read-ahead
//!
//! ```text
//! paths ──▶ [fetch][fetch][fetch] … (≤ 1.5 × workers queued, ≤ workers running)
//!              │
//!              ▼  oldest completes → yielded, one more path submitted
//!           consumer
//! ```
//!
//! Dropping the output stream stops submission and aborts every fetch still
//! queued or running.

use crate::error::{Result, StorageError};
use crate::types::RecordPath;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use futures::Stream;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Number of fetches kept queued for `max_workers` workers
pub fn read_ahead_depth(max_workers: usize) -> usize {
    (max_workers.max(1) * 3).div_ceil(2)
}

/// Spawned fetch, aborted when dropped before completion
struct Fetch<T>(JoinHandle<Result<T>>);

impl<T> Fetch<T> {
    async fn join(mut self) -> Result<T> {
        match (&mut self.0).await {
            Ok(result) => result,
            Err(e) => Err(StorageError::unavailable("fetch", format!("fetch task failed: {}", e)).into()),
        }
    }
}

impl<T> Drop for Fetch<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct ReadAhead<T> {
    paths: BoxStream<'static, Result<RecordPath>>,
    in_flight: VecDeque<Fetch<T>>,
    semaphore: Arc<Semaphore>,
    depth: usize,
    exhausted: bool,
}

/// Fetch `paths` concurrently, yielding results in path order
///
/// An error from the path stream is yielded in place and ends submission.
pub fn read_ahead<S, F, Fut, T>(paths: S, max_workers: usize, fetch: F) -> BoxStream<'static, Result<T>>
where
    S: Stream<Item = Result<RecordPath>> + Send + 'static,
    F: Fn(RecordPath) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let fetch = Arc::new(fetch);
    let state = ReadAhead {
        paths: paths.boxed(),
        in_flight: VecDeque::new(),
        semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
        depth: read_ahead_depth(max_workers),
        exhausted: false,
    };

    stream::unfold(state, move |mut state| {
        let fetch = fetch.clone();
        async move {
            while !state.exhausted && state.in_flight.len() < state.depth {
                match state.paths.next().await {
                    Some(Ok(path)) => {
                        let semaphore = state.semaphore.clone();
                        let fetch = fetch.clone();
                        state.in_flight.push_back(Fetch(tokio::spawn(async move {
                            let _permit = semaphore.acquire_owned().await;
                            fetch(path).await
                        })));
                    },
                    Some(Err(e)) => {
                        state.exhausted = true;
                        return Some((Err(e), state));
                    },
                    None => state.exhausted = true,
                }
            }

            let fetch = state.in_flight.pop_front()?;
            Some((fetch.join().await, state))
        }
    })
    .boxed()
}

/// List every item with at most `max_workers` listings in flight
///
/// Children are concatenated in completion order; the first error wins.
pub async fn list_concurrent<I, F, Fut, O>(items: I, max_workers: usize, list: F) -> Result<Vec<O>>
where
    I: IntoIterator,
    F: Fn(I::Item) -> Fut,
    Fut: Future<Output = Result<Vec<O>>>,
{
    stream::iter(items)
        .map(list)
        .buffer_unordered(max_workers.max(1))
        .try_concat()
        .await
}
