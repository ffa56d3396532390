//! Progress logging for long enumerations
//!
//! Wraps a stream and logs how many items it has produced, and how long it
//! has been running, at checkpoints 1, 10, 100, 500, 1000, 5000, 10000,
//! 50000, … and once more when the stream ends.
//!
//! ```text
//! datapaths | elapsed=0.3s | produced=100
//! ```

use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;
use tracing::debug;

/// Checkpoint counts: 1, 10, 100, 500, 1000, 5000, 10000, 50000, …
#[derive(Debug, Clone, Default)]
pub struct Checkpoints {
    power: u32,
    half_pending: bool,
}

impl Iterator for Checkpoints {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        let full = 10u64.checked_pow(self.power)?;

        if self.power >= 3 && !self.half_pending {
            self.half_pending = true;
            return Some(full / 2);
        }

        self.half_pending = false;
        self.power += 1;
        Some(full)
    }
}

/// Stream adapter logging production progress under a tag
pub struct Progress<S> {
    inner: S,
    tag: &'static str,
    checkpoints: Checkpoints,
    next_check: u64,
    last_check: u64,
    count: u64,
    started: Option<Instant>,
    done: bool,
}

impl<S> Progress<S> {
    /// Wrap `inner`, logging under `tag`
    pub fn new(inner: S, tag: &'static str) -> Self {
        let mut checkpoints = Checkpoints::default();
        let next_check = checkpoints.next().unwrap_or(u64::MAX);
        Self {
            inner,
            tag,
            checkpoints,
            next_check,
            last_check: 0,
            count: 0,
            started: None,
            done: false,
        }
    }

    /// Items produced so far
    pub fn count(&self) -> u64 {
        self.count
    }

    fn check_in(&self) {
        let elapsed = self.started.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
        debug!(
            "{} | elapsed={:.1}s | produced={}",
            self.tag, elapsed, self.count
        );
    }
}

impl<S: Stream + Unpin> Stream for Progress<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
        if self.done {
            return Poll::Ready(None);
        }
        if self.started.is_none() {
            self.started = Some(Instant::now());
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(item)) => {
                self.count += 1;
                if self.count == self.next_check {
                    self.last_check = self.next_check;
                    self.next_check = self.checkpoints.next().unwrap_or(u64::MAX);
                    self.check_in();
                }
                Poll::Ready(Some(item))
            },
            Poll::Ready(None) => {
                self.done = true;
                if self.count != self.last_check {
                    self.check_in();
                }
                Poll::Ready(None)
            },
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Extension method for wrapping streams in [`Progress`]
pub trait ProgressExt: Stream + Sized {
    /// Log progress of this stream under `tag`
    fn log_progress(self, tag: &'static str) -> Progress<Self> {
        Progress::new(self, tag)
    }
}

impl<S: Stream> ProgressExt for S {}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, StreamExt};

    #[test]
    fn test_checkpoints() {
        let checks: Vec<u64> = Checkpoints::default().take(9).collect();
        assert_eq!(checks, vec![1, 10, 100, 500, 1000, 5000, 10000, 50000, 100000]);
    }

    #[tokio::test]
    async fn test_passes_items_through() {
        let mut progress = stream::iter(0..42).log_progress("test");
        let mut items = Vec::new();
        while let Some(item) = progress.next().await {
            items.push(item);
        }

        assert_eq!(items, (0..42).collect::<Vec<_>>());
        assert_eq!(Progress::count(&progress), 42);
        assert!(progress.next().await.is_none());
    }
}
