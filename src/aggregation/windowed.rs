//! Aggregators over an age window
//!
//! Records arrive newest first, so the first record whose `Time` metadata is
//! at least `age` seconds before evaluation time closes the window: nothing
//! after it can be younger. The window also closes at the last record of the
//! sequence. Records without a `Time` contribute nothing.

use super::{Accumulator, Aggregator, Filter, Selector, Step, StepContext};
use crate::types::KeySpec;
use serde_json::Value;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy)]
struct Window {
    age_s: f64,
    reverse: bool,
}

impl Window {
    fn step<P, F>(&self, produce: P, mut acc: Accumulator, ctx: &StepContext<'_>, finalize: F) -> Step
    where
        P: FnOnce() -> Option<Value>,
        F: FnOnce(Accumulator) -> Value,
    {
        match ctx.timestamp() {
            Some(time) if ctx.now - time >= self.age_s => return Step::Done(finalize(acc)),
            Some(_) => {
                if let Some(value) = produce() {
                    if self.reverse {
                        acc.push_front(value);
                    } else {
                        acc.push_back(value);
                    }
                }
            },
            None => trace!(name = ctx.name, "record without timestamp skipped"),
        }

        if ctx.last {
            Step::Done(finalize(acc))
        } else {
            Step::Continue(acc)
        }
    }
}

/// Every accepted value within an age window
///
/// Values are listed newest first, or oldest first with
/// [`reverse`](Self::reverse).
#[derive(Debug, Clone)]
pub struct WindowedCollect {
    selector: Selector,
    window: Window,
}

/// Shorthand for [`WindowedCollect`]
pub type Multi = WindowedCollect;

impl WindowedCollect {
    /// Values of `read_key` from the last `age_s` seconds
    pub fn new(read_key: impl Into<KeySpec>, age_s: u64) -> Self {
        Self {
            selector: Selector::new(read_key),
            window: Window {
                age_s: age_s as f64,
                reverse: false,
            },
        }
    }

    /// Attach these metadata fields to each value
    pub fn decorate(mut self, keys: impl Into<KeySpec>) -> Self {
        self.selector.set_decorate(keys.into());
        self
    }

    /// List values oldest first
    pub fn reverse(mut self, reverse: bool) -> Self {
        self.window.reverse = reverse;
        self
    }

    /// Only accept values satisfying `filter`
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.selector.set_filter(Arc::new(filter) as Filter);
        self
    }

    /// Metadata keys attached to each value
    pub fn decorations(&self) -> Option<&KeySpec> {
        self.selector.decorations()
    }
}

impl Aggregator for WindowedCollect {
    fn read_key(&self) -> &KeySpec {
        self.selector.read_key()
    }

    fn step(&self, data: &Value, acc: Accumulator, ctx: &StepContext<'_>) -> Step {
        self.window.step(
            || {
                self.selector
                    .select(data)
                    .map(|value| self.selector.decorate(value, ctx))
            },
            acc,
            ctx,
            |values| Value::Array(values.into()),
        )
    }
}

/// Population standard deviation of numeric values within an age window
///
/// Non-numeric values are ignored. Fewer than two values give null.
/// Values cannot be decorated.
#[derive(Debug, Clone)]
pub struct WindowedStdDev {
    selector: Selector,
    window: Window,
}

impl WindowedStdDev {
    /// Standard deviation of `read_key` over the last `age_s` seconds
    pub fn new(read_key: impl Into<KeySpec>, age_s: u64) -> Self {
        Self {
            selector: Selector::new(read_key),
            window: Window {
                age_s: age_s as f64,
                reverse: false,
            },
        }
    }

    /// Only accept values satisfying `filter`
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.selector.set_filter(Arc::new(filter) as Filter);
        self
    }
}

impl Aggregator for WindowedStdDev {
    fn read_key(&self) -> &KeySpec {
        self.selector.read_key()
    }

    fn step(&self, data: &Value, acc: Accumulator, ctx: &StepContext<'_>) -> Step {
        self.window.step(
            || self.selector.select(data).filter(Value::is_number),
            acc,
            ctx,
            |values| {
                population_std_dev(values.iter().filter_map(Value::as_f64))
                    .map(Value::from)
                    .unwrap_or(Value::Null)
            },
        )
    }
}

/// Population standard deviation; `None` for fewer than two values
pub fn population_std_dev(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut count = 0u64;
    let mut mean = 0.0;
    let mut m2 = 0.0;

    // Welford's online algorithm
    for value in values {
        count += 1;
        let delta = value - mean;
        mean += delta / count as f64;
        m2 += delta * (value - mean);
    }

    if count < 2 {
        return None;
    }
    Some((m2 / count as f64).sqrt())
}
