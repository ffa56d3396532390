//! Aggregators over descending-time record sequences
//!
//! The engine feeds each record, newest first, to every aggregator still
//! awaiting completion. An aggregator answers each record with a [`Step`]:
//!
//! - [`Step::Continue`]: hand back the accumulator, more records wanted.
//! - [`Step::Done`]: the final value; the aggregator is dropped from the query.
//!
//! A value which is missing from a record, or which the aggregator's filter
//! rejects, is simply "no data for this record" and never an error.
//!
//! # Variants
//!
//! | Aggregator          | Stops when                                  | Result             |
//! |---------------------|---------------------------------------------|--------------------|
//! | [`Last`]            | first accepted value                        | that value         |
//! | [`WindowedCollect`] | record older than the window, or last record | accepted values    |
//! | [`WindowedStdDev`]  | record older than the window, or last record | population stddev  |
//!
//! # Example
//!
//! ```rust
//! use datafile_bank::aggregation::{Last, WindowedCollect};
//!
//! let latest_download = Last::new("ookla.download").decorate("Time");
//! let week_of_pings = WindowedCollect::new(["ping_latency.google", "ping_latency.amazon"], 604_800)
//!     .reverse(true);
//! ```

pub mod last;
pub mod rounding;
pub mod windowed;

pub use last::Last;
pub use rounding::round_value;
pub use windowed::{population_std_dev, Multi, WindowedCollect, WindowedStdDev};

use crate::types::{get_multikey, KeySpec};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

/// Predicate over an extracted value
pub type Filter = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// Values collected so far by one aggregator
pub type Accumulator = VecDeque<Value>;

/// Outcome of feeding one record to an aggregator
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// More records wanted
    Continue(Accumulator),
    /// Final value reached
    Done(Value),
}

/// Everything an aggregator may consult besides the measurement subtree
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// The full record
    pub full: &'a Value,
    /// Results finalized so far in this query
    pub results: &'a Map<String, Value>,
    /// Result name of the aggregator being stepped
    pub name: &'a str,
    /// Record cap of the query
    pub file_limit: usize,
    /// Whether this is the last record of the sequence
    pub last: bool,
    /// Root key of the metadata subtree
    pub meta_prefix: &'a str,
    /// Whether the query returns its single result unwrapped
    pub flat: bool,
    /// Evaluation time, epoch seconds
    pub now: f64,
}

impl<'a> StepContext<'a> {
    /// The record's metadata subtree
    pub fn meta(&self) -> Option<&'a Value> {
        self.full.get(self.meta_prefix)
    }

    /// The record's `Time` metadata, epoch seconds
    pub fn timestamp(&self) -> Option<f64> {
        self.meta()?.get("Time")?.as_f64()
    }
}

/// One aggregation over a query's records
pub trait Aggregator: Send + Sync {
    /// Keys read from each record's measurement subtree
    fn read_key(&self) -> &KeySpec;

    /// Consume one record
    fn step(&self, data: &Value, acc: Accumulator, ctx: &StepContext<'_>) -> Step;

    /// Result name when none is given: the read keys joined with `__`
    fn default_name(&self) -> String {
        self.read_key().keys().join("__")
    }
}

/// Extraction, filtering and decoration shared by all aggregators
#[derive(Clone)]
pub struct Selector {
    read_key: KeySpec,
    decorate: Option<KeySpec>,
    filter: Option<Filter>,
}

impl Selector {
    /// Select `read_key`, accepting every value, without decoration
    pub fn new(read_key: impl Into<KeySpec>) -> Self {
        Self {
            read_key: read_key.into(),
            decorate: None,
            filter: None,
        }
    }

    /// Keys read from each record
    pub fn read_key(&self) -> &KeySpec {
        &self.read_key
    }

    /// Metadata keys attached to each value
    pub fn decorations(&self) -> Option<&KeySpec> {
        self.decorate.as_ref()
    }

    pub(crate) fn set_decorate(&mut self, keys: KeySpec) {
        self.decorate = Some(keys);
    }

    pub(crate) fn set_filter(&mut self, filter: Filter) {
        self.filter = Some(filter);
    }

    /// The accepted value of the read key in `data`
    ///
    /// A composite key yields a list, and only if every key is present.
    pub fn select(&self, data: &Value) -> Option<Value> {
        let value = match &self.read_key {
            KeySpec::One(key) => get_multikey(key, data)?.clone(),
            KeySpec::Many(keys) => Value::Array(
                keys.iter()
                    .map(|key| get_multikey(key, data).cloned())
                    .collect::<Option<Vec<_>>>()?,
            ),
        };

        match &self.filter {
            Some(filter) if !filter(&value) => None,
            _ => Some(value),
        }
    }

    /// Attach the configured metadata fields to `value`
    ///
    /// Flat output pairs the value with its decoration (`[value, meta]`);
    /// structured output nests both (`{"Measurement": …, "Meta": {…}}`).
    /// A field missing from the record's metadata decorates as null.
    pub fn decorate(&self, value: Value, ctx: &StepContext<'_>) -> Value {
        let Some(decorations) = &self.decorate else {
            return value;
        };

        let meta = ctx.meta();
        let fields: Vec<Value> = decorations
            .keys()
            .iter()
            .map(|key| meta.and_then(|m| m.get(key)).cloned().unwrap_or(Value::Null))
            .collect();

        if ctx.flat {
            let decoration = if decorations.is_single() {
                fields.into_iter().next().unwrap_or(Value::Null)
            } else {
                Value::Array(fields)
            };
            Value::Array(vec![value, decoration])
        } else {
            let meta: Map<String, Value> = decorations.keys().iter().cloned().zip(fields).collect();
            let mut bundle = Map::new();
            bundle.insert("Measurement".to_string(), value);
            bundle.insert("Meta".to_string(), Value::Object(meta));
            Value::Object(bundle)
        }
    }
}

impl fmt::Debug for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("read_key", &self.read_key)
            .field("decorate", &self.decorate)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::Ctx;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_select_single_and_composite() {
        let data = json!({"a": {"b": 1}, "c": 2});

        assert_eq!(Selector::new("a.b").select(&data), Some(json!(1)));
        assert_eq!(Selector::new(["a.b", "c"]).select(&data), Some(json!([1, 2])));
        assert_eq!(Selector::new(["a.b", "missing"]).select(&data), None);
        assert_eq!(Selector::new("missing").select(&data), None);
    }

    #[test]
    fn test_select_filter() {
        let mut selector = Selector::new("x");
        selector.set_filter(Arc::new(|v: &Value| v.as_f64().map(|n| n > 0.0).unwrap_or(false)));

        assert_eq!(selector.select(&json!({"x": 5})), Some(json!(5)));
        assert_eq!(selector.select(&json!({"x": -1})), None);
    }

    #[test]
    fn test_decorate_shapes() {
        let mut ctx = Ctx::new(json!({"Meta": {"Time": 100, "Host": "h"}}));

        let mut single = Selector::new("x");
        single.set_decorate(KeySpec::from("Time"));
        let mut multi = Selector::new("x");
        multi.set_decorate(KeySpec::from(["Time", "Host", "Absent"]));

        assert_eq!(
            single.decorate(json!(1), &ctx.get()),
            json!({"Measurement": 1, "Meta": {"Time": 100}})
        );

        ctx.flat = true;
        assert_eq!(single.decorate(json!(1), &ctx.get()), json!([1, 100]));
        assert_eq!(
            multi.decorate(json!(1), &ctx.get()),
            json!([1, [100, "h", null]])
        );
    }

    #[test]
    fn test_decorate_without_meta_subtree() {
        let mut ctx = Ctx::new(json!({}));
        ctx.flat = true;
        let mut selector = Selector::new("x");
        selector.set_decorate(KeySpec::from("Time"));

        assert_eq!(selector.decorate(json!(1), &ctx.get()), json!([1, null]));
    }

    #[test]
    fn test_default_name() {
        assert_eq!(Last::new("a.b").default_name(), "a.b");
        assert_eq!(Last::new(["a", "b"]).default_name(), "a__b");
    }

    #[test]
    fn test_timestamp() {
        let ctx = Ctx::new(json!({"Meta": {"Time": 1700000000.5}}));
        assert_eq!(ctx.get().timestamp(), Some(1700000000.5));
        assert_eq!(Ctx::new(json!({"Meta": {}})).get().timestamp(), None);
    }
}
