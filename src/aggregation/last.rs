//! Most recent value of a key

use super::{Accumulator, Aggregator, Filter, Selector, Step, StepContext};
use crate::types::KeySpec;
use serde_json::Value;
use std::sync::Arc;

/// The most recent accepted value of a key
///
/// Stops on the first record holding a value that passes the filter. If no
/// record does, the result stays null.
#[derive(Debug, Clone)]
pub struct Last {
    selector: Selector,
}

impl Last {
    /// Latest value of `read_key`
    pub fn new(read_key: impl Into<KeySpec>) -> Self {
        Self {
            selector: Selector::new(read_key),
        }
    }

    /// Attach these metadata fields to the value
    pub fn decorate(mut self, keys: impl Into<KeySpec>) -> Self {
        self.selector.set_decorate(keys.into());
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
}

impl Aggregator for Last {
    fn read_key(&self) -> &KeySpec {
        self.selector.read_key()
    }

    fn step(&self, data: &Value, acc: Accumulator, ctx: &StepContext<'_>) -> Step {
        match self.selector.select(data) {
            Some(value) => Step::Done(self.selector.decorate(value, ctx)),
            None => Step::Continue(acc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::Ctx;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_present_value_wins() {
        let ctx = Ctx::new(json!({}));
        let last = Last::new("x");

        assert_eq!(
            last.step(&json!({"y": 1}), Accumulator::new(), &ctx.get()),
            Step::Continue(Accumulator::new())
        );
        assert_eq!(
            last.step(&json!({"x": 2}), Accumulator::new(), &ctx.get()),
            Step::Done(json!(2))
        );
    }

    #[test]
    fn test_filter_miss_continues() {
        let ctx = Ctx::new(json!({}));
        let last = Last::new("x").filter(|v| !v.is_null());

        assert!(matches!(
            last.step(&json!({"x": null}), Accumulator::new(), &ctx.get()),
            Step::Continue(_)
        ));
    }

    #[test]
    fn test_decorated() {
        let ctx = Ctx::new(json!({"Meta": {"Time": 42}}));
        let last = Last::new("x").decorate("Time");

        assert_eq!(
            last.step(&json!({"x": 1}), Accumulator::new(), &ctx.get()),
            Step::Done(json!({"Measurement": 1, "Meta": {"Time": 42}}))
        );
    }
}
