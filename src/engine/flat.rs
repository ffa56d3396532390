//! Single-aggregator queries with unwrapped results
//!
//! Flat mode changes the shape of decorated values from
//! `{"Measurement": …, "Meta": {…}}` to `[value, meta]`, which is what
//! [`FlatDataFileBank::columns`] unzips into parallel columns.

use super::{now, DataFileBank, Query};
use crate::aggregation::{Aggregator, Last, WindowedCollect, WindowedStdDev};
use crate::error::Result;
use crate::types::KeySpec;
use serde_json::Value;

/// A [`DataFileBank`] evaluating one aggregator at a time
#[derive(Clone)]
pub struct FlatDataFileBank {
    bank: DataFileBank,
}

impl FlatDataFileBank {
    /// Wrap `bank`
    pub fn new(bank: DataFileBank) -> Self {
        Self { bank }
    }

    /// Result of `aggregator` as of now
    pub async fn point(&self, aggregator: impl Aggregator + 'static) -> Result<Value> {
        self.point_at(aggregator, now()).await
    }

    /// Result of `aggregator` as of `now` (epoch seconds)
    pub async fn point_at(&self, aggregator: impl Aggregator + 'static, now: f64) -> Result<Value> {
        let query = Query::new().add(aggregator);
        let results = self.bank.run(query, now, true).await?;
        Ok(results.into_iter().next().map(|(_, value)| value).unwrap_or(Value::Null))
    }

    /// Latest value of `read_key`, optionally decorated
    pub async fn last(&self, read_key: impl Into<KeySpec>, decorate: Option<KeySpec>) -> Result<Value> {
        let mut aggregator = Last::new(read_key);
        if let Some(keys) = decorate {
            aggregator = aggregator.decorate(keys);
        }
        self.point(aggregator).await
    }

    /// Population standard deviation of `read_key` over the last `age_s` seconds
    pub async fn stddev(&self, read_key: impl Into<KeySpec>, age_s: u64) -> Result<Value> {
        self.point(WindowedStdDev::new(read_key, age_s)).await
    }

    /// Parallel columns of `keys` over the last `age_s` seconds, as of now
    ///
    /// See [`columns_at`](Self::columns_at).
    pub async fn columns(
        &self,
        keys: impl Into<KeySpec>,
        age_s: u64,
        decorate: Option<KeySpec>,
        reverse: bool,
    ) -> Result<Vec<Value>> {
        self.columns_at(keys, age_s, decorate, reverse, now()).await
    }

    /// Parallel columns of `keys` over the last `age_s` seconds
    ///
    /// One column per key, in key order, followed by the decoration column if
    /// `decorate` is given. Columns are newest first, or oldest first with
    /// `reverse`.
    ///
    /// Points only ever come from records holding every key. Without any,
    /// each key and each decoration field gets a single null placeholder
    /// instead of a column.
    pub async fn columns_at(
        &self,
        keys: impl Into<KeySpec>,
        age_s: u64,
        decorate: Option<KeySpec>,
        reverse: bool,
        now: f64,
    ) -> Result<Vec<Value>> {
        let keys = keys.into();
        let mut aggregator = WindowedCollect::new(keys.clone(), age_s).reverse(reverse);
        if let Some(decorate) = &decorate {
            aggregator = aggregator.decorate(decorate.clone());
        }

        let points = match self.point_at(aggregator, now).await? {
            Value::Array(points) if !points.is_empty() => points,
            _ => {
                let count = keys.len() + decorate.as_ref().map_or(0, KeySpec::len);
                return Ok(vec![Value::Null; count]);
            },
        };

        let (values, meta) = if decorate.is_some() {
            let (values, meta): (Vec<Value>, Vec<Value>) = points.into_iter().map(split_pair).unzip();
            (values, Some(meta))
        } else {
            (points, None)
        };

        let mut columns = if keys.is_single() {
            vec![Value::Array(values)]
        } else {
            transpose(values, keys.len())
        };
        columns.extend(meta.map(Value::Array));
        Ok(columns)
    }
}

fn split_pair(point: Value) -> (Value, Value) {
    match point {
        Value::Array(pair) => {
            let mut pair = pair.into_iter();
            let value = pair.next().unwrap_or(Value::Null);
            let meta = pair.next().unwrap_or(Value::Null);
            (value, meta)
        },
        other => (other, Value::Null),
    }
}

fn transpose(rows: Vec<Value>, width: usize) -> Vec<Value> {
    let mut columns: Vec<Vec<Value>> = vec![Vec::with_capacity(rows.len()); width];
    for row in rows {
        let mut cells = match row {
            Value::Array(cells) => cells.into_iter(),
            other => vec![other].into_iter(),
        };
        for column in columns.iter_mut() {
            column.push(cells.next().unwrap_or(Value::Null));
        }
    }
    columns.into_iter().map(Value::Array).collect()
}
