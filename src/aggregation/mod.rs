//! Running Aggregations
//!
//! State folded record-by-record as batches flow through a pipeline. All
//! aggregations are streaming: `sum`/`count`/`min`/`max` update in place and
//! `avg` keeps a deferred sum/count pair so division happens only at read
//! time.
//!
//! Numeric coercion is deliberate: only `Int`, `Float` and `Decimal` field
//! values participate in `sum`, `min`, `max`, `avg` and `running_total`;
//! nulls and non-numerics are ignored. `count` counts records, not fields.

pub mod configurator;
pub mod grouped;

pub use configurator::{
    build_aggregations, AggConfig, BuildOptions, ConfiguratorError, GroupBy, LimitReason,
};
pub use grouped::{GroupSpec, GroupUpdate, GroupedState};

use crate::value::Record;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// A streaming aggregation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    Sum,
    Count,
    #[serde(alias = "average")]
    Avg,
    Min,
    Max,
    RunningTotal,
}

impl FromStr for AggregateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("sum") {
            Ok(AggregateKind::Sum)
        } else if s.eq_ignore_ascii_case("count") {
            Ok(AggregateKind::Count)
        } else if s.eq_ignore_ascii_case("avg") || s.eq_ignore_ascii_case("average") {
            Ok(AggregateKind::Avg)
        } else if s.eq_ignore_ascii_case("min") {
            Ok(AggregateKind::Min)
        } else if s.eq_ignore_ascii_case("max") {
            Ok(AggregateKind::Max)
        } else if s.eq_ignore_ascii_case("running_total") {
            Ok(AggregateKind::RunningTotal)
        } else {
            Err(format!("unknown aggregation: {s}"))
        }
    }
}

impl AggregateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateKind::Sum => "sum",
            AggregateKind::Count => "count",
            AggregateKind::Avg => "avg",
            AggregateKind::Min => "min",
            AggregateKind::Max => "max",
            AggregateKind::RunningTotal => "running_total",
        }
    }
}

/// Deferred average: both parts accumulate; division happens at read time.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AvgState {
    pub sum: HashMap<String, f64>,
    pub count: u64,
}

impl AvgState {
    /// Materialized averages per field.
    pub fn resolve(&self) -> HashMap<String, f64> {
        if self.count == 0 {
            return HashMap::new();
        }
        self.sum
            .iter()
            .map(|(k, v)| (k.clone(), v / self.count as f64))
            .collect()
    }
}

/// Running aggregation state for one scope (global, or one group).
///
/// Which maps actually update is decided by the configured kinds passed to
/// [`fold`](Self::fold); the others stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationState {
    pub sum: HashMap<String, f64>,
    pub count: u64,
    pub avg: AvgState,
    pub min: HashMap<String, f64>,
    pub max: HashMap<String, f64>,
    /// Accumulates across batches and never resets. Kept separately from
    /// `sum` so renderers can read both in one snapshot.
    pub running_total: HashMap<String, f64>,
}

impl AggregationState {
    pub fn new() -> Self {
        AggregationState::default()
    }

    /// Fold one record into the state for the configured kinds.
    pub fn fold(&mut self, record: &Record, kinds: &[AggregateKind]) {
        if kinds.contains(&AggregateKind::Count) {
            self.count += 1;
        }
        if kinds.contains(&AggregateKind::Avg) {
            self.avg.count += 1;
        }

        for (field, value) in record.iter() {
            let Some(n) = value.as_f64() else { continue };

            if kinds.contains(&AggregateKind::Sum) {
                *self.sum.entry(field.clone()).or_insert(0.0) += n;
            }
            if kinds.contains(&AggregateKind::RunningTotal) {
                *self.running_total.entry(field.clone()).or_insert(0.0) += n;
            }
            if kinds.contains(&AggregateKind::Avg) {
                *self.avg.sum.entry(field.clone()).or_insert(0.0) += n;
            }
            if kinds.contains(&AggregateKind::Min) {
                self.min
                    .entry(field.clone())
                    .and_modify(|m| *m = m.min(n))
                    .or_insert(n);
            }
            if kinds.contains(&AggregateKind::Max) {
                self.max
                    .entry(field.clone())
                    .and_modify(|m| *m = m.max(n))
                    .or_insert(n);
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "sum": self.sum,
            "count": self.count,
            "avg": { "sum": self.avg.sum, "count": self.avg.count },
            "min": self.min,
            "max": self.max,
            "running_total": self.running_total,
        })
    }
}
