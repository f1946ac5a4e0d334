//! Grouped Aggregation State
//!
//! One [`GroupedState`] per configured group spec. Each distinct key tuple
//! owns its own [`AggregationState`]. The group map is the only place the
//! pipeline enforces hard memory backpressure: once `max_groups` distinct
//! keys exist, records with new keys are rejected for this spec (existing
//! keys keep updating, and the record still flows downstream).

use super::{AggregateKind, AggregationState};
use crate::value::{GroupKey, Record};
use serde::Serialize;
use std::collections::HashMap;

/// Configuration of one grouped aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupSpec {
    /// Fields whose values form the group key, in order.
    pub group_by: Vec<String>,
    /// Aggregations folded per group.
    pub aggregations: Vec<AggregateKind>,
    /// Hard cap on distinct keys.
    pub max_groups: usize,
}

impl GroupSpec {
    pub fn new(group_by: Vec<String>, aggregations: Vec<AggregateKind>, max_groups: usize) -> Self {
        GroupSpec {
            group_by,
            aggregations,
            max_groups,
        }
    }

    /// Human-readable identity, used in telemetry and introspection maps.
    pub fn label(&self) -> String {
        self.group_by.join(",")
    }
}

/// Outcome of folding one record into a grouped state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupUpdate {
    /// The record updated an existing group.
    Updated,
    /// The record created a new group.
    Inserted,
    /// The key was new but the cap is reached; nothing was mutated.
    /// `first_crossing` is true exactly once per state, when the cap stops
    /// admitting keys for the first time.
    Rejected { first_crossing: bool },
}

/// Running grouped aggregation for one spec.
#[derive(Debug, Clone)]
pub struct GroupedState {
    spec: GroupSpec,
    groups: HashMap<GroupKey, AggregationState>,
    limit_notified: bool,
}

impl GroupedState {
    pub fn new(spec: GroupSpec) -> Self {
        GroupedState {
            groups: HashMap::new(),
            limit_notified: false,
            spec,
        }
    }

    pub fn spec(&self) -> &GroupSpec {
        &self.spec
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn get(&self, key: &GroupKey) -> Option<&AggregationState> {
        self.groups.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &AggregationState)> {
        self.groups.iter()
    }

    /// Fold one record. Missing fields and explicit nulls coalesce into the
    /// same null key slot.
    pub fn update(&mut self, record: &Record) -> GroupUpdate {
        let key = GroupKey::from_record(record, &self.spec.group_by);

        if let Some(state) = self.groups.get_mut(&key) {
            state.fold(record, &self.spec.aggregations);
            return GroupUpdate::Updated;
        }

        if self.groups.len() >= self.spec.max_groups {
            let first_crossing = !self.limit_notified;
            self.limit_notified = true;
            return GroupUpdate::Rejected { first_crossing };
        }

        let mut state = AggregationState::new();
        state.fold(record, &self.spec.aggregations);
        self.groups.insert(key, state);
        GroupUpdate::Inserted
    }

    /// Snapshot as JSON: `{ display_key → state }`, keyed by the group key's
    /// display form.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        let mut entries: Vec<(&GroupKey, &AggregationState)> = self.groups.iter().collect();
        entries.sort_by_key(|(k, _)| k.to_string());
        for (key, state) in entries {
            map.insert(key.to_string(), state.to_json());
        }
        serde_json::Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn rec(category: &str, amount: f64) -> Record {
        Record::from_pairs([
            ("category", Value::from(category)),
            ("amount", Value::Float(amount)),
        ])
    }

    fn spec(max_groups: usize) -> GroupSpec {
        GroupSpec::new(
            vec!["category".to_string()],
            vec![AggregateKind::Sum, AggregateKind::Count],
            max_groups,
        )
    }

    fn key(v: Value) -> GroupKey {
        GroupKey(vec![v])
    }

    #[test]
    fn test_grouped_sums_per_key() {
        let mut state = GroupedState::new(spec(100));
        for (c, a) in [("A", 100.0), ("B", 200.0), ("A", 150.0), ("B", 50.0)] {
            state.update(&rec(c, a));
        }

        assert_eq!(state.group_count(), 2);
        let a = state.get(&key(Value::from("A"))).expect("group A");
        assert_eq!(a.sum["amount"], 250.0);
        assert_eq!(a.count, 2);
        let b = state.get(&key(Value::from("B"))).expect("group B");
        assert_eq!(b.sum["amount"], 250.0);
        assert_eq!(b.count, 2);
    }

    #[test]
    fn test_cap_rejects_new_keys_only() {
        let mut state = GroupedState::new(GroupSpec::new(
            vec!["id".to_string()],
            vec![AggregateKind::Count],
            3,
        ));

        let mut rejected = 0;
        let mut first_crossings = 0;
        for id in [1, 2, 3, 4, 5] {
            let record = Record::from_pairs([("id", Value::Int(id))]);
            match state.update(&record) {
                GroupUpdate::Rejected { first_crossing } => {
                    rejected += 1;
                    if first_crossing {
                        first_crossings += 1;
                    }
                }
                _ => {}
            }
        }

        assert_eq!(state.group_count(), 3);
        assert_eq!(rejected, 2);
        assert_eq!(first_crossings, 1);
        assert!(state.get(&key(Value::Int(1))).is_some());
        assert!(state.get(&key(Value::Int(4))).is_none());

        // Existing keys continue to update at the cap.
        let record = Record::from_pairs([("id", Value::Int(2))]);
        assert_eq!(state.update(&record), GroupUpdate::Updated);
        assert_eq!(state.get(&key(Value::Int(2))).map(|s| s.count), Some(2));
    }

    #[test]
    fn test_null_and_missing_share_a_slot() {
        let mut state = GroupedState::new(GroupSpec::new(
            vec!["status".to_string()],
            vec![AggregateKind::Count],
            100,
        ));

        state.update(&Record::from_pairs([("status", Value::from("active"))]));
        state.update(&Record::from_pairs([("status", Value::Null)]));
        state.update(&Record::new());
        state.update(&Record::from_pairs([("status", Value::from("inactive"))]));

        assert_eq!(state.group_count(), 3);
        assert_eq!(state.get(&key(Value::from("active"))).map(|s| s.count), Some(1));
        assert_eq!(
            state.get(&key(Value::from("inactive"))).map(|s| s.count),
            Some(1)
        );
        assert_eq!(state.get(&key(Value::Null)).map(|s| s.count), Some(2));
    }

    #[test]
    fn test_compound_keys() {
        let mut state = GroupedState::new(GroupSpec::new(
            vec!["territory".to_string(), "customer".to_string()],
            vec![AggregateKind::Count],
            100,
        ));

        let mut record = Record::new();
        record.insert("territory", Value::from("west"));
        record.insert("customer", Value::from("ACME"));
        state.update(&record);
        state.update(&record.clone());

        let k = GroupKey(vec![Value::from("west"), Value::from("ACME")]);
        assert_eq!(state.get(&k).map(|s| s.count), Some(2));
        assert_eq!(state.group_count(), 1);
    }

    #[test]
    fn test_group_counts_match_total() {
        let mut state = GroupedState::new(spec(100));
        let records = [("A", 1.0), ("B", 2.0), ("A", 3.0), ("C", 4.0), ("B", 5.0)];
        for (c, a) in records {
            state.update(&rec(c, a));
        }
        let total: u64 = state.iter().map(|(_, s)| s.count).sum();
        assert_eq!(total, records.len() as u64);
    }
}
