//! Aggregation invariants: unit scenarios plus property-based coverage of
//! the streaming fold and the group cap.

use proptest::prelude::*;
use reportflow::aggregation::{
    build_aggregations, AggregateKind, AggregationState, BuildOptions, GroupBy, GroupSpec,
    GroupedState,
};
use reportflow::value::{Record, Value};
use reportflow::ReportDef;

const ALL_KINDS: &[AggregateKind] = &[
    AggregateKind::Sum,
    AggregateKind::Count,
    AggregateKind::Avg,
    AggregateKind::Min,
    AggregateKind::Max,
    AggregateKind::RunningTotal,
];

#[test]
fn test_three_level_cumulative_grouping_from_definition() {
    let report: ReportDef = serde_json::from_value(serde_json::json!({
        "name": "orders_by_territory",
        "groups": [
            { "level": 1, "name": "territory", "expression": {"field": "territory"} },
            { "level": 2, "name": "customer_name", "expression": {"field": "customer_name"} },
            { "level": 3, "name": "order_type", "expression": {"field": "order_type"} }
        ]
    }))
    .expect("valid definition");

    let configs = build_aggregations(&report, &BuildOptions::default()).expect("valid");
    assert_eq!(configs.len(), 3);
    assert_eq!(configs[0].level, 1);
    assert_eq!(configs[0].group_by, GroupBy::Single("territory".to_string()));
    assert_eq!(
        configs[1].group_by,
        GroupBy::Multi(vec!["territory".to_string(), "customer_name".to_string()])
    );
    assert_eq!(
        configs[2].group_by,
        GroupBy::Multi(vec![
            "territory".to_string(),
            "customer_name".to_string(),
            "order_type".to_string()
        ])
    );

    // Single fields serialize as bare strings, cumulative lists as arrays.
    let json = serde_json::to_value(&configs).expect("serializable");
    assert_eq!(json[0]["group_by"], serde_json::json!("territory"));
    assert_eq!(
        json[2]["group_by"],
        serde_json::json!(["territory", "customer_name", "order_type"])
    );
}

fn amount_record(value: Option<f64>) -> Record {
    match value {
        Some(v) => Record::from_pairs([("amount", Value::Float(v))]),
        None => Record::from_pairs([("amount", Value::Null)]),
    }
}

proptest! {
    /// count tracks records; sum/min/max/avg track the numeric subset.
    #[test]
    fn prop_fold_matches_reference(values in prop::collection::vec(
        prop::option::of(-1_000_000.0..1_000_000.0f64), 0..200)) {
        let mut state = AggregationState::new();
        for v in &values {
            state.fold(&amount_record(*v), ALL_KINDS);
        }

        let numeric: Vec<f64> = values.iter().flatten().copied().collect();
        prop_assert_eq!(state.count, values.len() as u64);

        if numeric.is_empty() {
            prop_assert!(state.sum.is_empty());
            prop_assert!(state.min.is_empty());
            prop_assert!(state.max.is_empty());
        } else {
            let expected_sum: f64 = numeric.iter().sum();
            prop_assert!((state.sum["amount"] - expected_sum).abs() < 1e-6);
            prop_assert!((state.running_total["amount"] - expected_sum).abs() < 1e-6);
            prop_assert_eq!(
                state.min["amount"],
                numeric.iter().copied().fold(f64::INFINITY, f64::min)
            );
            prop_assert_eq!(
                state.max["amount"],
                numeric.iter().copied().fold(f64::NEG_INFINITY, f64::max)
            );
            prop_assert!((state.avg.sum["amount"] - expected_sum).abs() < 1e-6);
            prop_assert_eq!(state.avg.count, values.len() as u64);
        }

        // min ≤ max for every tracked field.
        for (field, lo) in &state.min {
            prop_assert!(lo <= &state.max[field]);
        }
    }

    /// The group cap is an invariant, not a race: the map never exceeds
    /// max_groups and existing keys always keep updating.
    #[test]
    fn prop_group_cap_holds(
        keys in prop::collection::vec(0..50i64, 0..300),
        max_groups in 1..20usize,
    ) {
        let mut state = GroupedState::new(GroupSpec::new(
            vec!["k".to_string()],
            vec![AggregateKind::Count],
            max_groups,
        ));

        let mut rejected = 0u64;
        for key in &keys {
            let record = Record::from_pairs([("k", Value::Int(*key))]);
            match state.update(&record) {
                reportflow::aggregation::GroupUpdate::Rejected { .. } => rejected += 1,
                _ => {}
            }
            prop_assert!(state.group_count() <= max_groups);
        }

        // Accepted + rejected covers every record exactly once.
        let accepted: u64 = state.iter().map(|(_, s)| s.count).sum();
        prop_assert_eq!(accepted + rejected, keys.len() as u64);

        // Once the cap is reached, the admitted key set is frozen: replaying
        // the stream rejects exactly the keys outside it.
        let admitted: std::collections::HashSet<i64> = state
            .iter()
            .map(|(k, _)| match &k.0[0] {
                Value::Int(i) => *i,
                other => panic!("unexpected key {other:?}"),
            })
            .collect();
        for key in &keys {
            let record = Record::from_pairs([("k", Value::Int(*key))]);
            let update = state.update(&record);
            if admitted.contains(key) {
                prop_assert_eq!(update, reportflow::aggregation::GroupUpdate::Updated);
            } else {
                let is_rejected = matches!(
                    update,
                    reportflow::aggregation::GroupUpdate::Rejected { .. }
                );
                prop_assert!(is_rejected);
            }
        }
    }

    /// Folding in batches is equivalent to folding record by record.
    #[test]
    fn prop_batching_is_transparent(
        values in prop::collection::vec(-1000.0..1000.0f64, 0..100),
        split in 0..100usize,
    ) {
        let records: Vec<Record> = values.iter().map(|v| amount_record(Some(*v))).collect();
        let split = split.min(records.len());

        let mut batched = AggregationState::new();
        for record in &records[..split] {
            batched.fold(record, ALL_KINDS);
        }
        for record in &records[split..] {
            batched.fold(record, ALL_KINDS);
        }

        let mut sequential = AggregationState::new();
        for record in &records {
            sequential.fold(record, ALL_KINDS);
        }

        prop_assert_eq!(batched, sequential);
    }
}
