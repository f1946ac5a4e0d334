//! Aggregation Configurator
//!
//! Turns a report definition (groups + variables) into a validated list of
//! grouped-aggregation configs, including the cumulative key expansion and a
//! memory pre-validation pass that fails fast before any pipeline starts.

use super::AggregateKind;
use crate::report::{GroupDef, ReportDef, ResetScope};
use crate::source::SortDir;
use serde::ser::SerializeSeq;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// Why memory pre-validation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitReason {
    TooManyGroups,
    MemoryTooHigh,
}

/// Configuration-time error. Never raised at pipeline runtime.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfiguratorError {
    #[error("{message}")]
    MemoryLimitExceeded {
        reason: LimitReason,
        estimated_groups: u64,
        estimated_memory: u64,
        limit: u64,
        human_readable: String,
        message: String,
    },
}

/// Key spec of one aggregation level: a single field or a cumulative list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupBy {
    Single(String),
    Multi(Vec<String>),
}

impl GroupBy {
    pub fn fields(&self) -> Vec<String> {
        match self {
            GroupBy::Single(f) => vec![f.clone()],
            GroupBy::Multi(fs) => fs.clone(),
        }
    }

    fn from_fields(mut fields: Vec<String>) -> GroupBy {
        if fields.len() == 1 {
            GroupBy::Single(fields.remove(0))
        } else {
            GroupBy::Multi(fields)
        }
    }
}

// A single field serializes as a bare string, a cumulative list as an array.
impl Serialize for GroupBy {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            GroupBy::Single(f) => serializer.serialize_str(f),
            GroupBy::Multi(fs) => {
                let mut seq = serializer.serialize_seq(Some(fs.len()))?;
                for f in fs {
                    seq.serialize_element(f)?;
                }
                seq.end()
            }
        }
    }
}

/// One validated aggregation level.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggConfig {
    pub group_by: GroupBy,
    pub level: i32,
    pub aggregations: Vec<AggregateKind>,
    pub sort: SortDir,
}

/// Options controlling config construction and memory pre-validation.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Level n groups by the combined fields of levels 1..=n.
    pub cumulative: bool,
    pub max_estimated_groups: u64,
    pub max_estimated_memory: u64,
    pub bytes_per_group: u64,
    /// When false, limit violations log a warning instead of failing.
    pub enforce_limits: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            cumulative: true,
            max_estimated_groups: 100_000,
            max_estimated_memory: 256 * 1024 * 1024,
            bytes_per_group: 256,
            enforce_limits: true,
        }
    }
}

impl BuildOptions {
    pub fn from_limits(limits: &crate::config::LimitsConfig) -> Self {
        BuildOptions {
            cumulative: true,
            max_estimated_groups: limits.max_estimated_groups,
            max_estimated_memory: limits.max_estimated_memory,
            bytes_per_group: limits.bytes_per_group,
            enforce_limits: limits.enforce_limits,
        }
    }
}

/// Assumed distinct-key cardinality per level depth, shallowest first.
/// Deeper levels than the table double the last entry.
const BASE_CARDINALITIES: &[u64] = &[100, 1_000, 5_000, 10_000, 20_000];

fn cardinality_at(depth: usize) -> u64 {
    match BASE_CARDINALITIES.get(depth) {
        Some(c) => *c,
        None => {
            let last = BASE_CARDINALITIES[BASE_CARDINALITIES.len() - 1];
            last << (depth + 1 - BASE_CARDINALITIES.len())
        }
    }
}

/// Build one aggregation config per report group.
///
/// Groups are sorted by level ascending (sparse numbering is preserved, not
/// renormalized). Each group's key field comes from its expression, falling
/// back to the group name. Variables with a `group` reset scope attach to
/// their `reset_group` level; levels with no variables default to
/// `[sum, count]`.
pub fn build_aggregations(
    report: &ReportDef,
    opts: &BuildOptions,
) -> Result<Vec<AggConfig>, ConfiguratorError> {
    if report.groups.is_empty() {
        return Ok(Vec::new());
    }

    let mut groups: Vec<&GroupDef> = report.groups.iter().collect();
    groups.sort_by_key(|g| g.level);

    let mut configs = Vec::with_capacity(groups.len());
    let mut cumulative_fields: Vec<String> = Vec::new();

    for group in &groups {
        let field = match &group.expression {
            Some(expr) => expr.extract_field_with_fallback(&group.name),
            None => group.name.clone(),
        };

        let fields = if opts.cumulative {
            cumulative_fields.push(field);
            cumulative_fields.clone()
        } else {
            vec![field]
        };

        configs.push(AggConfig {
            group_by: GroupBy::from_fields(fields),
            level: group.level,
            aggregations: level_aggregations(report, group.level),
            sort: group.sort,
        });
    }

    validate_memory(&configs, report, opts)?;
    Ok(configs)
}

/// Aggregation kinds for one level: the variables that reset on this group,
/// or `[sum, count]` when none do.
fn level_aggregations(report: &ReportDef, level: i32) -> Vec<AggregateKind> {
    let mut kinds: Vec<AggregateKind> = report
        .variables
        .iter()
        .filter(|v| v.reset_on == ResetScope::Group && v.reset_group == Some(level))
        .map(|v| v.kind)
        .collect();
    kinds.dedup();
    if kinds.is_empty() {
        kinds = vec![AggregateKind::Sum, AggregateKind::Count];
    }
    kinds
}

fn validate_memory(
    configs: &[AggConfig],
    report: &ReportDef,
    opts: &BuildOptions,
) -> Result<(), ConfiguratorError> {
    let estimated_groups: u64 = (0..configs.len()).map(cardinality_at).sum();
    let estimated_memory = estimated_groups.saturating_mul(opts.bytes_per_group);

    let violation = if estimated_groups > opts.max_estimated_groups {
        Some((LimitReason::TooManyGroups, opts.max_estimated_groups))
    } else if estimated_memory > opts.max_estimated_memory {
        Some((LimitReason::MemoryTooHigh, opts.max_estimated_memory))
    } else {
        None
    };

    let Some((reason, limit)) = violation else {
        return Ok(());
    };

    let human_readable = human_bytes(estimated_memory);
    let message = match reason {
        LimitReason::TooManyGroups => format!(
            "report '{}' would track an estimated {estimated_groups} groups \
             across {} levels (limit {limit}); reduce grouping depth or raise \
             max_estimated_groups",
            report.name,
            configs.len()
        ),
        LimitReason::MemoryTooHigh => format!(
            "report '{}' would hold an estimated {human_readable} of grouped \
             state (limit {}); reduce grouping depth or raise \
             max_estimated_memory",
            report.name,
            human_bytes(limit)
        ),
    };

    if !opts.enforce_limits {
        tracing::warn!(
            report = %report.name,
            estimated_groups,
            estimated_memory,
            "aggregation_memory_limit_ignored"
        );
        return Ok(());
    }

    Err(ConfiguratorError::MemoryLimitExceeded {
        reason,
        estimated_groups,
        estimated_memory,
        limit,
        human_readable,
        message,
    })
}

fn human_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= GB {
        format!("{:.1} GB", b / GB)
    } else if b >= MB {
        format!("{:.1} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::GroupExpr;
    use crate::report::VariableDef;

    fn group(level: i32, name: &str) -> GroupDef {
        GroupDef {
            level,
            name: name.to_string(),
            expression: Some(GroupExpr::Field(name.to_string())),
            sort: SortDir::Asc,
        }
    }

    fn report(groups: Vec<GroupDef>, variables: Vec<VariableDef>) -> ReportDef {
        ReportDef {
            name: "sales_by_territory".to_string(),
            groups,
            variables,
            ..ReportDef::default()
        }
    }

    #[test]
    fn test_empty_groups_yield_no_configs() {
        let configs = build_aggregations(&report(vec![], vec![]), &BuildOptions::default())
            .expect("empty report");
        assert!(configs.is_empty());
    }

    #[test]
    fn test_three_level_cumulative_grouping() {
        let r = report(
            vec![
                group(1, "territory"),
                group(2, "customer_name"),
                group(3, "order_type"),
            ],
            vec![],
        );
        let configs = build_aggregations(&r, &BuildOptions::default()).expect("valid report");

        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].level, 1);
        assert_eq!(configs[0].group_by, GroupBy::Single("territory".to_string()));
        assert_eq!(configs[1].level, 2);
        assert_eq!(
            configs[1].group_by,
            GroupBy::Multi(vec!["territory".to_string(), "customer_name".to_string()])
        );
        assert_eq!(configs[2].level, 3);
        assert_eq!(
            configs[2].group_by,
            GroupBy::Multi(vec![
                "territory".to_string(),
                "customer_name".to_string(),
                "order_type".to_string()
            ])
        );
    }

    #[test]
    fn test_non_cumulative_mode() {
        let r = report(vec![group(1, "territory"), group(2, "customer")], vec![]);
        let opts = BuildOptions {
            cumulative: false,
            ..BuildOptions::default()
        };
        let configs = build_aggregations(&r, &opts).expect("valid report");
        assert_eq!(configs[1].group_by, GroupBy::Single("customer".to_string()));
    }

    #[test]
    fn test_sparse_levels_sorted_not_renumbered() {
        let r = report(vec![group(5, "c"), group(1, "a"), group(3, "b")], vec![]);
        let configs = build_aggregations(&r, &BuildOptions::default()).expect("valid report");

        assert_eq!(
            configs.iter().map(|c| c.level).collect::<Vec<_>>(),
            vec![1, 3, 5]
        );
        assert_eq!(
            configs[2].group_by,
            GroupBy::Multi(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }

    #[test]
    fn test_expression_resolution_with_fallback() {
        let mut g = group(1, "territory");
        g.expression = Some(GroupExpr::Literal("not a field".to_string()));
        let configs = build_aggregations(&report(vec![g], vec![]), &BuildOptions::default())
            .expect("valid report");
        assert_eq!(configs[0].group_by, GroupBy::Single("territory".to_string()));
    }

    #[test]
    fn test_variables_map_to_levels() {
        let vars = vec![
            VariableDef {
                name: "territory_total".to_string(),
                kind: AggregateKind::Sum,
                reset_on: ResetScope::Group,
                reset_group: Some(1),
            },
            VariableDef {
                name: "territory_max".to_string(),
                kind: AggregateKind::Max,
                reset_on: ResetScope::Group,
                reset_group: Some(1),
            },
            VariableDef {
                name: "grand_total".to_string(),
                kind: AggregateKind::Sum,
                reset_on: ResetScope::Report,
                reset_group: None,
            },
        ];
        let r = report(vec![group(1, "territory"), group(2, "customer")], vars);
        let configs = build_aggregations(&r, &BuildOptions::default()).expect("valid report");

        assert_eq!(
            configs[0].aggregations,
            vec![AggregateKind::Sum, AggregateKind::Max]
        );
        // Level 2 has no group-reset variables: defaults apply.
        assert_eq!(
            configs[1].aggregations,
            vec![AggregateKind::Sum, AggregateKind::Count]
        );
    }

    #[test]
    fn test_memory_limit_too_many_groups() {
        let groups: Vec<GroupDef> = (1..=6).map(|i| group(i, &format!("g{i}"))).collect();
        let opts = BuildOptions {
            max_estimated_groups: 50_000,
            ..BuildOptions::default()
        };
        let err = build_aggregations(&report(groups, vec![]), &opts)
            .expect_err("expected limit violation");

        let ConfiguratorError::MemoryLimitExceeded {
            reason,
            estimated_groups,
            limit,
            ..
        } = err;
        assert_eq!(reason, LimitReason::TooManyGroups);
        // 100 + 1_000 + 5_000 + 10_000 + 20_000 + 40_000
        assert_eq!(estimated_groups, 76_100);
        assert_eq!(limit, 50_000);
    }

    #[test]
    fn test_memory_limit_bytes() {
        let groups: Vec<GroupDef> = (1..=3).map(|i| group(i, &format!("g{i}"))).collect();
        let opts = BuildOptions {
            max_estimated_memory: 1024,
            ..BuildOptions::default()
        };
        let err = build_aggregations(&report(groups, vec![]), &opts)
            .expect_err("expected limit violation");
        let ConfiguratorError::MemoryLimitExceeded {
            reason,
            estimated_memory,
            human_readable,
            ..
        } = err;
        assert_eq!(reason, LimitReason::MemoryTooHigh);
        // (100 + 1_000 + 5_000) * 256
        assert_eq!(estimated_memory, 6_100 * 256);
        assert!(human_readable.ends_with("MB") || human_readable.ends_with("KB"));
    }

    #[test]
    fn test_unenforced_limits_pass_with_warning() {
        let groups: Vec<GroupDef> = (1..=6).map(|i| group(i, &format!("g{i}"))).collect();
        let opts = BuildOptions {
            max_estimated_groups: 10,
            enforce_limits: false,
            ..BuildOptions::default()
        };
        let configs =
            build_aggregations(&report(groups, vec![]), &opts).expect("limits not enforced");
        assert_eq!(configs.len(), 6);
    }
}
