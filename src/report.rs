//! Report Definition Model
//!
//! The serde-facing description of a report: which resource drives it, how
//! records group, which running variables exist, and the element tree that
//! becomes the layout IR. Definitions load from JSON (CLI, tests) or are
//! built programmatically.

use crate::aggregation::AggregateKind;
use crate::expr::GroupExpr;
use crate::source::{RelationshipDef, SortDir};
use serde::Deserialize;
use serde_json::Value as Json;

/// When a running variable resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetScope {
    /// Never resets; spans the whole report.
    Report,
    /// Resets at each boundary of the group named by `reset_group`.
    Group,
    /// Resets per rendered page.
    Page,
    /// Resets per detail record.
    Detail,
}

/// One grouping level of a report.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupDef {
    pub level: i32,
    pub name: String,
    #[serde(default)]
    pub expression: Option<GroupExpr>,
    #[serde(default)]
    pub sort: SortDir,
}

/// A running variable (a named aggregation with a reset scope).
#[derive(Debug, Clone, Deserialize)]
pub struct VariableDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: AggregateKind,
    #[serde(default = "default_reset_scope")]
    pub reset_on: ResetScope,
    #[serde(default)]
    pub reset_group: Option<i32>,
}

fn default_reset_scope() -> ResetScope {
    ResetScope::Report
}

/// A complete report definition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportDef {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    /// Resource in the data layer that supplies detail records.
    #[serde(default)]
    pub driving_resource: Option<String>,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub groups: Vec<GroupDef>,
    #[serde(default)]
    pub variables: Vec<VariableDef>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
    #[serde(default)]
    pub elements: Vec<ElementDef>,
}

impl ReportDef {
    /// All chart elements in the tree, in declaration order.
    pub fn charts(&self) -> Vec<&ChartDef> {
        let mut out = Vec::new();
        for element in &self.elements {
            collect_charts(element, &mut out);
        }
        out
    }
}

fn collect_charts<'a>(element: &'a ElementDef, out: &mut Vec<&'a ChartDef>) {
    match element {
        ElementDef::Chart(chart) => out.push(chart),
        ElementDef::Grid(def) | ElementDef::Table(def) | ElementDef::Stack(def) => {
            for child in &def.children {
                let cells: Vec<&CellDef> = match child {
                    ChildDef::Cell(c) => vec![c],
                    ChildDef::Row(r) => r.cells.iter().collect(),
                };
                for cell in cells {
                    for content in &cell.content {
                        if let ContentDef::Layout { layout } = content {
                            collect_charts(layout, out);
                        }
                    }
                }
            }
        }
    }
}

/// One element of the report body.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ElementDef {
    Grid(LayoutDef),
    Table(LayoutDef),
    Stack(LayoutDef),
    Chart(ChartDef),
}

/// Shared definition body for grid/table/stack elements. Container
/// properties arrive as loose JSON and are normalized by the transformer.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayoutDef {
    #[serde(default)]
    pub properties: serde_json::Map<String, Json>,
    #[serde(default)]
    pub children: Vec<ChildDef>,
    #[serde(default)]
    pub lines: Vec<LineDef>,
    #[serde(default)]
    pub headers: Vec<BandDef>,
    #[serde(default)]
    pub footers: Vec<BandDef>,
}

/// A direct child: an explicit row or a free cell.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChildDef {
    Row(RowDef),
    Cell(CellDef),
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowDef {
    #[serde(default)]
    pub properties: serde_json::Map<String, Json>,
    pub cells: Vec<CellDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CellDef {
    #[serde(default)]
    pub x: Option<u32>,
    #[serde(default)]
    pub y: Option<u32>,
    #[serde(default)]
    pub colspan: Option<u32>,
    #[serde(default)]
    pub rowspan: Option<u32>,
    #[serde(default)]
    pub properties: serde_json::Map<String, Json>,
    #[serde(default)]
    pub content: Vec<ContentDef>,
}

/// Cell content definition.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentDef {
    Label {
        text: String,
        #[serde(default)]
        style: Option<StyleDef>,
    },
    Field {
        source: FieldSource,
        #[serde(default)]
        format: Option<crate::layout::FieldFormat>,
        #[serde(default)]
        decimal_places: Option<u32>,
        #[serde(default)]
        style: Option<StyleDef>,
    },
    Layout {
        layout: Box<ElementDef>,
    },
}

/// A field path: either a dotted string (`"customer.name"`) or an explicit
/// segment array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSource(pub Vec<String>);

impl<'de> Deserialize<'de> for FieldSource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Dotted(String),
            Segments(Vec<String>),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Dotted(s) => FieldSource(s.split('.').map(str::to_string).collect()),
            Raw::Segments(v) => FieldSource(v),
        })
    }
}

/// Inline text style definition.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StyleDef {
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub weight: Option<String>,
    #[serde(default)]
    pub fill: Option<String>,
    #[serde(default)]
    pub font: Option<String>,
}

/// A rule line definition.
#[derive(Debug, Clone, Deserialize)]
pub struct LineDef {
    pub orientation: OrientationDef,
    pub position: u32,
    #[serde(default)]
    pub start: Option<u32>,
    #[serde(default)]
    pub end: Option<u32>,
    #[serde(default)]
    pub stroke: Option<StrokeDef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrientationDef {
    H,
    V,
}

/// A stroke: either a bare length string or a detailed specification.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StrokeDef {
    Simple(String),
    Detailed {
        thickness: String,
        #[serde(default)]
        paint: Option<String>,
        #[serde(default)]
        dash: Option<String>,
    },
}

/// A header/footer band definition.
#[derive(Debug, Clone, Deserialize)]
pub struct BandDef {
    #[serde(default)]
    pub repeat: RepeatDef,
    #[serde(default)]
    pub level: Option<i32>,
    #[serde(default)]
    pub cells: Vec<CellDef>,
}

/// Band repetition: `true`/`false` or the string `"group"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepeatDef {
    #[default]
    No,
    Always,
    Group,
}

impl<'de> Deserialize<'de> for RepeatDef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Flag(bool),
            Mode(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Flag(true) => Ok(RepeatDef::Always),
            Raw::Flag(false) => Ok(RepeatDef::No),
            Raw::Mode(s) if s == "group" => Ok(RepeatDef::Group),
            Raw::Mode(other) => Err(serde::de::Error::custom(format!(
                "unknown repeat mode: {other}"
            ))),
        }
    }
}

/// Chart element definition.
#[derive(Debug, Clone, Deserialize)]
pub struct ChartDef {
    pub name: String,
    pub chart_type: ChartType,
    #[serde(default)]
    pub data_source: ChartSource,
    #[serde(default)]
    pub config: Json,
    #[serde(default)]
    pub embed_options: EmbedOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Area,
    Scatter,
}

impl ChartType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChartType::Bar => "bar",
            ChartType::Line => "line",
            ChartType::Pie => "pie",
            ChartType::Area => "area",
            ChartType::Scatter => "scatter",
        }
    }
}

/// Where a chart's data comes from: inline rows, the pipeline's record
/// sample (`"records"`), or nothing (an error placeholder is rendered).
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ChartSource {
    #[default]
    Missing,
    Records,
    Inline(Vec<Json>),
}

impl<'de> Deserialize<'de> for ChartSource {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = Json::deserialize(deserializer)?;
        match raw {
            Json::Null => Ok(ChartSource::Missing),
            Json::String(s) if s == "records" => Ok(ChartSource::Records),
            Json::Array(rows) => Ok(ChartSource::Inline(rows)),
            other => Err(serde::de::Error::custom(format!(
                "chart data_source must be null, \"records\" or an array, got {other}"
            ))),
        }
    }
}

/// Sizing and captioning for an embedded chart image.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmbedOptions {
    #[serde(default)]
    pub width: Option<String>,
    #[serde(default)]
    pub height: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_definition_from_json() {
        let json = serde_json::json!({
            "name": "sales",
            "title": "Sales by Territory",
            "driving_resource": "orders",
            "groups": [
                { "level": 1, "name": "territory", "expression": {"field": "territory"} }
            ],
            "variables": [
                { "name": "total", "type": "sum", "reset_on": "group", "reset_group": 1 }
            ],
            "elements": [
                {
                    "type": "table",
                    "properties": { "columns": 3 },
                    "children": [
                        { "content": [ { "type": "label", "text": "Territory" } ] },
                        { "content": [ { "type": "field", "source": "customer.name" } ] }
                    ]
                }
            ]
        });
        let report: ReportDef = serde_json::from_value(json).expect("valid definition");
        assert_eq!(report.name, "sales");
        assert_eq!(report.groups.len(), 1);
        assert_eq!(report.variables[0].kind, AggregateKind::Sum);
        assert_eq!(report.variables[0].reset_on, ResetScope::Group);
        assert_eq!(report.elements.len(), 1);
    }

    #[test]
    fn test_field_source_shapes() {
        let dotted: FieldSource = serde_json::from_str(r#""customer.name""#).unwrap();
        assert_eq!(dotted.0, vec!["customer".to_string(), "name".to_string()]);

        let segments: FieldSource = serde_json::from_str(r#"["customer", "name"]"#).unwrap();
        assert_eq!(segments, dotted);
    }

    #[test]
    fn test_repeat_def_shapes() {
        assert_eq!(serde_json::from_str::<RepeatDef>("true").unwrap(), RepeatDef::Always);
        assert_eq!(serde_json::from_str::<RepeatDef>("false").unwrap(), RepeatDef::No);
        assert_eq!(
            serde_json::from_str::<RepeatDef>(r#""group""#).unwrap(),
            RepeatDef::Group
        );
        assert!(serde_json::from_str::<RepeatDef>(r#""never""#).is_err());
    }

    #[test]
    fn test_chart_source_shapes() {
        let missing: ChartSource = serde_json::from_str("null").unwrap();
        assert_eq!(missing, ChartSource::Missing);

        let records: ChartSource = serde_json::from_str(r#""records""#).unwrap();
        assert_eq!(records, ChartSource::Records);

        let inline: ChartSource = serde_json::from_str(r#"[{"x": 1}]"#).unwrap();
        assert!(matches!(inline, ChartSource::Inline(rows) if rows.len() == 1));
    }

    #[test]
    fn test_charts_collected_from_nested_layouts() {
        let json = serde_json::json!({
            "name": "r",
            "elements": [
                { "type": "chart", "name": "top", "chart_type": "bar" },
                {
                    "type": "grid",
                    "children": [
                        { "content": [ { "type": "layout",
                            "layout": { "type": "chart", "name": "inner", "chart_type": "pie" } } ] }
                    ]
                }
            ]
        });
        let report: ReportDef = serde_json::from_value(json).expect("valid definition");
        let charts = report.charts();
        assert_eq!(charts.len(), 2);
        assert_eq!(charts[0].name, "top");
        assert_eq!(charts[1].name, "inner");
        assert_eq!(charts[1].chart_type, ChartType::Pie);
    }
}
