//! Definition → IR Transformation
//!
//! Turns the loose, JSON-shaped report element definitions into the
//! normalized layout IR: track specs become `TrackSize` lists, length
//! strings become tagged `Length` values, container defaults are merged in,
//! and nested layouts recurse.

use super::properties::{grid_defaults, parse_length, resolve_chain, stack_defaults, table_defaults};
use super::{
    Band, BandRepeat, Cell, Content, Layout, LayoutChild, LayoutKind, Length, Line, Orientation,
    PropValue, PropertyMap, Row, Stroke, TextStyle, TrackSize,
};
use crate::report::{
    BandDef, CellDef, ChildDef, ContentDef, ElementDef, LayoutDef, LineDef, OrientationDef,
    RepeatDef, StrokeDef, StyleDef,
};
use serde_json::Value as Json;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    /// Chart elements are preprocessed separately; they have no layout IR.
    #[error("element '{0}' is not a layout")]
    NotALayout(String),

    /// Grids and tables require a `columns` track spec.
    #[error("{0} definition is missing the required 'columns' property")]
    MissingColumns(&'static str),

    #[error("invalid track specification: {0}")]
    InvalidTrackSpec(String),

    #[error("invalid length: {0}")]
    InvalidLength(String),
}

/// Transform one element definition into layout IR.
pub fn transform(element: &ElementDef) -> Result<Layout, TransformError> {
    match element {
        ElementDef::Grid(def) => transform_container(LayoutKind::Grid, def),
        ElementDef::Table(def) => transform_container(LayoutKind::Table, def),
        ElementDef::Stack(def) => transform_container(LayoutKind::Stack, def),
        ElementDef::Chart(chart) => Err(TransformError::NotALayout(chart.name.clone())),
    }
}

fn transform_container(kind: LayoutKind, def: &LayoutDef) -> Result<Layout, TransformError> {
    let defaults = match kind {
        LayoutKind::Grid => grid_defaults(),
        LayoutKind::Table => table_defaults(),
        LayoutKind::Stack => stack_defaults(),
    };

    let mut given = PropertyMap::new();
    for (key, value) in &def.properties {
        let prop = match key.as_str() {
            "columns" | "rows" => PropValue::Tracks(normalize_tracks(value)?),
            _ => json_to_prop(value),
        };
        given.insert(key.clone(), prop);
    }

    if kind != LayoutKind::Stack && !given.contains_key("columns") {
        return Err(TransformError::MissingColumns(kind.as_str()));
    }

    let properties = resolve_chain(&[&defaults, &given]);

    let mut children = Vec::new();
    let mut row_index = 0;
    for child in &def.children {
        match child {
            ChildDef::Cell(cell) => children.push(LayoutChild::Cell(transform_cell(cell)?)),
            ChildDef::Row(row) => {
                let cells = row
                    .cells
                    .iter()
                    .map(transform_cell)
                    .collect::<Result<Vec<_>, _>>()?;
                let mut properties = PropertyMap::new();
                for (key, value) in &row.properties {
                    properties.insert(key.clone(), json_to_prop(value));
                }
                children.push(LayoutChild::Row(Row {
                    index: row_index,
                    properties,
                    cells,
                }));
                row_index += 1;
            }
        }
    }

    Ok(Layout {
        kind,
        properties,
        children,
        lines: def
            .lines
            .iter()
            .map(transform_line)
            .collect::<Result<Vec<_>, _>>()?,
        headers: def
            .headers
            .iter()
            .map(transform_band)
            .collect::<Result<Vec<_>, _>>()?,
        footers: def
            .footers
            .iter()
            .map(transform_band)
            .collect::<Result<Vec<_>, _>>()?,
    })
}

fn transform_cell(def: &CellDef) -> Result<Cell, TransformError> {
    let mut properties = PropertyMap::new();
    for (key, value) in &def.properties {
        properties.insert(key.clone(), json_to_prop(value));
    }

    let content = def
        .content
        .iter()
        .map(transform_content)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Cell {
        x: def.x,
        y: def.y,
        colspan: def.colspan.unwrap_or(1).max(1),
        rowspan: def.rowspan.unwrap_or(1).max(1),
        properties,
        content,
    })
}

fn transform_content(def: &ContentDef) -> Result<Content, TransformError> {
    Ok(match def {
        ContentDef::Label { text, style } => Content::Label {
            text: text.clone(),
            style: style.as_ref().map(transform_style).transpose()?,
        },
        ContentDef::Field {
            source,
            format,
            decimal_places,
            style,
        } => Content::Field {
            source: source.0.clone(),
            format: *format,
            decimal_places: *decimal_places,
            style: style.as_ref().map(transform_style).transpose()?,
        },
        ContentDef::Layout { layout } => Content::Nested(Box::new(transform(layout)?)),
    })
}

fn transform_style(def: &StyleDef) -> Result<TextStyle, TransformError> {
    let size = match &def.size {
        Some(s) => {
            Some(parse_length(s).ok_or_else(|| TransformError::InvalidLength(s.clone()))?)
        }
        None => None,
    };
    Ok(TextStyle {
        size,
        weight: def.weight.clone(),
        fill: def.fill.clone(),
        font: def.font.clone(),
    })
}

fn transform_line(def: &LineDef) -> Result<Line, TransformError> {
    Ok(Line {
        orientation: match def.orientation {
            OrientationDef::H => Orientation::H,
            OrientationDef::V => Orientation::V,
        },
        position: def.position,
        start: def.start,
        end: def.end,
        stroke: match &def.stroke {
            None => Stroke::Length(Length::Pt(1.0)),
            Some(stroke) => transform_stroke(stroke)?,
        },
    })
}

fn transform_band(def: &BandDef) -> Result<Band, TransformError> {
    Ok(Band {
        repeat: match def.repeat {
            RepeatDef::No => BandRepeat::No,
            RepeatDef::Always => BandRepeat::Always,
            RepeatDef::Group => BandRepeat::Group,
        },
        level: def.level,
        cells: def
            .cells
            .iter()
            .map(transform_cell)
            .collect::<Result<Vec<_>, _>>()?,
    })
}

fn transform_stroke(def: &StrokeDef) -> Result<Stroke, TransformError> {
    Ok(match def {
        StrokeDef::Simple(s) if s == "none" => Stroke::None,
        StrokeDef::Simple(s) => Stroke::Length(
            parse_length(s).ok_or_else(|| TransformError::InvalidLength(s.clone()))?,
        ),
        StrokeDef::Detailed {
            thickness,
            paint,
            dash,
        } => Stroke::Detailed {
            thickness: parse_length(thickness)
                .ok_or_else(|| TransformError::InvalidLength(thickness.clone()))?,
            paint: paint.clone(),
            dash: dash.clone(),
        },
    })
}

/// Normalize a track spec. Accepted shapes: `"auto"`, a length string, an
/// integer N (N auto tracks), `{"fr": n}`, or an array mixing any of these
/// (integers inside an array repeat `auto`).
fn normalize_tracks(value: &Json) -> Result<Vec<TrackSize>, TransformError> {
    match value {
        Json::Array(items) => {
            let mut tracks = Vec::new();
            for item in items {
                tracks.extend(normalize_tracks(item)?);
            }
            Ok(tracks)
        }
        other => normalize_single_track(other),
    }
}

fn normalize_single_track(value: &Json) -> Result<Vec<TrackSize>, TransformError> {
    match value {
        Json::Number(n) => {
            let count = n
                .as_u64()
                .ok_or_else(|| TransformError::InvalidTrackSpec(n.to_string()))?;
            Ok(vec![TrackSize::Auto; count as usize])
        }
        Json::String(s) if s == "auto" => Ok(vec![TrackSize::Auto]),
        Json::String(s) => {
            let length =
                parse_length(s).ok_or_else(|| TransformError::InvalidTrackSpec(s.clone()))?;
            Ok(vec![match length {
                Length::Fr(n) => TrackSize::Fr(n),
                other => TrackSize::Length(other),
            }])
        }
        Json::Object(map) => match map.get("fr").and_then(Json::as_f64) {
            Some(n) => Ok(vec![TrackSize::Fr(n)]),
            None => Err(TransformError::InvalidTrackSpec(
                Json::Object(map.clone()).to_string(),
            )),
        },
        other => Err(TransformError::InvalidTrackSpec(other.to_string())),
    }
}

/// Convert a loose JSON property into a `PropValue`. Length-shaped strings
/// become tagged lengths; a two-string array becomes a pair (combined
/// alignment).
fn json_to_prop(value: &Json) -> PropValue {
    match value {
        Json::Null => PropValue::None,
        Json::Bool(b) => PropValue::Bool(*b),
        Json::Number(n) => n
            .as_i64()
            .map(PropValue::Int)
            .unwrap_or_else(|| PropValue::Num(n.as_f64().unwrap_or(0.0))),
        Json::String(s) => match parse_length(s) {
            Some(Length::Auto) => PropValue::Str(s.clone()),
            Some(length) => PropValue::Length(length),
            None => PropValue::Str(s.clone()),
        },
        Json::Array(items) if items.len() == 2 => PropValue::Pair(
            Box::new(json_to_prop(&items[0])),
            Box::new(json_to_prop(&items[1])),
        ),
        Json::Array(items) => {
            // Longer arrays degrade to their display form.
            PropValue::Str(
                items
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(","),
            )
        }
        Json::Object(_) => PropValue::Str(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn grid_def(json: Json) -> ElementDef {
        serde_json::from_value(json).expect("valid definition")
    }

    #[test]
    fn test_integer_columns_become_auto_tracks() {
        let layout = transform(&grid_def(json!({
            "type": "grid",
            "properties": { "columns": 3 }
        })))
        .expect("valid grid");

        assert_eq!(layout.kind, LayoutKind::Grid);
        assert_eq!(
            layout.properties.get("columns"),
            Some(&PropValue::Tracks(vec![
                TrackSize::Auto,
                TrackSize::Auto,
                TrackSize::Auto
            ]))
        );
        assert_eq!(layout.column_count(), 3);
    }

    #[test]
    fn test_mixed_track_array() {
        let layout = transform(&grid_def(json!({
            "type": "grid",
            "properties": { "columns": ["auto", "1fr", "2cm", {"fr": 2}, 2] }
        })))
        .expect("valid grid");

        assert_eq!(
            layout.properties.get("columns"),
            Some(&PropValue::Tracks(vec![
                TrackSize::Auto,
                TrackSize::Fr(1.0),
                TrackSize::Length(Length::Cm(2.0)),
                TrackSize::Fr(2.0),
                TrackSize::Auto,
                TrackSize::Auto,
            ]))
        );
    }

    #[test]
    fn test_missing_columns_fails_for_grid_not_stack() {
        let err = transform(&grid_def(json!({ "type": "grid" }))).expect_err("columns required");
        assert_eq!(err, TransformError::MissingColumns("grid"));

        let stack = transform(&grid_def(json!({ "type": "stack" }))).expect("stack needs none");
        assert_eq!(stack.kind, LayoutKind::Stack);
        assert_eq!(stack.properties.get("dir"), Some(&PropValue::from("ttb")));
    }

    #[test]
    fn test_table_defaults_applied() {
        let layout = transform(&grid_def(json!({
            "type": "table",
            "properties": { "columns": 2 }
        })))
        .expect("valid table");
        assert_eq!(layout.properties.get("stroke"), Some(&PropValue::from("1pt")));
        assert_eq!(layout.properties.get("inset"), Some(&PropValue::from("5pt")));
    }

    #[test]
    fn test_explicit_properties_override_defaults() {
        let layout = transform(&grid_def(json!({
            "type": "table",
            "properties": { "columns": 2, "stroke": "none", "inset": "2pt" }
        })))
        .expect("valid table");
        assert_eq!(layout.properties.get("stroke"), Some(&PropValue::from("none")));
        assert_eq!(
            layout.properties.get("inset"),
            Some(&PropValue::Length(Length::Pt(2.0)))
        );
    }

    #[test]
    fn test_cells_and_nested_layouts() {
        let layout = transform(&grid_def(json!({
            "type": "grid",
            "properties": { "columns": 2 },
            "children": [
                { "colspan": 2, "content": [ { "type": "label", "text": "Title" } ] },
                { "content": [ { "type": "layout", "layout": {
                    "type": "stack",
                    "children": [ { "content": [ { "type": "field", "source": "customer.name" } ] } ]
                } } ] }
            ]
        })))
        .expect("valid grid");

        let cells = layout.cells();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[0].colspan, 2);
        match &cells[1].content[0] {
            Content::Nested(nested) => {
                assert_eq!(nested.kind, LayoutKind::Stack);
                match &nested.cells()[0].content[0] {
                    Content::Field { source, .. } => {
                        assert_eq!(source, &vec!["customer".to_string(), "name".to_string()]);
                    }
                    other => panic!("expected field content, got {other:?}"),
                }
            }
            other => panic!("expected nested layout, got {other:?}"),
        }
    }

    #[test]
    fn test_rows_get_sequential_indices() {
        let layout = transform(&grid_def(json!({
            "type": "table",
            "properties": { "columns": 2 },
            "children": [
                { "cells": [ { "content": [] }, { "content": [] } ] },
                { "cells": [ { "content": [] } ] }
            ]
        })))
        .expect("valid table");

        let rows: Vec<&Row> = layout
            .children
            .iter()
            .filter_map(|c| match c {
                LayoutChild::Row(r) => Some(r),
                LayoutChild::Cell(_) => None,
            })
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 0);
        assert_eq!(rows[1].index, 1);
    }

    #[test]
    fn test_headers_with_repeat_modes() {
        let layout = transform(&grid_def(json!({
            "type": "table",
            "properties": { "columns": 1 },
            "headers": [
                { "repeat": true, "cells": [ { "content": [] } ] },
                { "repeat": "group", "level": 1, "cells": [] }
            ],
            "footers": [ { "cells": [] } ]
        })))
        .expect("valid table");

        assert_eq!(layout.headers[0].repeat, BandRepeat::Always);
        assert_eq!(layout.headers[1].repeat, BandRepeat::Group);
        assert_eq!(layout.headers[1].level, Some(1));
        assert_eq!(layout.footers[0].repeat, BandRepeat::No);
    }

    #[test]
    fn test_line_stroke_forms() {
        let layout = transform(&grid_def(json!({
            "type": "table",
            "properties": { "columns": 2 },
            "lines": [
                { "orientation": "h", "position": 1 },
                { "orientation": "v", "position": 0, "start": 1, "end": 3, "stroke": "2pt" },
                { "orientation": "h", "position": 2,
                  "stroke": { "thickness": "2pt", "paint": "red", "dash": "dashed" } }
            ]
        })))
        .expect("valid table");

        assert_eq!(layout.lines[0].stroke, Stroke::Length(Length::Pt(1.0)));
        assert_eq!(layout.lines[1].stroke, Stroke::Length(Length::Pt(2.0)));
        assert_eq!(layout.lines[1].start, Some(1));
        assert_eq!(
            layout.lines[2].stroke,
            Stroke::Detailed {
                thickness: Length::Pt(2.0),
                paint: Some("red".to_string()),
                dash: Some("dashed".to_string()),
            }
        );
    }

    #[test]
    fn test_chart_elements_are_not_layouts() {
        let chart = grid_def(json!({ "type": "chart", "name": "sales", "chart_type": "bar" }));
        assert_eq!(
            transform(&chart),
            Err(TransformError::NotALayout("sales".to_string()))
        );
    }
}
