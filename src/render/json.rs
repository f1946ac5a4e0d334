//! JSON Serializer
//!
//! Pure structural serialization of the layout IR, plus the inverse mapping
//! for snapshot and interchange use. Encoding rules:
//!
//! - enum tags and field atoms serialize as lowercase strings,
//! - pairs (combined alignment, positions, spans) serialize as 2-arrays,
//! - callables serialize as the `"__function__"` sentinel (and deserialize
//!   to that literal string),
//! - lengths and track lists are tagged objects so strings like `"1pt"`
//!   survive a round trip unchanged.

use super::DataContext;
use crate::layout::{
    parse_length, Band, BandRepeat, Cell, Content, Layout, LayoutChild, LayoutKind, Length, Line,
    Orientation, PropValue, PropertyMap, Row, Stroke, TextStyle, TrackSize,
};
use serde_json::{json, Map, Value as Json};
use thiserror::Error;

/// Sentinel for dynamic (callable) property values.
pub const FUNCTION_SENTINEL: &str = "__function__";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JsonDecodeError {
    #[error("unexpected JSON shape at {0}")]
    UnexpectedShape(String),

    #[error("unknown layout kind: {0}")]
    UnknownKind(String),
}

/// Renders layout IR to a JSON map.
#[derive(Debug, Clone, Default)]
pub struct JsonRenderer;

impl JsonRenderer {
    pub fn new() -> Self {
        JsonRenderer
    }

    /// Structural serialization, no data resolution.
    pub fn render(&self, layout: &Layout) -> Json {
        layout_to_json(layout, None)
    }

    /// Serialization with field values resolved against the data context.
    pub fn render_with_data(&self, layout: &Layout, ctx: &DataContext) -> Json {
        layout_to_json(layout, Some(ctx))
    }

    /// Inverse mapping. Dynamic properties come back as the sentinel string.
    pub fn decode(&self, json: &Json) -> Result<Layout, JsonDecodeError> {
        layout_from_json(json)
    }
}

fn layout_to_json(layout: &Layout, ctx: Option<&DataContext>) -> Json {
    json!({
        "kind": layout.kind.as_str(),
        "properties": props_to_json(&layout.properties),
        "children": layout.children.iter().map(|c| child_to_json(c, ctx)).collect::<Vec<_>>(),
        "lines": layout.lines.iter().map(line_to_json).collect::<Vec<_>>(),
        "headers": layout.headers.iter().map(|b| band_to_json(b, ctx)).collect::<Vec<_>>(),
        "footers": layout.footers.iter().map(|b| band_to_json(b, ctx)).collect::<Vec<_>>(),
    })
}

fn props_to_json(props: &PropertyMap) -> Json {
    let mut map = Map::new();
    let mut keys: Vec<&String> = props.keys().collect();
    keys.sort();
    for key in keys {
        map.insert(key.clone(), prop_to_json(&props[key]));
    }
    Json::Object(map)
}

fn prop_to_json(value: &PropValue) -> Json {
    match value {
        PropValue::Str(s) => json!(s),
        PropValue::Int(i) => json!(i),
        PropValue::Num(n) => json!(n),
        PropValue::Bool(b) => json!(b),
        PropValue::Length(l) => json!({ "length": l.to_string() }),
        PropValue::Tracks(tracks) => json!({
            "tracks": tracks.iter().map(track_to_json).collect::<Vec<_>>()
        }),
        PropValue::Pair(a, b) => json!([prop_to_json(a), prop_to_json(b)]),
        PropValue::None => Json::Null,
        PropValue::Dynamic(_) => json!(FUNCTION_SENTINEL),
    }
}

fn track_to_json(track: &TrackSize) -> Json {
    match track {
        TrackSize::Auto => json!("auto"),
        TrackSize::Fr(n) => json!(format!("{}", Length::Fr(*n))),
        TrackSize::Length(l) => json!(l.to_string()),
    }
}

fn child_to_json(child: &LayoutChild, ctx: Option<&DataContext>) -> Json {
    match child {
        LayoutChild::Cell(cell) => json!({ "cell": cell_to_json(cell, ctx) }),
        LayoutChild::Row(row) => json!({ "row": {
            "index": row.index,
            "properties": props_to_json(&row.properties),
            "cells": row.cells.iter().map(|c| cell_to_json(c, ctx)).collect::<Vec<_>>(),
        }}),
    }
}

fn cell_to_json(cell: &Cell, ctx: Option<&DataContext>) -> Json {
    let position = match (cell.x, cell.y) {
        (Some(x), Some(y)) => json!([x, y]),
        _ => Json::Null,
    };
    json!({
        "position": position,
        "span": [cell.colspan, cell.rowspan],
        "properties": props_to_json(&cell.properties),
        "content": cell.content.iter().map(|c| content_to_json(c, ctx)).collect::<Vec<_>>(),
    })
}

fn content_to_json(content: &Content, ctx: Option<&DataContext>) -> Json {
    match content {
        Content::Label { text, style } => json!({
            "type": "label",
            "text": text,
            "style": style.as_ref().map(style_to_json).unwrap_or(Json::Null),
        }),
        Content::Field {
            source,
            format,
            decimal_places,
            style,
        } => {
            let mut map = Map::new();
            map.insert("type".to_string(), json!("field"));
            map.insert("source".to_string(), json!(source));
            map.insert(
                "format".to_string(),
                format.map_or(Json::Null, |f| serde_json::to_value(f).unwrap_or(Json::Null)),
            );
            map.insert("decimal_places".to_string(), json!(decimal_places));
            map.insert(
                "style".to_string(),
                style.as_ref().map(style_to_json).unwrap_or(Json::Null),
            );
            if let Some(ctx) = ctx {
                map.insert("value".to_string(), ctx.resolve_field(source).to_json());
            }
            Json::Object(map)
        }
        Content::Nested(layout) => json!({
            "type": "layout",
            "layout": layout_to_json(layout, ctx),
        }),
    }
}

fn style_to_json(style: &TextStyle) -> Json {
    json!({
        "size": style.size.map(|l| l.to_string()),
        "weight": style.weight,
        "fill": style.fill,
        "font": style.font,
    })
}

fn line_to_json(line: &Line) -> Json {
    json!({
        "orientation": match line.orientation { Orientation::H => "h", Orientation::V => "v" },
        "position": line.position,
        "start": line.start,
        "end": line.end,
        "stroke": stroke_to_json(&line.stroke),
    })
}

fn stroke_to_json(stroke: &Stroke) -> Json {
    match stroke {
        Stroke::None => json!("none"),
        Stroke::Length(l) => json!(l.to_string()),
        Stroke::Detailed {
            thickness,
            paint,
            dash,
        } => json!({
            "thickness": thickness.to_string(),
            "paint": paint,
            "dash": dash,
        }),
    }
}

fn band_to_json(band: &Band, ctx: Option<&DataContext>) -> Json {
    json!({
        "repeat": match band.repeat {
            BandRepeat::No => "no",
            BandRepeat::Always => "always",
            BandRepeat::Group => "group",
        },
        "level": band.level,
        "cells": band.cells.iter().map(|c| cell_to_json(c, ctx)).collect::<Vec<_>>(),
    })
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn layout_from_json(json: &Json) -> Result<Layout, JsonDecodeError> {
    let obj = expect_object(json, "layout")?;
    let kind = match obj.get("kind").and_then(Json::as_str) {
        Some("grid") => LayoutKind::Grid,
        Some("table") => LayoutKind::Table,
        Some("stack") => LayoutKind::Stack,
        Some(other) => return Err(JsonDecodeError::UnknownKind(other.to_string())),
        None => return Err(JsonDecodeError::UnexpectedShape("layout.kind".to_string())),
    };

    let mut layout = Layout::new(kind);
    layout.properties = props_from_json(obj.get("properties").unwrap_or(&Json::Null))?;

    for child in expect_array(obj.get("children"), "layout.children")? {
        let obj = expect_object(child, "child")?;
        if let Some(cell) = obj.get("cell") {
            layout.children.push(LayoutChild::Cell(cell_from_json(cell)?));
        } else if let Some(row) = obj.get("row") {
            let row_obj = expect_object(row, "row")?;
            let cells = expect_array(row_obj.get("cells"), "row.cells")?
                .iter()
                .map(cell_from_json)
                .collect::<Result<Vec<_>, _>>()?;
            layout.children.push(LayoutChild::Row(Row {
                index: row_obj.get("index").and_then(Json::as_u64).unwrap_or(0) as usize,
                properties: props_from_json(row_obj.get("properties").unwrap_or(&Json::Null))?,
                cells,
            }));
        } else {
            return Err(JsonDecodeError::UnexpectedShape("child".to_string()));
        }
    }

    for line in expect_array(obj.get("lines"), "layout.lines")? {
        layout.lines.push(line_from_json(line)?);
    }
    for band in expect_array(obj.get("headers"), "layout.headers")? {
        layout.headers.push(band_from_json(band)?);
    }
    for band in expect_array(obj.get("footers"), "layout.footers")? {
        layout.footers.push(band_from_json(band)?);
    }
    Ok(layout)
}

fn props_from_json(json: &Json) -> Result<PropertyMap, JsonDecodeError> {
    let mut props = PropertyMap::new();
    if json.is_null() {
        return Ok(props);
    }
    let obj = expect_object(json, "properties")?;
    for (key, value) in obj {
        props.insert(key.clone(), prop_from_json(value)?);
    }
    Ok(props)
}

fn prop_from_json(json: &Json) -> Result<PropValue, JsonDecodeError> {
    Ok(match json {
        Json::Null => PropValue::None,
        Json::Bool(b) => PropValue::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => PropValue::Int(i),
            None => PropValue::Num(n.as_f64().unwrap_or(0.0)),
        },
        Json::String(s) => PropValue::Str(s.clone()),
        Json::Array(items) if items.len() == 2 => PropValue::Pair(
            Box::new(prop_from_json(&items[0])?),
            Box::new(prop_from_json(&items[1])?),
        ),
        Json::Array(_) => {
            return Err(JsonDecodeError::UnexpectedShape("property array".to_string()))
        }
        Json::Object(map) => {
            if let Some(Json::String(s)) = map.get("length") {
                PropValue::Length(parse_length(s).ok_or_else(|| {
                    JsonDecodeError::UnexpectedShape(format!("length {s:?}"))
                })?)
            } else if let Some(Json::Array(tracks)) = map.get("tracks") {
                let tracks = tracks
                    .iter()
                    .map(track_from_json)
                    .collect::<Result<Vec<_>, _>>()?;
                PropValue::Tracks(tracks)
            } else {
                return Err(JsonDecodeError::UnexpectedShape("property object".to_string()));
            }
        }
    })
}

fn track_from_json(json: &Json) -> Result<TrackSize, JsonDecodeError> {
    let s = json
        .as_str()
        .ok_or_else(|| JsonDecodeError::UnexpectedShape("track".to_string()))?;
    if s == "auto" {
        return Ok(TrackSize::Auto);
    }
    match parse_length(s) {
        Some(Length::Fr(n)) => Ok(TrackSize::Fr(n)),
        Some(l) => Ok(TrackSize::Length(l)),
        None => Err(JsonDecodeError::UnexpectedShape(format!("track {s:?}"))),
    }
}

fn cell_from_json(json: &Json) -> Result<Cell, JsonDecodeError> {
    let obj = expect_object(json, "cell")?;
    let (x, y) = match obj.get("position") {
        Some(Json::Array(coords)) if coords.len() == 2 => (
            coords[0].as_u64().map(|v| v as u32),
            coords[1].as_u64().map(|v| v as u32),
        ),
        _ => (None, None),
    };
    let (colspan, rowspan) = match obj.get("span") {
        Some(Json::Array(span)) if span.len() == 2 => (
            span[0].as_u64().unwrap_or(1) as u32,
            span[1].as_u64().unwrap_or(1) as u32,
        ),
        _ => (1, 1),
    };
    let content = expect_array(obj.get("content"), "cell.content")?
        .iter()
        .map(content_from_json)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Cell {
        x,
        y,
        colspan,
        rowspan,
        properties: props_from_json(obj.get("properties").unwrap_or(&Json::Null))?,
        content,
    })
}

fn content_from_json(json: &Json) -> Result<Content, JsonDecodeError> {
    let obj = expect_object(json, "content")?;
    match obj.get("type").and_then(Json::as_str) {
        Some("label") => Ok(Content::Label {
            text: obj
                .get("text")
                .and_then(Json::as_str)
                .unwrap_or_default()
                .to_string(),
            style: style_from_json(obj.get("style"))?,
        }),
        Some("field") => Ok(Content::Field {
            source: expect_array(obj.get("source"), "field.source")?
                .iter()
                .filter_map(Json::as_str)
                .map(str::to_string)
                .collect(),
            format: match obj.get("format") {
                Some(Json::Null) | None => None,
                Some(v) => serde_json::from_value(v.clone())
                    .map_err(|_| JsonDecodeError::UnexpectedShape("field.format".to_string()))?,
            },
            decimal_places: obj
                .get("decimal_places")
                .and_then(Json::as_u64)
                .map(|v| v as u32),
            style: style_from_json(obj.get("style"))?,
        }),
        Some("layout") => Ok(Content::Nested(Box::new(layout_from_json(
            obj.get("layout")
                .ok_or_else(|| JsonDecodeError::UnexpectedShape("content.layout".to_string()))?,
        )?))),
        _ => Err(JsonDecodeError::UnexpectedShape("content.type".to_string())),
    }
}

fn style_from_json(json: Option<&Json>) -> Result<Option<TextStyle>, JsonDecodeError> {
    let Some(json) = json else { return Ok(None) };
    if json.is_null() {
        return Ok(None);
    }
    let obj = expect_object(json, "style")?;
    let size = match obj.get("size") {
        Some(Json::String(s)) => Some(parse_length(s).ok_or_else(|| {
            JsonDecodeError::UnexpectedShape(format!("style.size {s:?}"))
        })?),
        _ => None,
    };
    Ok(Some(TextStyle {
        size,
        weight: obj.get("weight").and_then(Json::as_str).map(str::to_string),
        fill: obj.get("fill").and_then(Json::as_str).map(str::to_string),
        font: obj.get("font").and_then(Json::as_str).map(str::to_string),
    }))
}

fn line_from_json(json: &Json) -> Result<Line, JsonDecodeError> {
    let obj = expect_object(json, "line")?;
    Ok(Line {
        orientation: match obj.get("orientation").and_then(Json::as_str) {
            Some("h") => Orientation::H,
            Some("v") => Orientation::V,
            _ => return Err(JsonDecodeError::UnexpectedShape("line.orientation".to_string())),
        },
        position: obj.get("position").and_then(Json::as_u64).unwrap_or(0) as u32,
        start: obj.get("start").and_then(Json::as_u64).map(|v| v as u32),
        end: obj.get("end").and_then(Json::as_u64).map(|v| v as u32),
        stroke: stroke_from_json(obj.get("stroke").unwrap_or(&Json::Null))?,
    })
}

fn stroke_from_json(json: &Json) -> Result<Stroke, JsonDecodeError> {
    match json {
        Json::Null => Ok(Stroke::Length(Length::Pt(1.0))),
        Json::String(s) if s == "none" => Ok(Stroke::None),
        Json::String(s) => parse_length(s)
            .map(Stroke::Length)
            .ok_or_else(|| JsonDecodeError::UnexpectedShape(format!("stroke {s:?}"))),
        Json::Object(map) => {
            let thickness = map
                .get("thickness")
                .and_then(Json::as_str)
                .and_then(parse_length)
                .ok_or_else(|| {
                    JsonDecodeError::UnexpectedShape("stroke.thickness".to_string())
                })?;
            Ok(Stroke::Detailed {
                thickness,
                paint: map.get("paint").and_then(Json::as_str).map(str::to_string),
                dash: map.get("dash").and_then(Json::as_str).map(str::to_string),
            })
        }
        _ => Err(JsonDecodeError::UnexpectedShape("stroke".to_string())),
    }
}

fn band_from_json(json: &Json) -> Result<Band, JsonDecodeError> {
    let obj = expect_object(json, "band")?;
    Ok(Band {
        repeat: match obj.get("repeat").and_then(Json::as_str) {
            Some("always") => BandRepeat::Always,
            Some("group") => BandRepeat::Group,
            _ => BandRepeat::No,
        },
        level: obj.get("level").and_then(Json::as_i64).map(|v| v as i32),
        cells: expect_array(obj.get("cells"), "band.cells")?
            .iter()
            .map(cell_from_json)
            .collect::<Result<Vec<_>, _>>()?,
    })
}

fn expect_object<'a>(
    json: &'a Json,
    at: &str,
) -> Result<&'a Map<String, Json>, JsonDecodeError> {
    json.as_object()
        .ok_or_else(|| JsonDecodeError::UnexpectedShape(at.to_string()))
}

fn expect_array<'a>(json: Option<&'a Json>, at: &str) -> Result<&'a Vec<Json>, JsonDecodeError> {
    match json {
        Some(Json::Array(items)) => Ok(items),
        None | Some(Json::Null) => {
            static EMPTY: Vec<Json> = Vec::new();
            Ok(&EMPTY)
        }
        Some(_) => Err(JsonDecodeError::UnexpectedShape(at.to_string())),
    }
}
