//! Typst Markup Emitter
//!
//! Emits `#grid(…)` / `#table(…)` / `#stack(…)` calls with named parameters
//! in a stable order (columns, rows, gutter, align, inset, fill, stroke,
//! then children), so output diffs stay readable and template snapshots stay
//! stable.
//!
//! Cells without overrides emit the bracket form `[content]`; everything
//! else goes through `grid.cell(…)` / `table.cell(…)`. Rule lines become
//! `grid.hline` / `grid.vline` (or the `table.` forms in table context).

use super::format::{format_value, Locale};
use super::{interpolate, DataContext, RenderError};
use crate::layout::{
    evaluate_dynamic, place, resolve_chain, Band, BandRepeat, Cell, Content, Layout, LayoutChild,
    LayoutKind, Length, Line, Orientation, PropValue, PropertyMap, Stroke, TextStyle, TrackSize,
};

/// Renders layout IR to Typst markup.
#[derive(Debug, Clone, Default)]
pub struct TypstRenderer {
    locale: Locale,
}

impl TypstRenderer {
    pub fn new(locale: Locale) -> Self {
        TypstRenderer { locale }
    }

    pub fn render(&self, layout: &Layout, ctx: &DataContext) -> Result<String, RenderError> {
        self.render_layout(layout, ctx)
    }

    fn render_layout(&self, layout: &Layout, ctx: &DataContext) -> Result<String, RenderError> {
        match layout.kind {
            LayoutKind::Stack => self.render_stack(layout, ctx),
            LayoutKind::Grid | LayoutKind::Table => self.render_grid_like(layout, ctx),
        }
    }

    fn render_stack(&self, layout: &Layout, ctx: &DataContext) -> Result<String, RenderError> {
        let dir = layout
            .properties
            .get("dir")
            .and_then(PropValue::as_str)
            .unwrap_or("ttb");
        let spacing = layout
            .properties
            .get("spacing")
            .map(prop_to_length_literal)
            .unwrap_or_else(|| "0pt".to_string());

        let mut out = format!("#stack(dir: {dir}, spacing: {spacing}");
        for cell in layout.cells() {
            out.push_str(", ");
            out.push('[');
            out.push_str(&self.render_contents(&cell.content, ctx)?);
            out.push(']');
        }
        out.push(')');
        Ok(out)
    }

    fn render_grid_like(&self, layout: &Layout, ctx: &DataContext) -> Result<String, RenderError> {
        let kind = layout.kind.as_str();
        let placement = place(&layout.children, layout.column_count())?;

        let mut params: Vec<String> = Vec::new();
        push_track_param(&mut params, "columns", layout.properties.get("columns"));
        push_track_param(&mut params, "rows", layout.properties.get("rows"));
        for key in ["gutter", "column_gutter", "row_gutter"] {
            if let Some(v) = layout.properties.get(key) {
                if !v.is_none() && !matches!(v, PropValue::Dynamic(_)) {
                    let name = key.replace("column_gutter", "column-gutter")
                        .replace("row_gutter", "row-gutter");
                    params.push(format!("{name}: {}", prop_to_length_literal(v)));
                }
            }
        }
        if let Some(v) = layout.properties.get("align") {
            if let Some(a) = align_literal(v) {
                params.push(format!("align: {a}"));
            }
        }
        if let Some(v) = layout.properties.get("inset") {
            if !matches!(v, PropValue::Dynamic(_)) {
                params.push(format!("inset: {}", prop_to_length_literal(v)));
            }
        }
        if let Some(v) = layout.properties.get("fill") {
            if let Some(c) = static_color_literal(v) {
                params.push(format!("fill: {c}"));
            }
        }
        if let Some(v) = layout.properties.get("stroke") {
            if let Some(s) = prop_stroke_literal(v) {
                params.push(format!("stroke: {s}"));
            }
        }

        let mut out = format!("#{kind}(");
        out.push_str(&params.join(", "));

        for band in &layout.headers {
            out.push_str(", ");
            out.push_str(&self.render_band(kind, "header", band, ctx)?);
        }

        // Emit cells in declaration order with their resolved placements.
        let cells = layout.cells();
        let row_props = row_property_index(layout);
        for placed in &placement.cells {
            let cell = cells[placed.index];
            out.push_str(", ");
            out.push_str(&self.render_cell(
                kind,
                cell,
                row_props.get(&placed.index).copied(),
                placed.x,
                placed.y,
                ctx,
            )?);
        }

        for line in &layout.lines {
            out.push_str(", ");
            out.push_str(&line_literal(kind, line));
        }

        for band in &layout.footers {
            out.push_str(", ");
            out.push_str(&self.render_band(kind, "footer", band, ctx)?);
        }

        out.push(')');
        Ok(out)
    }

    fn render_band(
        &self,
        kind: &str,
        band_kind: &str,
        band: &Band,
        ctx: &DataContext,
    ) -> Result<String, RenderError> {
        let mut out = format!("{kind}.{band_kind}(");
        match band.repeat {
            BandRepeat::Always | BandRepeat::Group => out.push_str("repeat: true"),
            BandRepeat::No => out.push_str("repeat: false"),
        }
        for cell in &band.cells {
            out.push_str(", ");
            out.push('[');
            out.push_str(&self.render_contents(&cell.content, ctx)?);
            out.push(']');
        }
        out.push(')');
        Ok(out)
    }

    fn render_cell(
        &self,
        kind: &str,
        cell: &Cell,
        row_props: Option<&PropertyMap>,
        x: u32,
        y: u32,
        ctx: &DataContext,
    ) -> Result<String, RenderError> {
        let chain: Vec<&PropertyMap> = match row_props {
            Some(rp) => vec![rp, &cell.properties],
            None => vec![&cell.properties],
        };
        let resolved = evaluate_dynamic(&resolve_chain(&chain), x, y);

        let mut args: Vec<String> = Vec::new();
        if cell.x.is_some() && cell.y.is_some() {
            args.push(format!("x: {x}"));
            args.push(format!("y: {y}"));
        }
        if cell.colspan > 1 {
            args.push(format!("colspan: {}", cell.colspan));
        }
        if cell.rowspan > 1 {
            args.push(format!("rowspan: {}", cell.rowspan));
        }
        if let Some(v) = resolved.get("align").and_then(align_literal) {
            args.push(format!("align: {v}"));
        }
        if let Some(v) = resolved.get("fill").and_then(static_color_literal) {
            args.push(format!("fill: {v}"));
        }
        if let Some(v) = resolved.get("inset") {
            args.push(format!("inset: {}", prop_to_length_literal(v)));
        }
        if let Some(v) = resolved.get("stroke").and_then(prop_stroke_literal) {
            args.push(format!("stroke: {v}"));
        }
        if let Some(PropValue::Bool(false)) = resolved.get("breakable") {
            args.push("breakable: false".to_string());
        }

        let content = self.render_contents(&cell.content, ctx)?;
        if args.is_empty() {
            Ok(format!("[{content}]"))
        } else {
            Ok(format!("{kind}.cell({})[{content}]", args.join(", ")))
        }
    }

    fn render_contents(
        &self,
        contents: &[Content],
        ctx: &DataContext,
    ) -> Result<String, RenderError> {
        let mut out = String::new();
        for content in contents {
            match content {
                Content::Label { text, style } => {
                    let text = interpolate(text, ctx);
                    out.push_str(&styled(&text, style.as_ref()));
                }
                Content::Field {
                    source,
                    format,
                    decimal_places,
                    style,
                } => {
                    let value = ctx.resolve_field(source);
                    let text = if value.is_null() {
                        // Missing field: keep the placeholder visible.
                        format!("[{}]", source.join("."))
                    } else {
                        format_value(&value, *format, *decimal_places, &self.locale)
                    };
                    out.push_str(&styled(&text, style.as_ref()));
                }
                Content::Nested(layout) => {
                    out.push_str(&self.render_layout(layout, ctx)?);
                }
            }
        }
        Ok(out)
    }
}

/// Wrap text in a single `#text(…)[…]` when any style is present.
fn styled(text: &str, style: Option<&TextStyle>) -> String {
    let Some(style) = style.filter(|s| !s.is_empty()) else {
        return text.to_string();
    };
    let mut args: Vec<String> = Vec::new();
    if let Some(size) = style.size {
        args.push(format!("size: {size}"));
    }
    if let Some(weight) = &style.weight {
        args.push(format!("weight: \"{weight}\""));
    }
    if let Some(fill) = &style.fill {
        args.push(format!("fill: {}", color_literal(fill)));
    }
    if let Some(font) = &style.font {
        args.push(format!("font: \"{font}\""));
    }
    format!("#text({})[{}]", args.join(", "), text)
}

fn row_property_index(layout: &Layout) -> std::collections::HashMap<usize, &PropertyMap> {
    let mut map = std::collections::HashMap::new();
    let mut index = 0usize;
    for child in &layout.children {
        match child {
            LayoutChild::Cell(_) => index += 1,
            LayoutChild::Row(row) => {
                for _ in &row.cells {
                    map.insert(index, &row.properties);
                    index += 1;
                }
            }
        }
    }
    map
}

fn push_track_param(params: &mut Vec<String>, name: &str, value: Option<&PropValue>) {
    match value {
        Some(PropValue::Tracks(tracks)) => {
            params.push(format!("{name}: {}", tracks_literal(tracks)));
        }
        Some(PropValue::Int(n)) => params.push(format!("{name}: {n}")),
        Some(PropValue::Str(s)) if s == "auto" => params.push(format!("{name}: auto")),
        _ => {}
    }
}

fn tracks_literal(tracks: &[TrackSize]) -> String {
    let parts: Vec<String> = tracks.iter().map(track_literal).collect();
    if parts.len() == 1 {
        format!("({},)", parts[0])
    } else {
        format!("({})", parts.join(", "))
    }
}

fn track_literal(track: &TrackSize) -> String {
    match track {
        TrackSize::Auto => "auto".to_string(),
        TrackSize::Fr(n) => Length::Fr(*n).to_string(),
        TrackSize::Length(l) => l.to_string(),
    }
}

fn prop_to_length_literal(value: &PropValue) -> String {
    match value {
        PropValue::Length(l) => l.to_string(),
        PropValue::Int(n) => format!("{n}pt"),
        PropValue::Num(n) => format!("{n}pt"),
        PropValue::Str(s) => s.clone(),
        _ => "0pt".to_string(),
    }
}

/// Alignment tokens map through directly; a pair combines with `+`.
fn align_literal(value: &PropValue) -> Option<String> {
    match value {
        PropValue::Str(s) => Some(s.clone()),
        PropValue::Pair(a, b) => match (align_literal(a), align_literal(b)) {
            (Some(a), Some(b)) => Some(format!("{a} + {b}")),
            _ => None,
        },
        _ => None,
    }
}

fn color_literal(color: &str) -> String {
    if color.starts_with('#') {
        format!("rgb(\"{color}\")")
    } else {
        color.to_string()
    }
}

/// Color parameter from a static prop; `"none"` maps to Typst `none`,
/// dynamic values have already been materialized by the caller.
fn static_color_literal(value: &PropValue) -> Option<String> {
    match value {
        PropValue::Str(s) if s == "none" => Some("none".to_string()),
        PropValue::Str(s) => Some(color_literal(s)),
        _ => None,
    }
}

fn prop_stroke_literal(value: &PropValue) -> Option<String> {
    match value {
        PropValue::Str(s) if s == "none" => Some("none".to_string()),
        PropValue::Str(s) => Some(s.clone()),
        PropValue::Length(l) => Some(l.to_string()),
        _ => None,
    }
}

/// Wrap rendered markup into a complete Typst source file: a short preamble
/// (page and text setup) followed by the body. This is the on-disk template
/// format handed to the compiler.
pub fn document(body: &str, title: Option<&str>) -> String {
    let mut out = String::from("#set page(margin: 2cm)\n#set text(size: 10pt)\n");
    if let Some(title) = title {
        out.push_str(&format!(
            "#align(center)[#text(size: 16pt, weight: \"bold\")[{title}]]\n#v(8pt)\n"
        ));
    }
    out.push('\n');
    out.push_str(body);
    out.push('\n');
    out
}

/// Render a stroke specification.
pub fn stroke_literal(stroke: &Stroke) -> String {
    match stroke {
        Stroke::None => "none".to_string(),
        Stroke::Length(l) => l.to_string(),
        Stroke::Detailed {
            thickness,
            paint,
            dash,
        } => match (paint, dash) {
            (Some(paint), None) => format!("{thickness} + {}", color_literal(paint)),
            (Some(paint), Some(dash)) => format!(
                "(thickness: {thickness}, paint: {}, dash: \"{dash}\")",
                color_literal(paint)
            ),
            (None, Some(dash)) => format!("(thickness: {thickness}, dash: \"{dash}\")"),
            (None, None) => thickness.to_string(),
        },
    }
}

fn line_literal(kind: &str, line: &Line) -> String {
    let (name, coord) = match line.orientation {
        Orientation::H => ("hline", "y"),
        Orientation::V => ("vline", "x"),
    };
    let mut args = vec![format!("{coord}: {}", line.position)];
    if let Some(start) = line.start {
        args.push(format!("start: {start}"));
    }
    if let Some(end) = line.end {
        args.push(format!("end: {end}"));
    }
    args.push(format!("stroke: {}", stroke_literal(&line.stroke)));
    format!("{kind}.{name}({})", args.join(", "))
}
