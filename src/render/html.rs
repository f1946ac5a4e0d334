//! HTML/CSS Emitter
//!
//! Grids become `display: grid` divs, tables become semantic `<table>`
//! markup with `<thead>`/`<tbody>`/`<tfoot>` bands, stacks become flex
//! columns/rows. CSS class names are stable (`ash-grid`, `ash-cell`,
//! `ash-label`, `ash-field`, `ash-header`, `ash-footer`) so downstream
//! stylesheets can target them.
//!
//! Every piece of interpolated text is HTML-escaped.

use super::format::{format_value, Locale};
use super::{interpolate, DataContext, RenderError};
use crate::layout::{
    evaluate_dynamic, place, resolve_chain, Band, Cell, Content, Layout, LayoutKind, PlacedCell,
    PropValue, PropertyMap, TrackSize,
};
use std::collections::HashMap;

/// Renders layout IR to HTML.
#[derive(Debug, Clone, Default)]
pub struct HtmlRenderer {
    locale: Locale,
}

impl HtmlRenderer {
    pub fn new(locale: Locale) -> Self {
        HtmlRenderer { locale }
    }

    pub fn render(&self, layout: &Layout, ctx: &DataContext) -> Result<String, RenderError> {
        self.render_layout(layout, ctx)
    }

    fn render_layout(&self, layout: &Layout, ctx: &DataContext) -> Result<String, RenderError> {
        match layout.kind {
            LayoutKind::Stack => self.render_stack(layout, ctx),
            LayoutKind::Grid => self.render_grid(layout, ctx),
            LayoutKind::Table => self.render_table(layout, ctx),
        }
    }

    fn render_stack(&self, layout: &Layout, ctx: &DataContext) -> Result<String, RenderError> {
        let dir = layout
            .properties
            .get("dir")
            .and_then(PropValue::as_str)
            .unwrap_or("ttb");
        let direction = match dir {
            "btt" => "column-reverse",
            "ltr" => "row",
            "rtl" => "row-reverse",
            _ => "column",
        };
        let gap = layout
            .properties
            .get("spacing")
            .map(css_length)
            .unwrap_or_else(|| "0".to_string());

        let mut out = format!(
            "<div class=\"ash-stack\" style=\"display:flex;flex-direction:{direction};gap:{gap}\">"
        );
        for cell in layout.cells() {
            out.push_str("<div class=\"ash-cell\">");
            out.push_str(&self.render_contents(&cell.content, ctx)?);
            out.push_str("</div>");
        }
        out.push_str("</div>");
        Ok(out)
    }

    fn render_grid(&self, layout: &Layout, ctx: &DataContext) -> Result<String, RenderError> {
        let placement = place(&layout.children, layout.column_count())?;
        let template = layout
            .properties
            .get("columns")
            .map(css_tracks)
            .unwrap_or_else(|| "auto".to_string());

        let mut style = format!("display:grid;grid-template-columns:{template}");
        if let Some(gap) = layout.properties.get("gutter") {
            style.push_str(&format!(";gap:{}", css_length(gap)));
        }

        let mut out = format!("<div class=\"ash-grid\" style=\"{style}\">");
        let cells = layout.cells();
        for placed in &placement.cells {
            let cell = cells[placed.index];
            out.push_str(&self.render_grid_cell(cell, placed, ctx)?);
        }
        out.push_str("</div>");
        Ok(out)
    }

    fn render_grid_cell(
        &self,
        cell: &Cell,
        placed: &PlacedCell,
        ctx: &DataContext,
    ) -> Result<String, RenderError> {
        let resolved = evaluate_dynamic(
            &resolve_chain(&[&cell.properties]),
            placed.x,
            placed.y,
        );

        let mut style = String::new();
        if cell.x.is_some() && cell.y.is_some() {
            style.push_str(&format!(
                "grid-column:{} / span {};grid-row:{} / span {};",
                placed.x + 1,
                placed.colspan,
                placed.y + 1,
                placed.rowspan
            ));
        } else {
            if placed.colspan > 1 {
                style.push_str(&format!("grid-column:span {};", placed.colspan));
            }
            if placed.rowspan > 1 {
                style.push_str(&format!("grid-row:span {};", placed.rowspan));
            }
        }
        append_visual_styles(&mut style, &resolved);

        let mut out = String::from("<div class=\"ash-cell\"");
        if !style.is_empty() {
            out.push_str(&format!(
                " style=\"{}\"",
                html_escape::encode_double_quoted_attribute(&style)
            ));
        }
        out.push('>');
        out.push_str(&self.render_contents(&cell.content, ctx)?);
        out.push_str("</div>");
        Ok(out)
    }

    fn render_table(&self, layout: &Layout, ctx: &DataContext) -> Result<String, RenderError> {
        let placement = place(&layout.children, layout.column_count())?;
        let cells = layout.cells();

        let mut out = String::from("<table class=\"ash-table\">");

        if !layout.headers.is_empty() {
            out.push_str("<thead>");
            for band in &layout.headers {
                out.push_str(&self.render_band_row(band, "ash-header", ctx)?);
            }
            out.push_str("</thead>");
        }

        out.push_str("<tbody>");
        // Group placed cells into rows by resolved y; spans render once at
        // their anchor.
        let mut rows: HashMap<u32, Vec<&PlacedCell>> = HashMap::new();
        for placed in &placement.cells {
            rows.entry(placed.y).or_default().push(placed);
        }
        let mut ys: Vec<u32> = rows.keys().copied().collect();
        ys.sort_unstable();
        for y in ys {
            out.push_str("<tr>");
            let mut row_cells = rows.remove(&y).unwrap_or_default();
            row_cells.sort_by_key(|c| c.x);
            for placed in row_cells {
                let cell = cells[placed.index];
                let resolved = evaluate_dynamic(
                    &resolve_chain(&[&cell.properties]),
                    placed.x,
                    placed.y,
                );
                out.push_str("<td class=\"ash-cell\"");
                if placed.colspan > 1 {
                    out.push_str(&format!(" colspan=\"{}\"", placed.colspan));
                }
                if placed.rowspan > 1 {
                    out.push_str(&format!(" rowspan=\"{}\"", placed.rowspan));
                }
                let mut style = String::new();
                append_visual_styles(&mut style, &resolved);
                if !style.is_empty() {
                    out.push_str(&format!(
                        " style=\"{}\"",
                        html_escape::encode_double_quoted_attribute(&style)
                    ));
                }
                out.push('>');
                out.push_str(&self.render_contents(&cell.content, ctx)?);
                out.push_str("</td>");
            }
            out.push_str("</tr>");
        }
        out.push_str("</tbody>");

        if !layout.footers.is_empty() {
            out.push_str("<tfoot>");
            for band in &layout.footers {
                out.push_str(&self.render_band_row(band, "ash-footer", ctx)?);
            }
            out.push_str("</tfoot>");
        }

        out.push_str("</table>");
        Ok(out)
    }

    fn render_band_row(
        &self,
        band: &Band,
        class: &str,
        ctx: &DataContext,
    ) -> Result<String, RenderError> {
        let tag = if class == "ash-header" { "th" } else { "td" };
        let mut out = format!("<tr class=\"{class}\">");
        for cell in &band.cells {
            out.push_str(&format!("<{tag} class=\"ash-cell\""));
            if cell.colspan > 1 {
                out.push_str(&format!(" colspan=\"{}\"", cell.colspan));
            }
            out.push('>');
            out.push_str(&self.render_contents(&cell.content, ctx)?);
            out.push_str(&format!("</{tag}>"));
        }
        out.push_str("</tr>");
        Ok(out)
    }

    fn render_contents(
        &self,
        contents: &[Content],
        ctx: &DataContext,
    ) -> Result<String, RenderError> {
        let mut out = String::new();
        for content in contents {
            match content {
                Content::Label { text, .. } => {
                    let text = interpolate(text, ctx);
                    out.push_str(&format!(
                        "<span class=\"ash-label\">{}</span>",
                        html_escape::encode_text(&text)
                    ));
                }
                Content::Field {
                    source,
                    format,
                    decimal_places,
                    ..
                } => {
                    let value = ctx.resolve_field(source);
                    let text = if value.is_null() {
                        format!("[{}]", source.join("."))
                    } else {
                        format_value(&value, *format, *decimal_places, &self.locale)
                    };
                    out.push_str(&format!(
                        "<span class=\"ash-field\">{}</span>",
                        html_escape::encode_text(&text)
                    ));
                }
                Content::Nested(layout) => {
                    out.push_str(&self.render_layout(layout, ctx)?);
                }
            }
        }
        Ok(out)
    }
}

fn append_visual_styles(style: &mut String, resolved: &PropertyMap) {
    if let Some(PropValue::Str(fill)) = resolved.get("fill") {
        if fill != "none" {
            style.push_str(&format!("background:{fill};"));
        }
    }
    if let Some(align) = resolved.get("align").and_then(PropValue::as_str) {
        let text_align = match align {
            "left" | "start" => "left",
            "right" | "end" => "right",
            "center" => "center",
            other => other,
        };
        style.push_str(&format!("text-align:{text_align};"));
    }
    if let Some(inset) = resolved.get("inset") {
        style.push_str(&format!("padding:{};", css_length(inset)));
    }
}

fn css_length(value: &PropValue) -> String {
    match value {
        PropValue::Length(l) => l.to_string(),
        PropValue::Int(n) => {
            if *n == 0 {
                "0".to_string()
            } else {
                format!("{n}pt")
            }
        }
        PropValue::Num(n) => format!("{n}pt"),
        PropValue::Str(s) => s.clone(),
        _ => "0".to_string(),
    }
}

fn css_tracks(value: &PropValue) -> String {
    match value {
        PropValue::Tracks(tracks) => tracks
            .iter()
            .map(|t| match t {
                TrackSize::Auto => "auto".to_string(),
                TrackSize::Fr(n) => format!("{n}fr"),
                TrackSize::Length(l) => l.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" "),
        PropValue::Int(n) => vec!["auto"; (*n).max(0) as usize].join(" "),
        _ => "auto".to_string(),
    }
}
