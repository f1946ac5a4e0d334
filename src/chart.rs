//! Chart Preprocessing
//!
//! Walks a report definition, generates one SVG per chart element through
//! the charting collaborator, sanitizes the markup, and embeds it as Typst
//! or HTML. Failures never abort a report: a failed chart renders as a
//! visible "Chart Error" block carrying the chart name.
//!
//! `preprocess` renders all charts eagerly (fanned out with rayon);
//! `preprocess_lazy` hands back thunks that render on demand and are pure
//! with respect to the captured data context.

use crate::render::DataContext;
use crate::report::{ChartDef, ChartSource, ReportDef};
use crate::value::Record;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Inline payloads above this size are written to disk and referenced by
/// path instead of base64-embedded.
pub const INLINE_SIZE_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChartError {
    /// The chart has no data source at all.
    #[error("chart has no data source")]
    MissingDataSource,

    /// The charting collaborator failed.
    #[error("chart generation failed: {0}")]
    Generation(String),

    /// The file-backed fallback could not be written.
    #[error("could not write chart asset: {0}")]
    AssetWrite(String),
}

/// The charting collaborator: turns a chart definition plus rows into SVG
/// markup. Implementations live outside this crate.
pub trait ChartRenderer: Send + Sync {
    fn render_svg(&self, chart: &ChartDef, rows: &[serde_json::Value]) -> Result<String, String>;
}

/// Embedding target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartTarget {
    Typst,
    Html,
}

/// The outcome for one chart: markup ready to splice into the document, and
/// the error (if any) that produced a placeholder instead of a real chart.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedChart {
    pub name: String,
    pub markup: String,
    pub error: Option<ChartError>,
}

/// A deferred chart render. May be invoked multiple times; every invocation
/// sees the same captured data.
pub type ChartThunk = Arc<dyn Fn() -> RenderedChart + Send + Sync>;

/// Walks report trees and renders their charts. Cloning is cheap (the
/// renderer is shared), which is what lazy thunks capture.
#[derive(Clone)]
pub struct ChartPreprocessor {
    renderer: Arc<dyn ChartRenderer>,
    target: ChartTarget,
    /// Directory for file-backed assets when a payload exceeds the inline
    /// limit.
    asset_dir: Option<PathBuf>,
    inline_limit: usize,
}

impl ChartPreprocessor {
    pub fn new(renderer: Arc<dyn ChartRenderer>, target: ChartTarget) -> Self {
        ChartPreprocessor {
            renderer,
            target,
            asset_dir: None,
            inline_limit: INLINE_SIZE_LIMIT,
        }
    }

    pub fn with_asset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.asset_dir = Some(dir.into());
        self
    }

    pub fn with_inline_limit(mut self, bytes: usize) -> Self {
        self.inline_limit = bytes;
        self
    }

    /// Render every chart in the report eagerly.
    pub fn preprocess(&self, report: &ReportDef, ctx: &DataContext) -> HashMap<String, RenderedChart> {
        report
            .charts()
            .into_par_iter()
            .map(|chart| (chart.name.clone(), self.render_chart(chart, ctx)))
            .collect()
    }

    /// Return one thunk per chart instead of rendering. Thunks are pure with
    /// respect to the captured rows and may be called repeatedly.
    pub fn preprocess_lazy(
        &self,
        report: &ReportDef,
        ctx: &DataContext,
    ) -> HashMap<String, ChartThunk> {
        report
            .charts()
            .into_iter()
            .map(|chart| {
                let this = self.clone();
                let chart = chart.clone();
                let ctx = ctx.clone();
                let name = chart.name.clone();
                let thunk: ChartThunk = Arc::new(move || this.render_chart(&chart, &ctx));
                (name, thunk)
            })
            .collect()
    }

    fn render_chart(&self, chart: &ChartDef, ctx: &DataContext) -> RenderedChart {
        let rows = match &chart.data_source {
            ChartSource::Inline(rows) => rows.clone(),
            ChartSource::Records => ctx.records.iter().map(Record::to_json).collect(),
            ChartSource::Missing => {
                return self.placeholder(chart, ChartError::MissingDataSource);
            }
        };

        let svg = match self.renderer.render_svg(chart, &rows) {
            Ok(svg) => sanitize_svg(&svg),
            Err(e) => {
                tracing::warn!(chart = %chart.name, error = %e, "chart_generation_failed");
                return self.placeholder(chart, ChartError::Generation(e));
            }
        };

        match self.embed(chart, &svg) {
            Ok(markup) => RenderedChart {
                name: chart.name.clone(),
                markup,
                error: None,
            },
            Err(e) => self.placeholder(chart, e),
        }
    }

    fn embed(&self, chart: &ChartDef, svg: &str) -> Result<String, ChartError> {
        match self.target {
            ChartTarget::Typst => self.embed_typst(chart, svg),
            ChartTarget::Html => Ok(self.embed_html(chart, svg)),
        }
    }

    fn embed_typst(&self, chart: &ChartDef, svg: &str) -> Result<String, ChartError> {
        let image = if svg.len() > self.inline_limit {
            let path = self.write_asset(chart, svg)?;
            let mut args = vec![format!("\"{}\"", path.display())];
            push_dimensions(&mut args, chart);
            format!("#image({})", args.join(", "))
        } else {
            let mut args = vec![
                format!("\"{}\"", BASE64.encode(svg.as_bytes())),
                "format: \"svg\"".to_string(),
            ];
            push_dimensions(&mut args, chart);
            format!("#image.decode({})", args.join(", "))
        };

        Ok(wrap_typst_figure(chart, image))
    }

    fn embed_html(&self, chart: &ChartDef, svg: &str) -> String {
        let mut out = format!(
            "<figure class=\"ash-chart\" data-chart=\"{}\">",
            html_escape::encode_double_quoted_attribute(&chart.name)
        );
        if let Some(title) = &chart.embed_options.title {
            out.push_str(&format!(
                "<header>{}</header>",
                html_escape::encode_text(title)
            ));
        }
        // Sanitized SVG is inlined as-is.
        out.push_str(svg);
        if let Some(caption) = &chart.embed_options.caption {
            out.push_str(&format!(
                "<figcaption>{}</figcaption>",
                html_escape::encode_text(caption)
            ));
        }
        out.push_str("</figure>");
        out
    }

    fn write_asset(&self, chart: &ChartDef, svg: &str) -> Result<PathBuf, ChartError> {
        let dir = self
            .asset_dir
            .as_deref()
            .ok_or_else(|| ChartError::AssetWrite("no asset directory configured".to_string()))?;
        let asset = ScopedAsset::create(dir, &chart.name, svg)
            .map_err(|e| ChartError::AssetWrite(e.to_string()))?;
        Ok(asset.keep())
    }

    fn placeholder(&self, chart: &ChartDef, error: ChartError) -> RenderedChart {
        let markup = match self.target {
            ChartTarget::Typst => format!(
                "#block(stroke: 1pt + red, inset: 8pt)[Chart Error: {} ({})]",
                chart.name, error
            ),
            ChartTarget::Html => format!(
                "<div class=\"ash-chart-error\">Chart Error: {} ({})</div>",
                html_escape::encode_text(&chart.name),
                html_escape::encode_text(&error.to_string())
            ),
        };
        RenderedChart {
            name: chart.name.clone(),
            markup,
            error: Some(error),
        }
    }
}

fn push_dimensions(args: &mut Vec<String>, chart: &ChartDef) {
    if let Some(width) = &chart.embed_options.width {
        args.push(format!("width: {width}"));
    }
    if let Some(height) = &chart.embed_options.height {
        args.push(format!("height: {height}"));
    }
}

fn wrap_typst_figure(chart: &ChartDef, image: String) -> String {
    match (&chart.embed_options.title, &chart.embed_options.caption) {
        (None, None) => image,
        (title, caption) => {
            let mut out = String::from("#figure(");
            // Inside figure arguments the image drops its leading '#'.
            out.push_str(image.trim_start_matches('#'));
            if let Some(caption) = caption.as_ref().or(title.as_ref()) {
                out.push_str(&format!(", caption: [{caption}]"));
            }
            out.push(')');
            out
        }
    }
}

/// A file written under a scope guard: deleted on drop unless kept. Keeps
/// half-written assets from leaking when embedding fails partway.
struct ScopedAsset {
    path: PathBuf,
    persisted: bool,
}

impl ScopedAsset {
    fn create(dir: &Path, name: &str, contents: &str) -> std::io::Result<ScopedAsset> {
        std::fs::create_dir_all(dir)?;
        let safe: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let path = dir.join(format!("{}-{}.svg", safe, uuid::Uuid::new_v4()));
        std::fs::write(&path, contents)?;
        Ok(ScopedAsset {
            path,
            persisted: false,
        })
    }

    fn keep(mut self) -> PathBuf {
        self.persisted = true;
        self.path.clone()
    }
}

impl Drop for ScopedAsset {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

fn sanitize_regexes() -> &'static [Regex; 5] {
    static RES: OnceLock<[Regex; 5]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"(?is)<script\b.*?(?:</script\s*>|/>)").expect("valid pattern"),
            Regex::new(r"(?is)<foreignObject\b.*?(?:</foreignObject\s*>|/>)")
                .expect("valid pattern"),
            Regex::new(r#"(?i)\son[a-z]+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#)
                .expect("valid pattern"),
            Regex::new(r#"(?i)\b(?:href|xlink:href|src)\s*=\s*["']?\s*javascript:[^"'\s>]*["']?"#)
                .expect("valid pattern"),
            Regex::new(r#"(?i)\b(?:href|xlink:href|src)\s*=\s*["']?\s*data:text/html[^"'\s>]*["']?"#)
                .expect("valid pattern"),
        ]
    })
}

/// Strip active content from untrusted SVG: `<script>`, `<foreignObject>`,
/// `on*` event handlers, `javascript:` and `data:text/html` URIs. Geometry
/// elements pass through untouched.
pub fn sanitize_svg(svg: &str) -> String {
    let mut out = svg.to_string();
    for re in sanitize_regexes() {
        out = re.replace_all(&out, "").into_owned();
    }
    out
}
