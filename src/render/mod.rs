//! Renderers
//!
//! Three backends consume the layout IR:
//!
//! - [`typst`] emits Typst markup for PDF compilation,
//! - [`html`] emits HTML with CSS Grid/Flexbox,
//! - [`json`] emits a structural JSON map.
//!
//! All backends share the [`DataContext`] for field resolution and `[name]`
//! placeholder interpolation, and degrade gracefully: a missing variable
//! stays verbatim, a missing field renders as its placeholder. Only
//! positioning failures abort a layout.

pub mod format;
pub mod html;
pub mod json;
pub mod typst;

pub use format::Locale;
pub use html::HtmlRenderer;
pub use json::JsonRenderer;
pub use typst::TypstRenderer;

use crate::layout::PositionError;
use crate::value::{Record, Value};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RenderError {
    /// Cell positioning failed; this layout cannot be rendered.
    #[error(transparent)]
    Position(#[from] PositionError),
}

/// Output flavor, for callers that dispatch by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderTarget {
    Typst,
    Html,
    Json,
}

/// Data handed to a renderer alongside the IR: the record sample, the
/// current record for field resolution, and named variables for placeholder
/// interpolation (typically aggregation results).
#[derive(Debug, Clone, Default)]
pub struct DataContext {
    pub records: Vec<Record>,
    pub current: Option<Record>,
    pub variables: HashMap<String, Value>,
}

impl DataContext {
    pub fn new() -> Self {
        DataContext::default()
    }

    pub fn with_records(records: Vec<Record>) -> Self {
        DataContext {
            records,
            ..DataContext::default()
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    /// The record field paths resolve against: the current record, falling
    /// back to the first sampled record.
    pub fn focus(&self) -> Option<&Record> {
        self.current.as_ref().or_else(|| self.records.first())
    }

    /// Resolve a field path against the focused record. Missing paths (or no
    /// focused record at all) yield `Null`.
    pub fn resolve_field(&self, path: &[String]) -> Value {
        match self.focus() {
            Some(record) => record.get_path(path),
            None => Value::Null,
        }
    }
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[([A-Za-z_][A-Za-z0-9_.]*)\]").expect("valid placeholder pattern")
    })
}

/// Substitute `[name]` placeholders from the context's variables. Unknown
/// names stay verbatim.
pub fn interpolate(text: &str, ctx: &DataContext) -> String {
    placeholder_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match ctx.variables.get(name) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolation_with_missing_variables() {
        let ctx = DataContext::new()
            .with_variable("total", Value::Float(250.0))
            .with_variable("report_name", Value::from("Sales"));

        assert_eq!(
            interpolate("Report [report_name]: [total] ([unknown])", &ctx),
            "Report Sales: 250 ([unknown])"
        );
    }

    #[test]
    fn test_field_resolution_prefers_current() {
        let first = Record::from_pairs([("name", Value::from("first"))]);
        let current = Record::from_pairs([("name", Value::from("current"))]);

        let mut ctx = DataContext::with_records(vec![first]);
        assert_eq!(
            ctx.resolve_field(&["name".to_string()]),
            Value::from("first")
        );

        ctx.current = Some(current);
        assert_eq!(
            ctx.resolve_field(&["name".to_string()]),
            Value::from("current")
        );
    }

    #[test]
    fn test_field_resolution_without_records() {
        let ctx = DataContext::new();
        assert_eq!(ctx.resolve_field(&["anything".to_string()]), Value::Null);
    }
}
