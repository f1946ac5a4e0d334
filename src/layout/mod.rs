//! Layout Intermediate Representation
//!
//! The renderer-agnostic tree every backend consumes: Grid / Table / Stack
//! containers holding cells (directly or grouped into rows), rule lines, and
//! header/footer bands. Cell positions are resolved by the
//! [`position`](crate::layout::position) engine; properties resolve through
//! the container → row → cell inheritance chain in
//! [`properties`](crate::layout::properties).
//!
//! ## Tree shape
//!
//! ```text
//! Layout (Grid | Table | Stack)
//! ├── properties: PropertyMap (static values or (x, y) callables)
//! ├── children: [Cell | Row]
//! │   └── Cell { x?, y?, colspan, rowspan, content: [Content] }
//! ├── lines: [Line]           (hline/vline rules)
//! ├── headers / footers: [Band]  (tables only; repeat + level)
//! ```

pub mod position;
pub mod properties;
pub mod transformer;

pub use position::{place, PlacedCell, Placement, PositionError};
pub use properties::{
    evaluate_dynamic, is_dynamic, parse_length, resolve_align, resolve_chain, resolve_inset,
    separate_static_dynamic,
};
pub use transformer::{transform, TransformError};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Container flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayoutKind {
    Grid,
    Table,
    Stack,
}

impl LayoutKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LayoutKind::Grid => "grid",
            LayoutKind::Table => "table",
            LayoutKind::Stack => "stack",
        }
    }
}

/// A length with an explicit unit. Absolute units normalize to points;
/// relative units (`%`, `fr`, `em`) are preserved as tagged values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Length {
    Pt(f64),
    Cm(f64),
    Mm(f64),
    In(f64),
    Percent(f64),
    Fr(f64),
    Em(f64),
    Auto,
}

impl Length {
    /// Absolute lengths in points; `None` for relative units and `auto`.
    pub fn to_points(&self) -> Option<f64> {
        match self {
            Length::Pt(v) => Some(*v),
            Length::In(v) => Some(v * 72.0),
            Length::Cm(v) => Some(v * 28.3465),
            Length::Mm(v) => Some(v * 2.83465),
            Length::Percent(_) | Length::Fr(_) | Length::Em(_) | Length::Auto => None,
        }
    }
}

impl fmt::Display for Length {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn num(v: f64) -> String {
            if v.fract() == 0.0 {
                format!("{}", v as i64)
            } else {
                format!("{v}")
            }
        }
        match self {
            Length::Pt(v) => write!(f, "{}pt", num(*v)),
            Length::Cm(v) => write!(f, "{}cm", num(*v)),
            Length::Mm(v) => write!(f, "{}mm", num(*v)),
            Length::In(v) => write!(f, "{}in", num(*v)),
            Length::Percent(v) => write!(f, "{}%", num(*v)),
            Length::Fr(v) => write!(f, "{}fr", num(*v)),
            Length::Em(v) => write!(f, "{}em", num(*v)),
            Length::Auto => write!(f, "auto"),
        }
    }
}

/// One track (column or row) size specification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackSize {
    Auto,
    Fr(f64),
    Length(Length),
}

/// A dynamic property: materialized per cell from its `(x, y)` position.
pub type DynamicProp = Arc<dyn Fn(u32, u32) -> PropValue + Send + Sync>;

/// A property value: static, or a callable evaluated at render time.
#[derive(Clone)]
pub enum PropValue {
    Str(String),
    Int(i64),
    Num(f64),
    Bool(bool),
    Length(Length),
    Tracks(Vec<TrackSize>),
    /// Combined pair, e.g. a two-axis alignment `(left, top)`.
    Pair(Box<PropValue>, Box<PropValue>),
    /// Explicit "no value"; never overrides in a resolution chain.
    None,
    Dynamic(DynamicProp),
}

impl PropValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, PropValue::None)
    }
}

impl fmt::Debug for PropValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropValue::Str(s) => write!(f, "Str({s:?})"),
            PropValue::Int(i) => write!(f, "Int({i})"),
            PropValue::Num(n) => write!(f, "Num({n})"),
            PropValue::Bool(b) => write!(f, "Bool({b})"),
            PropValue::Length(l) => write!(f, "Length({l})"),
            PropValue::Tracks(t) => write!(f, "Tracks({t:?})"),
            PropValue::Pair(a, b) => write!(f, "Pair({a:?}, {b:?})"),
            PropValue::None => write!(f, "None"),
            PropValue::Dynamic(_) => write!(f, "Dynamic(<fn>)"),
        }
    }
}

impl PartialEq for PropValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (PropValue::Str(a), PropValue::Str(b)) => a == b,
            (PropValue::Int(a), PropValue::Int(b)) => a == b,
            (PropValue::Num(a), PropValue::Num(b)) => a == b,
            (PropValue::Bool(a), PropValue::Bool(b)) => a == b,
            (PropValue::Length(a), PropValue::Length(b)) => a == b,
            (PropValue::Tracks(a), PropValue::Tracks(b)) => a == b,
            (PropValue::Pair(a1, a2), PropValue::Pair(b1, b2)) => a1 == b1 && a2 == b2,
            (PropValue::None, PropValue::None) => true,
            // Callables compare by identity.
            (PropValue::Dynamic(a), PropValue::Dynamic(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&str> for PropValue {
    fn from(s: &str) -> Self {
        PropValue::Str(s.to_string())
    }
}

/// Property name → value.
pub type PropertyMap = HashMap<String, PropValue>;

/// Field display format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldFormat {
    Currency,
    Number,
    Date,
    Datetime,
    Percent,
}

/// Inline text styling, emitted as a single `#text(…)` wrapper (Typst) or an
/// inline style (HTML).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextStyle {
    pub size: Option<Length>,
    pub weight: Option<String>,
    pub fill: Option<String>,
    pub font: Option<String>,
}

impl TextStyle {
    pub fn is_empty(&self) -> bool {
        self.size.is_none() && self.weight.is_none() && self.fill.is_none() && self.font.is_none()
    }
}

/// Cell content.
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// Literal text; `[name]` placeholders interpolate from the data context.
    Label {
        text: String,
        style: Option<TextStyle>,
    },
    /// A data field, addressed by path into the record.
    Field {
        source: Vec<String>,
        format: Option<FieldFormat>,
        decimal_places: Option<u32>,
        style: Option<TextStyle>,
    },
    /// A nested layout owned exclusively by this cell.
    Nested(Box<Layout>),
}

/// A cell, possibly spanning multiple tracks. `x`/`y` are explicit placement
/// overrides; unset cells flow row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub x: Option<u32>,
    pub y: Option<u32>,
    pub colspan: u32,
    pub rowspan: u32,
    pub properties: PropertyMap,
    pub content: Vec<Content>,
}

impl Default for Cell {
    fn default() -> Self {
        Cell {
            x: None,
            y: None,
            colspan: 1,
            rowspan: 1,
            properties: PropertyMap::new(),
            content: Vec::new(),
        }
    }
}

/// An explicit row of cells. The column cursor resets to 0 at row start.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub index: usize,
    pub properties: PropertyMap,
    pub cells: Vec<Cell>,
}

/// Direct child of a layout.
#[derive(Debug, Clone, PartialEq)]
pub enum LayoutChild {
    Cell(Cell),
    Row(Row),
}

/// Rule line orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    H,
    V,
}

/// A stroke specification.
#[derive(Debug, Clone, PartialEq)]
pub enum Stroke {
    None,
    /// Bare thickness, e.g. `1pt`.
    Length(Length),
    /// Thickness plus paint, optionally dashed.
    Detailed {
        thickness: Length,
        paint: Option<String>,
        dash: Option<String>,
    },
}

/// A rule line across the container at a track boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub orientation: Orientation,
    /// Row index for horizontal lines, column index for vertical lines.
    pub position: u32,
    pub start: Option<u32>,
    pub end: Option<u32>,
    pub stroke: Stroke,
}

/// Band repetition across page breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandRepeat {
    No,
    Always,
    /// Re-emit at each group boundary.
    Group,
}

/// A header or footer band.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub repeat: BandRepeat,
    pub level: Option<i32>,
    pub cells: Vec<Cell>,
}

/// The IR root: one container and everything inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub kind: LayoutKind,
    pub properties: PropertyMap,
    pub children: Vec<LayoutChild>,
    pub lines: Vec<Line>,
    pub headers: Vec<Band>,
    pub footers: Vec<Band>,
}

impl Layout {
    pub fn new(kind: LayoutKind) -> Self {
        Layout {
            kind,
            properties: PropertyMap::new(),
            children: Vec::new(),
            lines: Vec::new(),
            headers: Vec::new(),
            footers: Vec::new(),
        }
    }

    /// Column count from the `columns` property. Stacks have none.
    pub fn column_count(&self) -> usize {
        match self.properties.get("columns") {
            Some(PropValue::Tracks(tracks)) => tracks.len(),
            Some(PropValue::Int(n)) => (*n).max(0) as usize,
            _ => 0,
        }
    }

    /// All cells in declaration order, flattening rows.
    pub fn cells(&self) -> Vec<&Cell> {
        let mut out = Vec::new();
        for child in &self.children {
            match child {
                LayoutChild::Cell(c) => out.push(c),
                LayoutChild::Row(r) => out.extend(r.cells.iter()),
            }
        }
        out
    }
}
