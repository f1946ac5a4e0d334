//! # ReportFlow
//!
//! A streaming report engine: bounded, backpressured record pipelines with
//! running aggregations feed a renderer-agnostic layout IR that compiles to
//! PDF (via Typst markup), HTML, or JSON.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! DataSource (pages)
//!     ↓
//! [Feeder]            → enqueues chunks, never blocks
//!     ↓
//! [Producer]          → FIFO + pending-demand dispatch
//!     ↓  (demand-driven batches)
//! [ProducerConsumer]  → per-record transform, global + grouped aggregation
//!     ↓  (bounded hand-off)
//! [Sink]              → record sample / per-batch callback
//!     ↓
//! aggregations + sample → [Layout IR] → Typst | HTML | JSON
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use reportflow::pipeline::{Pipeline, PipelineOptions};
//! use reportflow::source::{PageRequest, QuerySpec, VecSource};
//! use reportflow::aggregation::{AggregateKind, GroupSpec};
//! use std::sync::Arc;
//!
//! let source = Arc::new(VecSource::new(vec![]));
//! let request = PageRequest {
//!     domain: "sales".into(),
//!     resource: "orders".into(),
//!     query: QuerySpec::default(),
//!     offset: 0,
//!     limit: 500,
//! };
//!
//! let mut options = PipelineOptions::new("sales_by_territory", source, request);
//! options.consumer.aggregations = vec![AggregateKind::Sum, AggregateKind::Count];
//! options.consumer.grouped_aggregations = vec![GroupSpec::new(
//!     vec!["territory".into()],
//!     vec![AggregateKind::Sum, AggregateKind::Count],
//!     10_000,
//! )];
//!
//! let pipeline = Pipeline::start(options)?;
//! let result = pipeline.wait()?;
//! println!("processed {}", result.snapshot.total_transformed);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `value` | Record/value model shared by every stage |
//! | `expr` | Group-expression parsing |
//! | `source` | Data-layer contract, paging, relationship loading |
//! | `cache` | Process-wide LRU query cache |
//! | `aggregation` | Running aggregation state + configurator |
//! | `pipeline` | Producer/consumer stages, registry, telemetry |
//! | `report` | Report definition model |
//! | `layout` | Layout IR, positioning, property resolution |
//! | `chart` | Chart preprocessing and SVG sanitization |
//! | `render` | Typst / HTML / JSON backends |
//! | `compiler` | Typst compiler contract |
//! | `snapshot` | PDF regression snapshots |

pub mod aggregation;
pub mod cache;
pub mod chart;
pub mod compiler;
pub mod config;
pub mod expr;
pub mod layout;
pub mod pipeline;
pub mod render;
pub mod report;
pub mod snapshot;
pub mod source;
pub mod value;

pub use crate::aggregation::{
    build_aggregations, AggConfig, AggregateKind, AggregationState, BuildOptions, GroupSpec,
    GroupedState,
};
pub use crate::cache::QueryCache;
pub use crate::config::Config;
pub use crate::expr::GroupExpr;
pub use crate::layout::{transform, Layout, LayoutKind};
pub use crate::pipeline::{
    AggregationSnapshot, HealthMonitor, Pipeline, PipelineOptions, PipelineRegistry,
    PipelineResult, PipelineStatus, SinkMode,
};
pub use crate::render::{DataContext, HtmlRenderer, JsonRenderer, Locale, TypstRenderer};
pub use crate::report::ReportDef;
pub use crate::value::{Record, Value};
