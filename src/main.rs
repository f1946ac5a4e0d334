//! # ReportFlow CLI
//!
//! Thin shell around the engine: loads a report definition and a record set
//! from JSON files, runs them through a pipeline, and renders the result as
//! Typst markup, HTML, or JSON.
//!
//! ## Usage
//!
//! ```bash
//! reportflow render --report sales.json --data orders.json --target typst
//! reportflow render --report sales.json --data orders.json --target html -o out.html
//! reportflow cache-stats
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reportflow::aggregation::{build_aggregations, BuildOptions, GroupBy};
use reportflow::pipeline::{Pipeline, PipelineOptions, SinkMode};
use reportflow::render::{DataContext, HtmlRenderer, JsonRenderer, Locale, RenderTarget, TypstRenderer};
use reportflow::report::ElementDef;
use reportflow::source::{PageRequest, QuerySpec, VecSource};
use reportflow::value::Record;
use reportflow::{Config, GroupSpec, QueryCache, ReportDef};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "reportflow", version, about = "Streaming report engine")]
struct Cli {
    /// Configuration file (defaults to reportflow.toml discovery)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a report definition over a JSON record set and render it
    Render {
        /// Report definition file (JSON)
        #[arg(long)]
        report: PathBuf,

        /// Records file (JSON array of objects)
        #[arg(long)]
        data: PathBuf,

        /// Output flavor
        #[arg(long, value_enum, default_value = "typst")]
        target: Target,

        /// Output path (stdout when omitted)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Print process-wide query cache statistics
    CacheStats,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Target {
    Typst,
    Html,
    Json,
}

impl From<Target> for RenderTarget {
    fn from(target: Target) -> RenderTarget {
        match target {
            Target::Typst => RenderTarget::Typst,
            Target::Html => RenderTarget::Html,
            Target::Json => RenderTarget::Json,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::from_file(path).context("loading configuration")?,
        None => Config::load().context("loading configuration")?,
    };

    match cli.command {
        Command::Render {
            report,
            data,
            target,
            out,
        } => render(&config, &report, &data, target, out.as_deref()),
        Command::CacheStats => {
            let stats = QueryCache::global().stats();
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}

fn render(
    config: &Config,
    report_path: &std::path::Path,
    data_path: &std::path::Path,
    target: Target,
    out: Option<&std::path::Path>,
) -> Result<()> {
    let report: ReportDef = serde_json::from_str(
        &std::fs::read_to_string(report_path).context("reading report definition")?,
    )
    .context("parsing report definition")?;

    let rows: Vec<serde_json::Value> =
        serde_json::from_str(&std::fs::read_to_string(data_path).context("reading data file")?)
            .context("parsing data file")?;
    let records: Vec<Record> = rows.iter().map(Record::from_json).collect();
    let record_count = records.len();

    // Aggregation configs from the report's groups and variables; the
    // configuration file supplies defaults for group-less reports.
    let configs = build_aggregations(&report, &BuildOptions::from_limits(&config.limits))?;
    let configured_global: Vec<reportflow::AggregateKind> = config
        .pipeline
        .aggregations
        .iter()
        .filter_map(|s| s.parse().ok())
        .collect();
    let configured_grouped: Vec<GroupSpec> = config
        .pipeline
        .grouped_aggregations
        .iter()
        .map(|g| {
            GroupSpec::new(
                g.group_by.clone(),
                g.aggregations.iter().filter_map(|s| s.parse().ok()).collect(),
                g.max_groups,
            )
        })
        .collect();

    let request = PageRequest {
        domain: report.domain.clone().unwrap_or_else(|| "default".to_string()),
        resource: report
            .driving_resource
            .clone()
            .unwrap_or_else(|| report.name.clone()),
        query: QuerySpec::default(),
        offset: 0,
        limit: config.pipeline.chunk_size,
    };

    let mut options =
        PipelineOptions::new(report.name.clone(), Arc::new(VecSource::new(records)), request);
    options.consumer.buffer_size = config.pipeline.buffer_size;
    options.consumer.max_demand = config.pipeline.max_demand;
    options.consumer.min_demand = config.pipeline.min_demand;
    options.consumer.enable_telemetry = config.pipeline.enable_telemetry;
    options.consumer.transformer_timeout =
        std::time::Duration::from_millis(config.pipeline.transformer_timeout_ms);
    options.consumer.aggregations = if configs.is_empty() {
        configured_global
    } else {
        let mut kinds: Vec<reportflow::AggregateKind> = configs
            .iter()
            .flat_map(|c| c.aggregations.iter().copied())
            .collect();
        kinds.dedup();
        kinds
    };
    options.consumer.grouped_aggregations = if configs.is_empty() {
        configured_grouped
    } else {
        configs
            .iter()
            .map(|c| {
                GroupSpec::new(
                    match &c.group_by {
                        GroupBy::Single(f) => vec![f.clone()],
                        GroupBy::Multi(fs) => fs.clone(),
                    },
                    c.aggregations.clone(),
                    config.limits.max_groups,
                )
            })
            .collect()
    };
    options.sink = SinkMode::Sample { limit: record_count };

    let pipeline = Pipeline::start(options)?;
    let result = pipeline.wait()?;
    tracing::info!(
        stream_id = %result.stream_id,
        records = result.snapshot.total_transformed,
        status = result.status.as_str(),
        "pipeline_finished"
    );

    let mut ctx = DataContext::with_records(result.sample);
    for (label, count) in result.snapshot.group_counts() {
        ctx.variables.insert(
            format!("group_count.{label}"),
            reportflow::Value::Int(count as i64),
        );
    }
    ctx.variables.insert(
        "record_count".to_string(),
        reportflow::Value::Int(result.snapshot.total_transformed as i64),
    );

    let locale = Locale::new(&config.render.locale, &config.render.currency);
    let mut output = String::new();
    for element in &report.elements {
        if matches!(element, ElementDef::Chart(_)) {
            // Charts need a charting collaborator; the CLI skips them.
            continue;
        }
        let layout = reportflow::transform(element)?;
        let rendered = match target {
            Target::Typst => TypstRenderer::new(locale.clone()).render(&layout, &ctx)?,
            Target::Html => HtmlRenderer::new(locale.clone()).render(&layout, &ctx)?,
            Target::Json => JsonRenderer::new()
                .render_with_data(&layout, &ctx)
                .to_string(),
        };
        output.push_str(&rendered);
        output.push('\n');
    }

    if output.is_empty() {
        bail!("report '{}' has no renderable elements", report.name);
    }

    // Typst output is a complete template file: preamble plus body.
    if matches!(target, Target::Typst) {
        output = reportflow::render::typst::document(&output, report.title.as_deref());
    }

    match out {
        Some(path) => std::fs::write(path, output).context("writing output")?,
        None => print!("{output}"),
    }
    Ok(())
}
