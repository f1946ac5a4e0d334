//! ProducerConsumer Stage
//!
//! The pipeline's working stage: per-record transformation with wall-clock
//! timeouts, optional type conversion, global and grouped running
//! aggregation, buffer accounting, demand signalling, and telemetry.
//!
//! ## Error isolation
//!
//! Per-record failures (transformer panic, timeout, or a `None` result) drop
//! the record, count it in `records_failed`, and never propagate. Group-cap
//! rejections count in `records_rejected` and leave the record flowing
//! downstream. Only construction errors and infrastructure faults can fail
//! the stage.
//!
//! ## Architecture
//!
//! ```text
//! upstream batches ──► worker loop ──► bounded hand-off to sink
//!        ▲                │  ▲
//!   Demand(n)             │  └── control channel (GetState/Pause/Resume/Stop)
//!        └────────────────┘
//! transform worker thread: one long-lived helper per stage; calls are
//! sequenced so a timed-out record's late reply is discarded, not misread.
//! ```

use super::data_processor::{self, ConversionOptions};
use super::producer::ProducerCommand;
use super::registry::{PipelineRegistry, PipelineStatus};
use super::telemetry::HealthMonitor;
use crate::aggregation::{AggregateKind, AggregationState, GroupSpec, GroupUpdate, GroupedState};
use crate::value::Record;
use crossbeam_channel as channel;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Per-record transformer. Returning `None` drops the record.
pub type Transformer = Arc<dyn Fn(Record) -> Option<Record> + Send + Sync>;

/// Construction-time errors. Fatal; nothing at runtime raises these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsumerError {
    #[error("invalid transformer: {0}")]
    InvalidTransformer(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Stage configuration.
#[derive(Clone)]
pub struct ConsumerOptions {
    pub stream_id: String,
    /// Per-record transform; identity when unset.
    pub transformer: Option<Transformer>,
    pub transformer_timeout: Duration,
    /// Optional type-conversion step applied after the transform.
    pub transformation_opts: Option<ConversionOptions>,
    pub aggregations: Vec<AggregateKind>,
    pub grouped_aggregations: Vec<GroupSpec>,
    pub buffer_size: usize,
    pub max_demand: usize,
    pub min_demand: usize,
    pub enable_telemetry: bool,
}

impl ConsumerOptions {
    pub fn new(stream_id: impl Into<String>) -> Self {
        ConsumerOptions {
            stream_id: stream_id.into(),
            transformer: None,
            transformer_timeout: Duration::from_secs(5),
            transformation_opts: None,
            aggregations: Vec::new(),
            grouped_aggregations: Vec::new(),
            buffer_size: 1000,
            max_demand: 1000,
            min_demand: 500,
            enable_telemetry: true,
        }
    }

    /// Fail-fast validation, run before any thread spawns.
    pub fn validate(&self) -> Result<(), ConsumerError> {
        if self.transformer.is_some() && self.transformer_timeout.is_zero() {
            return Err(ConsumerError::InvalidTransformer(
                "transformer timeout must be positive".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(ConsumerError::InvalidConfiguration(
                "buffer_size must be positive".to_string(),
            ));
        }
        if self.max_demand == 0 {
            return Err(ConsumerError::InvalidConfiguration(
                "max_demand must be positive".to_string(),
            ));
        }
        if self.min_demand > self.max_demand {
            return Err(ConsumerError::InvalidConfiguration(format!(
                "min_demand ({}) exceeds max_demand ({})",
                self.min_demand, self.max_demand
            )));
        }
        for spec in &self.grouped_aggregations {
            if spec.group_by.is_empty() {
                return Err(ConsumerError::InvalidConfiguration(
                    "grouped aggregation with empty group_by".to_string(),
                ));
            }
            if spec.max_groups == 0 {
                return Err(ConsumerError::InvalidConfiguration(format!(
                    "grouped aggregation '{}' with max_groups = 0",
                    spec.label()
                )));
            }
        }
        Ok(())
    }
}

/// Control messages for a running stage.
pub enum ConsumerControl {
    GetState {
        response: channel::Sender<AggregationSnapshot>,
    },
    Pause,
    Resume,
    Stop,
}

/// Consistent point-in-time view of the stage's aggregation state.
#[derive(Debug, Clone)]
pub struct AggregationSnapshot {
    pub aggregation_state: AggregationState,
    pub grouped: Vec<GroupedState>,
    pub records_buffered: usize,
    pub total_transformed: u64,
    pub records_failed: u64,
    pub records_rejected: u64,
}

impl AggregationSnapshot {
    /// Group cardinality per spec label.
    pub fn group_counts(&self) -> HashMap<String, usize> {
        self.grouped
            .iter()
            .map(|g| (g.spec().label(), g.group_count()))
            .collect()
    }

    /// The grouped state whose spec matches `fields` exactly.
    pub fn grouped_for(&self, fields: &[&str]) -> Option<&GroupedState> {
        self.grouped.iter().find(|g| {
            g.spec().group_by.len() == fields.len()
                && g.spec().group_by.iter().zip(fields).all(|(a, b)| a == b)
        })
    }

    pub fn grouped_to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for state in &self.grouped {
            map.insert(state.spec().label(), state.to_json());
        }
        serde_json::Value::Object(map)
    }
}

/// Handle to a spawned consumer stage.
pub struct Consumer {
    pub control: channel::Sender<ConsumerControl>,
    pub handle: JoinHandle<AggregationSnapshot>,
}

impl Consumer {
    /// Spawn the stage. Validates options first; nothing is spawned on a
    /// validation failure.
    pub fn spawn(
        opts: ConsumerOptions,
        upstream: channel::Receiver<Vec<Record>>,
        demand_tx: channel::Sender<ProducerCommand>,
        out: channel::Sender<Vec<Record>>,
        buffered: Arc<AtomicUsize>,
        monitor: HealthMonitor,
        registry: Option<Arc<PipelineRegistry>>,
    ) -> Result<Consumer, ConsumerError> {
        opts.validate()?;

        let (control_tx, control_rx) = channel::unbounded();
        let handle = std::thread::Builder::new()
            .name(format!("pipeline-consumer-{}", opts.stream_id))
            .spawn(move || {
                Worker::new(opts, demand_tx, out, buffered, monitor, registry)
                    .run(&upstream, &control_rx)
            })
            .map_err(|e| ConsumerError::InvalidConfiguration(e.to_string()))?;

        Ok(Consumer {
            control: control_tx,
            handle,
        })
    }

    /// Current aggregation state, observed as a consistent snapshot.
    pub fn aggregation_state(&self) -> Option<AggregationSnapshot> {
        let (tx, rx) = channel::bounded(1);
        self.control
            .send(ConsumerControl::GetState { response: tx })
            .ok()?;
        rx.recv_timeout(Duration::from_secs(5)).ok()
    }
}

/// One long-lived transform helper per stage. Requests carry sequence
/// numbers so replies from timed-out calls are discarded instead of being
/// attributed to the wrong record.
struct TransformWorker {
    request_tx: channel::Sender<(u64, Record)>,
    response_rx: channel::Receiver<(u64, Option<Record>)>,
    next_seq: u64,
}

enum TransformOutcome {
    Ok(Record),
    Dropped,
    TimedOut,
}

impl TransformWorker {
    fn spawn(stream_id: &str, transformer: Transformer) -> std::io::Result<TransformWorker> {
        let (request_tx, request_rx) = channel::unbounded::<(u64, Record)>();
        let (response_tx, response_rx) = channel::unbounded();

        std::thread::Builder::new()
            .name(format!("pipeline-transform-{stream_id}"))
            .spawn(move || {
                for (seq, record) in request_rx {
                    let result = catch_unwind(AssertUnwindSafe(|| transformer(record)));
                    let _ = response_tx.send((seq, result.unwrap_or_default()));
                }
            })?;

        Ok(TransformWorker {
            request_tx,
            response_rx,
            next_seq: 0,
        })
    }

    fn transform(&mut self, record: Record, timeout: Duration) -> TransformOutcome {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.request_tx.send((seq, record)).is_err() {
            // Helper thread died; treat as a per-record failure.
            return TransformOutcome::Dropped;
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.response_rx.recv_timeout(remaining) {
                Ok((s, result)) if s == seq => {
                    return match result {
                        Some(record) => TransformOutcome::Ok(record),
                        None => TransformOutcome::Dropped,
                    };
                }
                // A stale reply from an earlier timed-out call.
                Ok(_) => continue,
                Err(_) => return TransformOutcome::TimedOut,
            }
        }
    }
}

struct Worker {
    opts: ConsumerOptions,
    demand_tx: channel::Sender<ProducerCommand>,
    out: channel::Sender<Vec<Record>>,
    buffered: Arc<AtomicUsize>,
    monitor: HealthMonitor,
    registry: Option<Arc<PipelineRegistry>>,
    transform_worker: Option<TransformWorker>,

    aggregation_state: AggregationState,
    grouped: Vec<GroupedState>,
    outstanding_demand: usize,
    total_transformed: u64,
    records_failed: u64,
    records_rejected: u64,
    buffer_warned: bool,
    /// (instant, survivor count) samples for the throughput window.
    window: VecDeque<(Instant, usize)>,
}

const THROUGHPUT_WINDOW: Duration = Duration::from_secs(5);

impl Worker {
    fn new(
        opts: ConsumerOptions,
        demand_tx: channel::Sender<ProducerCommand>,
        out: channel::Sender<Vec<Record>>,
        buffered: Arc<AtomicUsize>,
        monitor: HealthMonitor,
        registry: Option<Arc<PipelineRegistry>>,
    ) -> Worker {
        let grouped = opts
            .grouped_aggregations
            .iter()
            .cloned()
            .map(GroupedState::new)
            .collect();
        Worker {
            opts,
            demand_tx,
            out,
            buffered,
            monitor,
            registry,
            transform_worker: None,
            aggregation_state: AggregationState::new(),
            grouped,
            outstanding_demand: 0,
            total_transformed: 0,
            records_failed: 0,
            records_rejected: 0,
            buffer_warned: false,
            window: VecDeque::new(),
        }
    }

    fn run(
        mut self,
        upstream: &channel::Receiver<Vec<Record>>,
        control_rx: &channel::Receiver<ConsumerControl>,
    ) -> AggregationSnapshot {
        if let Some(transformer) = self.opts.transformer.clone() {
            match TransformWorker::spawn(&self.opts.stream_id, transformer) {
                Ok(worker) => self.transform_worker = Some(worker),
                Err(e) => {
                    tracing::error!(error = %e, "transform_worker_spawn_failed");
                }
            }
        }

        self.signal_demand(self.opts.max_demand);
        self.outstanding_demand = self.opts.max_demand;

        let mut paused = false;
        loop {
            if paused {
                // While paused, only the control channel is serviced.
                match control_rx.recv() {
                    Ok(msg) => {
                        if self.handle_control(msg, &mut paused) {
                            break;
                        }
                    }
                    Err(_) => break,
                }
                continue;
            }

            channel::select! {
                recv(control_rx) -> msg => match msg {
                    Ok(msg) => {
                        if self.handle_control(msg, &mut paused) {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                recv(upstream) -> batch => match batch {
                    Ok(batch) => {
                        if !self.process_batch(batch) {
                            break;
                        }
                    }
                    // Upstream closed: normal completion.
                    Err(_) => break,
                },
            }
        }

        // Stage teardown always stops the producer too; harmless when it
        // already exited.
        let _ = self.demand_tx.send(ProducerCommand::Stop);
        self.snapshot()
    }

    /// Returns true when the stage should stop.
    fn handle_control(&mut self, msg: ConsumerControl, paused: &mut bool) -> bool {
        match msg {
            ConsumerControl::GetState { response } => {
                let _ = response.send(self.snapshot());
                false
            }
            ConsumerControl::Pause => {
                *paused = true;
                self.set_status(PipelineStatus::Paused);
                false
            }
            ConsumerControl::Resume => {
                *paused = false;
                self.set_status(PipelineStatus::Running);
                false
            }
            ConsumerControl::Stop => true,
        }
    }

    /// Returns false when downstream is gone and the stage must stop.
    fn process_batch(&mut self, batch: Vec<Record>) -> bool {
        let started = Instant::now();
        let records_in = batch.len();
        let failed_before = self.records_failed;
        let rejected_before = self.records_rejected;

        // 1. Transform, isolating every per-record failure.
        let mut survivors = self.transform_records(batch);

        // 2. Type-conversion fallback. A whole-step failure logs and keeps
        //    the raw survivors.
        if let Some(conversion) = &self.opts.transformation_opts {
            match data_processor::process_batch(&survivors, conversion) {
                Ok(converted) => survivors = converted,
                Err(e) => {
                    tracing::warn!(
                        stream_id = %self.opts.stream_id,
                        error = %e,
                        "data_processor_fallback"
                    );
                }
            }
        }

        // 3. Global aggregation.
        if !self.opts.aggregations.is_empty() {
            for record in &survivors {
                self.aggregation_state.fold(record, &self.opts.aggregations);
            }
        }

        // 4. Grouped aggregation. Rejections never stop the record.
        for record in &survivors {
            for grouped in &mut self.grouped {
                match grouped.update(record) {
                    GroupUpdate::Rejected { first_crossing } => {
                        self.records_rejected += 1;
                        if first_crossing {
                            self.monitor.group_limit_reached(
                                grouped.spec().max_groups,
                                grouped.group_count(),
                                &grouped.spec().label(),
                            );
                        }
                    }
                    GroupUpdate::Inserted | GroupUpdate::Updated => {}
                }
            }
        }

        // 5. Buffer accounting; the warning is advisory and edge-triggered.
        let records_out = survivors.len();
        let records_buffered = self.buffered.fetch_add(records_out, Ordering::SeqCst) + records_out;
        let threshold = (self.opts.buffer_size as f64 * 0.8) as usize;
        if records_buffered > threshold {
            if !self.buffer_warned {
                self.monitor
                    .buffer_full(self.opts.buffer_size, records_buffered);
                self.buffer_warned = true;
            }
        } else {
            self.buffer_warned = false;
        }

        // 6. Emit downstream; a closed sink is an unrecoverable fault.
        if self.out.send(survivors).is_err() {
            self.buffered.fetch_sub(records_out, Ordering::SeqCst);
            self.monitor.error("consumer", "downstream closed");
            self.set_status(PipelineStatus::Failed);
            return false;
        }
        self.total_transformed += records_out as u64;

        if let Some(registry) = &self.registry {
            registry.increment_records(&self.opts.stream_id, records_out as u64);
            registry.update_memory_usage(&self.opts.stream_id, self.estimated_memory());
        }

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.monitor.batch_transformed(
            records_in,
            records_out,
            duration_ms,
            records_buffered,
            (self.records_failed - failed_before) as usize,
            (self.records_rejected - rejected_before) as usize,
        );

        if !self.opts.aggregations.is_empty() || !self.grouped.is_empty() {
            let snapshot = self.snapshot();
            self.monitor.aggregation_computed(
                self.total_transformed,
                snapshot.aggregation_state.to_json(),
                snapshot.grouped_to_json(),
            );
        }

        // 7. Throughput over a sliding window.
        self.window.push_back((Instant::now(), records_out));
        while self
            .window
            .front()
            .is_some_and(|(at, _)| at.elapsed() > THROUGHPUT_WINDOW)
        {
            self.window.pop_front();
        }
        if let (Some((oldest, _)), total) = (
            self.window.front(),
            self.window.iter().map(|(_, n)| n).sum::<usize>(),
        ) {
            let elapsed = oldest.elapsed().as_secs_f64();
            if elapsed > 0.0 {
                self.monitor.throughput(total as f64 / elapsed);
            }
        }

        // Demand accounting: refill when the low-water mark is crossed.
        self.outstanding_demand = self.outstanding_demand.saturating_sub(records_in);
        if self.outstanding_demand <= self.opts.min_demand {
            let refill = self.opts.max_demand - self.outstanding_demand;
            if refill > 0 {
                self.signal_demand(refill);
                self.outstanding_demand = self.opts.max_demand;
            }
        }

        true
    }

    fn transform_records(&mut self, batch: Vec<Record>) -> Vec<Record> {
        let Some(worker) = self.transform_worker.as_mut() else {
            return batch;
        };
        let timeout = self.opts.transformer_timeout;
        let mut survivors = Vec::with_capacity(batch.len());
        for record in batch {
            match worker.transform(record, timeout) {
                TransformOutcome::Ok(record) => survivors.push(record),
                TransformOutcome::Dropped => {
                    self.records_failed += 1;
                    tracing::debug!(
                        stream_id = %self.opts.stream_id,
                        "record_transform_dropped"
                    );
                }
                TransformOutcome::TimedOut => {
                    self.records_failed += 1;
                    tracing::warn!(
                        stream_id = %self.opts.stream_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "record_transform_timeout"
                    );
                }
            }
        }
        survivors
    }

    fn signal_demand(&self, n: usize) {
        let _ = self.demand_tx.send(ProducerCommand::Demand(n));
    }

    fn set_status(&self, status: PipelineStatus) {
        if let Some(registry) = &self.registry {
            registry.update_status(&self.opts.stream_id, status);
        }
    }

    fn estimated_memory(&self) -> u64 {
        const BYTES_PER_GROUP: u64 = 256;
        self.grouped
            .iter()
            .map(|g| g.group_count() as u64 * BYTES_PER_GROUP)
            .sum()
    }

    fn snapshot(&self) -> AggregationSnapshot {
        AggregationSnapshot {
            aggregation_state: self.aggregation_state.clone(),
            grouped: self.grouped.clone(),
            records_buffered: self.buffered.load(Ordering::SeqCst),
            total_transformed: self.total_transformed,
            records_failed: self.records_failed,
            records_rejected: self.records_rejected,
        }
    }
}
