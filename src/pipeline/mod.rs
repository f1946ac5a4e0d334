//! Streaming Record Pipeline
//!
//! Bounded, backpressured producer / transformer / consumer topology. Each
//! stage is a dedicated thread with a message loop; stages communicate over
//! typed channels and records move by value, owned by exactly one stage at a
//! time. Multiple pipelines run in parallel, keyed by stream id in the
//! process-wide [`PipelineRegistry`].
//!
//! ## Architecture
//!
//! ```text
//! DataSource --pages--► Feeder --Enqueue--► Producer --batches--► Consumer
//!                                              ▲                    │
//!                                          Demand(n) ◄──────────────┤
//!                                                                   ▼
//!                                  Watcher ◄── joins ──── Sink (sample / callback)
//! ```
//!
//! The watcher joins every stage, decides the terminal status (a panicked
//! stage fails the pipeline), updates the registry, emits `pipeline.stop`,
//! and delivers the final [`PipelineResult`].

pub mod consumer;
pub mod data_processor;
pub mod producer;
pub mod registry;
pub mod telemetry;

pub use consumer::{
    AggregationSnapshot, Consumer, ConsumerControl, ConsumerError, ConsumerOptions, Transformer,
};
pub use data_processor::{ConversionOptions, DecimalMode, ProcessError, ReplacementValue};
pub use producer::{Producer, ProducerCommand};
pub use registry::{PipelineInfo, PipelineRegistry, PipelineStatus, RegistryError};
pub use telemetry::{HealthMonitor, TelemetryEvent};

use crate::source::{DataSource, PageRequest, RecordStream};
use crate::value::Record;
use crossbeam_channel as channel;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Consumer(#[from] ConsumerError),

    #[error("pipeline stage failed to spawn: {0}")]
    Spawn(String),

    #[error("pipeline result channel closed")]
    ResultLost,
}

/// What the sink does with survivor batches.
#[derive(Clone)]
pub enum SinkMode {
    /// Keep up to `limit` records for the renderer hand-off.
    Sample { limit: usize },
    /// Call back per batch (per-record rendered output, exports, …).
    ForEach(Arc<dyn Fn(Vec<Record>) + Send + Sync>),
    /// Drop everything; aggregation results are the only output.
    Discard,
}

/// Everything needed to start one pipeline.
#[derive(Clone)]
pub struct PipelineOptions {
    pub report_name: String,
    pub source: Arc<dyn DataSource>,
    pub request: PageRequest,
    pub consumer: ConsumerOptions,
    pub sink: SinkMode,
    pub metadata: HashMap<String, String>,
    /// Memoize source pages in the process-wide query cache.
    pub use_cache: bool,
    /// Caller-provided monitor, so subscribers can attach before any stage
    /// runs. When unset, a monitor tagged with the stream id is created.
    pub monitor: Option<HealthMonitor>,
}

impl PipelineOptions {
    pub fn new(
        report_name: impl Into<String>,
        source: Arc<dyn DataSource>,
        request: PageRequest,
    ) -> Self {
        let report_name = report_name.into();
        PipelineOptions {
            consumer: ConsumerOptions::new(""),
            sink: SinkMode::Sample { limit: 1000 },
            metadata: HashMap::new(),
            use_cache: false,
            monitor: None,
            report_name,
            source,
            request,
        }
    }
}

/// Terminal outcome of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub stream_id: String,
    pub status: PipelineStatus,
    pub snapshot: AggregationSnapshot,
    pub sample: Vec<Record>,
}

/// A started pipeline.
pub struct Pipeline {
    stream_id: String,
    producer_tx: channel::Sender<ProducerCommand>,
    control_tx: channel::Sender<ConsumerControl>,
    registry: Arc<PipelineRegistry>,
    monitor: HealthMonitor,
    result_rx: channel::Receiver<PipelineResult>,
    watcher: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Wire and start all stages against the process-wide registry.
    pub fn start(options: PipelineOptions) -> Result<Pipeline, PipelineError> {
        Pipeline::start_with_registry(options, PipelineRegistry::global())
    }

    /// Wire and start all stages against an explicit registry (tests,
    /// embedded setups).
    pub fn start_with_registry(
        mut options: PipelineOptions,
        registry: Arc<PipelineRegistry>,
    ) -> Result<Pipeline, PipelineError> {
        options.consumer.validate()?;

        let mut metadata = options.metadata.clone();
        metadata.insert("report_name".to_string(), options.report_name.clone());
        let stream_id = registry.register_pipeline(metadata);
        options.consumer.stream_id = stream_id.clone();

        let monitor = if options.consumer.enable_telemetry {
            options
                .monitor
                .clone()
                .filter(HealthMonitor::is_enabled)
                .unwrap_or_else(|| HealthMonitor::new(stream_id.clone()))
        } else {
            HealthMonitor::disabled()
        };
        monitor.pipeline_start(&options.report_name);

        let chunk = options.request.limit.max(1);
        let buffered = Arc::new(AtomicUsize::new(0));

        // Producer → consumer data channel. Unbounded: the demand protocol
        // bounds what is in flight.
        let (data_tx, data_rx) = channel::unbounded::<Vec<Record>>();
        // Consumer → sink hand-off. Bounded in batches; together with the
        // record counter this is the hard backpressure point.
        let capacity = (options.consumer.buffer_size / chunk).max(1);
        let (out_tx, out_rx) = channel::bounded::<Vec<Record>>(capacity);

        let producer = Producer::spawn(data_tx, chunk)
            .map_err(|e| PipelineError::Spawn(e.to_string()))?;
        let producer_tx = producer.commands.clone();

        // Feeder: pages from the data source into the producer queue.
        let feeder = {
            let producer_tx = producer.commands.clone();
            let monitor = monitor.clone();
            let registry = Arc::clone(&registry);
            let stream_id = stream_id.clone();
            let source = Arc::clone(&options.source);
            let request = options.request.clone();
            let use_cache = options.use_cache;
            std::thread::Builder::new()
                .name(format!("pipeline-feeder-{stream_id}"))
                .spawn(move || {
                    let mut stream = RecordStream::new(source, request);
                    if use_cache {
                        stream = stream.with_cache();
                    }
                    for page in stream {
                        match page {
                            Ok(records) => {
                                if producer_tx.send(ProducerCommand::Enqueue(records)).is_err() {
                                    return;
                                }
                            }
                            Err(e) => {
                                tracing::error!(
                                    stream_id = %stream_id,
                                    error = %e,
                                    "data_source_failed"
                                );
                                monitor.error("producer", &e.to_string());
                                registry.update_status(&stream_id, PipelineStatus::Failed);
                                let _ = producer_tx.send(ProducerCommand::Stop);
                                return;
                            }
                        }
                    }
                    let _ = producer_tx.send(ProducerCommand::Complete);
                })
                .map_err(|e| PipelineError::Spawn(e.to_string()))?
        };

        let consumer = Consumer::spawn(
            options.consumer.clone(),
            data_rx,
            producer.commands.clone(),
            out_tx,
            Arc::clone(&buffered),
            monitor.clone(),
            Some(Arc::clone(&registry)),
        )?;
        let control_tx = consumer.control.clone();

        // Sink: consume survivor batches.
        let sample: Arc<Mutex<Vec<Record>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let mode = options.sink.clone();
            let sample = Arc::clone(&sample);
            let buffered = Arc::clone(&buffered);
            std::thread::Builder::new()
                .name(format!("pipeline-sink-{stream_id}"))
                .spawn(move || {
                    for batch in out_rx {
                        buffered.fetch_sub(batch.len(), std::sync::atomic::Ordering::SeqCst);
                        match &mode {
                            SinkMode::Sample { limit } => {
                                let mut sample = sample.lock();
                                let room = limit.saturating_sub(sample.len());
                                sample.extend(batch.into_iter().take(room));
                            }
                            SinkMode::ForEach(callback) => callback(batch),
                            SinkMode::Discard => {}
                        }
                    }
                })
                .map_err(|e| PipelineError::Spawn(e.to_string()))?
        };

        // Watcher: join every stage, settle the terminal status, publish the
        // result.
        let (result_tx, result_rx) = channel::bounded(1);
        let watcher = {
            let registry = Arc::clone(&registry);
            let monitor = monitor.clone();
            let stream_id = stream_id.clone();
            let started = Instant::now();
            std::thread::Builder::new()
                .name(format!("pipeline-watcher-{stream_id}"))
                .spawn(move || {
                    let mut failed = false;
                    if feeder.join().is_err() {
                        failed = true;
                        monitor.error("producer", "feeder panicked");
                    }
                    if producer.handle.join().is_err() {
                        failed = true;
                        monitor.error("producer", "producer panicked");
                    }
                    let snapshot = match consumer.handle.join() {
                        Ok(snapshot) => snapshot,
                        Err(_) => {
                            failed = true;
                            monitor.error("consumer", "consumer panicked");
                            AggregationSnapshot {
                                aggregation_state: Default::default(),
                                grouped: Vec::new(),
                                records_buffered: 0,
                                total_transformed: 0,
                                records_failed: 0,
                                records_rejected: 0,
                            }
                        }
                    };
                    if sink.join().is_err() {
                        failed = true;
                        monitor.error("sink", "sink panicked");
                    }

                    if failed {
                        registry.update_status(&stream_id, PipelineStatus::Failed);
                    } else {
                        registry.update_status(&stream_id, PipelineStatus::Completed);
                    }
                    let status = registry
                        .get_pipeline(&stream_id)
                        .map(|info| info.status)
                        .unwrap_or(PipelineStatus::Completed);

                    monitor.pipeline_stop(started.elapsed(), snapshot.total_transformed, status.as_str());

                    let sample = std::mem::take(&mut *sample.lock());
                    let _ = result_tx.send(PipelineResult {
                        stream_id,
                        status,
                        snapshot,
                        sample,
                    });
                })
                .map_err(|e| PipelineError::Spawn(e.to_string()))?
        };

        Ok(Pipeline {
            stream_id,
            producer_tx,
            control_tx,
            registry,
            monitor,
            result_rx,
            watcher: Some(watcher),
        })
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Subscribe to this pipeline's telemetry events.
    pub fn telemetry(&self) -> channel::Receiver<TelemetryEvent> {
        self.monitor.subscribe()
    }

    /// Consistent snapshot of the consumer's aggregation state.
    pub fn aggregation_state(&self) -> Option<AggregationSnapshot> {
        let (tx, rx) = channel::bounded(1);
        self.control_tx
            .send(ConsumerControl::GetState { response: tx })
            .ok()?;
        rx.recv_timeout(Duration::from_secs(5)).ok()
    }

    pub fn pause(&self) {
        let _ = self.control_tx.send(ConsumerControl::Pause);
    }

    pub fn resume(&self) {
        let _ = self.control_tx.send(ConsumerControl::Resume);
    }

    /// Request termination of all stages. The final state is still collected
    /// by [`wait`](Self::wait).
    pub fn stop(&self) {
        let _ = self.producer_tx.send(ProducerCommand::Stop);
        let _ = self.control_tx.send(ConsumerControl::Stop);
    }

    /// Block until the pipeline reaches a terminal state.
    pub fn wait(mut self) -> Result<PipelineResult, PipelineError> {
        let result = self.result_rx.recv().map_err(|_| PipelineError::ResultLost);
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
        result
    }

    /// Registry entry for this pipeline.
    pub fn info(&self) -> Result<PipelineInfo, RegistryError> {
        self.registry.get_pipeline(&self.stream_id)
    }
}
