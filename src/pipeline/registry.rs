//! Pipeline Registry
//!
//! Process-wide directory of live pipelines keyed by stream id. All
//! operations are lock-free reads/writes against a concurrent map; writers
//! never block each other on different streams.
//!
//! The registry also observes producer liveness: [`observe`] joins a stage's
//! thread handle from a watcher thread and flips the pipeline to `failed`
//! when the stage panics. A crashing producer can never corrupt the registry
//! or affect other pipelines.
//!
//! [`observe`]: PipelineRegistry::observe

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("pipeline '{0}' not found")]
    NotFound(String),
}

/// Lifecycle status. Transitions are monotonic except `Running` ↔ `Paused`;
/// terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Running,
    Paused,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Completed | PipelineStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Running => "running",
            PipelineStatus::Paused => "paused",
            PipelineStatus::Completed => "completed",
            PipelineStatus::Failed => "failed",
        }
    }
}

/// Registry entry for one pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineInfo {
    pub stream_id: String,
    pub status: PipelineStatus,
    pub records_processed: u64,
    pub memory_usage: u64,
    pub metadata: HashMap<String, String>,
    pub started_at: Instant,
    pub finished_at: Option<Instant>,
}

/// Process-wide pipeline directory.
pub struct PipelineRegistry {
    pipelines: DashMap<String, PipelineInfo>,
    retention: Duration,
}

static GLOBAL_REGISTRY: OnceLock<Arc<PipelineRegistry>> = OnceLock::new();

impl PipelineRegistry {
    pub fn new(retention: Duration) -> Self {
        PipelineRegistry {
            pipelines: DashMap::new(),
            retention,
        }
    }

    /// The process-wide registry, created on first use.
    pub fn global() -> Arc<PipelineRegistry> {
        Arc::clone(
            GLOBAL_REGISTRY
                .get_or_init(|| Arc::new(PipelineRegistry::new(Duration::from_secs(300)))),
        )
    }

    /// Create a fresh entry in `running` state and return its stream id.
    pub fn register_pipeline(&self, metadata: HashMap<String, String>) -> String {
        let stream_id = uuid::Uuid::new_v4().to_string();
        self.pipelines.insert(
            stream_id.clone(),
            PipelineInfo {
                stream_id: stream_id.clone(),
                status: PipelineStatus::Running,
                records_processed: 0,
                memory_usage: 0,
                metadata,
                started_at: Instant::now(),
                finished_at: None,
            },
        );
        stream_id
    }

    /// Watch a stage thread: a panic transitions the pipeline to `failed`.
    pub fn observe(self: Arc<Self>, stream_id: &str, handle: JoinHandle<()>) {
        let registry = self;
        let stream_id = stream_id.to_string();
        std::thread::Builder::new()
            .name(format!("registry-observer-{stream_id}"))
            .spawn(move || {
                if handle.join().is_err() {
                    tracing::warn!(stream_id = %stream_id, "pipeline_stage_panicked");
                    registry.update_status(&stream_id, PipelineStatus::Failed);
                }
            })
            .ok();
    }

    pub fn get_pipeline(&self, stream_id: &str) -> Result<PipelineInfo, RegistryError> {
        self.pipelines
            .get(stream_id)
            .map(|entry| entry.clone())
            .ok_or_else(|| RegistryError::NotFound(stream_id.to_string()))
    }

    /// Apply a status transition. Terminal states are sticky; everything
    /// else is allowed (running ↔ paused in particular).
    pub fn update_status(&self, stream_id: &str, status: PipelineStatus) {
        if let Some(mut entry) = self.pipelines.get_mut(stream_id) {
            if entry.status.is_terminal() {
                return;
            }
            entry.status = status;
            if status.is_terminal() {
                entry.finished_at = Some(Instant::now());
            }
        }
    }

    /// Add to the monotone processed-records counter.
    pub fn increment_records(&self, stream_id: &str, n: u64) {
        if let Some(mut entry) = self.pipelines.get_mut(stream_id) {
            entry.records_processed += n;
        }
    }

    pub fn update_memory_usage(&self, stream_id: &str, bytes: u64) {
        if let Some(mut entry) = self.pipelines.get_mut(stream_id) {
            entry.memory_usage = bytes;
        }
    }

    /// All pipelines, optionally filtered by status.
    pub fn list_pipelines(&self, status: Option<PipelineStatus>) -> Vec<PipelineInfo> {
        self.pipelines
            .iter()
            .filter(|entry| status.is_none_or(|s| entry.status == s))
            .map(|entry| entry.clone())
            .collect()
    }

    pub fn count_by_status(&self) -> HashMap<PipelineStatus, usize> {
        let mut counts = HashMap::new();
        for entry in self.pipelines.iter() {
            *counts.entry(entry.status).or_insert(0) += 1;
        }
        counts
    }

    /// Drop an entry immediately.
    pub fn remove(&self, stream_id: &str) -> Result<(), RegistryError> {
        self.pipelines
            .remove(stream_id)
            .map(|_| ())
            .ok_or_else(|| RegistryError::NotFound(stream_id.to_string()))
    }

    /// Drop terminal entries older than the retention window. Returns the
    /// number removed.
    pub fn reap_terminated(&self) -> usize {
        let retention = self.retention;
        let before = self.pipelines.len();
        self.pipelines.retain(|_, info| {
            !(info.status.is_terminal()
                && info
                    .finished_at
                    .is_some_and(|at| at.elapsed() > retention))
        });
        before - self.pipelines.len()
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}
