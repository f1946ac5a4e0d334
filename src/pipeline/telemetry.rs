//! Pipeline Telemetry
//!
//! Fire-and-forget event emission for pipeline health monitoring. Every
//! event goes out twice: as a structured `tracing` event (for operators) and
//! into any subscribed in-process channels (for tests and live dashboards).
//! A disabled monitor turns every emission into a no-op.
//!
//! Event names are stable identifiers; measurement maps carry numbers,
//! metadata maps carry strings, and every metadata map includes the
//! `stream_id`.

use crossbeam_channel as channel;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// One emitted telemetry event.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    pub name: &'static str,
    pub measurements: HashMap<&'static str, f64>,
    pub metadata: HashMap<&'static str, String>,
}

impl TelemetryEvent {
    pub fn measurement(&self, key: &str) -> Option<f64> {
        self.measurements.get(key).copied()
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

struct MonitorInner {
    stream_id: String,
    subscribers: Mutex<Vec<channel::Sender<TelemetryEvent>>>,
}

/// Telemetry emitter for one pipeline. Cheap to clone; all clones share the
/// subscriber list.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Option<Arc<MonitorInner>>,
}

impl HealthMonitor {
    /// An enabled monitor for the given stream.
    pub fn new(stream_id: impl Into<String>) -> Self {
        HealthMonitor {
            inner: Some(Arc::new(MonitorInner {
                stream_id: stream_id.into(),
                subscribers: Mutex::new(Vec::new()),
            })),
        }
    }

    /// A monitor that drops every event.
    pub fn disabled() -> Self {
        HealthMonitor { inner: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Subscribe to this pipeline's events. A disabled monitor returns a
    /// receiver that never yields.
    pub fn subscribe(&self) -> channel::Receiver<TelemetryEvent> {
        let (tx, rx) = channel::unbounded();
        if let Some(inner) = &self.inner {
            inner.subscribers.lock().push(tx);
        }
        rx
    }

    fn emit(&self, event: TelemetryEvent) {
        let Some(inner) = &self.inner else { return };
        tracing::debug!(
            stream_id = %inner.stream_id,
            event = event.name,
            measurements = ?event.measurements,
            "pipeline_telemetry"
        );
        inner
            .subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn base_metadata(&self) -> HashMap<&'static str, String> {
        let mut metadata = HashMap::new();
        if let Some(inner) = &self.inner {
            metadata.insert("stream_id", inner.stream_id.clone());
        }
        metadata
    }

    pub fn pipeline_start(&self, report_name: &str) {
        let mut metadata = self.base_metadata();
        metadata.insert("report_name", report_name.to_string());
        let mut measurements = HashMap::new();
        measurements.insert(
            "system_time",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0),
        );
        self.emit(TelemetryEvent {
            name: "pipeline.start",
            measurements,
            metadata,
        });
    }

    pub fn pipeline_stop(&self, duration: Duration, records_processed: u64, status: &str) {
        let mut metadata = self.base_metadata();
        metadata.insert("status", status.to_string());
        let mut measurements = HashMap::new();
        measurements.insert("duration", duration.as_secs_f64());
        measurements.insert("records_processed", records_processed as f64);
        self.emit(TelemetryEvent {
            name: "pipeline.stop",
            measurements,
            metadata,
        });
    }

    pub fn throughput(&self, records_per_second: f64) {
        let mut measurements = HashMap::new();
        measurements.insert("records_per_second", records_per_second);
        self.emit(TelemetryEvent {
            name: "throughput",
            measurements,
            metadata: self.base_metadata(),
        });
    }

    #[allow(clippy::too_many_arguments)]
    pub fn batch_transformed(
        &self,
        records_in: usize,
        records_out: usize,
        duration_ms: f64,
        records_buffered: usize,
        records_failed: usize,
        records_rejected: usize,
    ) {
        let mut measurements = HashMap::new();
        measurements.insert("records_in", records_in as f64);
        measurements.insert("records_out", records_out as f64);
        measurements.insert("duration_ms", duration_ms);
        measurements.insert("records_buffered", records_buffered as f64);
        measurements.insert("records_failed", records_failed as f64);
        measurements.insert("records_rejected", records_rejected as f64);
        self.emit(TelemetryEvent {
            name: "batch_transformed",
            measurements,
            metadata: self.base_metadata(),
        });
    }

    pub fn aggregation_computed(
        &self,
        records_processed: u64,
        aggregations: serde_json::Value,
        grouped_aggregations: serde_json::Value,
    ) {
        let mut metadata = self.base_metadata();
        metadata.insert("aggregations", aggregations.to_string());
        metadata.insert("grouped_aggregations", grouped_aggregations.to_string());
        let mut measurements = HashMap::new();
        measurements.insert("records_processed", records_processed as f64);
        self.emit(TelemetryEvent {
            name: "aggregation_computed",
            measurements,
            metadata,
        });
    }

    pub fn group_limit_reached(&self, max_groups: usize, current_count: usize, group_by: &str) {
        let mut metadata = self.base_metadata();
        metadata.insert("group_by", group_by.to_string());
        let mut measurements = HashMap::new();
        measurements.insert("max_groups", max_groups as f64);
        measurements.insert("current_count", current_count as f64);
        self.emit(TelemetryEvent {
            name: "group_limit_reached",
            measurements,
            metadata,
        });
    }

    pub fn buffer_full(&self, buffer_size: usize, records_buffered: usize) {
        let mut measurements = HashMap::new();
        measurements.insert("buffer_size", buffer_size as f64);
        measurements.insert("records_buffered", records_buffered as f64);
        self.emit(TelemetryEvent {
            name: "buffer_full",
            measurements,
            metadata: self.base_metadata(),
        });
    }

    pub fn error(&self, stage: &str, reason: &str) {
        let mut metadata = self.base_metadata();
        metadata.insert("stage", stage.to_string());
        metadata.insert("reason", reason.to_string());
        self.emit(TelemetryEvent {
            name: "error",
            measurements: HashMap::new(),
            metadata,
        });
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inner {
            Some(inner) => write!(f, "HealthMonitor({})", inner.stream_id),
            None => write!(f, "HealthMonitor(disabled)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_reach_subscribers() {
        let monitor = HealthMonitor::new("s-1");
        let events = monitor.subscribe();

        monitor.pipeline_start("sales");
        monitor.throughput(1250.0);

        let start = events.recv().expect("start event");
        assert_eq!(start.name, "pipeline.start");
        assert_eq!(start.meta("stream_id"), Some("s-1"));
        assert_eq!(start.meta("report_name"), Some("sales"));
        assert!(start.measurement("system_time").is_some());

        let tp = events.recv().expect("throughput event");
        assert_eq!(tp.measurement("records_per_second"), Some(1250.0));
    }

    #[test]
    fn test_disabled_monitor_is_silent() {
        let monitor = HealthMonitor::disabled();
        let events = monitor.subscribe();

        monitor.pipeline_start("sales");
        monitor.error("producer", "boom");

        assert!(events.try_recv().is_err());
        assert!(!monitor.is_enabled());
    }

    #[test]
    fn test_batch_transformed_measurements() {
        let monitor = HealthMonitor::new("s-2");
        let events = monitor.subscribe();

        monitor.batch_transformed(100, 97, 12.5, 42, 3, 0);
        let event = events.recv().expect("event");
        assert_eq!(event.name, "batch_transformed");
        assert_eq!(event.measurement("records_in"), Some(100.0));
        assert_eq!(event.measurement("records_out"), Some(97.0));
        assert_eq!(event.measurement("records_failed"), Some(3.0));
        assert_eq!(event.measurement("duration_ms"), Some(12.5));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let monitor = HealthMonitor::new("s-3");
        let keep = monitor.subscribe();
        {
            let _dropped = monitor.subscribe();
        }
        monitor.throughput(1.0);
        assert_eq!(keep.recv().expect("event").name, "throughput");
    }
}
