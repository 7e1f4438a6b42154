//! The operator-facing event stream.
//!
//! Every event is one JSON object with an `event` kind field, written as a
//! single line prefixed with [`EVENT_PREFIX`]. Lines are written in emission
//! order and never batched.

use crate::benchmark::BenchmarkResult;
use crate::classify::ErrorClassification;
use crate::hardware::HardwareReport;
use crate::preflight::GateResult;
use crate::telemetry::{TelemetrySample, TelemetrySummary};
use crate::visual::VisualizationSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use trainwatch_engine::{ExportArtifact, LossComponents, MetricSet, ValidationMetrics};

/// Marks a stdout line as a structured event.
pub const EVENT_PREFIX: &str = "__JSON_LOG__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    ValidationPassed {
        gate: GateResult,
        checks: BTreeMap<String, bool>,
        warnings: Vec<String>,
    },
    ValidationFailed {
        checks: BTreeMap<String, bool>,
        issues: Vec<String>,
        warnings: Vec<String>,
    },
    HardwareCheck(HardwareReport),
    ResumeDetected {
        checkpoint: Option<PathBuf>,
        last_epoch: Option<u32>,
        best_epoch: Option<u32>,
        metrics: HashMap<String, f64>,
    },
    TrainingStart {
        run_id: String,
        started_at: DateTime<Utc>,
        model: String,
        epochs: u32,
        batch: u32,
        imgsz: u32,
        start_epoch: u32,
    },
    EpochEnd {
        epoch: u32,
        epochs: u32,
        #[serde(flatten)]
        losses: LossComponents,
        #[serde(flatten)]
        metrics: Option<MetricSet>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pose: Option<MetricSet>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lr: Option<f64>,
        device: String,
    },
    GpuWarning {
        device_index: u32,
        warnings: Vec<String>,
        sample: TelemetrySample,
    },
    GpuSummary(TelemetrySummary),
    ParentExit {
        parent_pid: u32,
        reason: String,
    },
    StopRequested {
        reason: String,
    },
    Visualization {
        epoch: u32,
        samples: Vec<VisualizationSample>,
    },
    ValidationComplete {
        metrics: ValidationMetrics,
    },
    ExportComplete(ExportArtifact),
    ExportFailed {
        format: String,
        error: String,
    },
    PerformanceBenchmark(BenchmarkResult),
    TrainingComplete {
        run_id: String,
        save_dir: PathBuf,
        best_weights: Option<PathBuf>,
        epochs_completed: u32,
        stopped_early: bool,
        elapsed_secs: f64,
    },
    Error(ErrorClassification),
}

impl Event {
    /// The `event` field value.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ValidationPassed { .. } => "validation_passed",
            Self::ValidationFailed { .. } => "validation_failed",
            Self::HardwareCheck(_) => "hardware_check",
            Self::ResumeDetected { .. } => "resume_detected",
            Self::TrainingStart { .. } => "training_start",
            Self::EpochEnd { .. } => "epoch_end",
            Self::GpuWarning { .. } => "gpu_warning",
            Self::GpuSummary(_) => "gpu_summary",
            Self::ParentExit { .. } => "parent_exit",
            Self::StopRequested { .. } => "stop_requested",
            Self::Visualization { .. } => "visualization",
            Self::ValidationComplete { .. } => "validation_complete",
            Self::ExportComplete(_) => "export_complete",
            Self::ExportFailed { .. } => "export_failed",
            Self::PerformanceBenchmark(_) => "performance_benchmark",
            Self::TrainingComplete { .. } => "training_complete",
            Self::Error(_) => "error",
        }
    }
}

/// Destination for events. Implementations must preserve call order.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Writes prefixed JSON lines, flushing after each one.
pub struct JsonLineSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl JsonLineSink<std::io::Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> JsonLineSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    pub fn into_inner(self) -> W {
        match self.writer.into_inner() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write + Send> EventSink for JsonLineSink<W> {
    fn emit(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::warn!(kind = event.kind(), error = %e, "failed to serialize event");
                return;
            }
        };
        let mut writer = match self.writer.lock() {
            Ok(w) => w,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = writeln!(writer, "{EVENT_PREFIX}{line}").and_then(|()| writer.flush());
        if let Err(e) = result {
            tracing::warn!(kind = event.kind(), error = %e, "failed to write event");
        }
    }
}

/// Keeps events in memory, in order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<&'static str> {
        self.events().iter().map(Event::kind).collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Parses one stdout line back into an event, if it is one.
#[must_use]
pub fn parse_event_line(line: &str) -> Option<Event> {
    let json = line.trim_end().strip_prefix(EVENT_PREFIX)?;
    serde_json::from_str(json).ok()
}
