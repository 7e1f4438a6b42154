//! Trainwatch Core
//!
//! Supervision of one long-running training job:
//! - Pre-flight validation and resume detection before anything expensive
//! - Liveness and GPU telemetry monitors running beside the training call
//! - Error classification, final validation, exports and benchmarking after it
//! - A single ordered stream of structured events for the operator process

pub mod benchmark;
pub mod callbacks;
pub mod classify;
pub mod context;
pub mod dataset;
pub mod error;
pub mod events;
pub mod hardware;
pub mod liveness;
pub mod preflight;
pub mod resume;
pub mod settings;
pub mod supervisor;
pub mod telemetry;
pub mod visual;

pub use benchmark::{Benchmark, BenchmarkResult, LatencyStats, ThroughputEntry, ThroughputOutcome};
pub use callbacks::SupervisorCallbacks;
pub use classify::{classify, ErrorClassification, ErrorKind};
pub use context::{RunContext, StopFlag};
pub use dataset::{list_images, DataConfig, Split};
pub use error::{Result, SupervisorError};
pub use events::{parse_event_line, Event, EventSink, JsonLineSink, MemorySink, EVENT_PREFIX};
pub use hardware::HardwareReport;
pub use liveness::{LivenessMonitor, ParentObservation, ParentState, ProcessProbe, SysinfoProbe};
pub use preflight::{GateResult, PreflightOptions, PreflightValidator, ValidationReport};
pub use resume::{ResumeDetector, ResumeInfo};
pub use settings::{SupervisorSettings, TrainSettings};
pub use supervisor::{RunSummary, Supervisor};
pub use telemetry::{GpuBackend, GpuReading, MonitorState, NvidiaSmiBackend, TelemetryMonitor, TelemetrySample, TelemetrySummary};
pub use visual::{SampleCategory, VisualSampleSelector, VisualizationSample};
