//! The main sequential flow around one training run.
//!
//! Pre-flight gate, host report, resume check, background monitors, the
//! blocking training call, then final validation, exports and the benchmark.
//! Every blocking engine call runs on the blocking pool so the monitors keep
//! ticking.

use crate::benchmark::{Benchmark, BenchmarkResult};
use crate::callbacks::SupervisorCallbacks;
use crate::classify::classify;
use crate::context::RunContext;
use crate::error::{Result, SupervisorError};
use crate::events::Event;
use crate::hardware::HardwareReport;
use crate::liveness::LivenessMonitor;
use crate::preflight::{PreflightValidator, ValidationReport};
use crate::resume::{ResumeDetector, ResumeInfo};
use crate::settings::SupervisorSettings;
use crate::telemetry::{GpuBackend, TelemetryMonitor, TelemetrySummary};
use crate::visual::VisualSampleSelector;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use trainwatch_engine::{
    make_artifact, EngineResult, ExportArtifact, RunLayout, RunResult, TrainConfig, TrainingEngine, ValidationMetrics,
};

/// What a completed run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub result: RunResult,
    pub validation: Option<ValidationMetrics>,
    pub exports: Vec<ExportArtifact>,
    pub benchmark: Option<BenchmarkResult>,
    pub telemetry: TelemetrySummary,
    pub elapsed_secs: f64,
}

pub struct Supervisor {
    engine: Arc<dyn TrainingEngine>,
    config: TrainConfig,
    settings: SupervisorSettings,
    ctx: RunContext,
    /// `Some` replaces backend discovery.
    gpu_backend: Option<Option<Arc<dyn GpuBackend>>>,
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| SupervisorError::Task(join_failure(e)))
}

/// Text of a failed blocking task; a panic yields its payload message.
fn join_failure(err: tokio::task::JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "training task panicked".to_string())
}

impl Supervisor {
    #[must_use]
    pub fn new(engine: Arc<dyn TrainingEngine>, config: TrainConfig, settings: SupervisorSettings, ctx: RunContext) -> Self {
        Self { engine, config, settings, ctx, gpu_backend: None }
    }

    /// Uses `backend` for telemetry instead of probing `nvidia-smi`.
    /// `None` runs without telemetry.
    #[must_use]
    pub fn with_gpu_backend(mut self, backend: Option<Arc<dyn GpuBackend>>) -> Self {
        self.gpu_backend = Some(backend);
        self
    }

    #[must_use]
    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    #[must_use]
    pub fn layout(&self) -> RunLayout {
        RunLayout::for_config(&self.config)
    }

    /// Dataset and environment checks plus the run parameters themselves.
    #[must_use]
    pub fn preflight(&self) -> ValidationReport {
        let mut options = self.settings.preflight.clone();
        options.dependencies.extend(self.engine.dependencies());
        let mut report = PreflightValidator::new(options).validate(&self.config.data);

        match self.config.validate() {
            Ok(()) => {
                report.checks.insert("train_config".to_string(), true);
            }
            Err(e) => {
                report.checks.insert("train_config".to_string(), false);
                report.issues.push(e.to_string());
            }
        }
        report
    }

    #[must_use]
    pub fn detect_resume(&self) -> ResumeInfo {
        ResumeDetector::new(&self.layout(), self.engine.as_ref()).detect()
    }

    fn telemetry_monitor(&self) -> TelemetryMonitor {
        let settings = &self.settings.telemetry;
        let index = self.config.device.gpu_index();
        match (&self.gpu_backend, index) {
            (Some(backend), index) => {
                TelemetryMonitor::with_backend(index.unwrap_or(0), backend.clone(), settings, self.ctx.clone())
            }
            (None, Some(index)) => TelemetryMonitor::new(index, settings, self.ctx.clone()),
            (None, None) => TelemetryMonitor::with_backend(0, None, settings, self.ctx.clone()),
        }
    }

    fn liveness_monitor(&self) -> Option<LivenessMonitor> {
        if !self.settings.liveness.enabled {
            return None;
        }
        let monitor = LivenessMonitor::for_current_process(self.settings.liveness.interval(), self.ctx.clone());
        if monitor.is_none() {
            warn!("parent process unknown, liveness monitoring disabled");
        }
        monitor
    }

    fn callbacks(&self) -> SupervisorCallbacks {
        let callbacks = SupervisorCallbacks::new(self.ctx.clone());
        if !self.settings.visual.enabled {
            return callbacks;
        }
        let selector = VisualSampleSelector::from_data_config(
            &self.config.data,
            self.layout().visualizations_dir(),
            self.engine.predictor(),
            self.settings.visual.max_candidates,
        );
        callbacks.with_visualization(Arc::new(selector), self.settings.visual.every_n_epochs)
    }

    /// Runs the whole flow. Must be called inside a Tokio runtime.
    pub async fn run(&self) -> Result<RunSummary> {
        let started = Instant::now();
        info!(run_id = self.ctx.run_id(), model = %self.config.model, engine = self.engine.id(), "supervisor starting");

        let report = self.preflight();
        self.ctx.emit(&report.to_event());
        if !report.gate().is_pass() {
            error!(issues = report.issues.len(), "pre-flight gate failed");
            return Err(SupervisorError::PreflightFailed { issues: report.issues });
        }

        let mut telemetry = self.telemetry_monitor();
        let hardware = HardwareReport::probe(&self.config.device.to_string(), telemetry.device_name());
        self.ctx.emit(&Event::HardwareCheck(hardware));

        let resume = self.detect_resume();
        if let Some(event) = resume.to_event() {
            self.ctx.emit(&event);
        }
        if self.config.resume && !resume.available {
            warn!("resume requested but no readable checkpoint was found");
        }

        let mut liveness = self.liveness_monitor();
        if let Some(monitor) = liveness.as_mut() {
            monitor.start();
        }
        telemetry.start();

        let callbacks = self.callbacks();
        let engine = Arc::clone(&self.engine);
        let config = self.config.clone();
        let outcome = tokio::task::spawn_blocking(move || engine.train(&config, &callbacks)).await;

        if let Some(monitor) = liveness.as_mut() {
            monitor.stop().await;
        }
        telemetry.stop().await;

        let outcome = match outcome {
            Ok(outcome) => outcome.map_err(|e| e.to_string()),
            Err(e) => Err(join_failure(e)),
        };
        let result = match outcome {
            Ok(result) => result,
            Err(message) => {
                let classification = classify(&message);
                error!(kind = ?classification.kind, "{}", classification.render());
                self.ctx.emit(&Event::Error(classification.clone()));
                return Err(SupervisorError::TrainingFailed { classification: Box::new(classification) });
            }
        };
        info!(
            epochs_completed = result.epochs_completed,
            stopped_early = result.stopped_early,
            save_dir = %result.save_dir.display(),
            "training finished"
        );

        let (validation, exports, benchmark) = if self.ctx.should_stop() {
            info!("stop requested, skipping final validation, exports and benchmark");
            (None, Vec::new(), None)
        } else {
            (self.final_validation().await?, self.export_all().await?, self.benchmark().await?)
        };

        let telemetry_summary = telemetry.summary();
        self.ctx.emit(&Event::GpuSummary(telemetry_summary.clone()));

        let elapsed_secs = started.elapsed().as_secs_f64();
        self.ctx.emit(&Event::TrainingComplete {
            run_id: self.ctx.run_id().to_string(),
            save_dir: result.save_dir.clone(),
            best_weights: result.best_weights.clone(),
            epochs_completed: result.epochs_completed,
            stopped_early: result.stopped_early,
            elapsed_secs,
        });

        Ok(RunSummary {
            run_id: self.ctx.run_id().to_string(),
            result,
            validation,
            exports,
            benchmark,
            telemetry: telemetry_summary,
            elapsed_secs,
        })
    }

    async fn final_validation(&self) -> Result<Option<ValidationMetrics>> {
        let engine = Arc::clone(&self.engine);
        let config = self.config.clone();
        match blocking(move || engine.validate(&config)).await? {
            Ok(metrics) => {
                info!(map50 = metrics.box_.map50, map50_95 = metrics.box_.map50_95, "final validation complete");
                self.ctx.emit(&Event::ValidationComplete { metrics: metrics.clone() });
                Ok(Some(metrics))
            }
            Err(e) => {
                warn!(error = %e, "final validation failed");
                Ok(None)
            }
        }
    }

    async fn export_all(&self) -> Result<Vec<ExportArtifact>> {
        let mut artifacts = Vec::new();
        for format in &self.settings.export.formats {
            let engine = Arc::clone(&self.engine);
            let fmt = format.clone();
            let outcome = blocking(move || -> EngineResult<ExportArtifact> {
                let path = engine.export(&fmt)?;
                make_artifact(&fmt, path)
            })
            .await?;
            match outcome {
                Ok(artifact) => {
                    info!(format = %artifact.format, path = %artifact.path.display(), "export complete");
                    self.ctx.emit(&Event::ExportComplete(artifact.clone()));
                    artifacts.push(artifact);
                }
                Err(e) => {
                    warn!(format = %format, error = %e, "export failed");
                    self.ctx.emit(&Event::ExportFailed { format: format.clone(), error: e.to_string() });
                }
            }
        }
        Ok(artifacts)
    }

    async fn benchmark(&self) -> Result<Option<BenchmarkResult>> {
        if !self.settings.benchmark.enabled {
            return Ok(None);
        }
        let predictor = self.engine.predictor();
        let settings = self.settings.benchmark.clone();
        let imgsz = self.config.imgsz;
        match blocking(move || Benchmark::new(predictor.as_ref(), imgsz, &settings).run()).await? {
            Ok(result) => {
                self.ctx.emit(&Event::PerformanceBenchmark(result.clone()));
                Ok(Some(result))
            }
            Err(e) => {
                warn!(error = %e, "benchmark failed");
                Ok(None)
            }
        }
    }
}
