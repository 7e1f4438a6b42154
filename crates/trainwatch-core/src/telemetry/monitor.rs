//! Periodic sampling on a background task.

use super::backend::{GpuBackend, NvidiaSmiBackend};
use super::{TelemetryHistory, TelemetrySample, TelemetrySummary, Thresholds};
use crate::context::RunContext;
use crate::events::Event;
use crate::settings::TelemetrySettings;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    /// No backend for the device.
    Inactive,
    Idle,
    Active,
    Stopped,
}

pub struct TelemetryMonitor {
    device_index: u32,
    backend: Option<Arc<dyn GpuBackend>>,
    thresholds: Thresholds,
    interval: Duration,
    stop_timeout: Duration,
    history: Arc<Mutex<TelemetryHistory>>,
    ctx: RunContext,
    state: MonitorState,
    shutdown_tx: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
}

impl TelemetryMonitor {
    /// Binds to `device_index` through `nvidia-smi`. A missing tool or
    /// device leaves the monitor inactive.
    #[must_use]
    pub fn new(device_index: u32, settings: &TelemetrySettings, ctx: RunContext) -> Self {
        let backend = NvidiaSmiBackend::acquire(device_index).map(|b| Arc::new(b) as Arc<dyn GpuBackend>);
        if backend.is_none() {
            info!(device_index, "GPU telemetry unavailable, continuing without it");
        }
        Self::with_backend(device_index, backend, settings, ctx)
    }

    #[must_use]
    pub fn with_backend(
        device_index: u32,
        backend: Option<Arc<dyn GpuBackend>>,
        settings: &TelemetrySettings,
        ctx: RunContext,
    ) -> Self {
        let state = if backend.is_some() { MonitorState::Idle } else { MonitorState::Inactive };
        Self {
            device_index,
            backend,
            thresholds: settings.thresholds(),
            interval: settings.interval(),
            stop_timeout: settings.stop_timeout(),
            history: Arc::new(Mutex::new(TelemetryHistory::new(settings.history_capacity))),
            ctx,
            state,
            shutdown_tx: None,
            handle: None,
        }
    }

    #[must_use]
    pub fn state(&self) -> MonitorState {
        self.state
    }

    #[must_use]
    pub fn device_name(&self) -> Option<String> {
        self.backend.as_ref().map(|b| b.device_name())
    }

    /// A fresh sample, all zeros when inactive. Not recorded in history.
    #[must_use]
    pub fn gpu_stats(&self) -> TelemetrySample {
        self.backend
            .as_deref()
            .map(|backend| take_sample(backend, &self.thresholds))
            .unwrap_or_default()
    }

    /// Starts the sampling task. Must be called inside a Tokio runtime;
    /// a no-op unless the monitor is idle.
    pub fn start(&mut self) {
        if self.state != MonitorState::Idle {
            return;
        }
        let Some(backend) = self.backend.clone() else {
            return;
        };

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let history = Arc::clone(&self.history);
        let ctx = self.ctx.clone();
        let thresholds = self.thresholds;
        let interval = self.interval;
        let device_index = self.device_index;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => {
                        let backend = Arc::clone(&backend);
                        let sample = match tokio::task::spawn_blocking(move || take_sample(backend.as_ref(), &thresholds)).await {
                            Ok(sample) => sample,
                            Err(e) => {
                                warn!(error = %e, "telemetry sample task failed");
                                continue;
                            }
                        };
                        if !sample.warnings.is_empty() {
                            ctx.emit(&Event::GpuWarning {
                                device_index,
                                warnings: sample.warnings.clone(),
                                sample: sample.clone(),
                            });
                        }
                        if let Ok(mut history) = history.lock() {
                            history.push(sample);
                        }
                    }
                }
            }
            debug!(device_index, "telemetry loop exited");
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.handle = Some(handle);
        self.state = MonitorState::Active;
        info!(device_index, interval_ms = interval.as_millis() as u64, "GPU telemetry started");
    }

    /// Stops sampling, waiting up to the configured timeout for the task to
    /// exit. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if self.state != MonitorState::Active {
            if self.state == MonitorState::Idle {
                self.state = MonitorState::Stopped;
            }
            return;
        }
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(self.stop_timeout, &mut handle).await.is_err() {
                warn!(device_index = self.device_index, "telemetry task did not exit in time, aborting");
                handle.abort();
            }
        }
        self.state = MonitorState::Stopped;
    }

    #[must_use]
    pub fn summary(&self) -> TelemetrySummary {
        let available = self.backend.is_some();
        match self.history.lock() {
            Ok(history) => history.summarize(self.device_index, available),
            Err(poisoned) => poisoned.into_inner().summarize(self.device_index, available),
        }
    }
}

fn take_sample(backend: &dyn GpuBackend, thresholds: &Thresholds) -> TelemetrySample {
    backend
        .sample()
        .map(|reading| TelemetrySample::from_reading(&reading, thresholds))
        .unwrap_or_default()
}
