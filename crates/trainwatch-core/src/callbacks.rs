//! Hooks the engine calls from inside `train`.

use crate::context::RunContext;
use crate::events::Event;
use crate::visual::VisualSampleSelector;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use trainwatch_engine::{EpochReport, HookAction, TrainStartInfo, TrainingCallbacks};

/// Turns engine progress into events and relays stop requests back.
pub struct SupervisorCallbacks {
    ctx: RunContext,
    visual: Option<Arc<VisualSampleSelector>>,
    every_n_epochs: u32,
}

impl SupervisorCallbacks {
    #[must_use]
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx, visual: None, every_n_epochs: 0 }
    }

    /// Renders visual samples every `every_n_epochs` epochs.
    #[must_use]
    pub fn with_visualization(mut self, selector: Arc<VisualSampleSelector>, every_n_epochs: u32) -> Self {
        self.visual = Some(selector);
        self.every_n_epochs = every_n_epochs;
        self
    }

    fn maybe_visualize(&self, epoch: u32) {
        let Some(selector) = &self.visual else {
            return;
        };
        if self.every_n_epochs == 0 || epoch % self.every_n_epochs != 0 {
            return;
        }
        match selector.generate_visualization(epoch) {
            Ok(samples) if samples.is_empty() => debug!(epoch, "no visual samples rendered"),
            Ok(samples) => self.ctx.emit(&Event::Visualization { epoch, samples }),
            Err(e) => warn!(epoch, error = %e, "visualization skipped"),
        }
    }
}

impl TrainingCallbacks for SupervisorCallbacks {
    fn on_start(&self, info: &TrainStartInfo) {
        info!(
            model = %info.model,
            epochs = info.epochs,
            batch = info.batch,
            imgsz = info.imgsz,
            start_epoch = info.start_epoch,
            "training started"
        );
        self.ctx.emit(&Event::TrainingStart {
            run_id: self.ctx.run_id().to_string(),
            started_at: Utc::now(),
            model: info.model.clone(),
            epochs: info.epochs,
            batch: info.batch,
            imgsz: info.imgsz,
            start_epoch: info.start_epoch,
        });
    }

    fn on_epoch_end(&self, report: &EpochReport) -> HookAction {
        let metrics = report.metrics.as_ref();
        self.ctx.emit(&Event::EpochEnd {
            epoch: report.epoch,
            epochs: report.epochs,
            losses: report.losses,
            metrics: metrics.map(|m| m.box_),
            pose: metrics.and_then(|m| m.pose),
            lr: report.learning_rate,
            device: report.device.clone(),
        });
        debug!(epoch = report.epoch, epochs = report.epochs, box_loss = report.losses.box_loss, "epoch finished");

        self.maybe_visualize(report.epoch);

        if self.ctx.should_stop() {
            info!(epoch = report.epoch, "stop flag set, asking engine to stop");
            HookAction::Stop
        } else {
            HookAction::Continue
        }
    }
}
