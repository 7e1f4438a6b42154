//! Deterministic in-process engine.
//!
//! Produces plausible curves, checkpoints, exports and detections without a
//! model. Used for dry runs of the supervisor and throughout the test suites.

use crate::artifacts::make_artifact;
use crate::config::TrainConfig;
use crate::engine::{PredictInput, Predictor, TrainingEngine};
use crate::error::{EngineError, EngineResult};
use crate::hooks::{HookAction, TrainingCallbacks};
use crate::layout::RunLayout;
use crate::results::{
    Detection, DetectionResult, EpochReport, LossComponents, MetricSet, RunResult, StageTimings,
    TrainStartInfo, ValidationMetrics,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct TrainedState {
    layout: RunLayout,
    epochs_completed: u32,
    best: ValidationMetrics,
}

#[derive(Clone, Default)]
pub struct SimulatedEngine {
    fail_at_epoch: Option<(u32, String)>,
    failing_exports: Vec<String>,
    max_batch: Option<usize>,
    state: Arc<Mutex<Option<TrainedState>>>,
}

impl SimulatedEngine {
    /// Makes `train` fail with `message` when `epoch` is reached.
    #[must_use]
    pub fn failing_at_epoch(mut self, epoch: u32, message: impl Into<String>) -> Self {
        self.fail_at_epoch = Some((epoch, message.into()));
        self
    }

    #[must_use]
    pub fn failing_export(mut self, format: impl Into<String>) -> Self {
        self.failing_exports.push(format.into());
        self
    }

    /// Batches larger than `max` fail with an out-of-memory error.
    #[must_use]
    pub fn with_max_batch(mut self, max: usize) -> Self {
        self.max_batch = Some(max);
        self
    }

    fn trained(&self) -> EngineResult<TrainedState> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.clone())
            .ok_or_else(|| EngineError::Training("model has not been trained".to_string()))
    }
}

#[derive(Serialize)]
struct CheckpointRecord<'a> {
    epoch: u32,
    best_epoch: u32,
    best_fitness: f64,
    train_metrics: BTreeMap<&'static str, f64>,
    train_args: &'a TrainConfig,
}

fn simulated_losses(epoch: u32) -> LossComponents {
    let decay = 1.0 / (1.0 + f64::from(epoch) * 0.15);
    LossComponents {
        box_loss: 1.2 * decay + 0.3,
        pose_loss: 4.0 * decay + 0.8,
        kobj_loss: 0.6 * decay + 0.1,
        cls_loss: 1.5 * decay + 0.2,
        dfl_loss: 1.1 * decay + 0.5,
    }
}

fn simulated_metrics(epoch: u32, epochs: u32) -> ValidationMetrics {
    let progress = f64::from(epoch) / f64::from(epochs.max(1));
    let box_ = MetricSet {
        precision: 0.4 + 0.5 * progress,
        recall: 0.35 + 0.5 * progress,
        map50: 0.3 + 0.6 * progress,
        map50_95: 0.15 + 0.5 * progress,
    };
    let pose = MetricSet {
        precision: box_.precision * 0.9,
        recall: box_.recall * 0.9,
        map50: box_.map50 * 0.85,
        map50_95: box_.map50_95 * 0.8,
    };
    ValidationMetrics { box_, pose: Some(pose), fitness: Some(0.1 * box_.map50 + 0.9 * box_.map50_95) }
}

fn write_json<P: AsRef<Path>, T: Serialize>(path: P, value: &T) -> EngineResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    Ok(())
}

fn append_results_row(path: &Path, epoch: u32, losses: &LossComponents, metrics: &ValidationMetrics) -> EngineResult<()> {
    let new_file = !path.exists();
    let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    let mut writer = csv::Writer::from_writer(file);
    let to_io = |e: csv::Error| EngineError::Io(std::io::Error::other(e));
    if new_file {
        writer
            .write_record([
                "epoch",
                "train/box_loss",
                "train/pose_loss",
                "train/kobj_loss",
                "train/cls_loss",
                "train/dfl_loss",
                "metrics/precision(B)",
                "metrics/recall(B)",
                "metrics/mAP50(B)",
                "metrics/mAP50-95(B)",
            ])
            .map_err(to_io)?;
    }
    writer
        .write_record([
            epoch.to_string(),
            format!("{:.5}", losses.box_loss),
            format!("{:.5}", losses.pose_loss),
            format!("{:.5}", losses.kobj_loss),
            format!("{:.5}", losses.cls_loss),
            format!("{:.5}", losses.dfl_loss),
            format!("{:.5}", metrics.box_.precision),
            format!("{:.5}", metrics.box_.recall),
            format!("{:.5}", metrics.box_.map50),
            format!("{:.5}", metrics.box_.map50_95),
        ])
        .map_err(to_io)?;
    writer.flush()?;
    Ok(())
}

impl TrainingEngine for SimulatedEngine {
    fn id(&self) -> &'static str {
        "simulated"
    }

    fn train(&self, config: &TrainConfig, callbacks: &dyn TrainingCallbacks) -> EngineResult<RunResult> {
        config.validate()?;
        let layout = RunLayout::for_config(config);
        layout.ensure_dirs()?;

        let mut start_epoch = 1;
        if config.resume {
            let record = self.read_checkpoint(&layout.last_checkpoint())?;
            let last = record.get("epoch").and_then(serde_json::Value::as_u64).ok_or_else(|| {
                EngineError::Checkpoint("last checkpoint records no epoch, cannot resume".to_string())
            })?;
            start_epoch = u32::try_from(last).unwrap_or(u32::MAX).saturating_add(1);
        }

        callbacks.on_start(&TrainStartInfo {
            model: config.model.clone(),
            epochs: config.epochs,
            batch: config.batch,
            imgsz: config.imgsz,
            start_epoch,
        });

        let mut best: Option<(u32, ValidationMetrics)> = None;
        let mut completed = start_epoch.saturating_sub(1);
        let mut stopped_early = false;

        for epoch in start_epoch..=config.epochs {
            if let Some((fail_epoch, message)) = &self.fail_at_epoch {
                if *fail_epoch == epoch {
                    return Err(EngineError::Training(message.clone()));
                }
            }

            let losses = simulated_losses(epoch);
            let metrics = simulated_metrics(epoch, config.epochs);
            append_results_row(&layout.results_csv(), epoch, &losses, &metrics)?;

            let fitness = metrics.fitness.unwrap_or_default();
            let improved = best.as_ref().map_or(true, |(_, b)| fitness > b.fitness.unwrap_or_default());
            if improved {
                best = Some((epoch, metrics.clone()));
            }
            let best_epoch = best.as_ref().map_or(epoch, |(e, _)| *e);

            let train_metrics = BTreeMap::from([
                ("metrics/precision(B)", metrics.box_.precision),
                ("metrics/recall(B)", metrics.box_.recall),
                ("metrics/mAP50(B)", metrics.box_.map50),
                ("metrics/mAP50-95(B)", metrics.box_.map50_95),
            ]);
            let record = CheckpointRecord { epoch, best_epoch, best_fitness: fitness, train_metrics, train_args: config };
            write_json(layout.last_checkpoint(), &record)?;
            if improved {
                write_json(layout.best_checkpoint(), &record)?;
            }
            completed = epoch;

            let report = EpochReport {
                epoch,
                epochs: config.epochs,
                losses,
                metrics: Some(metrics),
                learning_rate: Some(0.01 * (1.0 - f64::from(epoch) / f64::from(config.epochs.max(1))) + 1e-4),
                device: config.device.to_string(),
                last_weights: Some(layout.last_checkpoint()),
            };
            if callbacks.on_epoch_end(&report) == HookAction::Stop {
                stopped_early = epoch < config.epochs;
                break;
            }
        }

        let final_metrics = best.as_ref().map(|(_, m)| m.clone());
        if let Ok(mut state) = self.state.lock() {
            *state = Some(TrainedState {
                layout: layout.clone(),
                epochs_completed: completed,
                best: final_metrics.clone().unwrap_or_default(),
            });
        }

        Ok(RunResult {
            save_dir: layout.root().to_path_buf(),
            epochs_completed: completed,
            best_weights: layout.best_checkpoint().exists().then(|| layout.best_checkpoint()),
            last_weights: layout.last_checkpoint().exists().then(|| layout.last_checkpoint()),
            final_metrics,
            stopped_early,
        })
    }

    fn validate(&self, _config: &TrainConfig) -> EngineResult<ValidationMetrics> {
        let state = self.trained()?;
        if state.epochs_completed == 0 {
            return Err(EngineError::Validation("no completed epochs to validate".to_string()));
        }
        Ok(state.best)
    }

    fn export(&self, format: &str) -> EngineResult<PathBuf> {
        let state = self.trained()?;
        if self.failing_exports.iter().any(|f| f == format) {
            return Err(EngineError::Export {
                format: format.to_string(),
                message: "exporter unavailable".to_string(),
            });
        }
        let extension = match format {
            "onnx" => "onnx",
            "torchscript" => "torchscript",
            "openvino" => "xml",
            "engine" | "tensorrt" => "engine",
            other => other,
        };
        let path = state.layout.weights_dir().join(format!("best.{extension}"));
        std::fs::write(&path, format!("simulated {format} export\n"))?;
        Ok(make_artifact(format, path)?.path)
    }

    fn predictor(&self) -> Arc<dyn Predictor> {
        Arc::new(SimulatedPredictor { max_batch: self.max_batch })
    }
}

/// Deterministic detections derived from a digest of the image path.
#[derive(Debug, Clone, Default)]
pub struct SimulatedPredictor {
    max_batch: Option<usize>,
}

impl SimulatedPredictor {
    fn detect(path: &Path) -> DetectionResult {
        let digest = Sha256::digest(path.to_string_lossy().as_bytes());
        let (width, height) = image::image_dimensions(path).unwrap_or((640, 640));
        let (w, h) = (width as f32, height as f32);
        let count = usize::from(digest[0] % 4);

        let detections = (0..count)
            .map(|i| {
                let byte = f32::from(digest[1 + i]);
                let confidence = 0.25 + 0.74 * (byte / 255.0);
                let cx = w * (0.2 + 0.6 * f32::from(digest[8 + i]) / 255.0);
                let cy = h * (0.2 + 0.6 * f32::from(digest[16 + i]) / 255.0);
                let half_w = w * 0.1;
                let half_h = h * 0.08;
                Detection {
                    bbox: [cx - half_w, cy - half_h, cx + half_w, cy + half_h],
                    confidence,
                    class_id: 0,
                    keypoints: vec![[cx - half_w * 0.8, cy, 1.0], [cx, cy, 1.0], [cx + half_w * 0.8, cy, 1.0]],
                }
            })
            .collect();

        DetectionResult {
            source: Some(path.to_path_buf()),
            detections,
            speed: Some(StageTimings { preprocess: 0.5, inference: 4.0, postprocess: 0.7 }),
        }
    }
}

impl Predictor for SimulatedPredictor {
    fn predict(&self, input: &PredictInput) -> EngineResult<Vec<DetectionResult>> {
        if let Some(max) = self.max_batch {
            if input.batch_size() > max {
                return Err(EngineError::Prediction(format!(
                    "CUDA out of memory while running batch of {}",
                    input.batch_size()
                )));
            }
        }
        match input {
            PredictInput::Synthetic { batch, .. } => Ok((0..*batch)
                .map(|_| DetectionResult {
                    source: None,
                    detections: Vec::new(),
                    speed: Some(StageTimings { preprocess: 0.5, inference: 4.0, postprocess: 0.7 }),
                })
                .collect()),
            PredictInput::Images(paths) => Ok(paths.iter().map(|p| Self::detect(p)).collect()),
        }
    }
}
