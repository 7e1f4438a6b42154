//! Typed result contracts returned by a training engine.
//!
//! Optional values the engine may not report are `Option`s. Loss components
//! are the exception: an absent component is `0.0`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Precision/recall/mAP for one task head.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "mAP50")]
    pub map50: f64,
    #[serde(rename = "mAP50_95")]
    pub map50_95: f64,
}

/// Output of `validate`, also attached to epoch reports when available.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    #[serde(rename = "box")]
    pub box_: MetricSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<MetricSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fitness: Option<f64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LossComponents {
    pub box_loss: f64,
    pub pose_loss: f64,
    pub kobj_loss: f64,
    pub cls_loss: f64,
    pub dfl_loss: f64,
}

/// Passed to `on_start` before the first epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainStartInfo {
    pub model: String,
    pub epochs: u32,
    pub batch: u32,
    pub imgsz: u32,
    /// First epoch the engine will run (greater than 1 when resuming).
    pub start_epoch: u32,
}

/// Passed to `on_epoch_end` after each epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochReport {
    /// 1-based epoch number.
    pub epoch: u32,
    pub epochs: u32,
    pub losses: LossComponents,
    pub metrics: Option<ValidationMetrics>,
    pub learning_rate: Option<f64>,
    pub device: String,
    /// Latest weights written by the engine, usable for intermediate inference.
    pub last_weights: Option<PathBuf>,
}

/// Outcome of a completed `train` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub save_dir: PathBuf,
    pub epochs_completed: u32,
    pub best_weights: Option<PathBuf>,
    pub last_weights: Option<PathBuf>,
    pub final_metrics: Option<ValidationMetrics>,
    /// True when the run ended because a hook asked it to stop.
    pub stopped_early: bool,
}

/// Per-stage timings in milliseconds for one prediction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StageTimings {
    pub preprocess: f64,
    pub inference: f64,
    pub postprocess: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// `[x1, y1, x2, y2]` in source image pixels.
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub class_id: u32,
    /// `[x, y, visibility]` triples, empty for detection-only models.
    #[serde(default)]
    pub keypoints: Vec<[f32; 3]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceStats {
    pub avg: f32,
    pub max: f32,
    pub min: f32,
}

/// Prediction for a single image.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub source: Option<PathBuf>,
    pub detections: Vec<Detection>,
    pub speed: Option<StageTimings>,
}

impl DetectionResult {
    /// Highest detection confidence, `0.0` when nothing was detected.
    #[must_use]
    pub fn max_confidence(&self) -> f32 {
        self.detections.iter().map(|d| d.confidence).fold(0.0, f32::max)
    }

    #[must_use]
    pub fn confidence_stats(&self) -> Option<ConfidenceStats> {
        if self.detections.is_empty() {
            return None;
        }
        let mut max = f32::MIN;
        let mut min = f32::MAX;
        let mut sum = 0.0;
        for d in &self.detections {
            max = max.max(d.confidence);
            min = min.min(d.confidence);
            sum += d.confidence;
        }
        Some(ConfidenceStats { avg: sum / self.detections.len() as f32, max, min })
    }

    #[must_use]
    pub fn keypoint_count(&self) -> usize {
        self.detections.iter().map(|d| d.keypoints.len()).sum()
    }
}
