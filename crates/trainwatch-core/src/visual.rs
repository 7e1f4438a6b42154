//! Periodic qualitative snapshots of model output.
//!
//! A fixed set of validation images is chosen once per run, stratified by the
//! model's confidence, and re-rendered with fresh predictions every few
//! epochs.

use crate::dataset::{list_images, DataConfig, Split};
use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use trainwatch_engine::{ConfidenceStats, DetectionResult, EngineError, EngineResult, PredictInput, Predictor};

/// Selection sizes at or below this keep every image.
const MIN_STRATIFIED: usize = 3;
const INFERENCE_CHUNK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleCategory {
    High,
    Medium,
    Low,
    Generic,
}

impl SampleCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectedSample {
    pub category: SampleCategory,
    pub path: PathBuf,
    pub max_confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationSample {
    pub category: SampleCategory,
    pub source_image: PathBuf,
    pub output_path: PathBuf,
    pub detection_count: usize,
    pub confidence_stats: Option<ConfidenceStats>,
    pub keypoint_count: usize,
}

pub struct VisualSampleSelector {
    images: Vec<PathBuf>,
    output_dir: PathBuf,
    predictor: Arc<dyn Predictor>,
    max_candidates: usize,
    selection: Mutex<Option<Vec<SelectedSample>>>,
}

impl VisualSampleSelector {
    #[must_use]
    pub fn new(images: Vec<PathBuf>, output_dir: PathBuf, predictor: Arc<dyn Predictor>, max_candidates: usize) -> Self {
        Self { images, output_dir, predictor, max_candidates, selection: Mutex::new(None) }
    }

    /// Loads validation images from the data config. An unreadable config or
    /// missing val split leaves the selector empty.
    #[must_use]
    pub fn from_data_config(
        data_config: &Path,
        output_dir: PathBuf,
        predictor: Arc<dyn Predictor>,
        max_candidates: usize,
    ) -> Self {
        let images = match DataConfig::load(data_config) {
            Ok(config) => config.split_paths(Split::Val).iter().flat_map(|p| list_images(p)).collect(),
            Err(e) => {
                warn!(error = %e, "cannot load validation images for visualization");
                Vec::new()
            }
        };
        debug!(count = images.len(), "validation images available for visualization");
        Self::new(images, output_dir, predictor, max_candidates)
    }

    #[must_use]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    fn score(&self, candidates: &[PathBuf]) -> EngineResult<Vec<(PathBuf, f32)>> {
        let mut scored = Vec::with_capacity(candidates.len());
        for chunk in candidates.chunks(INFERENCE_CHUNK) {
            let results = self.predictor.predict(&PredictInput::Images(chunk.to_vec()))?;
            if results.len() != chunk.len() {
                return Err(EngineError::Prediction(format!(
                    "expected {} results for a batch of images, got {}",
                    chunk.len(),
                    results.len()
                )));
            }
            for (path, result) in chunk.iter().zip(&results) {
                scored.push((path.clone(), result.max_confidence()));
            }
        }
        Ok(scored)
    }

    /// The stratified selection, computed on first use and reused afterwards.
    pub fn select_representative_samples(&self) -> EngineResult<Vec<SelectedSample>> {
        let mut cached = match self.selection.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(selection) = cached.as_ref() {
            return Ok(selection.clone());
        }

        let candidates = &self.images[..self.images.len().min(self.max_candidates)];
        let selection: Vec<SelectedSample> = if candidates.len() <= MIN_STRATIFIED {
            candidates
                .iter()
                .map(|path| SelectedSample { category: SampleCategory::Generic, path: path.clone(), max_confidence: 0.0 })
                .collect()
        } else {
            let mut scored = self.score(candidates)?;
            scored.sort_by(|a, b| b.1.total_cmp(&a.1));
            let n = scored.len();
            [(0, SampleCategory::High), (n / 2, SampleCategory::Medium), (n - 1, SampleCategory::Low)]
                .into_iter()
                .map(|(rank, category)| {
                    let (path, max_confidence) = scored[rank].clone();
                    SelectedSample { category, path, max_confidence }
                })
                .collect()
        };

        info!(selected = ?selection_summary(&selection), "visual samples selected");
        *cached = Some(selection);
        Ok(cached.clone().unwrap_or_default())
    }

    /// Renders fresh predictions for the selection. Samples that fail to
    /// render are skipped.
    pub fn generate_visualization(&self, epoch: u32) -> EngineResult<Vec<VisualizationSample>> {
        let selection = self.select_representative_samples()?;
        if selection.is_empty() {
            return Ok(Vec::new());
        }
        std::fs::create_dir_all(&self.output_dir)?;

        let mut samples = Vec::with_capacity(selection.len());
        for (i, selected) in selection.iter().enumerate() {
            let result = match self.predictor.predict(&PredictInput::Images(vec![selected.path.clone()])) {
                Ok(mut results) if !results.is_empty() => results.swap_remove(0),
                Ok(_) => DetectionResult::default(),
                Err(e) => {
                    warn!(image = %selected.path.display(), error = %e, "visualization inference failed");
                    continue;
                }
            };
            let file_name = format!("epoch_{epoch:03}_{}_{i}.jpg", selected.category.as_str());
            let output_path = self.output_dir.join(file_name);
            if let Err(e) = render(&selected.path, &result, &output_path) {
                warn!(image = %selected.path.display(), error = %e, "visualization render failed");
                continue;
            }
            samples.push(VisualizationSample {
                category: selected.category,
                source_image: selected.path.clone(),
                output_path,
                detection_count: result.detections.len(),
                confidence_stats: result.confidence_stats(),
                keypoint_count: result.keypoint_count(),
            });
        }
        Ok(samples)
    }
}

fn selection_summary(selection: &[SelectedSample]) -> Vec<(&'static str, f32)> {
    selection.iter().map(|s| (s.category.as_str(), s.max_confidence)).collect()
}

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const KEYPOINT_COLOR: Rgb<u8> = Rgb([255, 0, 0]);

fn draw_rect(img: &mut RgbImage, bbox: [f32; 4], thickness: u32) {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return;
    }
    let clamp_x = |v: f32| (v.max(0.0) as u32).min(w - 1);
    let clamp_y = |v: f32| (v.max(0.0) as u32).min(h - 1);
    let (x1, y1, x2, y2) = (clamp_x(bbox[0]), clamp_y(bbox[1]), clamp_x(bbox[2]), clamp_y(bbox[3]));

    for t in 0..thickness {
        for x in x1..=x2 {
            img.put_pixel(x, (y1 + t).min(h - 1), BOX_COLOR);
            img.put_pixel(x, y2.saturating_sub(t), BOX_COLOR);
        }
        for y in y1..=y2 {
            img.put_pixel((x1 + t).min(w - 1), y, BOX_COLOR);
            img.put_pixel(x2.saturating_sub(t), y, BOX_COLOR);
        }
    }
}

fn draw_point(img: &mut RgbImage, x: f32, y: f32, radius: i64) {
    let (w, h) = img.dimensions();
    let (cx, cy) = (x as i64, y as i64);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let (px, py) = (cx + dx, cy + dy);
            if px >= 0 && py >= 0 && px < i64::from(w) && py < i64::from(h) {
                img.put_pixel(px as u32, py as u32, KEYPOINT_COLOR);
            }
        }
    }
}

fn render(source: &Path, result: &DetectionResult, output: &Path) -> image::ImageResult<()> {
    let mut img = image::open(source)?.to_rgb8();
    let thickness = (img.width().min(img.height()) / 200).max(1);
    for detection in &result.detections {
        draw_rect(&mut img, detection.bbox, thickness);
        for &[x, y, visibility] in &detection.keypoints {
            if visibility > 0.0 {
                draw_point(&mut img, x, y, i64::from(thickness) + 1);
            }
        }
    }
    img.save(output)
}
