//! Advisory detection of a resumable prior run.
//!
//! The checkpoint schema belongs to the engine and changes across its
//! versions, so every field here is best-effort. Nothing in this module can
//! fail startup.

use crate::events::Event;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use trainwatch_engine::{RunLayout, TrainingEngine};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResumeInfo {
    pub available: bool,
    pub checkpoint_path: Option<PathBuf>,
    pub last_epoch: Option<u32>,
    pub best_epoch: Option<u32>,
    pub metrics: HashMap<String, f64>,
    pub saved_config: Option<serde_json::Value>,
}

impl ResumeInfo {
    /// `resume_detected`, only when a checkpoint could be read.
    #[must_use]
    pub fn to_event(&self) -> Option<Event> {
        self.available.then(|| Event::ResumeDetected {
            checkpoint: self.checkpoint_path.clone(),
            last_epoch: self.last_epoch,
            best_epoch: self.best_epoch,
            metrics: self.metrics.clone(),
        })
    }
}

pub struct ResumeDetector<'a> {
    layout: &'a RunLayout,
    engine: &'a dyn TrainingEngine,
}

impl<'a> ResumeDetector<'a> {
    #[must_use]
    pub fn new(layout: &'a RunLayout, engine: &'a dyn TrainingEngine) -> Self {
        Self { layout, engine }
    }

    #[must_use]
    pub fn detect(&self) -> ResumeInfo {
        let checkpoint = self.layout.last_checkpoint();
        if !checkpoint.is_file() {
            debug!(path = %checkpoint.display(), "no prior checkpoint");
            return ResumeInfo::default();
        }

        let mut info = ResumeInfo { checkpoint_path: Some(checkpoint.clone()), ..ResumeInfo::default() };
        match self.engine.read_checkpoint(&checkpoint) {
            Ok(record) => {
                info.available = true;
                info.last_epoch = epoch_field(&record, "epoch");
                info.best_epoch = epoch_field(&record, "best_epoch");
                info.metrics = numeric_entries(record.get("train_metrics").or_else(|| record.get("metrics")));
                info.saved_config = record.get("train_args").or_else(|| record.get("config")).cloned();
            }
            Err(e) => {
                warn!(path = %checkpoint.display(), error = %e, "checkpoint unreadable, resume info is partial");
            }
        }

        if info.last_epoch.is_none() {
            info.last_epoch = last_epoch_from_results(&self.layout.results_csv());
        }

        info!(
            available = info.available,
            last_epoch = ?info.last_epoch,
            best_epoch = ?info.best_epoch,
            "prior run detected"
        );
        info
    }
}

fn epoch_field(record: &serde_json::Value, key: &str) -> Option<u32> {
    let value = record.get(key)?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .and_then(|e| u32::try_from(e).ok())
}

fn numeric_entries(value: Option<&serde_json::Value>) -> HashMap<String, f64> {
    value
        .and_then(serde_json::Value::as_object)
        .map(|map| map.iter().filter_map(|(k, v)| v.as_f64().map(|f| (k.clone(), f))).collect())
        .unwrap_or_default()
}

/// Last recorded epoch in the engine's per-epoch results table.
fn last_epoch_from_results(path: &Path) -> Option<u32> {
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_path(path).ok()?;
    let epoch_col = reader.headers().ok()?.iter().position(|h| h == "epoch");

    let mut rows = 0u32;
    let mut last = None;
    for record in reader.records().map_while(std::result::Result::ok) {
        rows += 1;
        if let Some(col) = epoch_col {
            last = record.get(col).and_then(|v| v.parse::<f64>().ok()).map(|v| v as u32);
        }
    }
    if rows == 0 {
        return None;
    }
    Some(last.unwrap_or(rows))
}
