//! Command implementations for the Trainwatch CLI.

pub mod check;
pub mod classify;
pub mod gpu;
pub mod resume;
pub mod run;

use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trainwatch_core::SupervisorSettings;
use trainwatch_engine::{engine_by_id, Augmentation, Device, TrainConfig, TrainingEngine};

/// Run parameters shared by every command that targets a run directory.
///
/// Unset options keep the engine defaults.
#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Dataset config (YAML)
    #[arg(long, default_value = "data.yaml")]
    pub data: PathBuf,

    /// Base weights or model definition
    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub epochs: Option<u32>,

    #[arg(long)]
    pub batch: Option<u32>,

    /// Input image size (multiple of 32)
    #[arg(long)]
    pub imgsz: Option<u32>,

    /// Directory holding all runs
    #[arg(long)]
    pub project: Option<PathBuf>,

    /// Run name inside the project directory
    #[arg(long)]
    pub name: Option<String>,

    /// cpu, auto, an ordinal or cuda:<n>
    #[arg(long)]
    pub device: Option<Device>,

    /// Data loader workers
    #[arg(long)]
    pub workers: Option<u32>,

    /// Epochs without improvement before early stopping
    #[arg(long)]
    pub patience: Option<u32>,

    #[arg(long)]
    pub optimizer: Option<String>,

    #[arg(long)]
    pub seed: Option<u64>,

    /// Cosine learning-rate schedule
    #[arg(long)]
    pub cos_lr: bool,

    /// Rectangular batches
    #[arg(long)]
    pub rect: bool,

    /// Cache decoded images in memory
    #[arg(long)]
    pub cache: bool,

    /// Continue from the last checkpoint of the run
    #[arg(long)]
    pub resume: bool,

    /// Switch off every geometric augmentation
    #[arg(long)]
    pub no_augmentation: bool,

    /// Training engine
    #[arg(long, default_value = "simulated")]
    pub engine: String,
}

impl TrainArgs {
    /// Run parameters from the flags, with augmentation and loss weights
    /// taken from the `[train]` settings section.
    pub fn train_config(&self, settings: &SupervisorSettings) -> TrainConfig {
        let defaults = TrainConfig::default();
        let augmentation =
            if self.no_augmentation { Augmentation::disabled() } else { settings.train.augmentation.clone() };
        TrainConfig {
            data: self.data.clone(),
            model: self.model.clone().unwrap_or(defaults.model),
            epochs: self.epochs.unwrap_or(defaults.epochs),
            batch: self.batch.unwrap_or(defaults.batch),
            imgsz: self.imgsz.unwrap_or(defaults.imgsz),
            project: self.project.clone().unwrap_or(defaults.project),
            name: self.name.clone().unwrap_or(defaults.name),
            device: self.device.unwrap_or(defaults.device),
            workers: self.workers.unwrap_or(defaults.workers),
            resume: self.resume,
            patience: self.patience.unwrap_or(defaults.patience),
            optimizer: self.optimizer.clone().unwrap_or(defaults.optimizer),
            cos_lr: self.cos_lr,
            rect: self.rect,
            cache_images: self.cache,
            seed: self.seed.unwrap_or(defaults.seed),
            augmentation,
            loss: settings.train.loss.clone(),
        }
    }

    pub fn engine(&self) -> anyhow::Result<Arc<dyn TrainingEngine>> {
        engine_by_id(&self.engine).with_context(|| format!("cannot select engine '{}'", self.engine))
    }
}

/// Settings from `--settings`, else `./trainwatch.toml`, else defaults.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<SupervisorSettings> {
    let settings = match path {
        Some(path) => SupervisorSettings::load_from_file(path)?,
        None => SupervisorSettings::discover()?,
    };
    settings.validate()?;
    Ok(settings)
}
