//! Pre-flight validation gate.
//!
//! Runs once before any expensive work. Hard failures are collected as
//! issues and fail the gate; degraded-capability findings are warnings.

use crate::dataset::{list_images, DataConfig, Split};
use crate::events::Event;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;
use tracing::{debug, info, warn};
use trainwatch_engine::DependencySpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateResult {
    Pass,
    PassWithWarnings,
    Fail,
}

impl GateResult {
    #[must_use]
    pub fn is_pass(self) -> bool {
        !matches!(self, Self::Fail)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub checks: BTreeMap<String, bool>,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    #[must_use]
    pub fn gate(&self) -> GateResult {
        if !self.issues.is_empty() {
            GateResult::Fail
        } else if !self.warnings.is_empty() {
            GateResult::PassWithWarnings
        } else {
            GateResult::Pass
        }
    }

    /// `validation_passed` or `validation_failed`, depending on the gate.
    #[must_use]
    pub fn to_event(&self) -> Event {
        match self.gate() {
            GateResult::Fail => Event::ValidationFailed {
                checks: self.checks.clone(),
                issues: self.issues.clone(),
                warnings: self.warnings.clone(),
            },
            gate => Event::ValidationPassed { gate, checks: self.checks.clone(), warnings: self.warnings.clone() },
        }
    }

    fn check(&mut self, name: &str, passed: bool) {
        self.checks.insert(name.to_string(), passed);
    }

    fn issue(&mut self, message: String) {
        warn!("pre-flight issue: {message}");
        self.issues.push(message);
    }

    fn warning(&mut self, message: String) {
        warn!("pre-flight warning: {message}");
        self.warnings.push(message);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightOptions {
    /// Images decoded per split.
    pub samples_per_split: usize,
    /// Seed for the image sample, fixed so reruns check the same files.
    pub seed: u64,
    /// Splits with fewer images than this get a warning.
    pub min_images_per_split: usize,
    pub dependencies: Vec<DependencySpec>,
}

impl Default for PreflightOptions {
    fn default() -> Self {
        Self { samples_per_split: 5, seed: 42, min_images_per_split: 10, dependencies: Vec::new() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PreflightValidator {
    options: PreflightOptions,
}

impl PreflightValidator {
    #[must_use]
    pub fn new(options: PreflightOptions) -> Self {
        Self { options }
    }

    /// Validates the data config at `config_path` and the environment.
    #[must_use]
    pub fn validate(&self, config_path: &Path) -> ValidationReport {
        let mut report = ValidationReport::default();

        if let Some(config) = Self::check_config(config_path, &mut report) {
            Self::check_splits(&config, &mut report);
            Self::check_labels(&config, &mut report);
            self.check_images(&config, &mut report);
        }
        self.check_dependencies(&mut report);

        info!(
            gate = ?report.gate(),
            issues = report.issues.len(),
            warnings = report.warnings.len(),
            "pre-flight validation finished"
        );
        report
    }

    /// Steps (a) and (b): existence, parse, required fields.
    fn check_config(config_path: &Path, report: &mut ValidationReport) -> Option<DataConfig> {
        let exists = config_path.is_file();
        report.check("config_exists", exists);
        if !exists {
            report.issue(format!("Data config not found: {}", config_path.display()));
            return None;
        }

        let config = match DataConfig::load(config_path) {
            Ok(config) => {
                report.check("config_parsed", true);
                config
            }
            Err(e) => {
                report.check("config_parsed", false);
                report.issue(format!("Failed to parse data config {}: {e}", config_path.display()));
                return None;
            }
        };

        let mut missing = Vec::new();
        if config.base_dir().is_none() {
            missing.push("path");
        }
        if config.train.is_none() {
            missing.push("train");
        }
        report.check("required_fields", missing.is_empty());
        for field in &missing {
            report.issue(format!("Missing required field '{field}' in data config"));
        }
        missing.is_empty().then_some(config)
    }

    /// Step (c): split directories.
    fn check_splits(config: &DataConfig, report: &mut ValidationReport) {
        let train = config.split_paths(Split::Train);
        let missing_train: Vec<_> = train.iter().filter(|p| !p.exists()).collect();
        report.check("train_path", !train.is_empty() && missing_train.is_empty());
        if train.is_empty() {
            report.issue("Train split is empty in data config".to_string());
        }
        for path in missing_train {
            report.issue(format!("Train path not found: {}", path.display()));
        }

        for split in [Split::Val, Split::Test] {
            let key = format!("{}_path", split.as_str());
            let paths = config.split_paths(split);
            if paths.is_empty() {
                report.check(&key, split == Split::Test);
                if split == Split::Val {
                    report.warning(
                        "No val split configured; validation metrics will be unavailable".to_string(),
                    );
                }
                continue;
            }
            let missing: Vec<_> = paths.iter().filter(|p| !p.exists()).collect();
            report.check(&key, missing.is_empty());
            for path in missing {
                let label = if split == Split::Val { "Val" } else { "Test" };
                report.warning(format!("{label} path not found: {}", path.display()));
            }
        }
    }

    /// Class names and keypoint layout are optional, but must be usable when given.
    fn check_labels(config: &DataConfig, report: &mut ValidationReport) {
        if let Some(names) = &config.names {
            let count = match names {
                serde_yaml::Value::Sequence(list) => list.len(),
                serde_yaml::Value::Mapping(map) => map.len(),
                _ => 0,
            };
            if count == 0 {
                report.warning("Data config 'names' lists no classes".to_string());
            }
        }
        if let Some(shape) = &config.kpt_shape {
            let valid = matches!(shape.as_slice(), [k, 2 | 3] if *k > 0);
            report.check("kpt_shape", valid);
            if !valid {
                report.warning(format!("Malformed kpt_shape {shape:?}; expected [keypoints, 2 or 3]"));
            }
        }
    }

    /// Step (d): decode a fixed-seed sample of images from each split.
    fn check_images(&self, config: &DataConfig, report: &mut ValidationReport) {
        for split in [Split::Train, Split::Val, Split::Test] {
            let existing: Vec<_> = config.split_paths(split).into_iter().filter(|p| p.exists()).collect();
            if existing.is_empty() {
                continue;
            }

            let images: Vec<_> = existing.iter().flat_map(|p| list_images(p)).collect();
            let key = format!("{}_images", split.as_str());
            if images.is_empty() {
                report.check(&key, false);
                report.warning(format!("No images found in {} split", split.as_str()));
                continue;
            }
            if images.len() < self.options.min_images_per_split {
                report.warning(format!(
                    "Only {} images in {} split (expected at least {})",
                    images.len(),
                    split.as_str(),
                    self.options.min_images_per_split
                ));
            }

            let mut rng = StdRng::seed_from_u64(self.options.seed);
            let sample: Vec<_> = images.choose_multiple(&mut rng, self.options.samples_per_split).collect();
            let mut corrupt = 0usize;
            for path in &sample {
                if let Err(e) = image::open(path) {
                    corrupt += 1;
                    report.warning(format!(
                        "Unreadable image in {} split: {} ({e})",
                        split.as_str(),
                        path.display()
                    ));
                }
            }
            debug!(split = split.as_str(), total = images.len(), sampled = sample.len(), corrupt, "image sample checked");
            report.check(&key, corrupt == 0);
        }
    }

    /// Step (e): external programs.
    fn check_dependencies(&self, report: &mut ValidationReport) {
        let mut all_required = true;
        for spec in &self.options.dependencies {
            match probe_version(spec) {
                Some(version) => {
                    debug!(name = %spec.name, version = %version, "dependency found");
                }
                None if spec.required => {
                    all_required = false;
                    report.issue(format!("Required dependency not available: {}", spec.name));
                }
                None => {
                    report.warning(format!("Optional dependency not available: {}", spec.name));
                }
            }
        }
        report.check("dependencies", all_required);
    }
}

/// First non-empty output line of the probe command, if it ran successfully.
#[must_use]
pub fn probe_version(spec: &DependencySpec) -> Option<String> {
    let output = Command::new(&spec.program).args(&spec.args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = if output.stdout.is_empty() { output.stderr } else { output.stdout };
    let text = String::from_utf8_lossy(&text);
    Some(text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("unknown").to_string())
}
