//! `trainwatch resume`: inspect the checkpoint a resumed run would use.

use super::{load_settings, TrainArgs};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use trainwatch_core::{MemorySink, RunContext, Supervisor};

/// Prints the detected resume state as JSON. Never fails on a missing or
/// unreadable checkpoint; `available` is false instead.
pub fn execute(train: &TrainArgs, settings_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let settings = load_settings(settings_path)?;
    let supervisor = Supervisor::new(
        train.engine()?,
        train.train_config(&settings),
        settings,
        RunContext::new(Arc::new(MemorySink::new())),
    );
    let info = supervisor.detect_resume();
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(ExitCode::SUCCESS)
}
