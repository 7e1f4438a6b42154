//! `trainwatch gpu`: one telemetry sample, for checking the backend works.

use super::load_settings;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use trainwatch_core::{MemorySink, MonitorState, RunContext, TelemetryMonitor};

pub fn execute(device_index: u32, settings_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let settings = load_settings(settings_path)?;
    let monitor = TelemetryMonitor::new(device_index, &settings.telemetry, RunContext::new(Arc::new(MemorySink::new())));

    let output = serde_json::json!({
        "device_index": device_index,
        "available": monitor.state() != MonitorState::Inactive,
        "name": monitor.device_name(),
        "sample": monitor.gpu_stats(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(ExitCode::SUCCESS)
}
