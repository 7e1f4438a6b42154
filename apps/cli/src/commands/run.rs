//! `trainwatch run`: the supervised training flow.

use super::{load_settings, TrainArgs};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use trainwatch_core::{JsonLineSink, RunContext, Supervisor, SupervisorError};

/// Exit status when the pre-flight gate fails.
pub const EXIT_PREFLIGHT_FAILED: u8 = 2;

/// Exit status when the training call itself fails.
pub const EXIT_TRAINING_FAILED: u8 = 1;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub exports: Vec<String>,
    pub no_benchmark: bool,
    pub no_visualization: bool,
}

/// Execute the run command.
pub async fn execute(train: &TrainArgs, options: &RunOptions, settings_path: Option<&Path>) -> anyhow::Result<ExitCode> {
    let mut settings = load_settings(settings_path)?;
    for format in &options.exports {
        if !settings.export.formats.contains(format) {
            settings.export.formats.push(format.clone());
        }
    }
    if options.no_benchmark {
        settings.benchmark.enabled = false;
    }
    if options.no_visualization {
        settings.visual.enabled = false;
    }

    let engine = train.engine()?;
    let ctx = RunContext::new(Arc::new(JsonLineSink::stdout()));
    spawn_signal_listener(ctx.clone());

    let supervisor = Supervisor::new(engine, train.train_config(&settings), settings, ctx);
    match supervisor.run().await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                epochs_completed = summary.result.epochs_completed,
                stopped_early = summary.result.stopped_early,
                exports = summary.exports.len(),
                elapsed_secs = summary.elapsed_secs,
                "run finished"
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(SupervisorError::PreflightFailed { issues }) => {
            for issue in &issues {
                error!("{issue}");
            }
            Ok(ExitCode::from(EXIT_PREFLIGHT_FAILED))
        }
        Err(SupervisorError::TrainingFailed { classification }) => {
            eprintln!("{}", classification.render());
            Ok(ExitCode::from(EXIT_TRAINING_FAILED))
        }
        Err(e) => Err(e.into()),
    }
}

/// Turns Ctrl-C (and SIGTERM on unix) into a cooperative stop request.
/// The engine finishes its current epoch and the flow winds down normally.
fn spawn_signal_listener(ctx: RunContext) {
    tokio::spawn(async move {
        if let Some(reason) = wait_for_signal().await {
            ctx.request_stop(reason);
        }
    });
}

#[cfg(unix)]
async fn wait_for_signal() -> Option<&'static str> {
    use signal::unix::{signal as unix_signal, SignalKind};

    let mut terminate = match unix_signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "cannot listen for SIGTERM");
            return signal::ctrl_c().await.ok().map(|()| "interrupt");
        }
    };
    tokio::select! {
        result = signal::ctrl_c() => result.ok().map(|()| "interrupt"),
        _ = terminate.recv() => Some("terminate"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Option<&'static str> {
    signal::ctrl_c().await.ok().map(|()| "interrupt")
}
