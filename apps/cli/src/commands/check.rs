//! `trainwatch check`: the pre-flight gate on its own.

use super::run::EXIT_PREFLIGHT_FAILED;
use super::{load_settings, TrainArgs};
use colored::Colorize;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use trainwatch_core::{GateResult, MemorySink, RunContext, Supervisor, ValidationReport};

/// Execute the check command.
pub fn execute(train: &TrainArgs, settings_path: Option<&Path>, json_output: bool) -> anyhow::Result<ExitCode> {
    let settings = load_settings(settings_path)?;
    let supervisor = Supervisor::new(
        train.engine()?,
        train.train_config(&settings),
        settings,
        RunContext::new(Arc::new(MemorySink::new())),
    );
    let report = supervisor.preflight();

    if json_output {
        let output = serde_json::json!({
            "gate": report.gate(),
            "checks": report.checks,
            "issues": report.issues,
            "warnings": report.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_human(&report);
    }

    Ok(if report.gate().is_pass() { ExitCode::SUCCESS } else { ExitCode::from(EXIT_PREFLIGHT_FAILED) })
}

fn print_human(report: &ValidationReport) {
    println!("{}", "Trainwatch pre-flight".bold().cyan());
    println!();

    println!("{}", "Checks:".bold());
    for (name, passed) in &report.checks {
        let mark = if *passed { "✓".green() } else { "✗".red() };
        println!("  {mark} {name}");
    }

    if !report.issues.is_empty() {
        println!();
        println!("{}", "Issues:".bold());
        for issue in &report.issues {
            println!("  {}", issue.red());
        }
    }
    if !report.warnings.is_empty() {
        println!();
        println!("{}", "Warnings:".bold());
        for warning in &report.warnings {
            println!("  {}", warning.yellow());
        }
    }

    println!();
    let verdict = match report.gate() {
        GateResult::Pass => "PASS".green().bold(),
        GateResult::PassWithWarnings => "PASS (with warnings)".yellow().bold(),
        GateResult::Fail => "FAIL".red().bold(),
    };
    println!("Gate: {verdict}");
}
