//! `trainwatch classify`: map raw engine error text to a category.

use std::process::ExitCode;

pub fn execute(message: &str, json_output: bool) -> anyhow::Result<ExitCode> {
    let classification = trainwatch_core::classify(message);
    if json_output {
        println!("{}", serde_json::to_string_pretty(&classification)?);
    } else {
        println!("{}", classification.render());
    }
    Ok(ExitCode::SUCCESS)
}
