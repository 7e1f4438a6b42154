//! Trainwatch CLI - supervises one training run at a time
//!
//! `trainwatch run` is what an operator process launches. Structured events
//! go to stdout as `__JSON_LOG__` lines; diagnostics go to stderr.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use commands::{check, classify, gpu, resume, run, TrainArgs};

/// Trainwatch - training-run supervisor
#[derive(Parser, Debug)]
#[command(
    name = "trainwatch",
    author,
    version,
    about = "Trainwatch - training-run supervisor",
    long_about = "Trainwatch wraps a single long-running training job.\nIt validates the dataset first, watches the parent process and the GPU while training runs, then validates, exports and benchmarks the result."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Supervisor settings file (defaults to ./trainwatch.toml when present)
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a supervised training job
    ///
    /// Pre-flight validation, training with liveness and GPU monitoring,
    /// final validation, exports and a performance benchmark.
    Run {
        #[command(flatten)]
        train: TrainArgs,

        /// Export format to produce after training (repeatable)
        #[arg(long = "export", value_name = "FORMAT")]
        exports: Vec<String>,

        /// Skip the post-training benchmark
        #[arg(long)]
        no_benchmark: bool,

        /// Skip periodic visual samples
        #[arg(long)]
        no_visualization: bool,
    },

    /// Run only the pre-flight checks
    Check {
        #[command(flatten)]
        train: TrainArgs,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show what a resumed run would pick up
    Resume {
        #[command(flatten)]
        train: TrainArgs,
    },

    /// Classify an error message
    Classify {
        /// Raw error text from the training engine
        message: String,

        /// Output the classification as JSON
        #[arg(long)]
        json: bool,
    },

    /// Take one GPU telemetry sample
    Gpu {
        /// Accelerator ordinal
        #[arg(short, long, default_value_t = 0)]
        device: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Events own stdout; tracing goes to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: tracing subscriber already set");
    }

    match dispatch(args).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(args: Args) -> anyhow::Result<ExitCode> {
    let settings = args.settings.as_deref();
    match args.command {
        Command::Run { train, exports, no_benchmark, no_visualization } => {
            let options = run::RunOptions { exports, no_benchmark, no_visualization };
            run::execute(&train, &options, settings).await
        }
        Command::Check { train, json } => check::execute(&train, settings, json),
        Command::Resume { train } => resume::execute(&train, settings),
        Command::Classify { message, json } => classify::execute(&message, json),
        Command::Gpu { device } => gpu::execute(device, settings),
    }
}
