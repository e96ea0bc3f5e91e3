//! widedeep CLI: analyze raw data, tune hyperparameters, train, and query a
//! servable.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Tune and train a wide-and-deep classifier on transformed tabular data
#[derive(Parser, Debug)]
#[command(name = "widedeep", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (holds `.widedeep/config.toml`)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Data inputs shared by `tune` and `train`.
#[derive(clap::Args, Debug, Clone)]
struct DataArgs {
    /// Transform artifact directory
    #[arg(long)]
    transform_output: PathBuf,

    /// Training file patterns (JSON lines of transformed examples)
    #[arg(long = "train", required = true, num_args = 1..)]
    train_files: Vec<String>,

    /// Evaluation file patterns
    #[arg(long = "eval", required = true, num_args = 1..)]
    eval_files: Vec<String>,

    /// Training batches per epoch
    #[arg(long)]
    train_steps: usize,

    /// Evaluation batches per epoch
    #[arg(long)]
    eval_steps: usize,

    /// Override the configured number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Override the configured random seed
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Fit a transform artifact from raw JSON-lines records
    Analyze {
        /// Raw record file patterns
        #[arg(long = "input", required = true, num_args = 1..)]
        inputs: Vec<String>,

        /// Artifact output directory
        #[arg(long)]
        output: PathBuf,

        /// Also write transformed examples, one file per input, here
        #[arg(long)]
        examples_out: Option<PathBuf>,
    },
    /// Search the hyperparameter space with Bayesian optimization
    Tune {
        #[command(flatten)]
        data: DataArgs,

        /// Directory the tuning project is written into
        #[arg(long)]
        working_dir: PathBuf,

        /// Override the configured trial budget
        #[arg(long)]
        max_trials: Option<usize>,
    },
    /// Train the classifier and export a servable
    Train {
        #[command(flatten)]
        data: DataArgs,

        /// Hyperparameters JSON (e.g. a tuner's best_hyperparameters.json)
        #[arg(long)]
        hyperparameters: Option<PathBuf>,

        /// Directory for training progress logs
        #[arg(long)]
        model_run_dir: PathBuf,

        /// Directory the servable is exported to
        #[arg(long)]
        serving_model_dir: PathBuf,

        /// Override the configured replica count
        #[arg(long)]
        replicas: Option<usize>,
    },
    /// Score raw JSON-lines records with an exported servable
    Predict {
        /// Servable directory
        #[arg(long)]
        servable: PathBuf,

        /// Raw records, one JSON object per line
        #[arg(long)]
        input: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration to the workspace
    Init,
    /// Show the resolved configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    let log_dir = directories::ProjectDirs::from("dev", "widedeep", "widedeep")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "widedeep.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace)
}
