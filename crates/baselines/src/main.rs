use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use baselines::config::{ExperimentConfig, Overrides};
use baselines::pipeline::{self, SummaryArgs};

/// baselines: offline model-based optimization with conservative surrogates.
#[derive(Parser)]
#[command(name = "baselines", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// Flags shared by every run subcommand.
#[derive(Args)]
struct RunArgs {
    /// Path to the experiment config TOML file. Defaults to `configs/<subcommand>.toml`.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the task name (e.g. "Quadratic-v0", "CategoryCount-v0").
    #[arg(long)]
    task: Option<String>,
    /// Override the random seed.
    #[arg(long)]
    seed: Option<u64>,
    /// Override the output directory.
    #[arg(long)]
    logging_dir: Option<PathBuf>,
    /// Override the number of training epochs.
    #[arg(long)]
    epochs: Option<usize>,
}

impl RunArgs {
    fn load(self, default_config: &str) -> anyhow::Result<ExperimentConfig> {
        let path = self.config.unwrap_or_else(|| PathBuf::from(default_config));
        let mut config = ExperimentConfig::load(&path)?;
        config.apply_overrides(&Overrides {
            task: self.task,
            seed: self.seed,
            logging_dir: self.logging_dir,
            epochs: self.epochs,
        });
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    /// Train a conservative surrogate while ascending candidates against it.
    Online(RunArgs),
    /// Train an ensemble, then run gradient ascent through it.
    Ascent(RunArgs),
    /// Train an ensemble, then fit a sampling policy with REINFORCE.
    Reinforce(RunArgs),
    /// Print statistics from a trajectory Parquet file.
    Summary {
        /// Path to the trajectory Parquet file.
        #[arg(long)]
        input: PathBuf,
        /// Output as JSON instead of human-readable text.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Online(args) => pipeline::run_online(&args.load("configs/online.toml")?).map(drop),
        Command::Ascent(args) => pipeline::run_ascent(&args.load("configs/ascent.toml")?).map(drop),
        Command::Reinforce(args) => {
            pipeline::run_reinforce(&args.load("configs/reinforce.toml")?).map(drop)
        }
        Command::Summary { input, json } => pipeline::run_summary(SummaryArgs { input, json }),
    }
}
