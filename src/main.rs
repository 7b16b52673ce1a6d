// Main module for the fraud model benchmark. Loads labeled transactions, explores them,
// trains and evaluates five detectors, and prints a comparative report.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use crate::config::PipelineConfig;

mod boosting;
mod config;
mod csv_reader;
mod error;
mod evaluate;
mod explore;
mod forest;
mod isolation;
mod metrics;
mod model;
mod pipeline;
mod plots;
mod preprocess;
mod report;
mod search;
mod smote;
mod trainers;
mod tree;
//test module
#[cfg(test)]
mod tests;

/// Benchmark fraud classifiers and an anomaly detector on a labeled transaction CSV
#[derive(Parser, Debug)]
#[command(name = "fraud_benchmark", version, about)]
struct Args {
    /// CSV file with numeric feature columns and a 0/1 label column
    #[arg(short, long)]
    data: Option<PathBuf>,

    /// Optional TOML/JSON/YAML file overriding the defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Share of rows held out for testing
    #[arg(long)]
    test_fraction: Option<f64>,

    /// Seed for the split and every randomized learner
    #[arg(long)]
    seed: Option<u64>,

    /// Cross-validation folds used by the grid searches
    #[arg(long)]
    folds: Option<usize>,

    /// Skip the console charts
    #[arg(long)]
    no_plots: bool,
}

// Builds the run configuration
// Inputs: parsed command-line arguments
// Outputs: PipelineConfig
// Key steps:
// 1. Start from defaults or the config file
// 2. Apply command-line overrides on top
fn resolve_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load_from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(path) = &args.data {
        config.source_path = path.clone();
    }
    if let Some(fraction) = args.test_fraction {
        config.test_fraction = fraction;
    }
    if let Some(seed) = args.seed {
        config.random_seed = seed;
    }
    if let Some(folds) = args.folds {
        config.grid_search_fold_count = folds;
    }
    if args.no_plots {
        config.show_plots = false;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("fraud_benchmark=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = resolve_config(&args)?;
    info!(source = %config.source_path.display(), seed = config.random_seed, "starting benchmark");

    let results = pipeline::run(&config)
        .with_context(|| format!("benchmark on {} failed", config.source_path.display()))?;
    info!(models = results.len(), "done");
    Ok(())
}
