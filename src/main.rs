use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cem_agent::runner::{train, TrainConfig};

#[derive(Parser)]
#[command(name = "cem-agent", about = "Cross-entropy method policy trainer")]
struct Cli {
    /// Environment to train against
    #[arg(default_value = "CartPole-Easy")]
    target: String,

    /// Render the mean policy after each iteration
    #[arg(long)]
    display: bool,

    /// Number of CEM iterations
    #[arg(long, default_value = "10000")]
    n_iter: usize,

    /// Candidates sampled per iteration
    #[arg(long, default_value = "250")]
    batch_size: usize,

    /// Fraction of the population kept as elite
    #[arg(long, default_value = "0.02")]
    elite_frac: f64,

    /// Initial standard deviation of the search distribution
    #[arg(long, default_value = "1.0")]
    initial_std: f64,

    /// Episodes averaged per candidate
    #[arg(long, default_value = "1")]
    eval_episodes: usize,

    /// RNG seed
    #[arg(long, env = "CEM_SEED", default_value = "0")]
    seed: u64,

    /// Directory for per-iteration snapshots and run metadata
    #[arg(long, default_value = "/tmp/cem-agent-results")]
    out_dir: PathBuf,

    /// Skip writing snapshots
    #[arg(long)]
    no_snapshots: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = TrainConfig {
        env_name: cli.target,
        n_iter: cli.n_iter,
        batch_size: cli.batch_size,
        elite_frac: cli.elite_frac,
        initial_std: cli.initial_std,
        seed: cli.seed,
        eval_episodes: cli.eval_episodes,
        display: cli.display,
        out_dir: if cli.no_snapshots { None } else { Some(cli.out_dir) },
    };

    let result = train(&cfg)?;
    tracing::info!(
        env = %result.environment,
        iterations = result.iterations,
        episodes = result.total_episodes,
        best_ever = result.best_ever,
        final_mean = result.final_mean,
        final_std = result.final_std,
        elapsed_secs = result.elapsed,
        solved = result.solved,
        "Training finished"
    );
    Ok(())
}
