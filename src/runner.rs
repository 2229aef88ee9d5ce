//! Training driver: wires policy construction, rollouts, and the CEM
//! optimizer together, with per-iteration reporting and snapshots.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use rayon::prelude::*;

use crate::env;
use crate::optim::{Cem, CemConfig, InitialStd, IterationSummary};
use crate::policy::BinaryLinearPolicy;
use crate::rollout::rollout;

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub env_name: String,
    pub n_iter: usize,
    pub batch_size: usize,
    pub elite_frac: f64,
    pub initial_std: f64,
    pub seed: u64,
    /// Episodes averaged per candidate.
    pub eval_episodes: usize,
    /// Render the mean policy after each iteration.
    pub display: bool,
    /// Where to write per-iteration snapshots and run metadata, if anywhere.
    pub out_dir: Option<PathBuf>,
}

/// Final result of a training run.
#[derive(Debug)]
pub struct TrainResult {
    pub environment: String,
    pub iterations: usize,
    pub total_episodes: usize,
    pub best_ever: f64,
    pub final_mean: f64,
    pub final_std: f64,
    pub theta_mean: Vec<f64>,
    pub elapsed: f64,
    pub solved: bool,
}

/// Average episode reward of one parameter vector, usable without the
/// optimizer for offline evaluation.
pub fn evaluate_theta(env_name: &str, theta: &[f64], n_episodes: usize, seed: u64) -> Result<f64> {
    if n_episodes == 0 {
        bail!("n_episodes must be positive");
    }
    let policy = BinaryLinearPolicy::from_theta(theta);
    let mut total = 0.0;
    for ep in 0..n_episodes {
        let mut env = env::make(env_name, Some(seed + ep as u64 * 1000))
            .with_context(|| format!("unknown environment: {env_name}"))?;
        let horizon = env.config().max_steps;
        total += rollout(&policy, env.as_mut(), horizon, false).total_reward;
    }
    Ok(total / n_episodes as f64)
}

pub fn train(cfg: &TrainConfig) -> Result<TrainResult> {
    let env_cfg = env::get_env_config(&cfg.env_name)
        .with_context(|| format!("unknown environment: {}", cfg.env_name))?;
    if env_cfg.n_actions != 2 {
        bail!("{} has {} actions; the linear policy is binary", env_cfg.name, env_cfg.n_actions);
    }
    if cfg.eval_episodes == 0 {
        bail!("eval_episodes must be positive");
    }

    let dim = BinaryLinearPolicy::n_params(env_cfg.obs_dim);
    let mut cem = Cem::new(
        vec![0.0; dim],
        &CemConfig {
            batch_size: cfg.batch_size,
            n_iter: cfg.n_iter,
            elite_frac: cfg.elite_frac,
            initial_std: InitialStd::Scalar(cfg.initial_std),
            seed: cfg.seed,
        },
    )?;

    if let Some(dir) = &cfg.out_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }

    let horizon = env_cfg.max_steps;
    let started_at = chrono::Utc::now();
    let start = Instant::now();

    tracing::info!(
        env = %env_cfg,
        params = dim,
        batch = cfg.batch_size,
        n_elite = cem.n_elite(),
        seed = cfg.seed,
        "Starting CEM training"
    );

    let mut best_ever = f64::NEG_INFINITY;
    let mut best_theta: Option<Vec<f64>> = None;
    let mut total_episodes = 0usize;
    let mut iterations = 0usize;

    for i in 0..cfg.n_iter {
        let candidates = cem.ask();
        let scores: Vec<f64> = candidates
            .par_iter()
            .map(|theta| {
                let policy = BinaryLinearPolicy::from_theta(theta);
                let mut total = 0.0;
                for ep in 0..cfg.eval_episodes {
                    let mut env = env::make(&cfg.env_name, Some(cfg.seed + ep as u64 * 1000))
                        .unwrap_or_else(|| panic!("Unknown env: {}", cfg.env_name));
                    total += rollout(&policy, env.as_mut(), horizon, false).total_reward;
                }
                let score = total / cfg.eval_episodes as f64;
                // NaN guard: a broken score must rank last, not poison the sort.
                if score.is_finite() { score } else { -1e6 }
            })
            .collect();
        total_episodes += candidates.len() * cfg.eval_episodes;

        let summary = cem.tell(&candidates, &scores);
        iterations = i + 1;

        let gen_best = scores.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if gen_best > best_ever {
            best_ever = gen_best;
            let idx = scores
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
                .map(|(k, _)| k)
                .unwrap_or(0);
            best_theta = Some(candidates[idx].clone());
        }

        tracing::info!(
            iteration = i,
            mean_reward = summary.mean_score,
            best = gen_best,
            best_ever,
            episodes = total_episodes,
            "Iteration complete"
        );

        if let Some(dir) = &cfg.out_dir {
            write_snapshot(dir, i, &summary)?;
        }

        if cfg.display {
            let policy = BinaryLinearPolicy::from_theta(&summary.theta_mean);
            let mut env = env::make(&cfg.env_name, Some(cfg.seed))
                .unwrap_or_else(|| panic!("Unknown env: {}", cfg.env_name));
            let shown = rollout(&policy, env.as_mut(), horizon, true);
            tracing::info!(
                iteration = i,
                reward = shown.total_reward,
                steps = shown.steps,
                "Mean policy rollout"
            );
        }

        if best_ever >= env_cfg.solved_threshold {
            tracing::info!(iteration = i, best_ever, "Solved threshold reached");
            break;
        }
    }

    // Held-out evaluation of the best candidate seen.
    let (final_mean, final_std) = match &best_theta {
        Some(theta) => {
            let policy = BinaryLinearPolicy::from_theta(theta);
            let scores: Vec<f64> = (0..20)
                .map(|ep| {
                    let mut env = env::make(&cfg.env_name, Some(99_999 + ep))
                        .unwrap_or_else(|| panic!("Unknown env: {}", cfg.env_name));
                    rollout(&policy, env.as_mut(), horizon, false).total_reward
                })
                .collect();
            let m = scores.iter().sum::<f64>() / scores.len() as f64;
            let s = (scores.iter().map(|x| (x - m).powi(2)).sum::<f64>() / scores.len() as f64)
                .sqrt();
            (m, s)
        }
        None => (0.0, 0.0),
    };

    let result = TrainResult {
        environment: env_cfg.name.clone(),
        iterations,
        total_episodes,
        best_ever,
        final_mean,
        final_std,
        theta_mean: cem.mean().to_vec(),
        elapsed: start.elapsed().as_secs_f64(),
        solved: best_ever >= env_cfg.solved_threshold,
    };

    if let Some(dir) = &cfg.out_dir {
        write_info(dir, cfg, &result, started_at)?;
    }

    Ok(result)
}

fn write_snapshot(dir: &Path, iteration: usize, summary: &IterationSummary) -> Result<()> {
    let path = dir.join(format!("agent-{iteration:04}.json"));
    let body = serde_json::json!({
        "iteration": iteration,
        "theta_mean": summary.theta_mean,
        "mean_reward": summary.mean_score,
    });
    std::fs::write(&path, serde_json::to_string_pretty(&body)?)
        .with_context(|| format!("failed to write {}", path.display()))
}

fn write_info(
    dir: &Path,
    cfg: &TrainConfig,
    result: &TrainResult,
    started_at: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    let path = dir.join("info.json");
    let body = serde_json::json!({
        "env_id": result.environment,
        "params": {
            "n_iter": cfg.n_iter,
            "batch_size": cfg.batch_size,
            "elite_frac": cfg.elite_frac,
            "initial_std": cfg.initial_std,
            "eval_episodes": cfg.eval_episodes,
            "seed": cfg.seed,
        },
        "started_at": started_at.to_rfc3339(),
        "finished_at": chrono::Utc::now().to_rfc3339(),
        "result": {
            "iterations": result.iterations,
            "total_episodes": result.total_episodes,
            "best_ever": result.best_ever,
            "final_mean": result.final_mean,
            "final_std": result.final_std,
            "solved": result.solved,
        },
    });
    std::fs::write(&path, serde_json::to_string_pretty(&body)?)
        .with_context(|| format!("failed to write {}", path.display()))
}
