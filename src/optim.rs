//! Gradient-free optimization: the cross-entropy method.
//!
//! CEM maintains an independent Gaussian per parameter dimension, samples a
//! population each round, and re-estimates mean and std from the top-scoring
//! elite fraction. The distribution is replaced wholesale each round — no
//! momentum, no blending — so the elite std may collapse to zero once the
//! population degenerates; later rounds are then deterministic.

use std::cmp::Ordering;

use anyhow::{bail, Result};
use serde::Serialize;

/// Simple PRNG for reproducible optimization.
#[derive(Debug)]
pub struct Rng {
    state: u64,
}

impl Rng {
    pub fn new(seed: u64) -> Self {
        Rng { state: seed.wrapping_add(1) }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.state
    }

    /// Gaussian sample via Box-Muller.
    pub fn randn(&mut self) -> f64 {
        let u1 = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        let u2 = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        let u1 = u1.max(1e-10);
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    pub fn randn_vec(&mut self, n: usize) -> Vec<f64> {
        (0..n).map(|_| self.randn()).collect()
    }

    /// Uniform random in [lo, hi).
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        let u = (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64;
        lo + u * (hi - lo)
    }
}

/// Initial spread of the search distribution.
#[derive(Debug, Clone)]
pub enum InitialStd {
    /// The same spread in every dimension.
    Scalar(f64),
    /// One spread per dimension; must match the mean's dimensionality.
    PerDim(Vec<f64>),
}

#[derive(Debug, Clone)]
pub struct CemConfig {
    /// Candidates sampled per round.
    pub batch_size: usize,
    /// Number of rounds.
    pub n_iter: usize,
    /// Fraction of the population kept as elite, in (0, 1].
    pub elite_frac: f64,
    pub initial_std: InitialStd,
    pub seed: u64,
}

/// One round's report: every candidate score, their mean, and the
/// re-estimated distribution mean.
#[derive(Debug, Clone, Serialize)]
pub struct IterationSummary {
    pub scores: Vec<f64>,
    pub mean_score: f64,
    pub theta_mean: Vec<f64>,
}

/// Cross-entropy method optimizer. Higher scores are better.
///
/// Two equivalent driving styles: `ask`/`tell` for callers that want to
/// evaluate the population themselves (e.g. in parallel, re-pairing scores
/// by index), or `optimize` for a lazy per-round iterator over an injected
/// fitness function.
#[derive(Debug)]
pub struct Cem {
    mean: Vec<f64>,
    std: Vec<f64>,
    batch_size: usize,
    n_iter: usize,
    n_elite: usize,
    iter: usize,
    rng: Rng,
}

impl Cem {
    /// Validates the configuration before any sampling can happen.
    pub fn new(initial_mean: Vec<f64>, cfg: &CemConfig) -> Result<Self> {
        if initial_mean.is_empty() {
            bail!("initial mean must not be empty");
        }
        if initial_mean.iter().any(|v| !v.is_finite()) {
            bail!("initial mean contains non-finite values");
        }
        if cfg.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        if !(cfg.elite_frac > 0.0 && cfg.elite_frac <= 1.0) {
            bail!("elite_frac must be in (0, 1], got {}", cfg.elite_frac);
        }
        let n_elite = (cfg.batch_size as f64 * cfg.elite_frac).round() as usize;
        if n_elite == 0 {
            bail!(
                "batch_size {} with elite_frac {} rounds to an empty elite set",
                cfg.batch_size,
                cfg.elite_frac
            );
        }
        let std = match &cfg.initial_std {
            InitialStd::Scalar(s) => {
                if !(s.is_finite() && *s > 0.0) {
                    bail!("initial_std must be a positive finite number, got {s}");
                }
                vec![*s; initial_mean.len()]
            }
            InitialStd::PerDim(v) => {
                if v.len() != initial_mean.len() {
                    bail!(
                        "initial_std has {} dimensions but the mean has {}",
                        v.len(),
                        initial_mean.len()
                    );
                }
                if v.iter().any(|s| !s.is_finite() || *s < 0.0) {
                    bail!("per-dimension initial_std values must be finite and non-negative");
                }
                v.clone()
            }
        };

        Ok(Cem {
            mean: initial_mean,
            std,
            batch_size: cfg.batch_size,
            n_iter: cfg.n_iter,
            n_elite,
            iter: 0,
            rng: Rng::new(cfg.seed),
        })
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn std(&self) -> &[f64] {
        &self.std
    }

    pub fn n_elite(&self) -> usize {
        self.n_elite
    }

    /// Rounds completed so far.
    pub fn iteration(&self) -> usize {
        self.iter
    }

    /// Sample one round's population from the current distribution.
    pub fn ask(&mut self) -> Vec<Vec<f64>> {
        let dim = self.mean.len();
        let mut pop = Vec::with_capacity(self.batch_size);
        for _ in 0..self.batch_size {
            let z = self.rng.randn_vec(dim);
            let theta: Vec<f64> =
                (0..dim).map(|i| self.mean[i] + self.std[i] * z[i]).collect();
            pop.push(theta);
        }
        pop
    }

    /// Rank candidates by score (descending), replace the distribution with
    /// the elite subset's per-dimension mean and population std, and report
    /// the round. Candidates must be the vectors returned by the matching
    /// `ask` call, paired with their scores by index.
    pub fn tell(&mut self, candidates: &[Vec<f64>], scores: &[f64]) -> IterationSummary {
        assert_eq!(candidates.len(), self.batch_size);
        assert_eq!(scores.len(), self.batch_size);

        let mut indices: Vec<usize> = (0..scores.len()).collect();
        indices.sort_by(|&a, &b| scores[b].partial_cmp(&scores[a]).unwrap_or(Ordering::Equal));
        let elite = &indices[..self.n_elite];

        for i in 0..self.mean.len() {
            let m = elite.iter().map(|&k| candidates[k][i]).sum::<f64>() / self.n_elite as f64;
            let var = elite.iter().map(|&k| (candidates[k][i] - m).powi(2)).sum::<f64>()
                / self.n_elite as f64;
            self.mean[i] = m;
            self.std[i] = var.sqrt();
        }
        self.iter += 1;

        IterationSummary {
            scores: scores.to_vec(),
            mean_score: scores.iter().sum::<f64>() / scores.len() as f64,
            theta_mean: self.mean.clone(),
        }
    }

    /// Iterator form: exactly `n_iter` summaries, each round's sampling and
    /// evaluation deferred until the summary is consumed. A fitness error
    /// ends the sequence at that round.
    pub fn optimize<F>(self, fitness: F) -> CemRun<F>
    where
        F: FnMut(&[f64]) -> Result<f64>,
    {
        CemRun { cem: self, fitness, failed: false }
    }
}

/// Lazy sequence of per-round summaries. See [`Cem::optimize`].
pub struct CemRun<F> {
    cem: Cem,
    fitness: F,
    failed: bool,
}

impl<F> Iterator for CemRun<F>
where
    F: FnMut(&[f64]) -> Result<f64>,
{
    type Item = Result<IterationSummary>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cem.iter >= self.cem.n_iter {
            return None;
        }
        let round = self.cem.iter;
        let candidates = self.cem.ask();
        let mut scores = Vec::with_capacity(candidates.len());
        for (i, theta) in candidates.iter().enumerate() {
            match (self.fitness)(theta) {
                Ok(score) => scores.push(score),
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e.context(format!(
                        "fitness evaluation failed in round {round} (candidate {i})"
                    ))));
                }
            }
        }
        Some(Ok(self.cem.tell(&candidates, &scores)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(batch_size: usize, n_iter: usize, elite_frac: f64) -> CemConfig {
        CemConfig {
            batch_size,
            n_iter,
            elite_frac,
            initial_std: InitialStd::Scalar(1.0),
            seed: 42,
        }
    }

    /// Smooth bowl maximized at (3, -2).
    fn bowl(theta: &[f64]) -> f64 {
        -(theta[0] - 3.0).powi(2) - (theta[1] + 2.0).powi(2)
    }

    #[test]
    fn test_rejects_empty_elite_before_sampling() {
        // round(4 * 0.05) == 0: must fail at construction, not after scoring.
        let err = Cem::new(vec![0.0; 2], &config(4, 10, 0.05)).unwrap_err();
        assert!(err.to_string().contains("elite"));
    }

    #[test]
    fn test_rejects_bad_elite_frac() {
        assert!(Cem::new(vec![0.0; 2], &config(4, 10, 0.0)).is_err());
        assert!(Cem::new(vec![0.0; 2], &config(4, 10, 1.5)).is_err());
        assert!(Cem::new(vec![0.0; 2], &config(4, 10, 1.0)).is_ok());
    }

    #[test]
    fn test_rejects_zero_batch_and_empty_mean() {
        assert!(Cem::new(vec![0.0; 2], &config(0, 10, 0.5)).is_err());
        assert!(Cem::new(vec![], &config(4, 10, 0.5)).is_err());
    }

    #[test]
    fn test_rejects_std_dimension_mismatch() {
        let cfg = CemConfig {
            initial_std: InitialStd::PerDim(vec![1.0; 3]),
            ..config(4, 10, 0.5)
        };
        let err = Cem::new(vec![0.0; 2], &cfg).unwrap_err();
        assert!(err.to_string().contains("dimensions"));
    }

    #[test]
    fn test_yields_exactly_n_iter_summaries() {
        let cem = Cem::new(vec![0.0; 2], &config(4, 7, 0.5)).unwrap();
        let summaries: Vec<_> = cem
            .optimize(|theta| Ok(bowl(theta)))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(summaries.len(), 7);
        for s in &summaries {
            assert_eq!(s.scores.len(), 4);
            assert_eq!(s.theta_mean.len(), 2);
        }
    }

    #[test]
    fn test_rounds_evaluate_only_when_consumed() {
        use std::cell::Cell;
        let calls = Cell::new(0usize);
        let cem = Cem::new(vec![0.0; 2], &config(4, 2, 0.5)).unwrap();
        let mut run = cem.optimize(|theta| {
            calls.set(calls.get() + 1);
            Ok(bowl(theta))
        });
        assert_eq!(calls.get(), 0, "no evaluation before the first summary is pulled");
        run.next().unwrap().unwrap();
        assert_eq!(calls.get(), 4);
        run.next().unwrap().unwrap();
        assert_eq!(calls.get(), 8);
        assert!(run.next().is_none());
    }

    #[test]
    fn test_zero_rounds_yield_nothing() {
        let cem = Cem::new(vec![0.0; 2], &config(4, 0, 0.5)).unwrap();
        let mut run = cem.optimize(|_| -> Result<f64> { panic!("must never evaluate") });
        assert!(run.next().is_none());
    }

    #[test]
    fn test_elite_update_matches_reference() {
        let mut cem = Cem::new(vec![0.0; 2], &config(4, 1, 0.5)).unwrap();
        assert_eq!(cem.n_elite(), 2);

        let candidates = vec![
            vec![0.0, 0.0],
            vec![2.0, 4.0],
            vec![1.0, 1.0],
            vec![4.0, 2.0],
        ];
        // Elite: candidates 1 (score 5) and 3 (score 4).
        let summary = cem.tell(&candidates, &[1.0, 5.0, 3.0, 4.0]);

        assert_eq!(cem.mean(), &[3.0, 3.0]);
        // Population std of {2, 4} about 3 is 1 in both dimensions.
        assert!((cem.std()[0] - 1.0).abs() < 1e-12);
        assert!((cem.std()[1] - 1.0).abs() < 1e-12);
        assert_eq!(summary.theta_mean, vec![3.0, 3.0]);
        assert!((summary.mean_score - 3.25).abs() < 1e-12);
        assert_eq!(summary.scores, vec![1.0, 5.0, 3.0, 4.0]);
    }

    #[test]
    fn test_converges_on_bowl() {
        let cfg = CemConfig {
            batch_size: 64,
            n_iter: 60,
            elite_frac: 0.125,
            initial_std: InitialStd::Scalar(2.0),
            seed: 7,
        };
        let cem = Cem::new(vec![0.0; 2], &cfg).unwrap();
        let summaries: Vec<_> = cem
            .optimize(|theta| Ok(bowl(theta)))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(summaries.len(), 60);

        let last = summaries.last().unwrap();
        let dist = ((last.theta_mean[0] - 3.0).powi(2) + (last.theta_mean[1] + 2.0).powi(2)).sqrt();
        assert!(dist < 0.5, "mean should approach (3, -2), got {:?}", last.theta_mean);
        assert!(
            last.mean_score > summaries[0].mean_score,
            "mean score should improve on a noise-free objective"
        );
    }

    #[test]
    fn test_zero_std_rounds_stay_deterministic() {
        // A fully collapsed distribution is a recognized degenerate mode:
        // sampling becomes deterministic and must keep working.
        let cfg = CemConfig {
            batch_size: 4,
            n_iter: 3,
            elite_frac: 0.5,
            initial_std: InitialStd::PerDim(vec![0.0, 0.0]),
            seed: 1,
        };
        let cem = Cem::new(vec![1.0, -1.0], &cfg).unwrap();
        let summaries: Vec<_> = cem
            .optimize(|theta| Ok(bowl(theta)))
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(summaries.len(), 3);
        for s in &summaries {
            assert_eq!(s.theta_mean, vec![1.0, -1.0]);
            assert!(s.scores.iter().all(|&y| (y - bowl(&[1.0, -1.0])).abs() < 1e-12));
        }
    }

    #[test]
    fn test_fitness_error_ends_sequence_with_round_context() {
        let cem = Cem::new(vec![0.0; 2], &config(3, 10, 0.5)).unwrap();
        let mut calls = 0usize;
        let mut run = cem.optimize(move |theta| {
            calls += 1;
            if calls > 3 {
                bail!("environment exploded");
            }
            Ok(bowl(theta))
        });

        assert!(run.next().unwrap().is_ok());
        let err = run.next().unwrap().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("round 1"), "got: {msg}");
        assert!(msg.contains("environment exploded"), "got: {msg}");
        assert!(run.next().is_none(), "sequence must not resume after a failure");
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let run = |seed: u64| {
            let cfg = CemConfig { seed, ..config(8, 5, 0.25) };
            let cem = Cem::new(vec![0.0; 2], &cfg).unwrap();
            cem.optimize(|theta| Ok(bowl(theta)))
                .collect::<Result<Vec<_>>>()
                .unwrap()
                .last()
                .unwrap()
                .theta_mean
                .clone()
        };
        assert_eq!(run(9), run(9));
        assert_ne!(run(9), run(10));
    }
}
