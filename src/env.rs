//! Environment abstraction for CEM training.
//!
//! Mirrors gymnasium's API but in pure Rust. Each environment defines its
//! observation dimensionality, action count, and step/reset dynamics.

use std::fmt;

use crate::optim::Rng;

/// Result of a step.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub observation: Vec<f64>,
    pub reward: f64,
    pub terminated: bool,
    pub truncated: bool,
}

impl StepResult {
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// Environment configuration — enough to size a policy for it.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub name: String,
    pub obs_dim: usize,
    pub n_actions: usize,
    pub max_steps: usize,
    pub solved_threshold: f64,
}

/// The core Environment trait.
///
/// `perturb` and `render` are optional capabilities with no-op defaults:
/// `perturb` is an environment-specific nudge applied once right after
/// reset, `render` is purely observational.
pub trait Environment {
    /// Reset the environment to initial state, returns observation.
    fn reset(&mut self, seed: Option<u64>) -> Vec<f64>;

    /// Take an action, returns step result.
    fn step(&mut self, action: usize) -> StepResult;

    /// Pre-episode perturbation hook, invoked once immediately after reset.
    fn perturb(&mut self) {}

    /// Visualize the current state. No effect on dynamics.
    fn render(&self) {}

    /// Environment configuration.
    fn config(&self) -> &EnvConfig;
}

/// Registry of known environments.
pub fn get_env_config(name: &str) -> Option<EnvConfig> {
    match name {
        "CartPole-v1" => Some(EnvConfig {
            name: name.to_string(),
            obs_dim: 4,
            n_actions: 2,
            max_steps: 500,
            solved_threshold: 475.0,
        }),
        // Relaxed variant: wide failure cone, long episodes, and a
        // pre-episode pole tilt so the policy starts off-balance.
        "CartPole-Easy" => Some(EnvConfig {
            name: name.to_string(),
            obs_dim: 4,
            n_actions: 2,
            max_steps: 2000,
            solved_threshold: 1900.0,
        }),
        _ => None,
    }
}

/// Factory: create an environment by name.
pub fn make(name: &str, seed: Option<u64>) -> Option<Box<dyn Environment>> {
    match name {
        "CartPole-v1" => Some(Box::new(cartpole::CartPole::new(seed))),
        "CartPole-Easy" => Some(Box::new(cartpole::CartPole::easy(seed))),
        _ => None,
    }
}

impl fmt::Display for EnvConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (obs={}, actions={}, solved≥{})",
            self.name, self.obs_dim, self.n_actions, self.solved_threshold
        )
    }
}

// ─── CartPole (pure Rust, no dependencies) ────────────────────────────

pub mod cartpole {
    use super::*;

    const GRAVITY: f64 = 9.8;
    const CART_MASS: f64 = 1.0;
    const POLE_MASS: f64 = 0.1;
    const TOTAL_MASS: f64 = CART_MASS + POLE_MASS;
    const POLE_HALF_LENGTH: f64 = 0.5;
    const FORCE_MAG: f64 = 10.0;
    const TAU: f64 = 0.02; // timestep
    const X_THRESHOLD: f64 = 2.4;
    const THETA_THRESHOLD: f64 = 12.0 * std::f64::consts::PI / 180.0;

    // Relaxed variant parameters
    const EASY_THETA_THRESHOLD: f64 = 90.0 * std::f64::consts::PI / 180.0;
    const EASY_TILT: f64 = 30.0 * std::f64::consts::PI / 180.0;

    pub struct CartPole {
        config: EnvConfig,
        state: [f64; 4], // x, x_dot, theta, theta_dot
        step_count: usize,
        theta_threshold: f64,
        /// Pole tilt applied by the pre-episode perturbation hook.
        tilt: f64,
        rng: Rng,
    }

    impl CartPole {
        pub fn new(seed: Option<u64>) -> Self {
            Self::with_variant("CartPole-v1", THETA_THRESHOLD, 0.0, seed)
        }

        pub fn easy(seed: Option<u64>) -> Self {
            Self::with_variant("CartPole-Easy", EASY_THETA_THRESHOLD, EASY_TILT, seed)
        }

        fn with_variant(name: &str, theta_threshold: f64, tilt: f64, seed: Option<u64>) -> Self {
            let config = get_env_config(name).unwrap();
            let mut env = CartPole {
                config,
                state: [0.0; 4],
                step_count: 0,
                theta_threshold,
                tilt,
                rng: Rng::new(seed.unwrap_or(42)),
            };
            env.reset(seed);
            env
        }
    }

    impl Environment for CartPole {
        fn reset(&mut self, seed: Option<u64>) -> Vec<f64> {
            if let Some(s) = seed {
                self.rng = Rng::new(s);
            }
            for v in &mut self.state {
                *v = self.rng.uniform(-0.05, 0.05);
            }
            self.step_count = 0;
            self.state.to_vec()
        }

        fn step(&mut self, action: usize) -> StepResult {
            let force = if action == 1 { FORCE_MAG } else { -FORCE_MAG };

            let [x, x_dot, theta, theta_dot] = self.state;
            let cos_theta = theta.cos();
            let sin_theta = theta.sin();

            let temp = (force + POLE_MASS * POLE_HALF_LENGTH * theta_dot * theta_dot * sin_theta)
                / TOTAL_MASS;
            let theta_acc = (GRAVITY * sin_theta - cos_theta * temp)
                / (POLE_HALF_LENGTH * (4.0 / 3.0 - POLE_MASS * cos_theta * cos_theta / TOTAL_MASS));
            let x_acc = temp - POLE_MASS * POLE_HALF_LENGTH * theta_acc * cos_theta / TOTAL_MASS;

            // Euler integration
            let new_x = x + TAU * x_dot;
            let new_x_dot = x_dot + TAU * x_acc;
            let new_theta = theta + TAU * theta_dot;
            let new_theta_dot = theta_dot + TAU * theta_acc;

            self.state = [new_x, new_x_dot, new_theta, new_theta_dot];
            self.step_count += 1;

            let terminated = new_x.abs() > X_THRESHOLD || new_theta.abs() > self.theta_threshold;
            let truncated = self.step_count >= self.config.max_steps;

            StepResult {
                observation: self.state.to_vec(),
                reward: if terminated { 0.0 } else { 1.0 },
                terminated,
                truncated,
            }
        }

        fn perturb(&mut self) {
            self.state[2] += self.tilt;
        }

        fn render(&self) {
            let [x, _, theta, _] = self.state;
            eprintln!(
                "step {:4} | cart x={:+.3} | pole θ={:+.3} rad",
                self.step_count, x, theta
            );
        }

        fn config(&self) -> &EnvConfig {
            &self.config
        }
    }
}
