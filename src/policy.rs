//! Binary-action linear threshold policy.
//!
//! The flat parameter vector the optimizer searches over splits into a
//! weight vector and a trailing bias. Forward pass only — this is what the
//! cross-entropy method optimizes.

use serde::Serialize;

/// Linear threshold classifier over observations.
#[derive(Debug, Clone, Serialize)]
pub struct BinaryLinearPolicy {
    w: Vec<f64>,
    b: f64,
}

impl BinaryLinearPolicy {
    /// Build from a flat parameter vector; the last element is the bias.
    pub fn from_theta(theta: &[f64]) -> Self {
        debug_assert!(!theta.is_empty(), "policy needs at least a bias parameter");
        let (w, b) = theta.split_at(theta.len() - 1);
        BinaryLinearPolicy { w: w.to_vec(), b: b[0] }
    }

    /// Parameter count for an observation of `obs_dim` values.
    pub fn n_params(obs_dim: usize) -> usize {
        obs_dim + 1
    }

    /// Observation → action. Total: every input maps to 0 or 1.
    pub fn act(&self, obs: &[f64]) -> usize {
        debug_assert_eq!(obs.len(), self.w.len());
        let y: f64 = self.w.iter().zip(obs).map(|(w, o)| w * o).sum::<f64>() + self.b;
        usize::from(y < 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_sign() {
        let policy = BinaryLinearPolicy::from_theta(&[1.0, 0.0]);
        assert_eq!(policy.act(&[2.0]), 0); // y = 2 >= 0
        assert_eq!(policy.act(&[-2.0]), 1); // y = -2 < 0
    }

    #[test]
    fn test_bias_only_decision() {
        // Zero weights: the bias alone picks the action.
        assert_eq!(BinaryLinearPolicy::from_theta(&[0.0, 0.0, 0.5]).act(&[9.0, -9.0]), 0);
        assert_eq!(BinaryLinearPolicy::from_theta(&[0.0, 0.0, -0.5]).act(&[9.0, -9.0]), 1);
    }

    #[test]
    fn test_act_is_pure() {
        let policy = BinaryLinearPolicy::from_theta(&[0.3, -1.2, 0.7, 0.1, -0.4]);
        let obs = [0.01, -0.2, 0.5, 1.3];
        let first = policy.act(&obs);
        for _ in 0..10 {
            assert_eq!(policy.act(&obs), first);
        }
    }

    #[test]
    fn test_construction_is_idempotent() {
        let theta = [0.3, -1.2, 0.7, 0.1, -0.4];
        let a = BinaryLinearPolicy::from_theta(&theta);
        let b = BinaryLinearPolicy::from_theta(&theta);
        for obs in [[0.0, 0.0, 0.0, 0.0], [1.0, -1.0, 2.0, -2.0], [100.0, 0.5, -3.0, 0.0]] {
            assert_eq!(a.act(&obs), b.act(&obs));
        }
    }

    #[test]
    fn test_total_on_extreme_inputs() {
        let policy = BinaryLinearPolicy::from_theta(&[1.0, 1.0, 0.0]);
        assert!(policy.act(&[f64::MAX, f64::MAX]) <= 1);
        assert!(policy.act(&[f64::NAN, 0.0]) <= 1);
    }

    #[test]
    fn test_n_params() {
        assert_eq!(BinaryLinearPolicy::n_params(4), 5);
    }
}
