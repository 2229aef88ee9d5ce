//! Episode rollout: one full pass of a policy against an environment.

use crate::env::Environment;
use crate::policy::BinaryLinearPolicy;

/// Outcome of a single episode.
#[derive(Debug, Clone, Copy)]
pub struct Rollout {
    pub total_reward: f64,
    /// Steps actually executed (diagnostics only).
    pub steps: usize,
}

/// Run one episode for up to `horizon` steps.
///
/// Resets the environment, applies its pre-episode perturbation hook, then
/// alternates act/step until the environment reports done or the horizon is
/// reached. The first action is computed from the reset observation; the
/// hook only mutates internal environment state. Rendering is forwarded to
/// the environment and has no effect on the returned values.
pub fn rollout(
    policy: &BinaryLinearPolicy,
    env: &mut dyn Environment,
    horizon: usize,
    render: bool,
) -> Rollout {
    let mut obs = env.reset(None);
    env.perturb();

    let mut total_reward = 0.0;
    let mut steps = 0;
    for t in 0..horizon {
        let action = policy.act(&obs);
        let result = env.step(action);
        total_reward += result.reward;
        steps = t + 1;
        if render {
            env.render();
        }
        if result.done() {
            break;
        }
        obs = result.observation;
    }

    Rollout { total_reward, steps }
}
