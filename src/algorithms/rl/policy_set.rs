//! Policy-optimizer pairs of the meta-policy and the task policies.

use tch::{Device, TchError};

use super::config::SolverConfig;
use super::network::{ActorCritic, ActorCriticConfig};
use super::training::Adam;

/// An actor-critic policy together with the optimizer that trains it.
#[derive(Debug)]
pub struct PolicyOptimizer {
    pub policy: ActorCritic,
    pub optimizer: Adam,
}

impl PolicyOptimizer {
    pub fn new(policy: ActorCritic, optimizer: Adam) -> Self {
        Self { policy, optimizer }
    }

    /// Deep copy of the policy paired with a fresh single-group optimizer.
    ///
    /// The copy shares no storage with `self`; later updates of either side
    /// are invisible to the other.
    pub fn fork(&self, lr: f64) -> Result<Self, TchError> {
        let policy = self.policy.fork()?;
        let optimizer = Adam::single(&policy, lr);
        Ok(Self { policy, optimizer })
    }
}

/// Builds a freshly initialized policy and its actor/critic grouped optimizer.
///
/// Feature widths follow the configured resource attribute counts.
pub fn make_policy(config: &SolverConfig) -> PolicyOptimizer {
    let device: Device = config.device.into();
    let policy = ActorCritic::new(ActorCriticConfig::from(config), device);
    let optimizer = Adam::actor_critic(&policy, config.lr_actor, config.lr_critic, config.weight_decay);
    PolicyOptimizer { policy, optimizer }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SolverConfig {
        SolverConfig::default().with_embedding_dim(8)
    }

    #[test]
    fn test_make_policy_uses_actor_critic_groups() {
        let pair = make_policy(&config());
        let names: Vec<&str> = pair.optimizer.groups().iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, vec!["actor", "critic"]);
        assert_eq!(pair.policy.config().p_net_feature_dim, 5);
        assert_eq!(pair.policy.config().v_net_feature_dim, 3);
    }

    #[test]
    fn test_fork_copies_values_with_fresh_optimizer() {
        let cfg = config();
        let meta = make_policy(&cfg);
        let task = meta.fork(cfg.lr).unwrap();
        assert!(task.policy.parameters_equal(&meta.policy));
        assert_eq!(task.optimizer.step_count(), 0);
        assert_eq!(task.optimizer.groups().len(), 1);
        assert_eq!(task.optimizer.groups()[0].lr, cfg.lr);
    }
}
