//! Adam optimizer with an explicit, serializable state.
//!
//! The optimizer does not hold references to the policy; every call takes
//! the policy whose trainable variables it updates. Moments are keyed by
//! variable name, so the state can be written into and restored from a
//! checkpoint.

use std::collections::BTreeMap;

use tch::{Kind, Tensor};

use crate::algorithms::rl::error::CheckpointError;
use crate::algorithms::rl::network::ActorCritic;

/// Learning rate and weight decay applied to variables with a name prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamGroup {
    pub name: String,
    /// Variables whose name starts with this prefix belong to the group.
    pub prefix: String,
    pub lr: f64,
    pub weight_decay: f64,
}

/// Adam with L2 weight decay and bias correction.
#[derive(Debug)]
pub struct Adam {
    groups: Vec<ParamGroup>,
    beta1: f64,
    beta2: f64,
    eps: f64,
    step: i64,
    exp_avg: BTreeMap<String, Tensor>,
    exp_avg_sq: BTreeMap<String, Tensor>,
}

const STEP_KEY: &str = "step";
const EXP_AVG: &str = "exp_avg.";
const EXP_AVG_SQ: &str = "exp_avg_sq.";
const LR: &str = "lr.";
const WEIGHT_DECAY: &str = "weight_decay.";

impl Adam {
    /// Creates an optimizer over the trainable variables of `policy`.
    pub fn new(policy: &ActorCritic, groups: Vec<ParamGroup>) -> Self {
        let mut exp_avg = BTreeMap::new();
        let mut exp_avg_sq = BTreeMap::new();
        for (name, var) in policy.trainable_parameters() {
            exp_avg.insert(name.clone(), var.zeros_like().detach());
            exp_avg_sq.insert(name, var.zeros_like().detach());
        }
        Self {
            groups,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            exp_avg,
            exp_avg_sq,
        }
    }

    /// One group over every variable.
    pub fn single(policy: &ActorCritic, lr: f64) -> Self {
        Self::new(
            policy,
            vec![ParamGroup {
                name: "all".into(),
                prefix: String::new(),
                lr,
                weight_decay: 0.0,
            }],
        )
    }

    /// Separate actor and critic groups with a shared weight decay.
    pub fn actor_critic(policy: &ActorCritic, lr_actor: f64, lr_critic: f64, weight_decay: f64) -> Self {
        Self::new(
            policy,
            vec![
                ParamGroup {
                    name: "actor".into(),
                    prefix: "actor.".into(),
                    lr: lr_actor,
                    weight_decay,
                },
                ParamGroup {
                    name: "critic".into(),
                    prefix: "critic.".into(),
                    lr: lr_critic,
                    weight_decay,
                },
            ],
        )
    }

    pub fn groups(&self) -> &[ParamGroup] {
        &self.groups
    }

    /// Number of optimization steps taken.
    pub fn step_count(&self) -> i64 {
        self.step
    }

    fn group_of(&self, name: &str) -> Option<&ParamGroup> {
        self.groups.iter().find(|g| name.starts_with(&g.prefix))
    }

    /// Clears the gradients of the trainable variables of `policy`.
    pub fn zero_grad(&self, policy: &ActorCritic) {
        for (_, mut var) in policy.trainable_parameters() {
            var.zero_grad();
        }
    }

    /// Global L2 norm of the current gradients.
    pub fn grad_norm(&self, policy: &ActorCritic) -> f64 {
        let mut total = 0.0;
        for (_, var) in policy.trainable_parameters() {
            let grad = var.grad();
            if grad.defined() {
                let n = grad.norm().double_value(&[]);
                total += n * n;
            }
        }
        total.sqrt()
    }

    /// Applies one Adam step from the current gradients.
    pub fn step(&mut self, policy: &ActorCritic) {
        self.step_clipped(policy, 0.0)
    }

    /// Like [`Adam::step`], with gradients scaled down so that their global
    /// norm is at most `max_grad_norm` (no clipping when it is not positive).
    pub fn step_clipped(&mut self, policy: &ActorCritic, max_grad_norm: f64) {
        let scale = if max_grad_norm > 0.0 {
            let norm = self.grad_norm(policy);
            if norm > max_grad_norm {
                max_grad_norm / (norm + 1e-6)
            } else {
                1.0
            }
        } else {
            1.0
        };

        self.step += 1;
        let bias1 = 1.0 - self.beta1.powi(self.step as i32);
        let bias2 = 1.0 - self.beta2.powi(self.step as i32);
        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.eps);

        tch::no_grad(|| {
            for (name, mut var) in policy.trainable_parameters() {
                let grad = var.grad();
                if !grad.defined() {
                    continue;
                }
                let Some(group) = self.group_of(&name).cloned() else {
                    continue;
                };
                let mut g = grad * scale;
                if group.weight_decay > 0.0 {
                    g = g + &var * group.weight_decay;
                }
                let (Some(m), Some(v)) = (self.exp_avg.get(&name), self.exp_avg_sq.get(&name)) else {
                    continue;
                };
                let new_m = m * beta1 + &g * (1.0 - beta1);
                let new_v = v * beta2 + (&g * &g) * (1.0 - beta2);
                let denom = (&new_v / bias2).sqrt() + eps;
                let update = (&new_m / bias1) / denom * group.lr;
                let new_var = &var - update;
                var.copy_(&new_var);
                if let Some(m) = self.exp_avg.get_mut(&name) {
                    m.copy_(&new_m);
                }
                if let Some(v) = self.exp_avg_sq.get_mut(&name) {
                    v.copy_(&new_v);
                }
            }
        });
    }

    /// Optimizer state as named tensors.
    ///
    /// Keys: `step`, `lr.<group>`, `weight_decay.<group>`,
    /// `exp_avg.<variable>` and `exp_avg_sq.<variable>`.
    pub fn named_state(&self) -> BTreeMap<String, Tensor> {
        let mut state = BTreeMap::new();
        state.insert(STEP_KEY.to_string(), Tensor::from_slice(&[self.step]));
        for group in &self.groups {
            state.insert(format!("{LR}{}", group.name), Tensor::from_slice(&[group.lr]));
            state.insert(
                format!("{WEIGHT_DECAY}{}", group.name),
                Tensor::from_slice(&[group.weight_decay]),
            );
        }
        for (name, m) in &self.exp_avg {
            state.insert(format!("{EXP_AVG}{name}"), m.shallow_clone());
        }
        for (name, v) in &self.exp_avg_sq {
            state.insert(format!("{EXP_AVG_SQ}{name}"), v.shallow_clone());
        }
        state
    }

    /// Checks that `state` has exactly the keys and shapes of this optimizer.
    pub fn check_state(&self, state: &BTreeMap<String, Tensor>) -> Result<(), CheckpointError> {
        let own = self.named_state();
        for (key, tensor) in &own {
            let value = state
                .get(key)
                .ok_or_else(|| CheckpointError::MissingEntry(key.clone()))?;
            if value.size() != tensor.size() {
                return Err(CheckpointError::ShapeMismatch {
                    name: key.clone(),
                    expected: tensor.size(),
                    found: value.size(),
                });
            }
        }
        if let Some(key) = state.keys().find(|k| !own.contains_key(*k)) {
            return Err(CheckpointError::UnexpectedEntry(key.clone()));
        }
        Ok(())
    }

    /// Restores a state produced by [`Adam::named_state`].
    ///
    /// Nothing is written unless [`Adam::check_state`] succeeds.
    pub fn load_state(&mut self, state: &BTreeMap<String, Tensor>) -> Result<(), CheckpointError> {
        self.check_state(state)?;
        for (key, value) in state {
            if key == STEP_KEY {
                self.step = value.int64_value(&[0]);
            } else if let Some(group) = key.strip_prefix(LR) {
                if let Some(g) = self.groups.iter_mut().find(|g| g.name == group) {
                    g.lr = value.double_value(&[0]);
                }
            } else if let Some(group) = key.strip_prefix(WEIGHT_DECAY) {
                if let Some(g) = self.groups.iter_mut().find(|g| g.name == group) {
                    g.weight_decay = value.double_value(&[0]);
                }
            } else if let Some(name) = key.strip_prefix(EXP_AVG_SQ) {
                if let Some(v) = self.exp_avg_sq.get_mut(name) {
                    v.copy_(&value.to_kind(v.kind()));
                }
            } else if let Some(name) = key.strip_prefix(EXP_AVG) {
                if let Some(m) = self.exp_avg.get_mut(name) {
                    m.copy_(&value.to_kind(m.kind()));
                }
            }
        }
        Ok(())
    }

    /// True if both optimizers hold identical state.
    pub fn state_equal(&self, other: &Adam) -> bool {
        let mine = self.named_state();
        let theirs = other.named_state();
        mine.len() == theirs.len()
            && mine.iter().all(|(key, t)| {
                theirs
                    .get(key)
                    .is_some_and(|o| t.to_kind(Kind::Double).equal(&o.to_kind(Kind::Double)))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::rl::network::ActorCriticConfig;
    use tch::Device;

    fn policy() -> ActorCritic {
        ActorCritic::new(
            ActorCriticConfig {
                p_net_feature_dim: 5,
                v_net_feature_dim: 3,
                embedding_dim: 4,
                dropout_prob: 0.0,
                batch_norm: false,
            },
            Device::Cpu,
        )
    }

    fn squared_sum_loss(policy: &ActorCritic) -> Tensor {
        let terms: Vec<Tensor> = policy
            .trainable_parameters()
            .values()
            .map(|t| t.pow_tensor_scalar(2).sum(Kind::Float))
            .collect();
        Tensor::stack(&terms, 0).sum(Kind::Float)
    }

    #[test]
    fn test_step_moves_parameters_against_gradient() {
        let policy = policy();
        let mut opt = Adam::single(&policy, 1e-3);
        let before = policy.snapshot();

        opt.zero_grad(&policy);
        squared_sum_loss(&policy).backward();
        opt.step(&policy);

        assert_eq!(opt.step_count(), 1);
        let after = policy.named_parameters();
        let name = "actor.score.weight";
        let w0 = before[name].double_value(&[0, 0]);
        let w1 = after[name].double_value(&[0, 0]);
        // the first bias-corrected step has magnitude lr
        assert!((w1 - (w0 - 1e-3 * w0.signum())).abs() < 1e-6);
    }

    #[test]
    fn test_groups_follow_prefixes() {
        let policy = policy();
        let opt = Adam::actor_critic(&policy, 1e-3, 2e-3, 1e-5);
        assert_eq!(opt.group_of("actor.fuse.weight").map(|g| g.lr), Some(1e-3));
        assert_eq!(opt.group_of("critic.value.bias").map(|g| g.lr), Some(2e-3));
        let state = opt.named_state();
        assert!(state.contains_key("lr.actor"));
        assert!(state.contains_key("weight_decay.critic"));
    }

    #[test]
    fn test_state_roundtrip() {
        let policy = policy();
        let mut opt = Adam::single(&policy, 0.01);
        opt.zero_grad(&policy);
        squared_sum_loss(&policy).backward();
        opt.step(&policy);

        let mut fresh = Adam::single(&policy, 0.5);
        assert!(!fresh.state_equal(&opt));
        fresh.load_state(&opt.named_state()).unwrap();
        assert!(fresh.state_equal(&opt));
        assert_eq!(fresh.step_count(), 1);
        assert_eq!(fresh.groups()[0].lr, 0.01);
    }

    #[test]
    fn test_load_state_rejects_other_layout() {
        let policy = policy();
        let grouped = Adam::actor_critic(&policy, 1e-3, 1e-3, 0.0);
        let mut single = Adam::single(&policy, 1e-3);
        let err = single.load_state(&grouped.named_state()).unwrap_err();
        assert!(matches!(err, CheckpointError::MissingEntry(_)));
    }

    #[test]
    fn test_clipping_scales_large_gradients() {
        let policy = policy();
        let mut opt = Adam::single(&policy, 0.01);
        opt.zero_grad(&policy);
        (squared_sum_loss(&policy) * 1000.0).backward();
        assert!(opt.grad_norm(&policy) > 1e-3);
        opt.step_clipped(&policy, 1e-3);
        assert_eq!(opt.step_count(), 1);

        opt.zero_grad(&policy);
        assert_eq!(opt.grad_norm(&policy), 0.0);
    }
}
