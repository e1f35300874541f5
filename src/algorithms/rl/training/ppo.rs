//! Clipped PPO update over a rollout buffer.

use log::debug;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tch::{Device, Kind, Reduction, Tensor};

use super::buffer::RolloutBuffer;
use super::optim::Adam;
use crate::algorithms::rl::batch::to_tensor_batch;
use crate::algorithms::rl::config::PpoConfig;
use crate::algorithms::rl::error::UpdateError;
use crate::algorithms::rl::network::ActorCritic;
use crate::algorithms::rl::types::Observation;
use crate::TaskId;

/// The policy, optimizer and experience of one task update.
pub struct UpdateTarget<'a> {
    pub task_id: TaskId,
    pub policy: &'a mut ActorCritic,
    pub optimizer: &'a mut Adam,
    pub buffer: &'a RolloutBuffer,
}

/// Mean losses of one update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateStats {
    pub task_id: TaskId,
    pub n_steps: usize,
    pub policy_loss: f64,
    pub value_loss: f64,
    pub entropy: f64,
}

/// Policy-gradient update applied to one task policy in place.
pub trait PolicyGradient {
    fn update(&mut self, target: UpdateTarget<'_>) -> Result<UpdateStats, UpdateError>;
}

/// Proximal policy optimization with a clipped surrogate objective.
///
/// Advantages are `returns - values`. Fails with
/// [`UpdateError::NonFiniteLoss`] before the optimizer step if a mini-batch
/// loss is NaN or infinite.
#[derive(Debug)]
pub struct Ppo {
    config: PpoConfig,
    device: Device,
    rng: StdRng,
}

impl Ppo {
    pub fn new(config: PpoConfig, device: Device, seed: u64) -> Self {
        Self {
            config,
            device,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }
}

impl PolicyGradient for Ppo {
    fn update(&mut self, target: UpdateTarget<'_>) -> Result<UpdateStats, UpdateError> {
        let UpdateTarget {
            task_id,
            policy,
            optimizer,
            buffer,
        } = target;
        let n = buffer.len();
        let mut stats = UpdateStats {
            task_id,
            n_steps: n,
            ..UpdateStats::default()
        };
        if n == 0 {
            return Ok(stats);
        }

        let batch_size = self.config.batch_size.max(1);
        let mut indices: Vec<usize> = (0..n).collect();
        let mut n_minibatches = 0usize;

        for _ in 0..self.config.n_epochs {
            indices.shuffle(&mut self.rng);
            for chunk in indices.chunks(batch_size) {
                let observations: Vec<Observation> =
                    chunk.iter().map(|&i| buffer.observations()[i].clone()).collect();
                let actions: Vec<i64> = chunk.iter().map(|&i| buffer.actions()[i]).collect();
                let old_logp: Vec<f32> = chunk.iter().map(|&i| buffer.logprobs()[i] as f32).collect();
                let returns: Vec<f32> = chunk.iter().map(|&i| buffer.returns()[i] as f32).collect();

                let batch = to_tensor_batch(&observations, self.device)?;
                let actions = Tensor::from_slice(&actions).to_device(self.device);
                let old_logp = Tensor::from_slice(&old_logp).to_device(self.device);
                let returns = Tensor::from_slice(&returns).to_device(self.device);

                let (logp, entropy, values) = policy.evaluate_actions(&batch, &actions, true);
                let mut advantages = &returns - values.detach();
                if self.config.norm_advantage && chunk.len() > 1 {
                    advantages = (&advantages - advantages.mean(Kind::Float))
                        / (advantages.std(true) + 1e-8);
                }

                let ratio = (&logp - &old_logp).exp();
                let surr1 = &ratio * &advantages;
                let surr2 = ratio.clamp(1.0 - self.config.clip_eps, 1.0 + self.config.clip_eps) * &advantages;
                let policy_loss = -surr1.minimum(&surr2).mean(Kind::Float);
                let value_loss = values.mse_loss(&returns, Reduction::Mean);
                let entropy = entropy.mean(Kind::Float);
                let loss = &policy_loss + &value_loss * self.config.value_coef
                    - &entropy * self.config.entropy_coef;

                let loss_value = loss.double_value(&[]);
                if !loss_value.is_finite() {
                    return Err(UpdateError::NonFiniteLoss {
                        task_id,
                        loss: loss_value,
                    });
                }

                optimizer.zero_grad(policy);
                loss.backward();
                optimizer.step_clipped(policy, self.config.max_grad_norm);

                stats.policy_loss += policy_loss.double_value(&[]);
                stats.value_loss += value_loss.double_value(&[]);
                stats.entropy += entropy.double_value(&[]);
                n_minibatches += 1;
            }
        }

        if n_minibatches > 0 {
            let k = n_minibatches as f64;
            stats.policy_loss /= k;
            stats.value_loss /= k;
            stats.entropy /= k;
        }
        debug!(
            "task {} updated on {} steps: policy_loss={:.4} value_loss={:.4} entropy={:.4}",
            task_id, n, stats.policy_loss, stats.value_loss, stats.entropy
        );
        Ok(stats)
    }
}
