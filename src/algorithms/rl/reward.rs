//! Reward function of the embedding environment.
//!
//! Combines a small per-placement reward, a terminal reward on acceptance
//! scaled by the revenue-to-cost ratio and a terminal penalty on rejection.

use serde::{Deserialize, Serialize};

/// Reward shaping coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Reward for each successful intermediate placement.
    pub step_reward: f64,
    /// Terminal reward on acceptance, multiplied by the r2c ratio.
    pub success_reward: f64,
    /// Terminal penalty on rejection (subtracted).
    pub failure_penalty: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            step_reward: 0.01,
            success_reward: 1.0,
            failure_penalty: 0.1,
        }
    }
}

/// Computes rewards for the embedding environment.
#[derive(Debug, Clone, Default)]
pub struct RewardComputer {
    config: RewardConfig,
}

impl RewardComputer {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RewardConfig {
        &self.config
    }

    /// Reward of a placement that leaves the episode running.
    pub fn step(&self) -> f64 {
        self.config.step_reward
    }

    /// Reward of the step that completes the embedding.
    ///
    /// `r2c` is the revenue-to-cost ratio of the accepted embedding, in `(0, 1]`.
    pub fn success(&self, r2c: f64) -> f64 {
        self.config.step_reward + self.config.success_reward * r2c
    }

    /// Reward of the step that makes the request fail.
    pub fn failure(&self) -> f64 {
        -self.config.failure_penalty
    }
}
