//! Rollout buffer for storing episode transitions.

use std::collections::BTreeMap;

use super::returns::discounted_returns;
use crate::algorithms::rl::types::Observation;
use crate::TaskId;

/// Rollout buffer that stores transitions for policy-gradient updates.
///
/// Parallel sequences indexed by step. Every mutation keeps them at equal
/// length; fields are read-only from outside the module.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RolloutBuffer {
    observations: Vec<Observation>,
    actions: Vec<i64>,
    logprobs: Vec<f64>,
    rewards: Vec<f64>,
    returns: Vec<f64>,
    dones: Vec<bool>,
    /// First step of the episode still being collected.
    episode_start: usize,
}

impl RolloutBuffer {
    /// Creates a new empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one step. Its return is filled by [`RolloutBuffer::finish_episode`].
    pub fn push(&mut self, observation: Observation, action: i64, logprob: f64, reward: f64, done: bool) {
        self.observations.push(observation);
        self.actions.push(action);
        self.logprobs.push(logprob);
        self.rewards.push(reward);
        self.returns.push(0.0);
        self.dones.push(done);
    }

    /// Computes the discounted returns of the steps pushed since the last call.
    pub fn finish_episode(&mut self, gamma: f64) {
        let start = self.episode_start;
        let returns = discounted_returns(&self.rewards[start..], &self.dones[start..], gamma);
        self.returns[start..].copy_from_slice(&returns);
        self.episode_start = self.len();
    }

    /// Drops every step from `len` on, including an unfinished episode.
    ///
    /// Used to discard the steps of an aborted episode so that they never
    /// receive returns computed from a later episode.
    pub fn truncate(&mut self, len: usize) {
        self.observations.truncate(len);
        self.actions.truncate(len);
        self.logprobs.truncate(len);
        self.rewards.truncate(len);
        self.returns.truncate(len);
        self.dones.truncate(len);
        self.episode_start = self.episode_start.min(self.len());
    }

    /// Clears all stored data.
    pub fn clear(&mut self) {
        self.observations.clear();
        self.actions.clear();
        self.logprobs.clear();
        self.rewards.clear();
        self.returns.clear();
        self.dones.clear();
        self.episode_start = 0;
    }

    /// Returns the number of stored transitions.
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    /// Returns true if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn actions(&self) -> &[i64] {
        &self.actions
    }

    pub fn logprobs(&self) -> &[f64] {
        &self.logprobs
    }

    pub fn rewards(&self) -> &[f64] {
        &self.rewards
    }

    pub fn returns(&self) -> &[f64] {
        &self.returns
    }

    pub fn dones(&self) -> &[bool] {
        &self.dones
    }

    /// Number of steps per task identity.
    pub fn task_distribution(&self) -> BTreeMap<TaskId, usize> {
        let mut dist = BTreeMap::new();
        for obs in &self.observations {
            *dist.entry(obs.task_id()).or_insert(0) += 1;
        }
        dist
    }

    /// Step indices per task identity, each list in ascending order.
    pub fn task_indices(&self) -> BTreeMap<TaskId, Vec<usize>> {
        let mut indices: BTreeMap<TaskId, Vec<usize>> = BTreeMap::new();
        for (i, obs) in self.observations.iter().enumerate() {
            indices.entry(obs.task_id()).or_default().push(i);
        }
        indices
    }

    /// New buffer holding the steps at `indices`, in the given order.
    ///
    /// Out-of-range indices are skipped.
    pub fn select(&self, indices: &[usize]) -> RolloutBuffer {
        let mut out = RolloutBuffer::new();
        for &i in indices.iter().filter(|i| **i < self.len()) {
            out.observations.push(self.observations[i].clone());
            out.actions.push(self.actions[i]);
            out.logprobs.push(self.logprobs[i]);
            out.rewards.push(self.rewards[i]);
            out.returns.push(self.returns[i]);
            out.dones.push(self.dones[i]);
        }
        out.episode_start = out.len();
        out
    }

    /// Partitions the buffer into one sub-buffer per task identity.
    ///
    /// Sub-buffers keep the original relative order of their steps and the
    /// map iterates in ascending task identity.
    pub fn split_by_task(&self) -> BTreeMap<TaskId, RolloutBuffer> {
        self.task_indices()
            .into_iter()
            .map(|(task_id, indices)| (task_id, self.select(&indices)))
            .collect()
    }
}
