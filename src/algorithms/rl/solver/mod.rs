use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use tch::Device;

use super::batch::to_tensor_batch;
use super::checkpoint::{self, LoadReport};
use super::config::SolverConfig;
use super::environment::{EmbeddingEnv, InstanceEnv, Solution};
use super::error::{CheckpointError, SolverError};
use super::metrics::EvaluationMetrics;
use super::network::ActorCritic;
use super::policy_set::{make_policy, PolicyOptimizer};
use super::reward::RewardComputer;
use super::training::{PolicyGradient, Ppo, RolloutBuffer, UpdateStats, UpdateTarget};
use crate::algorithms::EmbeddingAlgorithm;
use crate::topology::Instance;
use crate::TaskId;

#[cfg(test)]
mod tests;

/// Policy chosen for an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Meta,
    Task(TaskId),
}

/// Multi-task actor-critic solver.
///
/// Holds a meta-policy and one task policy per virtual network size. Task
/// policies are forked lazily from the meta-policy the first time a task is
/// learned and are fine-tuned only on experience of their own task. Inference
/// uses the task policy when it exists and the meta-policy otherwise, unless
/// a single task policy is forced through the configuration.
///
/// # Lifecycle
///
/// 1. [`MultiPolicySolver::new`] builds the meta-policy from the configuration.
/// 2. [`MultiPolicySolver::learn_with_instance`] collects one episode with
///    the task policy and updates once `target_steps` steps are buffered.
/// 3. [`MultiPolicySolver::solve`] embeds an instance greedily.
/// 4. [`MultiPolicySolver::save_model`] / [`MultiPolicySolver::load_model`]
///    persist all policies in one archive.
pub struct MultiPolicySolver<E = InstanceEnv, U = Ppo> {
    config: SolverConfig,
    device: Device,
    meta: PolicyOptimizer,
    tasks: BTreeMap<TaskId, PolicyOptimizer>,
    buffer: RolloutBuffer,
    env: E,
    updater: U,
    episodes: usize,
}

impl MultiPolicySolver {
    /// Creates a solver with the default environment and PPO updater.
    pub fn new(config: SolverConfig) -> Result<Self, SolverError> {
        let env = InstanceEnv::new(RewardComputer::new(config.reward.clone()));
        let updater = Ppo::new(config.ppo.clone(), config.device.into(), config.seed);
        Self::with_parts(config, env, updater)
    }
}

/// Plays one episode of `policy` on `instance`, pushing transitions into
/// `buffer` when given.
fn play_episode<E: EmbeddingEnv>(
    env: &mut E,
    policy: &ActorCritic,
    device: Device,
    instance: &Instance,
    greedy: bool,
    mut buffer: Option<&mut RolloutBuffer>,
) -> Result<Solution, SolverError> {
    let mut obs = env.reset(instance)?;
    if instance.task_id() > 0 {
        loop {
            let batch = to_tensor_batch(&obs, device)?;
            let out = policy.act(&batch, greedy);
            let action = out.actions.int64_value(&[0]);
            let logprob = out.log_probs.double_value(&[0]);
            let step = env.step(action as usize)?;
            let done = step.done;
            if let Some(buffer) = buffer.as_deref_mut() {
                buffer.push(obs, action, logprob, step.reward, done);
            }
            if done {
                break;
            }
            obs = step.observation;
        }
    }
    Ok(env.solution()?.clone())
}

/// Runs one episode and finishes its returns in `buffer`.
///
/// On error the buffer is rolled back to its length before the episode.
fn run_episode<E: EmbeddingEnv>(
    env: &mut E,
    policy: &ActorCritic,
    device: Device,
    instance: &Instance,
    greedy: bool,
    buffer: Option<&mut RolloutBuffer>,
    gamma: f64,
) -> Result<Solution, SolverError> {
    let Some(buffer) = buffer else {
        return play_episode(env, policy, device, instance, greedy, None);
    };
    let start = buffer.len();
    match play_episode(env, policy, device, instance, greedy, Some(&mut *buffer)) {
        Ok(solution) => {
            buffer.finish_episode(gamma);
            Ok(solution)
        }
        Err(e) => {
            warn!("Episode aborted, dropping {} steps: {}", buffer.len() - start, e);
            buffer.truncate(start);
            Err(e)
        }
    }
}

impl<E: EmbeddingEnv, U: PolicyGradient> MultiPolicySolver<E, U> {
    /// Creates a solver from explicit environment and updater implementations.
    pub fn with_parts(config: SolverConfig, env: E, updater: U) -> Result<Self, SolverError> {
        config.validate()?;
        tch::manual_seed(config.seed as i64);
        let device = config.device.into();
        let meta = make_policy(&config);
        if let Some(task_id) = config.infer_with_single_task_policy_id {
            info!("Infer with single task policy id: {}", task_id);
        }
        Ok(Self {
            config,
            device,
            meta,
            tasks: BTreeMap::new(),
            buffer: RolloutBuffer::new(),
            env,
            updater,
            episodes: 0,
        })
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn meta(&self) -> &PolicyOptimizer {
        &self.meta
    }

    pub fn task_policy(&self, task_id: TaskId) -> Option<&PolicyOptimizer> {
        self.tasks.get(&task_id)
    }

    /// Task identities with a task policy, ascending.
    pub fn task_ids(&self) -> Vec<TaskId> {
        self.tasks.keys().copied().collect()
    }

    pub fn buffer(&self) -> &RolloutBuffer {
        &self.buffer
    }

    /// Number of training episodes run so far.
    pub fn episodes(&self) -> usize {
        self.episodes
    }

    /// Selects the inference policy for a task.
    ///
    /// A forced single task policy wins and must exist; otherwise the task
    /// policy is used when present and the meta-policy when not. Never
    /// creates a policy.
    pub fn route(&self, task_id: TaskId) -> Result<Route, SolverError> {
        if let Some(forced) = self.config.infer_with_single_task_policy_id {
            return if self.tasks.contains_key(&forced) {
                Ok(Route::Task(forced))
            } else {
                Err(SolverError::UnknownTaskPolicy(forced))
            };
        }
        if self.tasks.contains_key(&task_id) {
            Ok(Route::Task(task_id))
        } else {
            Ok(Route::Meta)
        }
    }

    /// The policy-optimizer pair [`MultiPolicySolver::route`] selects for `instance`.
    pub fn select_policy(&self, instance: &Instance) -> Result<&PolicyOptimizer, SolverError> {
        match self.route(instance.task_id())? {
            Route::Meta => Ok(&self.meta),
            Route::Task(task_id) => self
                .tasks
                .get(&task_id)
                .ok_or(SolverError::UnknownTaskPolicy(task_id)),
        }
    }

    /// Creates the task policy for `task_id` from the meta-policy if missing.
    ///
    /// Returns true if a policy was created.
    pub fn ensure_task_policy(&mut self, task_id: TaskId) -> Result<bool, SolverError> {
        if self.tasks.contains_key(&task_id) {
            return Ok(false);
        }
        let pair = self.meta.fork(self.config.lr)?;
        self.tasks.insert(task_id, pair);
        info!("New task policy is created for task {}", task_id);
        Ok(true)
    }

    /// Embeds `instance` greedily with the routed policy.
    pub fn solve(&mut self, instance: &Instance) -> Result<Solution, SolverError> {
        let route = self.route(instance.task_id())?;
        let policy = match route {
            Route::Meta => &self.meta.policy,
            Route::Task(task_id) => {
                &self
                    .tasks
                    .get(&task_id)
                    .ok_or(SolverError::UnknownTaskPolicy(task_id))?
                    .policy
            }
        };
        run_episode(&mut self.env, policy, self.device, instance, true, None, self.config.gamma)
    }

    /// Runs one training episode with the task policy of `instance`.
    ///
    /// The task policy is created on first use. Transitions are appended to
    /// the rollout buffer, and [`MultiPolicySolver::update`] runs once the
    /// buffer holds `target_steps` steps.
    pub fn learn_with_instance(&mut self, instance: &Instance) -> Result<Solution, SolverError> {
        let task_id = instance.task_id();
        self.ensure_task_policy(task_id)?;
        let policy = &self
            .tasks
            .get(&task_id)
            .ok_or(SolverError::UnknownTaskPolicy(task_id))?
            .policy;
        let solution = run_episode(
            &mut self.env,
            policy,
            self.device,
            instance,
            false,
            Some(&mut self.buffer),
            self.config.gamma,
        )?;
        self.episodes += 1;

        if self.buffer.len() >= self.config.target_steps {
            self.update()?;
        }
        Ok(solution)
    }

    /// Fine-tunes every task policy on its share of the rollout buffer.
    ///
    /// Tasks are processed in ascending order. The first failing update is
    /// returned immediately; later tasks are skipped and the buffer is kept.
    /// The buffer is cleared only after every task was updated.
    pub fn update(&mut self) -> Result<Vec<UpdateStats>, SolverError> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        let distribution = self.buffer.task_distribution();
        info!("Task distribution: {:?}", distribution);
        for task_id in distribution.keys() {
            self.ensure_task_policy(*task_id)?;
        }

        let task_buffers = self.buffer.split_by_task();
        let mut all_stats = Vec::with_capacity(task_buffers.len());
        for (task_id, task_buffer) in &task_buffers {
            let pair = self
                .tasks
                .get_mut(task_id)
                .ok_or(SolverError::UnknownTaskPolicy(*task_id))?;
            let stats = self
                .updater
                .update(UpdateTarget {
                    task_id: *task_id,
                    policy: &mut pair.policy,
                    optimizer: &mut pair.optimizer,
                    buffer: task_buffer,
                })
                .map_err(|source| SolverError::Update {
                    task_id: *task_id,
                    source,
                })?;
            debug!("{:?}", stats);
            all_stats.push(stats);
        }
        self.buffer.clear();
        Ok(all_stats)
    }

    /// Runs a training episode per instance, saving a checkpoint every
    /// `save_interval` episodes as `model-<episode>.pt`.
    pub fn learn(&mut self, instances: &[Instance]) -> Result<EvaluationMetrics, SolverError> {
        let mut solutions = Vec::with_capacity(instances.len());
        for instance in instances {
            solutions.push(self.learn_with_instance(instance)?);
            let interval = self.config.save_interval;
            if interval > 0 && self.episodes % interval == 0 {
                self.save_model(format!("model-{}.pt", self.episodes))?;
            }
        }
        Ok(EvaluationMetrics::from_solutions(&solutions))
    }

    /// Solves every instance and aggregates the results.
    pub fn evaluate(&mut self, instances: &[Instance]) -> Result<EvaluationMetrics, SolverError> {
        let solutions = instances
            .iter()
            .map(|instance| self.solve(instance))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EvaluationMetrics::from_solutions(&solutions))
    }

    /// Saves all policies to `filename` inside the model directory.
    pub fn save_model(&self, filename: impl AsRef<Path>) -> Result<PathBuf, SolverError> {
        let path = self.config.model_path(filename);
        checkpoint::save(&path, &self.meta, &self.tasks)?;
        Ok(path)
    }

    /// Restores all policies from the archive at `path`.
    ///
    /// The archive is fully validated first; on error nothing changes.
    pub fn try_load_model(&mut self, path: impl AsRef<Path>) -> Result<LoadReport, CheckpointError> {
        let path = path.as_ref();
        let archive = checkpoint::read(path, self.device)?;
        let created = checkpoint::restore(&archive, &mut self.meta, &mut self.tasks, self.config.lr)?;
        let report = LoadReport {
            path: path.to_path_buf(),
            created,
            restored: archive.tasks.keys().copied().collect(),
        };
        info!("Loaded pretrained model from {}", path.display());
        Ok(report)
    }

    /// Best-effort [`MultiPolicySolver::try_load_model`].
    ///
    /// A failed load is logged and leaves the current parameters in place.
    /// Returns true if the checkpoint was applied.
    pub fn load_model(&mut self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        info!("Attempting to load the pretrained model from {}", path.display());
        match self.try_load_model(path) {
            Ok(_) => true,
            Err(e) => {
                warn!(
                    "Load failed from {} ({}); keeping current parameters",
                    path.display(),
                    e
                );
                false
            }
        }
    }
}

impl<E: EmbeddingEnv, U: PolicyGradient> EmbeddingAlgorithm for MultiPolicySolver<E, U> {
    type Output = Solution;
    type Error = SolverError;

    fn embed(&mut self, instance: &Instance) -> Result<Solution, SolverError> {
        self.solve(instance)
    }

    fn name(&self) -> &str {
        "multi-policy-a3c-gcn"
    }
}
