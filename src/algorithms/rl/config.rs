//! Configuration of the multi-policy solver.
//!
//! All sections deserialize with defaults for missing fields, so a YAML file
//! only needs to list the values it changes.

use std::fs::File;
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use super::error::ConfigError;
use super::observation::ObservationBuilder;
use super::reward::RewardConfig;
use crate::topology::GeneratorConfig;
use crate::TaskId;

/// Device on which policies and observation tensors are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DeviceConfig {
    #[default]
    Cpu,
    Cuda(usize),
}

#[cfg(feature = "rl-nn")]
impl From<DeviceConfig> for tch::Device {
    fn from(device: DeviceConfig) -> Self {
        match device {
            DeviceConfig::Cpu => tch::Device::Cpu,
            DeviceConfig::Cuda(i) => tch::Device::Cuda(i),
        }
    }
}

/// Hyperparameters of the PPO update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PpoConfig {
    /// Number of optimization epochs per update.
    pub n_epochs: usize,
    /// Mini-batch size.
    pub batch_size: usize,
    /// Clip parameter ε of the probability ratio.
    pub clip_eps: f64,
    /// Value loss coefficient.
    pub value_coef: f64,
    /// Entropy bonus coefficient.
    pub entropy_coef: f64,
    /// Maximum global gradient norm (0 disables clipping).
    pub max_grad_norm: f64,
    /// Normalize advantages per mini-batch.
    pub norm_advantage: bool,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            n_epochs: 4,
            batch_size: 128,
            clip_eps: 0.2,
            value_coef: 0.5,
            entropy_coef: 0.01,
            max_grad_norm: 0.5,
            norm_advantage: true,
        }
    }
}

/// Configuration of [`MultiPolicySolver`](super::solver::MultiPolicySolver).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Learning rate of every parameter in a task policy optimizer.
    pub lr: f64,
    /// Learning rate of the `actor` group in the optimizer built by
    /// [`make_policy`](super::policy_set::make_policy). Only the meta pair
    /// carries this grouped optimizer; task optimizers use [`SolverConfig::lr`].
    pub lr_actor: f64,
    /// Learning rate of the `critic` group, see [`SolverConfig::lr_actor`].
    pub lr_critic: f64,
    /// L2 weight decay of both groups of the grouped optimizer.
    pub weight_decay: f64,

    /// Hidden width of the actor-critic encoders.
    pub embedding_dim: usize,
    pub dropout_prob: f64,
    pub batch_norm: bool,

    /// Discount factor for returns.
    pub gamma: f64,
    /// Buffer length that triggers an update during learning.
    pub target_steps: usize,
    /// Save a checkpoint every this many training episodes (0 disables).
    pub save_interval: usize,

    /// Route every inference request to this task policy.
    pub infer_with_single_task_policy_id: Option<TaskId>,

    /// Directory against which checkpoint file names are resolved.
    pub model_dir: PathBuf,
    pub device: DeviceConfig,
    pub seed: u64,

    pub ppo: PpoConfig,
    pub reward: RewardConfig,
    pub generator: GeneratorConfig,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            lr_actor: 1e-3,
            lr_critic: 1e-3,
            weight_decay: 1e-5,
            embedding_dim: 64,
            dropout_prob: 0.0,
            batch_norm: false,
            gamma: 0.99,
            target_steps: 1024,
            save_interval: 100,
            infer_with_single_task_policy_id: None,
            model_dir: PathBuf::from("model"),
            device: DeviceConfig::Cpu,
            seed: 0,
            ppo: PpoConfig::default(),
            reward: RewardConfig::default(),
            generator: GeneratorConfig::default(),
        }
    }
}

impl SolverConfig {
    /// Number of node resource attributes.
    pub fn num_node_attrs(&self) -> usize {
        self.generator.num_node_resource_attrs
    }

    /// Number of link resource attributes.
    pub fn num_link_attrs(&self) -> usize {
        self.generator.num_link_resource_attrs
    }

    /// Width of a physical node feature row.
    pub fn p_net_feature_dim(&self) -> usize {
        ObservationBuilder::p_net_feature_dim(self.num_node_attrs(), self.num_link_attrs())
    }

    /// Width of a virtual node feature row.
    pub fn v_net_feature_dim(&self) -> usize {
        ObservationBuilder::v_net_feature_dim(self.num_node_attrs(), self.num_link_attrs())
    }

    /// Resolves a checkpoint file name against [`SolverConfig::model_dir`].
    pub fn model_path(&self, filename: impl AsRef<Path>) -> PathBuf {
        self.model_dir.join(filename)
    }

    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.embedding_dim = embedding_dim;
        self
    }

    pub fn with_target_steps(mut self, target_steps: usize) -> Self {
        self.target_steps = target_steps;
        self
    }

    pub fn with_single_task_policy(mut self, task_id: Option<TaskId>) -> Self {
        self.infer_with_single_task_policy_id = task_id;
        self
    }

    pub fn with_model_dir(mut self, model_dir: impl Into<PathBuf>) -> Self {
        self.model_dir = model_dir.into();
        self
    }

    /// Checks values that would make training meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.embedding_dim == 0 {
            return Err(ConfigError::Invalid("embedding_dim must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.dropout_prob) {
            return Err(ConfigError::Invalid(format!(
                "dropout_prob must be in [0, 1), got {}",
                self.dropout_prob
            )));
        }
        if !(0.0..=1.0).contains(&self.gamma) {
            return Err(ConfigError::Invalid(format!(
                "gamma must be in [0, 1], got {}",
                self.gamma
            )));
        }
        if self.ppo.batch_size == 0 {
            return Err(ConfigError::Invalid("ppo.batch_size must be positive".into()));
        }
        if self.num_node_attrs() == 0 || self.num_link_attrs() == 0 {
            return Err(ConfigError::Invalid(
                "at least one node and one link resource attribute is required".into(),
            ));
        }
        self.generator
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Loads a configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let rdr = BufReader::new(File::open(path)?);
        let config: Self = serde_yaml::from_reader(rdr)?;
        config.validate()?;
        info!("Load solver config from {}", path.display());
        Ok(config)
    }

    /// Saves the configuration as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        info!("Save solver config into {}", path.display());
        Ok(())
    }
}
