//! Reinforcement-learning based embedding.
//!
//! The environment, observation encoding, rewards, rollout buffer and
//! configuration are always available. Tensor batching, the actor-critic
//! network, the PPO update, checkpoints and the [`MultiPolicySolver`]
//! require the `rl-nn` feature flag (which brings in `tch`).

pub mod config;
pub mod environment;
pub mod error;
pub mod metrics;
pub mod observation;
pub mod reward;
pub mod training;
pub mod types;

#[cfg(feature = "rl-nn")]
pub mod batch;
#[cfg(feature = "rl-nn")]
pub mod checkpoint;
#[cfg(feature = "rl-nn")]
pub mod network;
#[cfg(feature = "rl-nn")]
pub mod policy_set;
#[cfg(feature = "rl-nn")]
pub mod solver;

pub use config::{DeviceConfig, PpoConfig, SolverConfig};
pub use environment::{EmbeddingEnv, InstanceEnv, Solution, StepResult};
pub use error::{BatchError, CheckpointError, ConfigError, EnvError, SolverError, UpdateError};
pub use metrics::EvaluationMetrics;
pub use observation::ObservationBuilder;
pub use reward::{RewardComputer, RewardConfig};
pub use training::{discounted_returns, RolloutBuffer};
pub use types::{Action, Observation};

#[cfg(feature = "rl-nn")]
pub use batch::{to_tensor_batch, GraphBatch, GraphData, ObsInput, TensorBatch};
#[cfg(feature = "rl-nn")]
pub use checkpoint::LoadReport;
#[cfg(feature = "rl-nn")]
pub use network::{ActorCritic, ActorCriticConfig};
#[cfg(feature = "rl-nn")]
pub use policy_set::{make_policy, PolicyOptimizer};
#[cfg(feature = "rl-nn")]
pub use solver::{MultiPolicySolver, Route};
#[cfg(feature = "rl-nn")]
pub use training::{Adam, PolicyGradient, Ppo, UpdateStats, UpdateTarget};
