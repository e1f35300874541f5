//! Error types of the embedding environment and the learning pipeline.

use std::path::PathBuf;

use thiserror::Error;

use crate::topology::TopologyError;
use crate::TaskId;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EnvError {
    #[error("Environment has no active instance; call reset first")]
    NotReset,

    #[error("Episode is already finished")]
    EpisodeDone,

    #[error("Action {action} is out of range (substrate has {num_nodes} nodes)")]
    ActionOutOfRange { action: usize, num_nodes: usize },

    #[error(transparent)]
    Topology(#[from] TopologyError),
}

/// Malformed input to the observation batcher.
///
/// Every variant names the offending observation by its position in the input.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BatchError {
    #[error("Cannot batch an empty list of observations")]
    EmptyBatch,

    #[error("Observation {index}: field `{field}` is empty")]
    EmptyField { field: &'static str, index: usize },

    #[error("Observation {index}: field `{field}` has width {found}, expected {expected}")]
    RaggedField {
        field: &'static str,
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Observation {index}: action mask has length {found}, expected {expected}")]
    MaskLength {
        index: usize,
        expected: usize,
        found: usize,
    },

    #[error("Observation {index}: edge {edge:?} references a node outside 0..{num_nodes}")]
    EdgeOutOfRange {
        index: usize,
        edge: [i64; 2],
        num_nodes: usize,
    },

    #[error("Observation {index}: current virtual node {curr} outside 0..{num_nodes}")]
    CurrentNodeOutOfRange {
        index: usize,
        curr: i64,
        num_nodes: usize,
    },
}

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("Non-finite loss {loss} while updating task policy {task_id}")]
    NonFiniteLoss { task_id: TaskId, loss: f64 },

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[cfg(feature = "rl-nn")]
    #[error(transparent)]
    Torch(#[from] tch::TchError),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint {0} does not exist")]
    NotFound(PathBuf),

    #[error("Checkpoint is missing entry `{0}`")]
    MissingEntry(String),

    #[error("Checkpoint contains unexpected entry `{0}`")]
    UnexpectedEntry(String),

    #[error("Checkpoint entry `{name}` has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<i64>,
        found: Vec<i64>,
    },

    #[error("Checkpoint entry `{0}` has an invalid task identity")]
    InvalidTaskId(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[cfg(feature = "rl-nn")]
    #[error(transparent)]
    Torch(#[from] tch::TchError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Aggregate error of the multi-policy solver.
#[derive(Debug, Error)]
pub enum SolverError {
    #[error("No task policy for task {0}")]
    UnknownTaskPolicy(TaskId),

    #[error("Update of task policy {task_id} failed: {source}")]
    Update {
        task_id: TaskId,
        #[source]
        source: UpdateError,
    },

    #[error(transparent)]
    Env(#[from] EnvError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[cfg(feature = "rl-nn")]
    #[error(transparent)]
    Torch(#[from] tch::TchError),
}
