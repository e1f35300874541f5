use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TopologyError {
    #[error("Invalid node index {index} (network has {num_nodes} nodes)")]
    InvalidNode { index: usize, num_nodes: usize },

    #[error("Expected {expected} resource attributes, got {found}")]
    AttributeMismatch { expected: usize, found: usize },

    #[error("Self-loop on node {0} is not allowed")]
    SelfLoop(usize),

    #[error("Link ({0}, {1}) already exists")]
    DuplicateLink(usize, usize),

    #[error("No link between nodes {0} and {1}")]
    MissingLink(usize, usize),

    #[error("Insufficient resources: demand {demand:?} exceeds available {available:?}")]
    InsufficientResources { demand: Vec<f64>, available: Vec<f64> },

    #[error("Invalid generator parameter: {0}")]
    InvalidParameter(String),
}
