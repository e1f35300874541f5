//! vnembed - multi-task actor-critic controller for virtual network embedding
//!
//! Learns to place virtual network requests onto a physical substrate. A
//! shared meta-policy is specialized into one task policy per request size;
//! experience is collected per episode, partitioned by task and used to
//! fine-tune each task policy independently.

pub mod algorithms;
pub mod topology;

/// Identifier type used for virtual network requests.
pub type Id = String;

/// Task identity of an embedding instance: the number of virtual nodes.
pub type TaskId = usize;

/// Generates a new unique identifier (UUID v4).
pub fn generate_id() -> Id {
    uuid::Uuid::new_v4().to_string()
}
