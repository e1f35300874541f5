//! Substrate and virtual network topologies.
//!
//! Physical (substrate) networks carry resource capacities on nodes and links;
//! virtual networks carry resource demands. An [`Instance`] pairs one virtual
//! request with the substrate state it must be embedded into.

pub mod error;
pub mod generator;
pub mod graph;
pub mod instance;

pub use error::TopologyError;
pub use generator::{GeneratorConfig, NetworkGenerator, UniformRange};
pub use graph::{PhysicalNetwork, Resources, VirtualNetwork};
pub use instance::Instance;
