//! Embedding instances.

use super::graph::{PhysicalNetwork, VirtualNetwork};
use crate::TaskId;

/// One embedding problem: a virtual request and the substrate state it
/// must be placed onto.
///
/// Instances are transient and live for one embedding episode.
#[derive(Debug, Clone)]
pub struct Instance {
    pub v_net: VirtualNetwork,
    pub p_net: PhysicalNetwork,
}

impl Instance {
    pub fn new(v_net: VirtualNetwork, p_net: PhysicalNetwork) -> Self {
        Self { v_net, p_net }
    }

    /// Task identity of this instance: the number of virtual nodes.
    pub fn task_id(&self) -> TaskId {
        self.v_net.num_nodes()
    }
}
