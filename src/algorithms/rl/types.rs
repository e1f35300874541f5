//! Core types shared by the embedding environment and the learning code.

use serde::{Deserialize, Serialize};

use crate::TaskId;

/// Index of a physical node chosen for the current virtual node.
pub type Action = usize;

/// Observation of one embedding decision step.
///
/// Holds the substrate graph (node features and edge index), the virtual
/// request features, the index of the virtual node being placed, the action
/// mask over physical nodes and the task identity of the episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Per physical node feature rows, all of equal width.
    pub p_net_x: Vec<Vec<f32>>,
    /// Directed substrate edges `[source, target]` (both directions listed).
    pub p_net_edge_index: Vec<[i64; 2]>,
    /// Per virtual node feature rows, all of equal width.
    pub v_net_x: Vec<Vec<f32>>,
    /// Virtual node being placed at this step.
    pub curr_v_node_id: i64,
    /// 1.0 for physical nodes that can host the current virtual node, else 0.0.
    pub action_mask: Vec<f32>,
    /// Number of virtual nodes; the task identity of this observation.
    pub v_net_size: TaskId,
}

impl Observation {
    pub fn num_p_nodes(&self) -> usize {
        self.p_net_x.len()
    }

    pub fn num_v_nodes(&self) -> usize {
        self.v_net_x.len()
    }

    pub fn task_id(&self) -> TaskId {
        self.v_net_size
    }

    /// Returns true if at least one physical node is selectable.
    pub fn has_valid_action(&self) -> bool {
        self.action_mask.iter().any(|m| *m > 0.5)
    }

    /// Indices of selectable physical nodes.
    pub fn valid_actions(&self) -> Vec<Action> {
        self.action_mask
            .iter()
            .enumerate()
            .filter(|(_, m)| **m > 0.5)
            .map(|(i, _)| i)
            .collect()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// A small observation with `n_p` physical and `n_v` virtual nodes.
    pub fn observation(n_p: usize, n_v: usize, curr: i64) -> Observation {
        let p_net_x = (0..n_p)
            .map(|i| vec![0.1 * i as f32, 1.0, 0.5, 0.0, 0.0])
            .collect();
        let mut p_net_edge_index = Vec::new();
        for i in 1..n_p as i64 {
            p_net_edge_index.push([i - 1, i]);
            p_net_edge_index.push([i, i - 1]);
        }
        let v_net_x = (0..n_v).map(|i| vec![0.2 * i as f32, 0.3, 0.0]).collect();
        let action_mask = (0..n_p).map(|i| if i % 2 == 0 { 1.0 } else { 0.0 }).collect();
        Observation {
            p_net_x,
            p_net_edge_index,
            v_net_x,
            curr_v_node_id: curr,
            action_mask,
            v_net_size: n_v,
        }
    }
}
