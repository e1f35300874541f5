//! Conversion of observations into batched tensors.
//!
//! Each observation contributes one substrate graph. Graphs are concatenated
//! into a single disjoint graph whose edge indices are shifted by the node
//! offset of their graph; `batch` maps every node to its graph and `ptr`
//! holds the node offsets. The remaining fields are stacked along a new
//! leading batch dimension.

use std::slice;

use tch::{Device, Tensor};

use super::error::BatchError;
use super::types::Observation;

/// Node features and edge list of one graph, checked for consistency.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphData {
    x: Vec<f32>,
    num_nodes: usize,
    num_features: usize,
    edges: Vec<[i64; 2]>,
}

impl GraphData {
    /// Builds graph data from feature rows and an edge list.
    ///
    /// `index` identifies the observation in error reports.
    pub fn from_arrays(x: &[Vec<f32>], edge_index: &[[i64; 2]], index: usize) -> Result<Self, BatchError> {
        let num_features = x.first().map(Vec::len).ok_or(BatchError::EmptyField {
            field: "p_net_x",
            index,
        })?;
        check_rows("p_net_x", x, num_features, index)?;
        let num_nodes = x.len();
        for edge in edge_index {
            if edge.iter().any(|n| *n < 0 || *n as usize >= num_nodes) {
                return Err(BatchError::EdgeOutOfRange {
                    index,
                    edge: *edge,
                    num_nodes,
                });
            }
        }
        Ok(Self {
            x: x.iter().flatten().copied().collect(),
            num_nodes,
            num_features,
            edges: edge_index.to_vec(),
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }
}

/// Several graphs merged into one disjoint graph.
#[derive(Debug)]
pub struct GraphBatch {
    /// Node features `[total_nodes, features]`.
    pub x: Tensor,
    /// Edge index `[2, total_edges]` with per-graph node offsets applied.
    pub edge_index: Tensor,
    /// Graph of each node `[total_nodes]`.
    pub batch: Tensor,
    /// Node offsets `[num_graphs + 1]`.
    pub ptr: Tensor,
    pub num_graphs: usize,
}

impl GraphBatch {
    /// Merges graphs with a common feature width.
    pub fn from_data_list(graphs: &[GraphData], device: Device) -> Result<Self, BatchError> {
        let first = graphs.first().ok_or(BatchError::EmptyBatch)?;
        let num_features = first.num_features;

        let total_nodes: usize = graphs.iter().map(|g| g.num_nodes).sum();
        let mut x = Vec::with_capacity(total_nodes * num_features);
        let mut src = Vec::new();
        let mut dst = Vec::new();
        let mut batch = Vec::with_capacity(total_nodes);
        let mut ptr = Vec::with_capacity(graphs.len() + 1);
        let mut offset = 0i64;
        ptr.push(0i64);

        for (i, g) in graphs.iter().enumerate() {
            if g.num_features != num_features {
                return Err(BatchError::RaggedField {
                    field: "p_net_x",
                    index: i,
                    expected: num_features,
                    found: g.num_features,
                });
            }
            x.extend_from_slice(&g.x);
            for [a, b] in &g.edges {
                src.push(a + offset);
                dst.push(b + offset);
            }
            batch.extend(std::iter::repeat(i as i64).take(g.num_nodes));
            offset += g.num_nodes as i64;
            ptr.push(offset);
        }

        let num_edges = src.len() as i64;
        src.extend(dst);
        Ok(Self {
            x: Tensor::from_slice(&x)
                .reshape([total_nodes as i64, num_features as i64])
                .to_device(device),
            edge_index: Tensor::from_slice(&src).reshape([2, num_edges]).to_device(device),
            batch: Tensor::from_slice(&batch).to_device(device),
            ptr: Tensor::from_slice(&ptr).to_device(device),
            num_graphs: graphs.len(),
        })
    }
}

/// Observations of one forward pass, as tensors on a single device.
#[derive(Debug)]
pub struct TensorBatch {
    pub p_net: GraphBatch,
    /// Virtual node features `[batch, v_nodes, features]`.
    pub v_net_x: Tensor,
    /// Current virtual node `[batch]` (int64).
    pub curr_v_node_id: Tensor,
    /// Action mask `[batch, p_nodes]`.
    pub action_mask: Tensor,
    /// Task identity `[batch]` (float).
    pub v_net_size: Tensor,
    /// Physical nodes per observation.
    pub num_p_nodes: usize,
}

impl TensorBatch {
    pub fn len(&self) -> usize {
        self.p_net.num_graphs
    }

    pub fn is_empty(&self) -> bool {
        self.p_net.num_graphs == 0
    }

    pub fn device(&self) -> Device {
        self.v_net_x.device()
    }
}

/// Input accepted by [`to_tensor_batch`]: one observation or an ordered list.
#[derive(Debug, Clone, Copy)]
pub enum ObsInput<'a> {
    Single(&'a Observation),
    Batch(&'a [Observation]),
}

impl<'a> ObsInput<'a> {
    fn as_slice(&self) -> &'a [Observation] {
        match *self {
            ObsInput::Single(obs) => slice::from_ref(obs),
            ObsInput::Batch(list) => list,
        }
    }
}

impl<'a> From<&'a Observation> for ObsInput<'a> {
    fn from(obs: &'a Observation) -> Self {
        ObsInput::Single(obs)
    }
}

impl<'a> From<&'a [Observation]> for ObsInput<'a> {
    fn from(list: &'a [Observation]) -> Self {
        ObsInput::Batch(list)
    }
}

impl<'a> From<&'a Vec<Observation>> for ObsInput<'a> {
    fn from(list: &'a Vec<Observation>) -> Self {
        ObsInput::Batch(list.as_slice())
    }
}

fn check_rows(field: &'static str, rows: &[Vec<f32>], expected: usize, index: usize) -> Result<(), BatchError> {
    match rows.iter().find(|r| r.len() != expected) {
        Some(row) => Err(BatchError::RaggedField {
            field,
            index,
            expected,
            found: row.len(),
        }),
        None => Ok(()),
    }
}

/// Converts one observation or a list of observations into a [`TensorBatch`].
///
/// A single observation is handled as a one-element list, so both forms give
/// identical tensors. Every observation must have the same number of physical
/// and virtual nodes and the same feature widths.
pub fn to_tensor_batch<'a>(input: impl Into<ObsInput<'a>>, device: Device) -> Result<TensorBatch, BatchError> {
    let observations = input.into().as_slice();
    let first = observations.first().ok_or(BatchError::EmptyBatch)?;
    let num_p_nodes = first.num_p_nodes();
    let num_v_nodes = first.num_v_nodes();
    let v_features = first
        .v_net_x
        .first()
        .map(Vec::len)
        .ok_or(BatchError::EmptyField { field: "v_net_x", index: 0 })?;

    let mut graphs = Vec::with_capacity(observations.len());
    let mut v_net_x = Vec::with_capacity(observations.len() * num_v_nodes * v_features);
    let mut curr = Vec::with_capacity(observations.len());
    let mut mask = Vec::with_capacity(observations.len() * num_p_nodes);
    let mut sizes = Vec::with_capacity(observations.len());

    for (index, obs) in observations.iter().enumerate() {
        let graph = GraphData::from_arrays(&obs.p_net_x, &obs.p_net_edge_index, index)?;
        if graph.num_nodes() != num_p_nodes {
            return Err(BatchError::RaggedField {
                field: "p_net_x",
                index,
                expected: num_p_nodes,
                found: graph.num_nodes(),
            });
        }
        if obs.action_mask.len() != num_p_nodes {
            return Err(BatchError::MaskLength {
                index,
                expected: num_p_nodes,
                found: obs.action_mask.len(),
            });
        }
        if obs.num_v_nodes() != num_v_nodes {
            return Err(BatchError::RaggedField {
                field: "v_net_x",
                index,
                expected: num_v_nodes,
                found: obs.num_v_nodes(),
            });
        }
        check_rows("v_net_x", &obs.v_net_x, v_features, index)?;
        if obs.curr_v_node_id < 0 || obs.curr_v_node_id as usize >= num_v_nodes {
            return Err(BatchError::CurrentNodeOutOfRange {
                index,
                curr: obs.curr_v_node_id,
                num_nodes: num_v_nodes,
            });
        }

        graphs.push(graph);
        v_net_x.extend(obs.v_net_x.iter().flatten().copied());
        curr.push(obs.curr_v_node_id);
        mask.extend_from_slice(&obs.action_mask);
        sizes.push(obs.v_net_size as f32);
    }

    let b = observations.len() as i64;
    Ok(TensorBatch {
        p_net: GraphBatch::from_data_list(&graphs, device)?,
        v_net_x: Tensor::from_slice(&v_net_x)
            .reshape([b, num_v_nodes as i64, v_features as i64])
            .to_device(device),
        curr_v_node_id: Tensor::from_slice(&curr).to_device(device),
        action_mask: Tensor::from_slice(&mask)
            .reshape([b, num_p_nodes as i64])
            .to_device(device),
        v_net_size: Tensor::from_slice(&sizes).to_device(device),
        num_p_nodes,
    })
}
