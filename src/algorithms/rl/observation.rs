//! Observation encoding for the embedding environment.
//!
//! Physical node rows have `2·Nn + 2·Nl + 1` features and virtual node rows
//! `Nn + Nl + 1`, where `Nn` and `Nl` are the node and link attribute counts:
//!
//! ```text
//! p row: [available ratio (Nn)] ++ [current demand (Nn)]
//!        ++ [adjacent bandwidth (Nl)] ++ [current adjacent demand (Nl)] ++ [hosts request]
//! v row: [demand (Nn)] ++ [adjacent demand (Nl)] ++ [placed]
//! ```
//!
//! Demands and bandwidths are normalized by the largest substrate capacity of
//! the same attribute.

use super::types::Observation;
use crate::topology::{PhysicalNetwork, VirtualNetwork};

/// Builds observations from the current embedding state.
pub struct ObservationBuilder;

fn ratio(value: f64, scale: f64) -> f32 {
    if scale > 0.0 {
        (value / scale) as f32
    } else {
        0.0
    }
}

impl ObservationBuilder {
    /// Width of a physical node feature row.
    pub fn p_net_feature_dim(num_node_attrs: usize, num_link_attrs: usize) -> usize {
        2 * num_node_attrs + 2 * num_link_attrs + 1
    }

    /// Width of a virtual node feature row.
    pub fn v_net_feature_dim(num_node_attrs: usize, num_link_attrs: usize) -> usize {
        num_node_attrs + num_link_attrs + 1
    }

    /// Builds the observation for placing virtual node `curr`.
    ///
    /// `mapping[j]` is the physical host of virtual node `j`, if placed.
    /// `curr` is clamped to the last virtual node once every node is placed.
    pub fn build(
        p_net: &PhysicalNetwork,
        v_net: &VirtualNetwork,
        curr: usize,
        mapping: &[Option<usize>],
    ) -> Observation {
        let nn = p_net.num_node_attrs();
        let nl = p_net.num_link_attrs();
        let curr = curr.min(v_net.num_nodes().saturating_sub(1));

        let node_scale: Vec<f64> = (0..nn).map(|k| p_net.max_node_capacity(k)).collect();
        let link_scale: Vec<f64> = (0..nl).map(|l| p_net.max_adjacent_capacity(l)).collect();

        let curr_demand: Vec<f64> = v_net
            .node_demand(curr)
            .map(|d| d.to_vec())
            .unwrap_or_else(|_| vec![0.0; nn]);
        let curr_adjacent: Vec<f64> = (0..nl).map(|l| v_net.adjacent_demand(curr, l)).collect();

        let hosts: Vec<bool> = (0..p_net.num_nodes())
            .map(|i| mapping.iter().any(|m| *m == Some(i)))
            .collect();

        let mut p_net_x = Vec::with_capacity(p_net.num_nodes());
        let mut action_mask = Vec::with_capacity(p_net.num_nodes());
        for i in 0..p_net.num_nodes() {
            let mut row = Vec::with_capacity(Self::p_net_feature_dim(nn, nl));
            let feasible = match p_net.node(i) {
                Ok(node) => {
                    row.extend((0..nn).map(|k| node.available_ratio(k) as f32));
                    !hosts[i] && node.can_host(&curr_demand)
                }
                Err(_) => {
                    row.extend(std::iter::repeat(0.0).take(nn));
                    false
                }
            };
            row.extend((0..nn).map(|k| ratio(curr_demand[k], node_scale[k])));
            row.extend((0..nl).map(|l| ratio(p_net.adjacent_available(i, l), link_scale[l])));
            row.extend((0..nl).map(|l| ratio(curr_adjacent[l], link_scale[l])));
            row.push(if hosts[i] { 1.0 } else { 0.0 });
            p_net_x.push(row);
            action_mask.push(if feasible { 1.0 } else { 0.0 });
        }

        let mut v_net_x = Vec::with_capacity(v_net.num_nodes());
        for j in 0..v_net.num_nodes() {
            let mut row = Vec::with_capacity(Self::v_net_feature_dim(nn, nl));
            let demand = v_net.node_demand(j).unwrap_or(&[]);
            row.extend((0..nn).map(|k| ratio(demand.get(k).copied().unwrap_or(0.0), node_scale[k])));
            row.extend((0..nl).map(|l| ratio(v_net.adjacent_demand(j, l), link_scale[l])));
            let placed = mapping.get(j).copied().flatten().is_some();
            row.push(if placed { 1.0 } else { 0.0 });
            v_net_x.push(row);
        }

        Observation {
            p_net_x,
            p_net_edge_index: p_net.edge_index(),
            v_net_x,
            curr_v_node_id: curr as i64,
            action_mask,
            v_net_size: v_net.num_nodes(),
        }
    }
}
