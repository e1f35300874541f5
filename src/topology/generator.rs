//! Random substrate and request generation.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::error::TopologyError;
use super::graph::{PhysicalNetwork, VirtualNetwork};
use super::instance::Instance;

/// Closed interval `[low, high]` sampled uniformly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UniformRange<T> {
    pub low: T,
    pub high: T,
}

impl<T> UniformRange<T> {
    pub fn new(low: T, high: T) -> Self {
        Self { low, high }
    }
}

impl UniformRange<f64> {
    fn sample(&self, rng: &mut StdRng) -> f64 {
        match self.low.partial_cmp(&self.high) {
            Some(Ordering::Less) => rng.gen_range(self.low..=self.high),
            _ => self.low,
        }
    }

    fn check(&self, name: &str) -> Result<(), TopologyError> {
        let ok = self.low.is_finite() && self.high.is_finite() && 0.0 <= self.low && self.low <= self.high;
        if ok {
            Ok(())
        } else {
            Err(TopologyError::InvalidParameter(format!(
                "{} must satisfy 0 <= low <= high, got [{}, {}]",
                name, self.low, self.high
            )))
        }
    }
}

impl UniformRange<usize> {
    fn sample(&self, rng: &mut StdRng) -> usize {
        if self.high <= self.low {
            self.low
        } else {
            rng.gen_range(self.low..=self.high)
        }
    }

    fn check(&self, name: &str) -> Result<(), TopologyError> {
        if self.low <= self.high {
            Ok(())
        } else {
            Err(TopologyError::InvalidParameter(format!(
                "{} must satisfy low <= high, got [{}, {}]",
                name, self.low, self.high
            )))
        }
    }
}

fn check_probability(name: &str, p: f64) -> Result<(), TopologyError> {
    if (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(TopologyError::InvalidParameter(format!(
            "{} must be in [0, 1], got {}",
            name, p
        )))
    }
}

/// Parameters of the random network generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Number of node resource attributes (e.g. CPU).
    pub num_node_resource_attrs: usize,
    /// Number of link resource attributes (e.g. bandwidth).
    pub num_link_resource_attrs: usize,
    pub p_net_num_nodes: usize,
    /// Probability of an extra link between two substrate nodes.
    pub p_net_edge_prob: f64,
    pub p_node_capacity: UniformRange<f64>,
    pub p_link_capacity: UniformRange<f64>,
    /// Number of virtual nodes per request; this is the task identity.
    pub v_net_size: UniformRange<usize>,
    /// Probability of an extra link between two virtual nodes.
    pub v_net_edge_prob: f64,
    pub v_node_demand: UniformRange<f64>,
    pub v_link_demand: UniformRange<f64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            num_node_resource_attrs: 1,
            num_link_resource_attrs: 1,
            p_net_num_nodes: 20,
            p_net_edge_prob: 0.15,
            p_node_capacity: UniformRange::new(50.0, 100.0),
            p_link_capacity: UniformRange::new(50.0, 100.0),
            v_net_size: UniformRange::new(2, 6),
            v_net_edge_prob: 0.5,
            v_node_demand: UniformRange::new(0.0, 20.0),
            v_link_demand: UniformRange::new(0.0, 50.0),
        }
    }
}

impl GeneratorConfig {
    /// Checks edge probabilities and sampling ranges.
    pub fn validate(&self) -> Result<(), TopologyError> {
        check_probability("p_net_edge_prob", self.p_net_edge_prob)?;
        check_probability("v_net_edge_prob", self.v_net_edge_prob)?;
        self.p_node_capacity.check("p_node_capacity")?;
        self.p_link_capacity.check("p_link_capacity")?;
        self.v_net_size.check("v_net_size")?;
        self.v_node_demand.check("v_node_demand")?;
        self.v_link_demand.check("v_link_demand")
    }
}

/// Seeded generator of connected substrate networks and requests.
///
/// Every generated graph is connected: nodes are first attached to a random
/// earlier node (a random spanning tree), then extra links are added with the
/// configured probability.
#[derive(Debug)]
pub struct NetworkGenerator {
    config: GeneratorConfig,
    rng: StdRng,
}

impl NetworkGenerator {
    pub fn new(config: GeneratorConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    fn sample_vec(&mut self, range: UniformRange<f64>, n: usize) -> Vec<f64> {
        (0..n).map(|_| range.sample(&mut self.rng)).collect()
    }

    fn random_links(&mut self, n: usize, edge_prob: f64) -> Vec<(usize, usize)> {
        let mut links = Vec::new();
        for i in 1..n {
            links.push((self.rng.gen_range(0..i), i));
        }
        for a in 0..n {
            for b in (a + 1)..n {
                if links.contains(&(a, b)) {
                    continue;
                }
                // NaN and non-positive probabilities add no links
                if edge_prob > 0.0 && self.rng.gen_bool(edge_prob.min(1.0)) {
                    links.push((a, b));
                }
            }
        }
        links
    }

    /// Generates a connected substrate network.
    pub fn physical_network(&mut self) -> Result<PhysicalNetwork, TopologyError> {
        let cfg = self.config.clone();
        let mut p_net = PhysicalNetwork::new(cfg.num_node_resource_attrs, cfg.num_link_resource_attrs);
        for _ in 0..cfg.p_net_num_nodes {
            let capacity = self.sample_vec(cfg.p_node_capacity, cfg.num_node_resource_attrs);
            p_net.add_node(capacity)?;
        }
        for (a, b) in self.random_links(cfg.p_net_num_nodes, cfg.p_net_edge_prob) {
            let capacity = self.sample_vec(cfg.p_link_capacity, cfg.num_link_resource_attrs);
            p_net.add_link(a, b, capacity)?;
        }
        Ok(p_net)
    }

    /// Generates a connected virtual network request.
    pub fn virtual_network(&mut self) -> Result<VirtualNetwork, TopologyError> {
        let cfg = self.config.clone();
        let size = cfg.v_net_size.sample(&mut self.rng).max(1);
        let mut v_net = VirtualNetwork::new(cfg.num_node_resource_attrs, cfg.num_link_resource_attrs);
        for _ in 0..size {
            let demand = self.sample_vec(cfg.v_node_demand, cfg.num_node_resource_attrs);
            v_net.add_node(demand)?;
        }
        for (a, b) in self.random_links(size, cfg.v_net_edge_prob) {
            let demand = self.sample_vec(cfg.v_link_demand, cfg.num_link_resource_attrs);
            v_net.add_link(a, b, demand)?;
        }
        Ok(v_net)
    }

    /// Pairs a fresh request with a snapshot of `p_net`.
    pub fn instance(&mut self, p_net: &PhysicalNetwork) -> Result<Instance, TopologyError> {
        Ok(Instance::new(self.virtual_network()?, p_net.clone()))
    }

    /// Generates `n` requests against the same substrate snapshot.
    pub fn instances(&mut self, p_net: &PhysicalNetwork, n: usize) -> Result<Vec<Instance>, TopologyError> {
        (0..n).map(|_| self.instance(p_net)).collect()
    }
}
