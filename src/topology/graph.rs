//! Resource-annotated network graphs backed by `petgraph`.

use petgraph::algo::astar;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::{EdgeFiltered, EdgeRef};

use super::error::TopologyError;
use crate::{generate_id, Id};

/// Capacity and currently available amount of each resource attribute.
///
/// Attribute `k` of `capacity` and `available` refer to the same resource
/// (e.g. CPU for nodes, bandwidth for links).
#[derive(Debug, Clone, PartialEq)]
pub struct Resources {
    pub capacity: Vec<f64>,
    pub available: Vec<f64>,
}

impl Resources {
    /// Creates fully available resources with the given capacity.
    pub fn new(capacity: Vec<f64>) -> Self {
        Self {
            available: capacity.clone(),
            capacity,
        }
    }

    /// Number of resource attributes.
    pub fn dims(&self) -> usize {
        self.capacity.len()
    }

    /// Returns true if every attribute of `demand` fits in the available amount.
    pub fn can_host(&self, demand: &[f64]) -> bool {
        demand.len() == self.available.len()
            && demand
                .iter()
                .zip(&self.available)
                .all(|(d, a)| *d <= *a + 1e-9)
    }

    /// Subtracts `demand` from the available resources.
    pub fn reserve(&mut self, demand: &[f64]) -> Result<(), TopologyError> {
        if demand.len() != self.dims() {
            return Err(TopologyError::AttributeMismatch {
                expected: self.dims(),
                found: demand.len(),
            });
        }
        if !self.can_host(demand) {
            return Err(TopologyError::InsufficientResources {
                demand: demand.to_vec(),
                available: self.available.clone(),
            });
        }
        for (a, d) in self.available.iter_mut().zip(demand) {
            *a = (*a - d).max(0.0);
        }
        Ok(())
    }

    /// Fraction of attribute `attr` still available (0 when capacity is 0).
    pub fn available_ratio(&self, attr: usize) -> f64 {
        match (self.capacity.get(attr), self.available.get(attr)) {
            (Some(c), Some(a)) if *c > 0.0 => a / c,
            _ => 0.0,
        }
    }
}

fn check_dims(expected: usize, found: usize) -> Result<(), TopologyError> {
    if expected != found {
        return Err(TopologyError::AttributeMismatch { expected, found });
    }
    Ok(())
}

/// The physical substrate network.
///
/// Undirected; nodes and links carry [`Resources`]. Nodes are addressed by
/// dense indices `0..num_nodes()` in insertion order.
#[derive(Debug, Clone)]
pub struct PhysicalNetwork {
    graph: UnGraph<Resources, Resources>,
    num_node_attrs: usize,
    num_link_attrs: usize,
}

impl PhysicalNetwork {
    /// Creates an empty substrate with the given number of node and link attributes.
    pub fn new(num_node_attrs: usize, num_link_attrs: usize) -> Self {
        Self {
            graph: UnGraph::default(),
            num_node_attrs,
            num_link_attrs,
        }
    }

    /// Adds a node with the given capacity and returns its index.
    pub fn add_node(&mut self, capacity: Vec<f64>) -> Result<usize, TopologyError> {
        check_dims(self.num_node_attrs, capacity.len())?;
        Ok(self.graph.add_node(Resources::new(capacity)).index())
    }

    /// Adds an undirected link between two existing nodes.
    pub fn add_link(&mut self, a: usize, b: usize, capacity: Vec<f64>) -> Result<(), TopologyError> {
        check_dims(self.num_link_attrs, capacity.len())?;
        self.check_node(a)?;
        self.check_node(b)?;
        if a == b {
            return Err(TopologyError::SelfLoop(a));
        }
        if self.graph.find_edge(NodeIndex::new(a), NodeIndex::new(b)).is_some() {
            return Err(TopologyError::DuplicateLink(a, b));
        }
        self.graph
            .add_edge(NodeIndex::new(a), NodeIndex::new(b), Resources::new(capacity));
        Ok(())
    }

    fn check_node(&self, index: usize) -> Result<(), TopologyError> {
        if index >= self.graph.node_count() {
            return Err(TopologyError::InvalidNode {
                index,
                num_nodes: self.graph.node_count(),
            });
        }
        Ok(())
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_links(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn num_node_attrs(&self) -> usize {
        self.num_node_attrs
    }

    pub fn num_link_attrs(&self) -> usize {
        self.num_link_attrs
    }

    /// Resources of node `index`.
    pub fn node(&self, index: usize) -> Result<&Resources, TopologyError> {
        self.check_node(index)?;
        Ok(&self.graph[NodeIndex::new(index)])
    }

    /// Resources of the link between `a` and `b`, if it exists.
    pub fn link(&self, a: usize, b: usize) -> Option<&Resources> {
        if a >= self.num_nodes() || b >= self.num_nodes() {
            return None;
        }
        self.graph
            .find_edge(NodeIndex::new(a), NodeIndex::new(b))
            .map(|e| &self.graph[e])
    }

    /// Indices of the nodes adjacent to `index`.
    pub fn neighbors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph
            .neighbors(NodeIndex::new(index))
            .map(|n| n.index())
    }

    /// Iterates `(a, b, resources)` over every link once.
    pub fn links(&self) -> impl Iterator<Item = (usize, usize, &Resources)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index(), e.weight()))
    }

    /// Edge list in both directions, as expected by message-passing layers.
    pub fn edge_index(&self) -> Vec<[i64; 2]> {
        let mut edges = Vec::with_capacity(self.num_links() * 2);
        for (a, b, _) in self.links() {
            edges.push([a as i64, b as i64]);
            edges.push([b as i64, a as i64]);
        }
        edges
    }

    /// Sum of attribute `attr` still available on the links adjacent to `index`.
    pub fn adjacent_available(&self, index: usize, attr: usize) -> f64 {
        self.graph
            .edges(NodeIndex::new(index))
            .filter_map(|e| e.weight().available.get(attr))
            .sum()
    }

    /// Sum of attribute `attr` capacity on the links adjacent to `index`.
    pub fn adjacent_capacity(&self, index: usize, attr: usize) -> f64 {
        self.graph
            .edges(NodeIndex::new(index))
            .filter_map(|e| e.weight().capacity.get(attr))
            .sum()
    }

    /// Largest capacity of attribute `attr` over all nodes.
    pub fn max_node_capacity(&self, attr: usize) -> f64 {
        self.graph
            .node_weights()
            .filter_map(|r| r.capacity.get(attr))
            .fold(0.0, |m, c| f64::max(m, *c))
    }

    /// Largest adjacent link capacity of attribute `attr` over all nodes.
    pub fn max_adjacent_capacity(&self, attr: usize) -> f64 {
        (0..self.num_nodes())
            .map(|i| self.adjacent_capacity(i, attr))
            .fold(0.0, f64::max)
    }

    pub fn reserve_node(&mut self, index: usize, demand: &[f64]) -> Result<(), TopologyError> {
        self.check_node(index)?;
        self.graph[NodeIndex::new(index)].reserve(demand)
    }

    /// Finds the path with the fewest hops from `src` to `dst` using only links
    /// that can still carry `demand`.
    ///
    /// Returns `None` if no such path exists. A path from a node to itself is `[src]`.
    pub fn shortest_feasible_path(&self, src: usize, dst: usize, demand: &[f64]) -> Option<Vec<usize>> {
        if src >= self.num_nodes() || dst >= self.num_nodes() {
            return None;
        }
        let goal = NodeIndex::new(dst);
        let filtered = EdgeFiltered::from_fn(&self.graph, |e| e.weight().can_host(demand));
        astar(&filtered, NodeIndex::new(src), |n| n == goal, |_| 1usize, |_| 0usize)
            .map(|(_, path)| path.into_iter().map(|n| n.index()).collect())
    }

    /// Reserves `demand` on every link along `path`.
    ///
    /// Either every link is reserved or, on error, none is.
    pub fn reserve_path(&mut self, path: &[usize], demand: &[f64]) -> Result<(), TopologyError> {
        let mut edges = Vec::with_capacity(path.len().saturating_sub(1));
        for hop in path.windows(2) {
            let edge = self
                .graph
                .find_edge(NodeIndex::new(hop[0]), NodeIndex::new(hop[1]))
                .ok_or(TopologyError::MissingLink(hop[0], hop[1]))?;
            if !self.graph[edge].can_host(demand) {
                return Err(TopologyError::InsufficientResources {
                    demand: demand.to_vec(),
                    available: self.graph[edge].available.clone(),
                });
            }
            edges.push(edge);
        }
        for edge in edges {
            self.graph[edge].reserve(demand)?;
        }
        Ok(())
    }
}

/// A virtual network request.
///
/// Nodes are addressed by dense indices in insertion order; this order is
/// also the order in which the nodes are placed during embedding.
#[derive(Debug, Clone)]
pub struct VirtualNetwork {
    id: Id,
    graph: UnGraph<Vec<f64>, Vec<f64>>,
    num_node_attrs: usize,
    num_link_attrs: usize,
}

impl VirtualNetwork {
    /// Creates an empty request with a fresh identifier.
    pub fn new(num_node_attrs: usize, num_link_attrs: usize) -> Self {
        Self {
            id: generate_id(),
            graph: UnGraph::default(),
            num_node_attrs,
            num_link_attrs,
        }
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn add_node(&mut self, demand: Vec<f64>) -> Result<usize, TopologyError> {
        check_dims(self.num_node_attrs, demand.len())?;
        Ok(self.graph.add_node(demand).index())
    }

    pub fn add_link(&mut self, a: usize, b: usize, demand: Vec<f64>) -> Result<(), TopologyError> {
        check_dims(self.num_link_attrs, demand.len())?;
        for index in [a, b] {
            if index >= self.num_nodes() {
                return Err(TopologyError::InvalidNode {
                    index,
                    num_nodes: self.num_nodes(),
                });
            }
        }
        if a == b {
            return Err(TopologyError::SelfLoop(a));
        }
        if self.graph.find_edge(NodeIndex::new(a), NodeIndex::new(b)).is_some() {
            return Err(TopologyError::DuplicateLink(a, b));
        }
        self.graph.add_edge(NodeIndex::new(a), NodeIndex::new(b), demand);
        Ok(())
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_links(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn num_node_attrs(&self) -> usize {
        self.num_node_attrs
    }

    pub fn num_link_attrs(&self) -> usize {
        self.num_link_attrs
    }

    pub fn node_demand(&self, index: usize) -> Result<&[f64], TopologyError> {
        if index >= self.num_nodes() {
            return Err(TopologyError::InvalidNode {
                index,
                num_nodes: self.num_nodes(),
            });
        }
        Ok(&self.graph[NodeIndex::new(index)])
    }

    pub fn link_demand(&self, a: usize, b: usize) -> Option<&[f64]> {
        if a >= self.num_nodes() || b >= self.num_nodes() {
            return None;
        }
        self.graph
            .find_edge(NodeIndex::new(a), NodeIndex::new(b))
            .map(|e| self.graph[e].as_slice())
    }

    pub fn neighbors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.graph
            .neighbors(NodeIndex::new(index))
            .map(|n| n.index())
    }

    pub fn links(&self) -> impl Iterator<Item = (usize, usize, &[f64])> + '_ {
        self.graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index(), e.weight().as_slice()))
    }

    /// Sum of link demand `attr` over the links adjacent to `index`.
    pub fn adjacent_demand(&self, index: usize, attr: usize) -> f64 {
        self.graph
            .edges(NodeIndex::new(index))
            .filter_map(|e| e.weight().get(attr))
            .sum()
    }

    /// Total requested resources (node demands plus link demands).
    pub fn revenue(&self) -> f64 {
        let nodes: f64 = self.graph.node_weights().flatten().sum();
        let links: f64 = self.graph.edge_weights().flatten().sum();
        nodes + links
    }
}
