//! Embedding environment.
//!
//! One episode embeds one [`Instance`]: virtual nodes are placed in index
//! order, one per step. After each placement every virtual link towards an
//! already placed neighbour is routed on the shortest path whose links can
//! carry its demand. The episode ends when all nodes are placed (accepted)
//! or when a placement or a routing fails (rejected).

use std::collections::BTreeMap;

use log::trace;

use super::error::EnvError;
use super::observation::ObservationBuilder;
use super::reward::RewardComputer;
use super::types::{Action, Observation};
use crate::topology::{Instance, PhysicalNetwork, VirtualNetwork};
use crate::{Id, TaskId};

/// Result of a single environment step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Observation after the step (the final state when `done`).
    pub observation: Observation,
    pub reward: f64,
    /// Whether the episode is finished.
    pub done: bool,
}

/// Outcome of one embedding episode.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub v_net_id: Id,
    pub task_id: TaskId,
    /// True if every virtual node and link was embedded.
    pub accepted: bool,
    /// Physical host of each virtual node, in virtual node order.
    pub node_mapping: Vec<Option<usize>>,
    /// Physical path of each embedded virtual link `(a, b)`.
    pub link_paths: BTreeMap<(usize, usize), Vec<usize>>,
    /// Requested resources; zero when rejected.
    pub revenue: f64,
    /// Consumed substrate resources; zero when rejected.
    pub cost: f64,
}

impl Solution {
    fn pending(v_net: &VirtualNetwork) -> Self {
        Self {
            v_net_id: v_net.id().clone(),
            task_id: v_net.num_nodes(),
            accepted: false,
            node_mapping: vec![None; v_net.num_nodes()],
            link_paths: BTreeMap::new(),
            revenue: 0.0,
            cost: 0.0,
        }
    }

    /// Revenue-to-cost ratio; zero for a rejected request.
    pub fn r2c(&self) -> f64 {
        if self.accepted && self.cost > 0.0 {
            self.revenue / self.cost
        } else {
            0.0
        }
    }
}

/// Sequential decision process over an embedding instance.
pub trait EmbeddingEnv {
    /// Starts an episode and returns the first observation.
    fn reset(&mut self, instance: &Instance) -> Result<Observation, EnvError>;

    /// Applies an action and advances the episode.
    fn step(&mut self, action: Action) -> Result<StepResult, EnvError>;

    /// The solution of the current (or last) episode.
    fn solution(&self) -> Result<&Solution, EnvError>;
}

#[derive(Debug)]
struct Episode {
    p_net: PhysicalNetwork,
    v_net: VirtualNetwork,
    curr: usize,
    done: bool,
    solution: Solution,
}

/// Environment that embeds one instance per episode.
///
/// The substrate of the instance is copied at reset; resources reserved
/// during the episode never leak into the caller's instance.
#[derive(Debug, Default)]
pub struct InstanceEnv {
    reward: RewardComputer,
    episode: Option<Episode>,
}

impl InstanceEnv {
    pub fn new(reward: RewardComputer) -> Self {
        Self {
            reward,
            episode: None,
        }
    }

    /// Substrate state of the running episode.
    pub fn p_net(&self) -> Option<&PhysicalNetwork> {
        self.episode.as_ref().map(|e| &e.p_net)
    }

    fn observe(episode: &Episode) -> Observation {
        ObservationBuilder::build(
            &episode.p_net,
            &episode.v_net,
            episode.curr,
            &episode.solution.node_mapping,
        )
    }

    /// Places `v_node` on `p_node` and routes its links to placed neighbours.
    ///
    /// Returns false if the placement or a routing is infeasible; the episode
    /// substrate is then left partially reserved, which is harmless because
    /// it is discarded with the episode.
    fn place(episode: &mut Episode, v_node: usize, p_node: usize) -> Result<bool, EnvError> {
        let demand = episode.v_net.node_demand(v_node)?.to_vec();
        let used = episode.solution.node_mapping.contains(&Some(p_node));
        if used || !episode.p_net.node(p_node)?.can_host(&demand) {
            return Ok(false);
        }
        episode.p_net.reserve_node(p_node, &demand)?;
        episode.solution.node_mapping[v_node] = Some(p_node);
        episode.solution.cost += demand.iter().sum::<f64>();

        let neighbors: Vec<usize> = episode.v_net.neighbors(v_node).collect();
        for other in neighbors {
            let Some(other_host) = episode.solution.node_mapping[other] else {
                continue;
            };
            let link_demand = match episode.v_net.link_demand(other, v_node) {
                Some(d) => d.to_vec(),
                None => continue,
            };
            let Some(path) = episode
                .p_net
                .shortest_feasible_path(other_host, p_node, &link_demand)
            else {
                return Ok(false);
            };
            episode.p_net.reserve_path(&path, &link_demand)?;
            let hops = path.len().saturating_sub(1) as f64;
            episode.solution.cost += hops * link_demand.iter().sum::<f64>();
            episode
                .solution
                .link_paths
                .insert((other.min(v_node), other.max(v_node)), path);
        }
        Ok(true)
    }
}

impl EmbeddingEnv for InstanceEnv {
    fn reset(&mut self, instance: &Instance) -> Result<Observation, EnvError> {
        let episode = Episode {
            p_net: instance.p_net.clone(),
            v_net: instance.v_net.clone(),
            curr: 0,
            done: instance.v_net.num_nodes() == 0,
            solution: Solution::pending(&instance.v_net),
        };
        let obs = Self::observe(&episode);
        self.episode = Some(episode);
        Ok(obs)
    }

    fn step(&mut self, action: Action) -> Result<StepResult, EnvError> {
        let episode = self.episode.as_mut().ok_or(EnvError::NotReset)?;
        if episode.done {
            return Err(EnvError::EpisodeDone);
        }
        let num_nodes = episode.p_net.num_nodes();
        if action >= num_nodes {
            return Err(EnvError::ActionOutOfRange { action, num_nodes });
        }

        let v_node = episode.curr;
        let placed = Self::place(episode, v_node, action)?;
        trace!("v node {} -> p node {}: placed={}", v_node, action, placed);

        let reward = if !placed {
            episode.done = true;
            episode.solution.cost = 0.0;
            self.reward.failure()
        } else if v_node + 1 == episode.v_net.num_nodes() {
            episode.done = true;
            episode.solution.accepted = true;
            episode.solution.revenue = episode.v_net.revenue();
            self.reward.success(episode.solution.r2c())
        } else {
            episode.curr += 1;
            self.reward.step()
        };

        let mut observation = Self::observe(episode);
        if !episode.done && !observation.has_valid_action() {
            // no host left for the next node
            episode.done = true;
            episode.solution.cost = 0.0;
            observation = Self::observe(episode);
            return Ok(StepResult {
                observation,
                reward: reward + self.reward.failure(),
                done: true,
            });
        }

        Ok(StepResult {
            observation,
            reward,
            done: episode.done,
        })
    }

    fn solution(&self) -> Result<&Solution, EnvError> {
        self.episode
            .as_ref()
            .map(|e| &e.solution)
            .ok_or(EnvError::NotReset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(node_cap: f64, link_cap: f64) -> Instance {
        let mut p = PhysicalNetwork::new(1, 1);
        for _ in 0..3 {
            p.add_node(vec![node_cap]).unwrap();
        }
        p.add_link(0, 1, vec![link_cap]).unwrap();
        p.add_link(1, 2, vec![link_cap]).unwrap();

        let mut v = VirtualNetwork::new(1, 1);
        v.add_node(vec![10.0]).unwrap();
        v.add_node(vec![10.0]).unwrap();
        v.add_link(0, 1, vec![20.0]).unwrap();
        Instance::new(v, p)
    }

    #[test]
    fn test_step_before_reset_fails() {
        let mut env = InstanceEnv::default();
        assert_eq!(env.step(0).unwrap_err(), EnvError::NotReset);
    }

    #[test]
    fn test_accepts_feasible_embedding() {
        let inst = instance(100.0, 100.0);
        let mut env = InstanceEnv::default();
        let obs = env.reset(&inst).unwrap();
        assert_eq!(obs.v_net_size, 2);

        let r = env.step(0).unwrap();
        assert!(!r.done);
        assert_eq!(r.observation.action_mask, vec![0.0, 1.0, 1.0]);

        let r = env.step(2).unwrap();
        assert!(r.done);
        let sol = env.solution().unwrap();
        assert!(sol.accepted);
        assert_eq!(sol.node_mapping, vec![Some(0), Some(2)]);
        assert_eq!(sol.link_paths[&(0, 1)], vec![0, 1, 2]);
        // revenue 40, cost 20 nodes + 2 hops * 20
        assert_eq!(sol.revenue, 40.0);
        assert_eq!(sol.cost, 60.0);
        assert!((sol.r2c() - 40.0 / 60.0).abs() < 1e-12);
        assert!(r.reward > 0.0);

        // caller's substrate untouched
        assert_eq!(inst.p_net.node(0).unwrap().available, vec![100.0]);
        assert_eq!(env.step(1).unwrap_err(), EnvError::EpisodeDone);
    }

    #[test]
    fn test_rejects_when_routing_fails() {
        let inst = instance(100.0, 5.0);
        let mut env = InstanceEnv::default();
        env.reset(&inst).unwrap();
        env.step(0).unwrap();
        let r = env.step(1).unwrap();
        assert!(r.done);
        assert!(r.reward < 0.0);
        let sol = env.solution().unwrap();
        assert!(!sol.accepted);
        assert_eq!(sol.r2c(), 0.0);
    }

    #[test]
    fn test_rejects_used_node() {
        let inst = instance(100.0, 100.0);
        let mut env = InstanceEnv::default();
        env.reset(&inst).unwrap();
        env.step(1).unwrap();
        let r = env.step(1).unwrap();
        assert!(r.done);
        assert!(!env.solution().unwrap().accepted);
    }

    #[test]
    fn test_action_out_of_range() {
        let inst = instance(100.0, 100.0);
        let mut env = InstanceEnv::default();
        env.reset(&inst).unwrap();
        assert_eq!(
            env.step(7).unwrap_err(),
            EnvError::ActionOutOfRange {
                action: 7,
                num_nodes: 3
            }
        );
    }

    #[test]
    fn test_ends_when_no_host_is_left() {
        // only one node can host a demand of 10
        let mut inst = instance(100.0, 100.0);
        let mut p = PhysicalNetwork::new(1, 1);
        p.add_node(vec![100.0]).unwrap();
        p.add_node(vec![5.0]).unwrap();
        p.add_link(0, 1, vec![100.0]).unwrap();
        inst.p_net = p;
        let mut env = InstanceEnv::default();
        env.reset(&inst).unwrap();
        let r = env.step(0).unwrap();
        assert!(r.done);
        assert!(!env.solution().unwrap().accepted);
    }
}
