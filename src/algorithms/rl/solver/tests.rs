//! Test suite for the multi-policy solver: routing, lazy task policies,
//! per-task updates and checkpoints.

use super::*;
use crate::algorithms::rl::environment::StepResult;
use crate::algorithms::rl::error::{EnvError, UpdateError};
use crate::algorithms::rl::types::{Action, Observation};
use crate::topology::{PhysicalNetwork, VirtualNetwork};
use std::cell::RefCell;
use std::fs;
use std::rc::Rc;
use tempdir::TempDir;

/// Fully meshed substrate with ample capacity on every node and link.
fn mesh(n: usize) -> PhysicalNetwork {
    let mut p_net = PhysicalNetwork::new(1, 1);
    for _ in 0..n {
        p_net.add_node(vec![100.0]).unwrap();
    }
    for a in 0..n {
        for b in (a + 1)..n {
            p_net.add_link(a, b, vec![100.0]).unwrap();
        }
    }
    p_net
}

/// Line-shaped request with `n` virtual nodes.
fn line(n: usize) -> VirtualNetwork {
    let mut v_net = VirtualNetwork::new(1, 1);
    for _ in 0..n {
        v_net.add_node(vec![5.0]).unwrap();
    }
    for a in 1..n {
        v_net.add_link(a - 1, a, vec![10.0]).unwrap();
    }
    v_net
}

fn instance(n: usize) -> Instance {
    Instance::new(line(n), mesh(6))
}

fn config() -> SolverConfig {
    SolverConfig::default()
        .with_embedding_dim(8)
        .with_target_steps(10_000)
}

fn solver(config: SolverConfig) -> MultiPolicySolver {
    MultiPolicySolver::new(config).unwrap()
}

/// Updater that records the task order and optionally fails.
#[derive(Clone, Default)]
struct Recording {
    calls: Rc<RefCell<Vec<TaskId>>>,
    fail: bool,
}

impl PolicyGradient for Recording {
    fn update(&mut self, target: UpdateTarget<'_>) -> Result<UpdateStats, UpdateError> {
        self.calls.borrow_mut().push(target.task_id);
        if self.fail {
            return Err(UpdateError::Other("boom".into()));
        }
        Ok(UpdateStats {
            task_id: target.task_id,
            n_steps: target.buffer.len(),
            ..UpdateStats::default()
        })
    }
}

fn recording_solver(config: SolverConfig, fail: bool) -> (MultiPolicySolver<InstanceEnv, Recording>, Rc<RefCell<Vec<TaskId>>>) {
    let updater = Recording {
        calls: Rc::default(),
        fail,
    };
    let calls = updater.calls.clone();
    let solver = MultiPolicySolver::with_parts(config, InstanceEnv::default(), updater).unwrap();
    (solver, calls)
}

/// Environment whose `fail_at`-th step (counted over all episodes) fails.
struct FlakyEnv {
    inner: InstanceEnv,
    steps: usize,
    fail_at: usize,
}

impl EmbeddingEnv for FlakyEnv {
    fn reset(&mut self, instance: &Instance) -> Result<Observation, EnvError> {
        self.inner.reset(instance)
    }

    fn step(&mut self, action: Action) -> Result<StepResult, EnvError> {
        self.steps += 1;
        if self.steps == self.fail_at {
            return Err(EnvError::NotReset);
        }
        self.inner.step(action)
    }

    fn solution(&self) -> Result<&Solution, EnvError> {
        self.inner.solution()
    }
}

#[cfg(test)]
mod routing {
    use super::*;

    #[test]
    fn test_unseen_task_routes_to_meta_without_creating() {
        let mut solver = solver(config());
        assert_eq!(solver.route(3).unwrap(), Route::Meta);

        let solution = solver.solve(&instance(3)).unwrap();
        assert_eq!(solution.task_id, 3);
        assert!(solution.accepted);
        assert!(solver.task_ids().is_empty());
        assert!(solver.buffer().is_empty());
    }

    #[test]
    fn test_existing_task_policy_is_preferred() {
        let mut solver = solver(config());
        solver.ensure_task_policy(4).unwrap();
        assert_eq!(solver.route(4).unwrap(), Route::Task(4));
        assert_eq!(solver.route(3).unwrap(), Route::Meta);
        let selected = solver.select_policy(&instance(4)).unwrap();
        assert!(std::ptr::eq(selected, solver.task_policy(4).unwrap()));
    }

    #[test]
    fn test_forced_missing_task_policy_is_an_error() {
        let mut solver = solver(config().with_single_task_policy(Some(5)));
        let err = solver.solve(&instance(3)).unwrap_err();
        assert!(matches!(err, SolverError::UnknownTaskPolicy(5)));
        assert!(solver.task_ids().is_empty());
    }

    #[test]
    fn test_forced_task_policy_serves_every_task() {
        let mut solver = solver(config().with_single_task_policy(Some(5)));
        solver.ensure_task_policy(5).unwrap();
        assert_eq!(solver.route(3).unwrap(), Route::Task(5));
        assert_eq!(solver.route(7).unwrap(), Route::Task(5));
        assert!(solver.solve(&instance(3)).is_ok());
        assert_eq!(solver.task_ids(), vec![5]);
    }

    #[test]
    fn test_empty_request_is_solved_without_steps() {
        let mut solver = solver(config());
        let solution = solver.learn_with_instance(&instance(0)).unwrap();
        assert_eq!(solution.task_id, 0);
        assert!(solver.buffer().is_empty());
    }
}

#[cfg(test)]
mod task_policies {
    use super::*;

    #[test]
    fn test_creation_is_lazy_and_idempotent() {
        let mut solver = solver(config());
        assert!(solver.ensure_task_policy(3).unwrap());
        assert!(!solver.ensure_task_policy(3).unwrap());
        assert_eq!(solver.task_ids(), vec![3]);

        let task = solver.task_policy(3).unwrap();
        assert!(task.policy.parameters_equal(&solver.meta().policy));
        assert_eq!(task.optimizer.groups().len(), 1);
        assert_eq!(task.optimizer.groups()[0].lr, solver.config().lr);
    }

    #[test]
    fn test_learning_creates_task_policy_and_buffers_steps() {
        let mut solver = solver(config());
        let solution = solver.learn_with_instance(&instance(3)).unwrap();
        assert!(solution.accepted);
        assert_eq!(solver.task_ids(), vec![3]);
        assert_eq!(solver.buffer().len(), 3);
        assert_eq!(solver.episodes(), 1);
        assert_eq!(solver.buffer().task_distribution().get(&3), Some(&3));
    }

    #[test]
    fn test_repeated_learning_keeps_one_pair_per_task() {
        let mut solver = solver(config());
        solver.learn_with_instance(&instance(3)).unwrap();
        let first = solver.task_policy(3).unwrap() as *const PolicyOptimizer;
        solver.learn_with_instance(&instance(3)).unwrap();
        assert_eq!(solver.task_ids(), vec![3]);
        assert!(std::ptr::eq(first, solver.task_policy(3).unwrap()));
        assert_eq!(solver.buffer().len(), 6);
    }

    #[test]
    fn test_meta_pair_uses_grouped_optimizer() {
        let mut cfg = config().with_lr(5e-4);
        cfg.lr_actor = 2e-3;
        cfg.lr_critic = 3e-3;
        let mut solver = solver(cfg);
        let groups: Vec<(&str, f64)> = solver
            .meta()
            .optimizer
            .groups()
            .iter()
            .map(|g| (g.name.as_str(), g.lr))
            .collect();
        assert_eq!(groups, vec![("actor", 2e-3), ("critic", 3e-3)]);

        solver.ensure_task_policy(3).unwrap();
        let task_groups = solver.task_policy(3).unwrap().optimizer.groups();
        assert_eq!(task_groups.len(), 1);
        assert_eq!(task_groups[0].lr, 5e-4);
        assert_eq!(task_groups[0].weight_decay, 0.0);
    }

    #[test]
    fn test_update_only_touches_own_task_policy() {
        let mut solver = solver(config());
        solver.ensure_task_policy(4).unwrap();
        let meta_before = solver.meta().policy.snapshot();
        let other_before = solver.task_policy(4).unwrap().policy.snapshot();

        solver.learn_with_instance(&instance(3)).unwrap();
        let stats = solver.update().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].task_id, 3);
        assert!(solver.buffer().is_empty());

        let changed = solver
            .task_policy(3)
            .unwrap()
            .policy
            .named_parameters()
            .iter()
            .any(|(name, t)| !t.equal(&meta_before[name]));
        assert!(changed);
        for (name, t) in solver.meta().policy.named_parameters() {
            assert!(t.equal(&meta_before[&name]), "meta parameter {} changed", name);
        }
        for (name, t) in solver.task_policy(4).unwrap().policy.named_parameters() {
            assert!(t.equal(&other_before[&name]), "task 4 parameter {} changed", name);
        }
        assert_eq!(solver.meta().optimizer.step_count(), 0);
        assert_eq!(solver.task_policy(4).unwrap().optimizer.step_count(), 0);
    }
}

#[cfg(test)]
mod updates {
    use super::*;

    #[test]
    fn test_tasks_are_updated_in_ascending_order() {
        let (mut solver, calls) = recording_solver(config(), false);
        solver.learn_with_instance(&instance(4)).unwrap();
        solver.learn_with_instance(&instance(2)).unwrap();
        solver.learn_with_instance(&instance(3)).unwrap();

        let stats = solver.update().unwrap();
        assert_eq!(*calls.borrow(), vec![2, 3, 4]);
        let steps: Vec<usize> = stats.iter().map(|s| s.n_steps).collect();
        assert_eq!(steps, vec![2, 3, 4]);
        assert!(solver.buffer().is_empty());
    }

    #[test]
    fn test_failing_update_stops_and_keeps_buffer() {
        let (mut solver, calls) = recording_solver(config(), true);
        solver.learn_with_instance(&instance(3)).unwrap();
        solver.learn_with_instance(&instance(4)).unwrap();
        let len = solver.buffer().len();

        let err = solver.update().unwrap_err();
        assert!(matches!(
            err,
            SolverError::Update {
                task_id: 3,
                source: UpdateError::Other(_)
            }
        ));
        assert_eq!(*calls.borrow(), vec![3]);
        assert_eq!(solver.buffer().len(), len);
    }

    #[test]
    fn test_aborted_episode_leaves_no_steps() {
        let env = FlakyEnv {
            inner: InstanceEnv::default(),
            steps: 0,
            fail_at: 2,
        };
        let mut solver = MultiPolicySolver::with_parts(config(), env, Recording::default()).unwrap();
        let err = solver.learn_with_instance(&instance(3)).unwrap_err();
        assert!(matches!(err, SolverError::Env(EnvError::NotReset)));
        assert!(solver.buffer().is_empty());
        assert_eq!(solver.episodes(), 0);

        solver.learn_with_instance(&instance(2)).unwrap();
        let gamma = solver.config().gamma;
        let buf = solver.buffer();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.task_distribution().keys().copied().collect::<Vec<_>>(), vec![2]);
        assert!((buf.returns()[1] - buf.rewards()[1]).abs() < 1e-12);
        let expected = buf.rewards()[0] + gamma * buf.rewards()[1];
        assert!((buf.returns()[0] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_empty_buffer_update_is_a_no_op() {
        let (mut solver, calls) = recording_solver(config(), false);
        assert!(solver.update().unwrap().is_empty());
        assert!(calls.borrow().is_empty());
    }

    #[test]
    fn test_reaching_target_steps_triggers_update() {
        let (mut solver, calls) = recording_solver(config().with_target_steps(5), false);
        solver.learn_with_instance(&instance(3)).unwrap();
        assert!(calls.borrow().is_empty());
        assert_eq!(solver.buffer().len(), 3);

        solver.learn_with_instance(&instance(2)).unwrap();
        assert_eq!(*calls.borrow(), vec![2, 3]);
        assert!(solver.buffer().is_empty());
    }

    #[test]
    fn test_learn_saves_every_interval() {
        let dir = TempDir::new("vnembed_solver").unwrap();
        let mut cfg = config().with_model_dir(dir.path());
        cfg.save_interval = 2;
        let mut solver = solver(cfg);
        let instances: Vec<Instance> = (2..5).map(instance).collect();

        let metrics = solver.learn(&instances).unwrap();
        assert_eq!(metrics.n_episodes, 3);
        assert!(dir.path().join("model-2.pt").is_file());
        assert!(!dir.path().join("model-3.pt").exists());
    }
}

#[cfg(test)]
mod checkpoints {
    use super::*;

    fn trained(cfg: SolverConfig) -> MultiPolicySolver {
        let mut solver = solver(cfg);
        solver.learn_with_instance(&instance(3)).unwrap();
        solver.learn_with_instance(&instance(5)).unwrap();
        solver.update().unwrap();
        solver
    }

    #[test]
    fn test_round_trip_restores_all_pairs() {
        let dir = TempDir::new("vnembed_solver").unwrap();
        let cfg = config().with_model_dir(dir.path());
        let source = trained(cfg.clone());
        let path = source.save_model("model.pt").unwrap();
        assert_eq!(path, dir.path().join("model.pt"));

        let mut cfg_other = cfg;
        cfg_other.seed = 7;
        let mut target = solver(cfg_other);
        assert!(!target.meta().policy.parameters_equal(&source.meta().policy));

        let report = target.try_load_model(&path).unwrap();
        assert_eq!(report.created, vec![3, 5]);
        assert_eq!(report.restored, vec![3, 5]);
        assert_eq!(target.task_ids(), vec![3, 5]);
        assert!(target.meta().policy.parameters_equal(&source.meta().policy));
        assert!(target.meta().optimizer.state_equal(&source.meta().optimizer));
        for task_id in [3, 5] {
            let restored = target.task_policy(task_id).unwrap();
            let original = source.task_policy(task_id).unwrap();
            assert!(restored.policy.parameters_equal(&original.policy));
            assert!(restored.optimizer.state_equal(&original.optimizer));
        }
    }

    #[test]
    fn test_restores_in_place_over_existing_task_policy() {
        let dir = TempDir::new("vnembed_solver").unwrap();
        let cfg = config().with_model_dir(dir.path());
        let source = trained(cfg.clone());
        let path = source.save_model("model.pt").unwrap();

        let mut cfg_other = cfg;
        cfg_other.seed = 7;
        let mut target = solver(cfg_other);
        target.learn_with_instance(&instance(3)).unwrap();
        target.update().unwrap();
        let existing = target.task_policy(3).unwrap();
        assert!(existing.optimizer.step_count() > 0);
        assert!(!existing.policy.parameters_equal(&source.task_policy(3).unwrap().policy));
        let storage: Vec<_> = existing
            .policy
            .named_parameters()
            .values()
            .map(|t| t.data_ptr() as usize)
            .collect();

        let report = target.try_load_model(&path).unwrap();
        assert_eq!(report.created, vec![5]);
        assert_eq!(report.restored, vec![3, 5]);

        let restored = target.task_policy(3).unwrap();
        let original = source.task_policy(3).unwrap();
        let after: Vec<_> = restored
            .policy
            .named_parameters()
            .values()
            .map(|t| t.data_ptr() as usize)
            .collect();
        assert_eq!(after, storage);
        assert!(restored.policy.parameters_equal(&original.policy));
        assert!(restored.optimizer.state_equal(&original.optimizer));
        assert_eq!(restored.optimizer.step_count(), original.optimizer.step_count());
    }

    #[test]
    fn test_missing_file_keeps_parameters() {
        let mut solver = solver(config());
        let before = solver.meta().policy.snapshot();
        assert!(!solver.load_model("/nonexistent/vnembed/model.pt"));
        assert!(solver.task_ids().is_empty());
        for (name, t) in solver.meta().policy.named_parameters() {
            assert!(t.equal(&before[&name]));
        }
    }

    #[test]
    fn test_garbage_file_keeps_parameters() {
        let dir = TempDir::new("vnembed_solver").unwrap();
        let path = dir.path().join("garbage.pt");
        fs::write(&path, b"not a checkpoint").unwrap();

        let mut solver = solver(config());
        let before = solver.meta().policy.snapshot();
        assert!(!solver.load_model(&path));
        for (name, t) in solver.meta().policy.named_parameters() {
            assert!(t.equal(&before[&name]));
        }
    }

    #[test]
    fn test_shape_mismatch_is_rejected_atomically() {
        let dir = TempDir::new("vnembed_solver").unwrap();
        let source = trained(config().with_embedding_dim(4).with_model_dir(dir.path()));
        let path = source.save_model("small.pt").unwrap();

        let mut target = solver(config());
        target.ensure_task_policy(3).unwrap();
        let meta_before = target.meta().policy.snapshot();
        let task_before = target.task_policy(3).unwrap().policy.snapshot();

        let err = target.try_load_model(&path).unwrap_err();
        assert!(matches!(err, CheckpointError::ShapeMismatch { .. }));
        assert!(!target.load_model(&path));
        assert_eq!(target.task_ids(), vec![3]);
        for (name, t) in target.meta().policy.named_parameters() {
            assert!(t.equal(&meta_before[&name]));
        }
        for (name, t) in target.task_policy(3).unwrap().policy.named_parameters() {
            assert!(t.equal(&task_before[&name]));
        }
    }

    #[test]
    fn test_embedding_algorithm_name() {
        let solver = solver(config());
        assert_eq!(solver.name(), "multi-policy-a3c-gcn");
    }
}
