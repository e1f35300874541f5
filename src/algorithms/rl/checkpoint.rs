//! Multi-policy checkpoints.
//!
//! One archive holds the meta-policy and every task policy, each with its
//! optimizer state. Entry names are
//!
//! ```text
//! meta_policy.policy.<variable>
//! meta_policy.optimizer.<state key>
//! task_policies.<task id>.policy.<variable>
//! task_policies.<task id>.optimizer.<state key>
//! ```
//!
//! Reading parses and validates the whole archive before any parameter is
//! written, so a rejected checkpoint leaves the policies untouched.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use tch::{Device, Tensor};

use super::error::CheckpointError;
use super::policy_set::PolicyOptimizer;
use super::training::Adam;
use crate::TaskId;

const META: &str = "meta_policy";
const TASKS: &str = "task_policies";
const POLICY: &str = "policy";
const OPTIMIZER: &str = "optimizer";

/// Saved state of one policy-optimizer pair.
#[derive(Debug, Default)]
pub struct PairState {
    pub policy: BTreeMap<String, Tensor>,
    pub optimizer: BTreeMap<String, Tensor>,
}

/// Parsed content of a checkpoint file.
#[derive(Debug, Default)]
pub struct Archive {
    pub meta: PairState,
    pub tasks: BTreeMap<TaskId, PairState>,
}

/// What a successful load changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadReport {
    pub path: PathBuf,
    /// Task policies that did not exist before the load.
    pub created: Vec<TaskId>,
    /// Every task policy restored from the archive.
    pub restored: Vec<TaskId>,
}

fn push_pair(named: &mut Vec<(String, Tensor)>, prefix: &str, pair: &PolicyOptimizer) {
    for (name, tensor) in pair.policy.named_parameters() {
        named.push((format!("{prefix}.{POLICY}.{name}"), tensor));
    }
    for (key, tensor) in pair.optimizer.named_state() {
        named.push((format!("{prefix}.{OPTIMIZER}.{key}"), tensor));
    }
}

/// Writes the meta pair and all task pairs into one archive at `path`.
pub fn save(
    path: &Path,
    meta: &PolicyOptimizer,
    tasks: &BTreeMap<TaskId, PolicyOptimizer>,
) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut named = Vec::new();
    push_pair(&mut named, META, meta);
    for (task_id, pair) in tasks {
        push_pair(&mut named, &format!("{TASKS}.{task_id}"), pair);
    }
    Tensor::save_multi(&named, path)?;
    info!(
        "Save model to {} ({} task policies)",
        path.display(),
        tasks.len()
    );
    Ok(())
}

fn insert_entry(state: &mut PairState, rest: &str, tensor: Tensor, name: &str) -> Result<(), CheckpointError> {
    match rest.split_once('.') {
        Some((POLICY, key)) => state.policy.insert(key.to_string(), tensor),
        Some((OPTIMIZER, key)) => state.optimizer.insert(key.to_string(), tensor),
        _ => return Err(CheckpointError::UnexpectedEntry(name.to_string())),
    };
    Ok(())
}

/// Reads and parses an archive written by [`save`].
pub fn read(path: &Path, device: Device) -> Result<Archive, CheckpointError> {
    if !path.is_file() {
        return Err(CheckpointError::NotFound(path.to_path_buf()));
    }
    let entries = Tensor::load_multi_with_device(path, device)?;
    let mut archive = Archive::default();
    for (name, tensor) in entries {
        if let Some(rest) = name.strip_prefix(META).and_then(|r| r.strip_prefix('.')) {
            insert_entry(&mut archive.meta, rest, tensor, &name)?;
        } else if let Some(rest) = name.strip_prefix(TASKS).and_then(|r| r.strip_prefix('.')) {
            let (id, rest) = rest
                .split_once('.')
                .ok_or_else(|| CheckpointError::UnexpectedEntry(name.clone()))?;
            let task_id: TaskId = id
                .parse()
                .map_err(|_| CheckpointError::InvalidTaskId(name.clone()))?;
            insert_entry(archive.tasks.entry(task_id).or_default(), rest, tensor, &name)?;
        } else {
            return Err(CheckpointError::UnexpectedEntry(name));
        }
    }
    if archive.meta.policy.is_empty() {
        return Err(CheckpointError::MissingEntry(format!("{META}.{POLICY}")));
    }
    Ok(archive)
}

/// Applies a parsed archive.
///
/// The meta pair is restored first; archived tasks without a policy are
/// created by forking the restored meta-policy with a fresh optimizer of
/// learning rate `lr`, then restored from their own entries.
pub fn restore(
    archive: &Archive,
    meta: &mut PolicyOptimizer,
    tasks: &mut BTreeMap<TaskId, PolicyOptimizer>,
    lr: f64,
) -> Result<Vec<TaskId>, CheckpointError> {
    meta.policy.check_named(&archive.meta.policy)?;
    meta.optimizer.check_state(&archive.meta.optimizer)?;
    let mut template: Option<Adam> = None;
    for (task_id, state) in &archive.tasks {
        meta.policy.check_named(&state.policy)?;
        match tasks.get(task_id) {
            Some(pair) => pair.optimizer.check_state(&state.optimizer)?,
            None => template
                .get_or_insert_with(|| Adam::single(&meta.policy, lr))
                .check_state(&state.optimizer)?,
        }
    }

    meta.policy.load_named(&archive.meta.policy)?;
    meta.optimizer.load_state(&archive.meta.optimizer)?;
    let mut created = Vec::new();
    for (task_id, state) in &archive.tasks {
        if !tasks.contains_key(task_id) {
            tasks.insert(*task_id, meta.fork(lr)?);
            info!("New task policy is created for task {}", task_id);
            created.push(*task_id);
        }
        if let Some(pair) = tasks.get_mut(task_id) {
            pair.policy.load_named(&state.policy)?;
            pair.optimizer.load_state(&state.optimizer)?;
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::rl::config::SolverConfig;
    use crate::algorithms::rl::policy_set::make_policy;
    use tempdir::TempDir;

    fn config() -> SolverConfig {
        SolverConfig::default().with_embedding_dim(4)
    }

    #[test]
    fn test_archive_layout() {
        let dir = TempDir::new("vnembed_ckpt").unwrap();
        let path = dir.path().join("nested").join("model.pt");
        let cfg = config();
        let meta = make_policy(&cfg);
        let mut tasks = BTreeMap::new();
        tasks.insert(3, meta.fork(cfg.lr).unwrap());
        tasks.insert(12, meta.fork(cfg.lr).unwrap());

        save(&path, &meta, &tasks).unwrap();
        let archive = read(&path, Device::Cpu).unwrap();
        assert_eq!(archive.tasks.keys().copied().collect::<Vec<_>>(), vec![3, 12]);
        assert_eq!(archive.meta.policy.len(), meta.policy.named_parameters().len());
        assert!(archive.meta.optimizer.contains_key("lr.actor"));
        assert!(archive.tasks[&3].optimizer.contains_key("lr.all"));
        assert!(archive.tasks[&12].optimizer.contains_key("step"));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let err = read(Path::new("/nonexistent/vnembed/model.pt"), Device::Cpu).unwrap_err();
        assert!(matches!(err, CheckpointError::NotFound(_)));
    }

    #[test]
    fn test_garbage_file_is_an_error() {
        let dir = TempDir::new("vnembed_ckpt").unwrap();
        let path = dir.path().join("garbage.pt");
        fs::write(&path, b"definitely not a checkpoint").unwrap();
        assert!(read(&path, Device::Cpu).is_err());
    }

    #[test]
    fn test_restore_creates_missing_tasks_from_meta() {
        let dir = TempDir::new("vnembed_ckpt").unwrap();
        let path = dir.path().join("model.pt");
        let cfg = config();
        let meta = make_policy(&cfg);
        let mut tasks = BTreeMap::new();
        tasks.insert(4, meta.fork(cfg.lr).unwrap());
        save(&path, &meta, &tasks).unwrap();

        let mut other_meta = make_policy(&cfg);
        let mut other_tasks = BTreeMap::new();
        let archive = read(&path, Device::Cpu).unwrap();
        let created = restore(&archive, &mut other_meta, &mut other_tasks, cfg.lr).unwrap();
        assert_eq!(created, vec![4]);
        assert!(other_meta.policy.parameters_equal(&meta.policy));
        assert!(other_tasks[&4].policy.parameters_equal(&tasks[&4].policy));
        assert!(other_tasks[&4].optimizer.state_equal(&tasks[&4].optimizer));
    }
}
