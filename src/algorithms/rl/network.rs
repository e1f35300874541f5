//! Graph actor-critic network using tch-rs (PyTorch bindings).
//!
//! Actor and critic are separate sub-trees (`actor.*`, `critic.*`) of one
//! `VarStore`, so optimizers can address them as parameter groups. Both
//! encode the substrate with two graph convolutions and the virtual request
//! with a node-wise linear layer.
//!
//! This module is only available with the `rl-nn` feature.

use std::collections::BTreeMap;

use tch::nn::{self, Module, ModuleT};
use tch::{Device, Kind, TchError, Tensor};

use super::batch::TensorBatch;
use super::config::SolverConfig;
use super::error::CheckpointError;

/// Logit assigned to masked actions.
const MASKED_LOGIT: f64 = -1e9;

/// Dimensions and regularization of an [`ActorCritic`].
#[derive(Debug, Clone, PartialEq)]
pub struct ActorCriticConfig {
    pub p_net_feature_dim: usize,
    pub v_net_feature_dim: usize,
    pub embedding_dim: usize,
    pub dropout_prob: f64,
    pub batch_norm: bool,
}

impl From<&SolverConfig> for ActorCriticConfig {
    fn from(config: &SolverConfig) -> Self {
        Self {
            p_net_feature_dim: config.p_net_feature_dim(),
            v_net_feature_dim: config.v_net_feature_dim(),
            embedding_dim: config.embedding_dim,
            dropout_prob: config.dropout_prob,
            batch_norm: config.batch_norm,
        }
    }
}

/// Graph convolution with symmetric degree normalization and self loops.
#[derive(Debug)]
struct GcnConv {
    lin: nn::Linear,
    bias: Tensor,
}

impl GcnConv {
    fn new(p: nn::Path, in_dim: i64, out_dim: i64) -> Self {
        let lin = nn::linear(
            &p / "lin",
            in_dim,
            out_dim,
            nn::LinearConfig {
                bias: false,
                ..Default::default()
            },
        );
        let bias = p.zeros("bias", &[out_dim]);
        Self { lin, bias }
    }

    fn forward(&self, x: &Tensor, edge_index: &Tensor) -> Tensor {
        let n = x.size()[0];
        let device = x.device();
        let loops = Tensor::arange(n, (Kind::Int64, device));
        let src = Tensor::cat(&[edge_index.get(0), loops.shallow_clone()], 0);
        let dst = Tensor::cat(&[edge_index.get(1), loops], 0);

        let ones = Tensor::ones([src.size()[0]], (Kind::Float, device));
        let deg = Tensor::zeros([n], (Kind::Float, device)).index_add(0, &dst, &ones);
        let inv_sqrt = deg.rsqrt();
        let norm = inv_sqrt.index_select(0, &src) * inv_sqrt.index_select(0, &dst);

        let h = self.lin.forward(x);
        let messages = h.index_select(0, &src) * norm.unsqueeze(-1);
        h.zeros_like().index_add(0, &dst, &messages) + &self.bias
    }
}

/// Substrate and request encoder shared by the actor and the critic layout.
#[derive(Debug)]
struct Encoder {
    p_conv1: GcnConv,
    p_conv2: GcnConv,
    p_norm: Option<nn::BatchNorm>,
    v_lin: nn::Linear,
    dropout_prob: f64,
}

/// Encoded batch: substrate nodes `[B, n_p, d]`, virtual nodes `[B, n_v, d]`
/// and the current virtual node `[B, d]`.
struct Encoded {
    p_nodes: Tensor,
    v_nodes: Tensor,
    curr: Tensor,
}

impl Encoder {
    fn new(p: nn::Path, config: &ActorCriticConfig) -> Self {
        let d = config.embedding_dim as i64;
        Self {
            p_conv1: GcnConv::new(&p / "p_conv1", config.p_net_feature_dim as i64, d),
            p_conv2: GcnConv::new(&p / "p_conv2", d, d),
            p_norm: config
                .batch_norm
                .then(|| nn::batch_norm1d(&p / "p_norm", d, Default::default())),
            v_lin: nn::linear(&p / "v_lin", config.v_net_feature_dim as i64, d, Default::default()),
            dropout_prob: config.dropout_prob,
        }
    }

    fn forward_t(&self, batch: &TensorBatch, train: bool) -> Encoded {
        let b = batch.len() as i64;
        let n_p = batch.num_p_nodes as i64;

        let mut h = self
            .p_conv1
            .forward(&batch.p_net.x, &batch.p_net.edge_index)
            .relu();
        h = self.p_conv2.forward(&h, &batch.p_net.edge_index).relu();
        if let Some(norm) = &self.p_norm {
            h = norm.forward_t(&h, train);
        }
        let p_nodes = h.dropout(self.dropout_prob, train).view([b, n_p, -1]);

        let v_nodes = self.v_lin.forward(&batch.v_net_x).relu();
        let d = v_nodes.size()[2];
        let index = batch.curr_v_node_id.view([b, 1, 1]).expand([b, 1, d], false);
        let curr = v_nodes.gather(1, &index, false).squeeze_dim(1);

        Encoded {
            p_nodes,
            v_nodes,
            curr,
        }
    }
}

#[derive(Debug)]
struct ActorHead {
    encoder: Encoder,
    fuse: nn::Linear,
    score: nn::Linear,
}

impl ActorHead {
    fn new(p: nn::Path, config: &ActorCriticConfig) -> Self {
        let d = config.embedding_dim as i64;
        Self {
            encoder: Encoder::new(&p / "encoder", config),
            fuse: nn::linear(&p / "fuse", d, d, Default::default()),
            score: nn::linear(&p / "score", d, 1, Default::default()),
        }
    }

    /// Masked logits `[B, n_p]`.
    fn forward_t(&self, batch: &TensorBatch, train: bool) -> Tensor {
        let enc = self.encoder.forward_t(batch, train);
        let joint = (enc.p_nodes + enc.curr.unsqueeze(1)).apply(&self.fuse).relu();
        let logits = joint.apply(&self.score).squeeze_dim(-1);
        logits.masked_fill(&batch.action_mask.le(0.5), MASKED_LOGIT)
    }
}

#[derive(Debug)]
struct CriticHead {
    encoder: Encoder,
    hidden: nn::Linear,
    value: nn::Linear,
}

impl CriticHead {
    fn new(p: nn::Path, config: &ActorCriticConfig) -> Self {
        let d = config.embedding_dim as i64;
        Self {
            encoder: Encoder::new(&p / "encoder", config),
            hidden: nn::linear(&p / "hidden", 3 * d, d, Default::default()),
            value: nn::linear(&p / "value", d, 1, Default::default()),
        }
    }

    /// State values `[B]`.
    fn forward_t(&self, batch: &TensorBatch, train: bool) -> Tensor {
        let enc = self.encoder.forward_t(batch, train);
        let p_pool = enc.p_nodes.mean_dim([1].as_slice(), false, Kind::Float);
        let v_pool = enc.v_nodes.mean_dim([1].as_slice(), false, Kind::Float);
        Tensor::cat(&[p_pool, v_pool, enc.curr], 1)
            .apply(&self.hidden)
            .relu()
            .apply(&self.value)
            .squeeze_dim(-1)
    }
}

/// Actions sampled (or chosen greedily) for a batch, without gradient.
#[derive(Debug)]
pub struct ActOutput {
    /// Chosen physical nodes `[B]` (int64).
    pub actions: Tensor,
    /// Log-probabilities of the chosen actions `[B]`.
    pub log_probs: Tensor,
    /// State values `[B]`.
    pub values: Tensor,
}

/// Actor-critic policy over physical nodes.
#[derive(Debug)]
pub struct ActorCritic {
    vs: nn::VarStore,
    config: ActorCriticConfig,
    actor: ActorHead,
    critic: CriticHead,
}

impl ActorCritic {
    /// Creates a randomly initialized policy on `device`.
    pub fn new(config: ActorCriticConfig, device: Device) -> Self {
        let vs = nn::VarStore::new(device);
        let root = vs.root();
        let actor = ActorHead::new(&root / "actor", &config);
        let critic = CriticHead::new(&root / "critic", &config);
        Self {
            vs,
            config,
            actor,
            critic,
        }
    }

    pub fn config(&self) -> &ActorCriticConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.vs.device()
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }

    /// Independent deep copy with the same architecture and values.
    pub fn fork(&self) -> Result<Self, TchError> {
        let mut other = Self::new(self.config.clone(), self.device());
        other.vs.copy(&self.vs)?;
        Ok(other)
    }

    /// Masked action logits `[B, n_p]` and state values `[B]`.
    pub fn forward_t(&self, batch: &TensorBatch, train: bool) -> (Tensor, Tensor) {
        (
            self.actor.forward_t(batch, train),
            self.critic.forward_t(batch, train),
        )
    }

    /// Picks one action per observation, sampling unless `greedy`.
    pub fn act(&self, batch: &TensorBatch, greedy: bool) -> ActOutput {
        tch::no_grad(|| {
            let (logits, values) = self.forward_t(batch, false);
            let log_probs = logits.log_softmax(-1, Kind::Float);
            let actions = if greedy {
                log_probs.argmax(-1, false)
            } else {
                log_probs.exp().multinomial(1, true).squeeze_dim(-1)
            };
            let chosen = log_probs
                .gather(-1, &actions.unsqueeze(-1), false)
                .squeeze_dim(-1);
            ActOutput {
                actions,
                log_probs: chosen,
                values,
            }
        })
    }

    /// Log-probabilities of `actions`, policy entropy and state values, with
    /// gradient. All outputs have shape `[B]`.
    pub fn evaluate_actions(&self, batch: &TensorBatch, actions: &Tensor, train: bool) -> (Tensor, Tensor, Tensor) {
        let (logits, values) = self.forward_t(batch, train);
        let log_probs = logits.log_softmax(-1, Kind::Float);
        let chosen = log_probs
            .gather(-1, &actions.unsqueeze(-1), false)
            .squeeze_dim(-1);
        let entropy = -(log_probs.exp() * &log_probs).sum_dim_intlist([-1].as_slice(), false, Kind::Float);
        (chosen, entropy, values)
    }

    /// All variables (trainable and running statistics) keyed by name.
    ///
    /// The tensors share storage with the policy.
    pub fn named_parameters(&self) -> BTreeMap<String, Tensor> {
        self.vs.variables().into_iter().collect()
    }

    /// Trainable variables keyed by name; shares storage with the policy.
    pub fn trainable_parameters(&self) -> BTreeMap<String, Tensor> {
        self.vs
            .variables()
            .into_iter()
            .filter(|(_, t)| t.requires_grad())
            .collect()
    }

    /// Checks that `values` holds exactly this policy's variables with matching shapes.
    pub fn check_named(&self, values: &BTreeMap<String, Tensor>) -> Result<(), CheckpointError> {
        let own = self.named_parameters();
        for (name, var) in &own {
            let value = values
                .get(name)
                .ok_or_else(|| CheckpointError::MissingEntry(name.clone()))?;
            if value.size() != var.size() {
                return Err(CheckpointError::ShapeMismatch {
                    name: name.clone(),
                    expected: var.size(),
                    found: value.size(),
                });
            }
        }
        if let Some(name) = values.keys().find(|k| !own.contains_key(*k)) {
            return Err(CheckpointError::UnexpectedEntry(name.clone()));
        }
        Ok(())
    }

    /// Overwrites every variable with the value of the same name.
    ///
    /// Nothing is written unless [`ActorCritic::check_named`] succeeds.
    pub fn load_named(&mut self, values: &BTreeMap<String, Tensor>) -> Result<(), CheckpointError> {
        self.check_named(values)?;
        tch::no_grad(|| {
            for (name, mut var) in self.named_parameters() {
                if let Some(value) = values.get(&name) {
                    var.copy_(value);
                }
            }
        });
        Ok(())
    }

    /// True if both policies hold identical variable values.
    pub fn parameters_equal(&self, other: &ActorCritic) -> bool {
        let mine = self.named_parameters();
        let theirs = other.named_parameters();
        mine.len() == theirs.len()
            && mine
                .iter()
                .all(|(name, t)| theirs.get(name).is_some_and(|o| t.equal(o)))
    }

    /// Deep copies of all variables.
    pub fn snapshot(&self) -> BTreeMap<String, Tensor> {
        self.named_parameters()
            .into_iter()
            .map(|(name, t)| (name, t.detach().copy()))
            .collect()
    }
}
