//! Decoder configuration.

use serde::{Deserialize, Serialize};
use sgcn_core::{Error, Result};
use sgcn_nn::{Activation, GateScope, GcnConfig};

/// How logits of the timestep-expanded batch are handed to the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossLayout {
    /// Gather one logits row per (sentence, position): `[batch, T, vocab]`.
    #[default]
    Squashed,
    /// Keep every repetition's logits, `[batch * T, T, vocab]`; the loss
    /// targets and mask are expanded to match with
    /// [`expand_loss_targets`](crate::expand_loss_targets).
    PerTimestep,
}

/// Settings of the graph-aware decoder.
///
/// # Example
///
/// ```rust
/// use sgcn_decoder::DecoderConfig;
///
/// let config: DecoderConfig = serde_json::from_str(
///     r#"{"maxlen": 50, "embedding_size": 16, "target_vocab_size": 100,
///         "target_graph": true, "target_labels_num": 40}"#,
/// ).unwrap();
/// assert_eq!(config.vertices_num(), 51);
/// assert!(config.gcn_config().use_bias);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    /// Longest target sequence; the graph has `maxlen + 1` vertices.
    pub maxlen: usize,
    pub embedding_size: usize,
    pub target_vocab_size: usize,
    /// Run the GCN stack over the timestep-expanded target graph.
    pub target_graph: bool,
    pub target_gcn_layers: usize,
    pub target_gcn_gating: bool,
    /// Bias label vocabulary size. `0` disables the label bias.
    pub target_labels_num: usize,
    /// Edge label count (self, left, right).
    pub edge_labels_num: usize,
    pub gcn_residual: bool,
    /// Also apply the causal mask inside every repetition.
    pub sequential: bool,
    pub loss_layout: LossLayout,
    pub gate_scope: GateScope,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            maxlen: 100,
            embedding_size: 512,
            target_vocab_size: 0,
            target_graph: false,
            target_gcn_layers: 1,
            target_gcn_gating: true,
            target_labels_num: 0,
            edge_labels_num: 3,
            gcn_residual: false,
            sequential: false,
            loss_layout: LossLayout::Squashed,
            gate_scope: GateScope::SelfLabel,
        }
    }
}

impl DecoderConfig {
    /// Vertices per graph: every position up to `maxlen`, inclusive.
    pub fn vertices_num(&self) -> usize {
        self.maxlen + 1
    }

    /// Configuration shared by every layer of the target GCN stack.
    pub fn gcn_config(&self) -> GcnConfig {
        GcnConfig {
            units: Some(self.embedding_size),
            activation: Activation::Relu,
            gate: self.target_gcn_gating,
            use_bias: self.target_labels_num > 0,
            vertices_num: Some(self.vertices_num()),
            edge_labels_num: Some(self.edge_labels_num),
            bias_labels_num: (self.target_labels_num > 0).then_some(self.target_labels_num),
            sparse_graph: true,
            gate_scope: self.gate_scope,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.maxlen == 0 {
            return Err(Error::InvalidConfig("maxlen must be positive".into()));
        }
        if self.embedding_size == 0 {
            return Err(Error::InvalidConfig("embedding_size must be positive".into()));
        }
        if self.target_vocab_size == 0 {
            return Err(Error::InvalidConfig("target_vocab_size must be positive".into()));
        }
        if self.target_graph {
            if self.edge_labels_num == 0 {
                return Err(Error::InvalidConfig("edge_labels_num must be positive".into()));
            }
            self.gcn_config().validate()?;
        }
        Ok(())
    }
}
