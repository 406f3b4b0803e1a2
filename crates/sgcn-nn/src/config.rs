//! Layer configuration.

use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use sgcn_core::{Error, Result};

/// Nonlinearity applied to the aggregated node features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    /// No nonlinearity.
    #[default]
    Identity,
    Relu,
    Tanh,
    Sigmoid,
    Gelu,
}

impl Activation {
    pub fn apply(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Activation::Identity => Ok(xs.clone()),
            Activation::Relu => xs.relu(),
            Activation::Tanh => xs.tanh(),
            Activation::Sigmoid => candle_nn::ops::sigmoid(xs),
            Activation::Gelu => xs.gelu(),
        }
    }
}

/// Which edges feed the gate's linear score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateScope {
    /// Only edges carrying label 0 (the self label).
    #[default]
    SelfLabel,
    /// Every edge label contributes through its own gate kernel column.
    AllLabels,
}

/// Configuration for [`GatedGcnConv`](crate::GatedGcnConv).
///
/// # Example
///
/// ```rust
/// use sgcn_nn::{Activation, GcnConfig};
///
/// let config = GcnConfig {
///     units: Some(64),
///     activation: Activation::Relu,
///     edge_labels_num: Some(3),
///     bias_labels_num: Some(40),
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcnConfig {
    /// Output dimension. Defaults to the input embedding size.
    pub units: Option<usize>,
    pub activation: Activation,
    /// Multiply every (vertex, neighbor) contribution by a learned gate.
    pub gate: bool,
    /// Add the label-dependent bias term (requires bias-label input).
    pub use_bias: bool,
    /// Vertex count, used when the input shape does not provide one.
    pub vertices_num: Option<usize>,
    /// Edge label count. Required when `sparse_graph` is set.
    pub edge_labels_num: Option<usize>,
    /// Bias label count. Required when `sparse_graph` and `use_bias` are set.
    pub bias_labels_num: Option<usize>,
    /// Graph inputs arrive as [`SparseTensor`](sgcn_core::SparseTensor)s
    /// rather than dense tensors.
    pub sparse_graph: bool,
    pub gate_scope: GateScope,
}

impl Default for GcnConfig {
    fn default() -> Self {
        Self {
            units: None,
            activation: Activation::Identity,
            gate: true,
            use_bias: true,
            vertices_num: None,
            edge_labels_num: None,
            bias_labels_num: None,
            sparse_graph: true,
            gate_scope: GateScope::SelfLabel,
        }
    }
}

impl GcnConfig {
    /// Check the settings that can be verified without seeing an input.
    pub fn validate(&self) -> Result<()> {
        if self.units == Some(0) {
            return Err(Error::InvalidConfig("units must be positive".into()));
        }
        if self.vertices_num == Some(0) {
            return Err(Error::InvalidConfig("vertices_num must be positive".into()));
        }
        if self.sparse_graph && !matches!(self.edge_labels_num, Some(n) if n > 0) {
            return Err(Error::InvalidConfig(
                "edge_labels_num must be passed if graph is sparsely represented".into(),
            ));
        }
        if self.sparse_graph && self.use_bias && !matches!(self.bias_labels_num, Some(n) if n > 0) {
            return Err(Error::InvalidConfig(
                "bias_labels_num must be passed if graph is sparsely represented".into(),
            ));
        }
        Ok(())
    }
}
