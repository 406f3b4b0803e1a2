//! Gated, label-aware graph convolution.
//!
//! Implements the syntactic GCN of Marcheggiani & Titov over a labeled graph
//! whose vertices are sequence positions:
//!
//! ```text
//! h'_i = act( sum_j g_ij * ( sum_l A_ijl W_l h_j  +  sum_k B_ijk b_k ) )
//! g_ij = sigmoid( sum_l A_ijl (h_j . w_l)  +  sum_k B_ijk c_k )
//! ```
//!
//! Where:
//! - `A` is the edge tensor `[batch, V, V, edge_labels]` (vertex `i`, neighbor `j`)
//! - `B` is the bias-label tensor `[batch, V, V, bias_labels]`
//! - `W` (kernel) is `[embed, units, edge_labels]`, `w` (gate kernel) `[embed, edge_labels]`
//! - `b` (bias) is `[units, bias_labels]`, `c` (gate bias) `[bias_labels]`
//!
//! Only label-0 edges enter the gate score under [`GateScope::SelfLabel`].
//!
//! # Sparse and Dense Paths
//!
//! Graph inputs are either [`SparseTensor`]s or dense tensors. The sparse path
//! gathers one projected row per stored edge and scatter-adds it into its
//! (vertex, neighbor) slot; the dense path multiplies and reduces. Both compute
//! the same function, which the tests check against each other.
//!
//! # Reference
//!
//! Marcheggiani & Titov, "Encoding Sentences with Graph Convolutional Networks
//! for Semantic Role Labeling", EMNLP 2017.

use candle_core::Tensor;
use candle_nn::{Init, VarBuilder};
use once_cell::sync::OnceCell;
use sgcn_core::{index_tensor, sparse_tensordot, Axes, Error, Result, SparseTensor};

use crate::config::{GateScope, GcnConfig};

/// Graph structure handed to a GCN layer.
#[derive(Debug, Clone, Copy)]
pub enum GraphInput<'a> {
    Sparse(&'a SparseTensor),
    Dense(&'a Tensor),
}

impl<'a> From<&'a SparseTensor> for GraphInput<'a> {
    fn from(t: &'a SparseTensor) -> Self {
        GraphInput::Sparse(t)
    }
}

impl<'a> From<&'a Tensor> for GraphInput<'a> {
    fn from(t: &'a Tensor) -> Self {
        GraphInput::Dense(t)
    }
}

impl GraphInput<'_> {
    pub fn dims(&self) -> Vec<usize> {
        match self {
            GraphInput::Sparse(t) => t.shape().to_vec(),
            GraphInput::Dense(t) => t.dims().to_vec(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self, GraphInput::Sparse(_))
    }
}

/// Shape information known when a layer is built.
///
/// Missing entries fall back to the layer's [`GcnConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputShape {
    pub vertices: Option<usize>,
    pub embed: Option<usize>,
    /// Last dimension of a dense edge input.
    pub edge_labels: Option<usize>,
    /// Last dimension of a dense bias-label input.
    pub bias_labels: Option<usize>,
}

/// Resolved layer dimensions, fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcnDims {
    pub vertices: usize,
    pub embed: usize,
    pub units: usize,
    pub edge_labels: usize,
    pub bias_labels: Option<usize>,
}

/// Learned parameters of one layer.
#[derive(Debug, Clone)]
pub struct GcnParams {
    pub dims: GcnDims,
    /// `[embed, units, edge_labels]`
    pub kernel: Tensor,
    /// `[embed, edge_labels]`
    pub gate_kernel: Tensor,
    /// `[units, bias_labels]`
    pub bias: Option<Tensor>,
    /// `[bias_labels]`
    pub gate_bias: Option<Tensor>,
}

fn glorot(fan_in: usize, fan_out: usize) -> Init {
    let limit = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -limit,
        up: limit,
    }
}

/// Gated graph convolution layer with per-label kernels.
///
/// Parameters are created on the first call (or an explicit [`build`]) once
/// the vertex count and embedding size are known, and reused afterwards.
///
/// [`build`]: GatedGcnConv::build
pub struct GatedGcnConv {
    config: GcnConfig,
    vb: VarBuilder<'static>,
    params: OnceCell<GcnParams>,
}

impl GatedGcnConv {
    /// Create an unbuilt layer.
    ///
    /// # Arguments
    /// - `config`: Layer configuration
    /// - `vb`: Variable builder the parameters are drawn from
    pub fn new(config: GcnConfig, vb: VarBuilder<'static>) -> Self {
        Self {
            config,
            vb,
            params: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &GcnConfig {
        &self.config
    }

    pub fn is_built(&self) -> bool {
        self.params.get().is_some()
    }

    /// Parameters, if the layer has been built.
    pub fn params(&self) -> Option<&GcnParams> {
        self.params.get()
    }

    /// Allocate parameters for the given input shape.
    ///
    /// Building twice is a no-op returning the existing parameters.
    ///
    /// # Errors
    /// [`Error::InvalidConfig`] if the embedding size or vertex count is
    /// unknown, or if a label count cannot be determined.
    pub fn build(&self, input: InputShape) -> Result<&GcnParams> {
        self.params.get_or_try_init(|| self.create_params(input))
    }

    fn resolve_dims(&self, input: InputShape) -> Result<GcnDims> {
        let embed = input.embed.filter(|&e| e > 0).ok_or_else(|| {
            Error::InvalidConfig("the embedding size of the inputs to GCN should be defined".into())
        })?;
        let vertices = input
            .vertices
            .or(self.config.vertices_num)
            .filter(|&v| v > 0)
            .ok_or_else(|| {
                Error::InvalidConfig("the number of vertices of the inputs to GCN should be defined".into())
            })?;

        let edge_labels = if self.config.sparse_graph {
            self.config.edge_labels_num.filter(|&n| n > 0).ok_or_else(|| {
                Error::InvalidConfig(
                    "edge_labels_num must be passed if graph is sparsely represented".into(),
                )
            })?
        } else {
            input.edge_labels.filter(|&n| n > 0).ok_or_else(|| {
                Error::InvalidConfig("the last dimension of the edge inputs should be defined".into())
            })?
        };

        let bias_labels = if !self.config.use_bias {
            None
        } else if self.config.sparse_graph {
            Some(self.config.bias_labels_num.filter(|&n| n > 0).ok_or_else(|| {
                Error::InvalidConfig(
                    "bias_labels_num must be passed if graph is sparsely represented".into(),
                )
            })?)
        } else {
            Some(input.bias_labels.filter(|&n| n > 0).ok_or_else(|| {
                Error::InvalidConfig("the last dimension of the bias inputs should be defined".into())
            })?)
        };

        Ok(GcnDims {
            vertices,
            embed,
            units: self.config.units.unwrap_or(embed),
            edge_labels,
            bias_labels,
        })
    }

    fn create_params(&self, input: InputShape) -> Result<GcnParams> {
        let dims = self.resolve_dims(input)?;
        let vb = &self.vb;

        let kernel = vb.get_with_hints(
            (dims.embed, dims.units, dims.edge_labels),
            "kernel",
            glorot(dims.embed, dims.units),
        )?;
        let gate_kernel = vb.get_with_hints(
            (dims.embed, dims.edge_labels),
            "gate_kernel",
            glorot(dims.embed, dims.edge_labels),
        )?;
        let (bias, gate_bias) = match dims.bias_labels {
            Some(k) => (
                Some(vb.get_with_hints((dims.units, k), "bias", Init::Const(0.0))?),
                Some(vb.get_with_hints(k, "gate_bias", Init::Const(0.0))?),
            ),
            None => (None, None),
        };

        tracing::debug!(
            vertices = dims.vertices,
            embed = dims.embed,
            units = dims.units,
            edge_labels = dims.edge_labels,
            bias_labels = ?dims.bias_labels,
            sparse = self.config.sparse_graph,
            gate = self.config.gate,
            "built GCN layer"
        );

        Ok(GcnParams {
            dims,
            kernel,
            gate_kernel,
            bias,
            gate_bias,
        })
    }

    /// Build if needed, then check the call's shapes against the built dims.
    fn prepare(
        &self,
        x: &Tensor,
        edges: GraphInput<'_>,
        labels: Option<GraphInput<'_>>,
    ) -> Result<&GcnParams> {
        let (batch, vertices, embed) = x.dims3()?;
        if edges.is_sparse() != self.config.sparse_graph
            || labels.is_some_and(|l| l.is_sparse() != self.config.sparse_graph)
        {
            return Err(Error::InvalidConfig(format!(
                "layer expects {} graph inputs",
                if self.config.sparse_graph { "sparse" } else { "dense" }
            )));
        }

        let edge_dims = edges.dims();
        let label_dims = labels.map(|l| l.dims());
        let params = self.build(InputShape {
            vertices: Some(vertices),
            embed: Some(embed),
            edge_labels: edge_dims.last().copied(),
            bias_labels: label_dims.as_ref().and_then(|d| d.last().copied()),
        })?;
        let dims = params.dims;

        if vertices != dims.vertices || embed != dims.embed {
            return Err(Error::shape(
                "GCN node features",
                &[batch, dims.vertices, dims.embed],
                x.dims(),
            ));
        }
        let expected_edges = [batch, dims.vertices, dims.vertices, dims.edge_labels];
        if edge_dims != expected_edges {
            return Err(Error::shape("GCN edges", &expected_edges, &edge_dims));
        }
        if let Some(k) = dims.bias_labels {
            let expected_labels = [batch, dims.vertices, dims.vertices, k];
            match label_dims {
                Some(got) if got == expected_labels => {}
                Some(got) => return Err(Error::shape("GCN bias labels", &expected_labels, &got)),
                None => {
                    return Err(Error::InvalidConfig(
                        "bias labels must be passed when use_bias is set".into(),
                    ))
                }
            }
        }
        Ok(params)
    }

    /// Forward pass.
    ///
    /// # Arguments
    /// - `x`: Node features `[batch, V, embed]`
    /// - `edges`: Edge structure `[batch, V, V, edge_labels]`
    /// - `labels`: Bias-label structure `[batch, V, V, bias_labels]`, required
    ///   when the layer uses a bias
    ///
    /// # Returns
    /// Node features `[batch, V, units]`
    pub fn forward(
        &self,
        x: &Tensor,
        edges: GraphInput<'_>,
        labels: Option<GraphInput<'_>>,
    ) -> Result<Tensor> {
        let params = self.prepare(x, edges, labels)?;
        let (batch, v, _) = x.dims3()?;

        // [batch, V, V, units]
        let mut outputs = match edges {
            GraphInput::Sparse(e) => sparse_kernel(x, e, params)?,
            GraphInput::Dense(e) => dense_kernel(x, e, params)?,
        };

        if let (Some(bias), Some(labels)) = (&params.bias, labels) {
            let labeled_bias = match labels {
                GraphInput::Sparse(l) => sparse_tensordot(l, bias, Axes::Pairs(vec![-1], vec![-1]))?,
                GraphInput::Dense(l) => dense_labeled(l, bias, x)?,
            };
            outputs = (outputs + labeled_bias)?;
        }

        if self.config.gate {
            let gates = self.gate_values(x, edges, labels, params)?;
            outputs = outputs.broadcast_mul(&gates.unsqueeze(3)?)?;
        }

        let outputs = outputs.sum(2)?;
        tracing::trace!(batch, vertices = v, out = ?outputs.dims(), "GCN forward");
        Ok(self.config.activation.apply(&outputs)?)
    }

    /// Gate values `[batch, V, V]` for every (vertex, neighbor) pair.
    ///
    /// Pairs with no edge get `sigmoid(bias term)`; their contribution is
    /// zero regardless since nothing is gated there.
    pub fn gates(
        &self,
        x: &Tensor,
        edges: GraphInput<'_>,
        labels: Option<GraphInput<'_>>,
    ) -> Result<Tensor> {
        let params = self.prepare(x, edges, labels)?;
        self.gate_values(x, edges, labels, params)
    }

    fn gate_values(
        &self,
        x: &Tensor,
        edges: GraphInput<'_>,
        labels: Option<GraphInput<'_>>,
        params: &GcnParams,
    ) -> Result<Tensor> {
        let (batch, v, e) = x.dims3()?;
        let l = params.dims.edge_labels;
        // per-vertex, per-label gate score: [batch * V, edge_labels]
        let xw = x.reshape((batch * v, e))?.matmul(&params.gate_kernel)?;

        let mut scores = match edges {
            GraphInput::Sparse(edges) => {
                let edges = match self.config.gate_scope {
                    GateScope::SelfLabel => edges.filter(3, |label| label == 0)?,
                    GateScope::AllLabels => edges.clone(),
                };
                let xw = xw.reshape((batch * v * l, 1))?;
                scatter_edges(&xw, &edges, v, l)?.reshape((batch, v, v))?
            }
            GraphInput::Dense(edges) => {
                let edges = edges.to_dtype(x.dtype())?;
                let (edges, xw) = match self.config.gate_scope {
                    GateScope::SelfLabel => (edges.narrow(3, 0, 1)?, xw.narrow(1, 0, 1)?),
                    GateScope::AllLabels => (edges, xw),
                };
                let width = xw.dim(1)?;
                edges
                    .broadcast_mul(&xw.reshape((batch, 1, v, width))?)?
                    .sum(3)?
            }
        };

        if let (Some(gate_bias), Some(labels)) = (&params.gate_bias, labels) {
            let biases = match labels {
                GraphInput::Sparse(l) => {
                    sparse_tensordot(l, gate_bias, Axes::Pairs(vec![-1], vec![-1]))?
                }
                GraphInput::Dense(l) => l
                    .to_dtype(x.dtype())?
                    .broadcast_mul(gate_bias)?
                    .sum(3)?,
            };
            scores = (scores + biases)?;
        }

        Ok(candle_nn::ops::sigmoid(&scores)?)
    }
}

/// Kernel term through the sparse edge list: `[batch, V, V, units]`.
///
/// Each stored edge `(b, i, j, l)` gathers neighbor `j`'s projection under
/// kernel `l`, scales it by the edge value and adds it into slot `(b, i, j)`.
/// Summing the scatter over labels is the segment-sum over the label axis.
fn sparse_kernel(x: &Tensor, edges: &SparseTensor, params: &GcnParams) -> Result<Tensor> {
    let (batch, v, e) = x.dims3()?;
    let (u, l) = (params.dims.units, params.dims.edge_labels);

    // rows indexed by (b * V + vertex) * L + label
    let xw = x
        .reshape((batch * v, e))?
        .matmul(&params.kernel.reshape((e, u * l))?)?
        .reshape((batch * v, u, l))?
        .transpose(1, 2)?
        .contiguous()?
        .reshape((batch * v * l, u))?;

    if edges.nnz() == 0 {
        tracing::warn!(batch, vertices = v, "GCN called on a graph without edges");
    }
    Ok(scatter_edges(&xw, edges, v, l)?.reshape((batch, v, v, u))?)
}

/// Move per-(vertex, label) rows along the edges of a `[batch, V, V, L]` graph.
///
/// `rows` is indexed by `(b * V + vertex) * L + label`. Edge `(b, i, j, l)`
/// adds `value * rows[(b, j, l)]` to output row `(b * V + i) * V + j`, so the
/// result is `[batch * V * V, width]` with labels already summed.
fn scatter_edges(rows: &Tensor, edges: &SparseTensor, v: usize, l: usize) -> Result<Tensor> {
    let batch = edges.shape()[0];
    let width = rows.dim(1)?;
    let out = Tensor::zeros((batch * v * v, width), rows.dtype(), rows.device())?;
    if edges.nnz() == 0 {
        return Ok(out);
    }
    let (sources, targets): (Vec<usize>, Vec<usize>) = edges
        .iter()
        .map(|(c, _)| {
            let (b, i, j, label) = (c[0], c[1], c[2], c[3]);
            ((b * v + j) * l + label, (b * v + i) * v + j)
        })
        .unzip();
    let gathered = rows
        .index_select(&index_tensor(sources, rows.device())?, 0)?
        .broadcast_mul(&edges.values_tensor(rows.dtype(), rows.device())?)?;
    Ok(out.index_add(&index_tensor(targets, rows.device())?, &gathered, 0)?)
}

/// Kernel term through a dense edge tensor: `[batch, V, V, units]`.
fn dense_kernel(x: &Tensor, edges: &Tensor, params: &GcnParams) -> Result<Tensor> {
    let (batch, v, e) = x.dims3()?;
    let (u, l) = (params.dims.units, params.dims.edge_labels);

    // neighbor axis in position 2, broadcast over the vertex axis
    let xw = x
        .reshape((batch * v, e))?
        .matmul(&params.kernel.reshape((e, u * l))?)?
        .reshape((batch, 1, v, u, l))?;
    let edges = edges.to_dtype(x.dtype())?.reshape((batch, v, v, 1, l))?;
    Ok(edges.broadcast_mul(&xw)?.sum(4)?)
}

/// Bias term through a dense label tensor: `[batch, V, V, units]`.
fn dense_labeled(labels: &Tensor, bias: &Tensor, x: &Tensor) -> Result<Tensor> {
    let (batch, v, w, k) = labels.dims4()?;
    let units = bias.dim(0)?;
    Ok(labels
        .to_dtype(x.dtype())?
        .reshape((batch * v * w, k))?
        .matmul(&bias.t()?.contiguous()?)?
        .reshape((batch, v, w, units))?)
}
