//! Stacked GCN layers over one shared graph.

use candle_core::Tensor;
use candle_nn::VarBuilder;
use sgcn_core::{Error, Result};

use crate::config::GcnConfig;
use crate::conv::{GatedGcnConv, GraphInput};

/// Ordered GCN layers, each consuming the previous layer's node features and
/// the same edge/label structure.
///
/// With `residual` set, every layer's output is added to its input, which
/// requires `units` to equal the input embedding size.
pub struct GcnStack {
    layers: Vec<GatedGcnConv>,
    residual: bool,
}

impl GcnStack {
    /// Build `num_layers` layers from one configuration.
    ///
    /// Parameters of layer `i` live under the `layer_{i}` prefix of `vb`.
    pub fn new(
        config: &GcnConfig,
        num_layers: usize,
        residual: bool,
        vb: VarBuilder<'static>,
    ) -> Result<Self> {
        config.validate()?;
        let layers = (0..num_layers)
            .map(|i| GatedGcnConv::new(config.clone(), vb.pp(format!("layer_{i}"))))
            .collect();
        Ok(Self { layers, residual })
    }

    /// Build from per-layer configurations.
    pub fn from_configs(
        configs: Vec<GcnConfig>,
        residual: bool,
        vb: VarBuilder<'static>,
    ) -> Result<Self> {
        let mut layers = Vec::with_capacity(configs.len());
        for (i, config) in configs.into_iter().enumerate() {
            config.validate()?;
            layers.push(GatedGcnConv::new(config, vb.pp(format!("layer_{i}"))));
        }
        Ok(Self { layers, residual })
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn layers(&self) -> &[GatedGcnConv] {
        &self.layers
    }

    /// Run every layer in order. An empty stack returns `x` unchanged.
    pub fn forward(
        &self,
        x: &Tensor,
        edges: GraphInput<'_>,
        labels: Option<GraphInput<'_>>,
    ) -> Result<Tensor> {
        let mut h = x.clone();
        for (i, layer) in self.layers.iter().enumerate() {
            let out = layer.forward(&h, edges, labels)?;
            h = if self.residual {
                if out.dims() != h.dims() {
                    return Err(Error::shape("residual GCN layer", h.dims(), out.dims()));
                }
                (out + &h)?
            } else {
                out
            };
            tracing::trace!(layer = i, out = ?h.dims(), "GCN stack");
        }
        Ok(h)
    }
}
