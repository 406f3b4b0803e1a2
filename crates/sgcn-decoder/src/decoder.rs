//! Graph-aware decoder control flow at training time.
//!
//! With a target graph, every sentence is decoded once per prefix length in
//! a single parallel pass:
//!
//! 1. Repeat target ids per timestep and hide positions after the prefix.
//! 2. Pad ids and the positional signal to the graph's vertex count.
//! 3. Embed, then run the GCN stack over the expanded graph.
//! 4. Keep the first `T` positions and run the attention stack with the
//!    encoder output and masks repeated to match.
//! 5. Project to the vocabulary and, for [`LossLayout::Squashed`], gather the
//!    diagonal so each position keeps the logits of its own prefix.
//!
//! Without a target graph this is the ordinary causal decoder pass.

use candle_core::{Module, Tensor};
use candle_nn::VarBuilder;
use sgcn_core::{Error, Result};
use sgcn_nn::GcnStack;

use crate::config::{DecoderConfig, LossLayout};
use crate::graph::TargetGraph;
use crate::schedule::{
    causal_mask, causal_target_ids, gather_diagonal, pad_time, positional_signal,
    prefix_attention_mask, repeat_interleave,
};

/// Self-attention, cross-attention and feed-forward layers of the decoder.
pub trait AttentionStack {
    /// # Arguments
    /// - `x`: Decoder states `[N, T, E]`
    /// - `enc_output`: Encoder states `[N, S, E]`
    /// - `self_attn_mask`: Broadcastable to `[N, 1, T, T]`, `1.0` = visible
    /// - `cross_attn_mask`: Broadcastable to `[N, 1, T, S]`, `1.0` = visible
    ///
    /// # Returns
    /// Decoder states `[N, T, E]`
    fn forward(
        &self,
        x: &Tensor,
        enc_output: &Tensor,
        self_attn_mask: &Tensor,
        cross_attn_mask: &Tensor,
    ) -> Result<Tensor>;
}

/// Decoder that threads a target graph through a GCN stack before attention.
///
/// `E` embeds token ids to `[N, T, embedding_size]`, `P` projects decoder
/// states to vocabulary logits.
pub struct GraphDecoder<E, P, A> {
    config: DecoderConfig,
    embedding: E,
    projection: P,
    attention: A,
    gcn: Option<GcnStack>,
}

impl<E: Module, P: Module, A: AttentionStack> GraphDecoder<E, P, A> {
    /// Create a decoder; GCN parameters are drawn from `vb` under `gcn`.
    pub fn new(
        config: DecoderConfig,
        embedding: E,
        projection: P,
        attention: A,
        vb: VarBuilder<'static>,
    ) -> Result<Self> {
        config.validate()?;
        let gcn = if config.target_graph {
            Some(GcnStack::new(
                &config.gcn_config(),
                config.target_gcn_layers,
                config.gcn_residual,
                vb.pp("gcn"),
            )?)
        } else {
            None
        };
        tracing::debug!(
            target_graph = config.target_graph,
            gcn_layers = gcn.as_ref().map_or(0, GcnStack::len),
            vertices = config.vertices_num(),
            loss_layout = ?config.loss_layout,
            "built decoder"
        );
        Ok(Self {
            config,
            embedding,
            projection,
            attention,
            gcn,
        })
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    pub fn gcn(&self) -> Option<&GcnStack> {
        self.gcn.as_ref()
    }

    /// Logits for every target position, decoded in parallel.
    ///
    /// # Arguments
    /// - `target_ids`: Decoder input ids `[B, T]` (already shifted right)
    /// - `enc_output`: Encoder states `[B, S, E]`
    /// - `cross_attn_mask`: Source mask `[B, 1, 1, S]`
    /// - `graph`: Target graph, required when `target_graph` is set
    ///
    /// # Returns
    /// `[B, T, vocab]`, or `[B * T, T, vocab]` for [`LossLayout::PerTimestep`]
    /// with a target graph.
    pub fn decode_at_train(
        &self,
        target_ids: &Tensor,
        enc_output: &Tensor,
        cross_attn_mask: &Tensor,
        graph: Option<&TargetGraph>,
    ) -> Result<Tensor> {
        let (batch, timesteps) = target_ids.dims2()?;
        let enc_batch = enc_output.dim(0)?;
        if enc_batch != batch {
            return Err(Error::shape("encoder output batch", &[batch], &[enc_batch]));
        }

        match (&self.gcn, graph) {
            (Some(gcn), Some(graph)) => {
                self.decode_graph(gcn, target_ids, enc_output, cross_attn_mask, graph)
            }
            (Some(_), None) => Err(Error::InvalidConfig(
                "target_graph is set but no target graph was passed".into(),
            )),
            (None, _) => {
                let device = target_ids.device();
                let signal = positional_signal(timesteps, self.config.embedding_size, device)?;
                let x = self.embed(target_ids, &signal)?;
                let mask = causal_mask(timesteps, device)?;
                let out = self.attention.forward(&x, enc_output, &mask, cross_attn_mask)?;
                Ok(self.projection.forward(&out)?)
            }
        }
    }

    fn embed(&self, ids: &Tensor, signal: &Tensor) -> Result<Tensor> {
        let x = self.embedding.forward(ids)?;
        Ok(x.broadcast_add(&signal.to_dtype(x.dtype())?)?)
    }

    fn decode_graph(
        &self,
        gcn: &GcnStack,
        target_ids: &Tensor,
        enc_output: &Tensor,
        cross_attn_mask: &Tensor,
        graph: &TargetGraph,
    ) -> Result<Tensor> {
        let (batch, timesteps) = target_ids.dims2()?;
        let vertices = self.config.vertices_num();
        let device = target_ids.device();
        if graph.batch_size() != batch || graph.vertices() != vertices {
            return Err(Error::shape(
                "target graph",
                &[batch, vertices, vertices, self.config.edge_labels_num],
                graph.edges().shape(),
            ));
        }

        let expanded = graph.expand(timesteps)?;
        let ids = pad_time(&causal_target_ids(target_ids)?, 1, vertices)?;
        let signal = pad_time(
            &positional_signal(timesteps, self.config.embedding_size, device)?,
            1,
            vertices,
        )?;
        tracing::trace!(batch, timesteps, vertices, ids = ?ids.dims(), "expanded decoder inputs");

        let x = self.embed(&ids, &signal)?;
        let x = gcn
            .forward(
                &x,
                (&expanded.edges).into(),
                expanded.labels.as_ref().map(Into::into),
            )?
            .narrow(1, 0, timesteps)?;

        let enc_output = repeat_interleave(enc_output, timesteps, 0)?;
        let cross_attn_mask = repeat_interleave(cross_attn_mask, timesteps, 0)?;
        let self_attn_mask =
            prefix_attention_mask(batch, timesteps, self.config.sequential, device)?;

        let out = self
            .attention
            .forward(&x, &enc_output, &self_attn_mask, &cross_attn_mask)?;
        let logits = self.projection.forward(&out)?;

        match self.config.loss_layout {
            LossLayout::Squashed => gather_diagonal(&logits),
            LossLayout::PerTimestep => Ok(logits),
        }
    }
}
