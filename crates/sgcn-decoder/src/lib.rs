//! Graph-structured Transformer decoding at training time.
//!
//! The target side of a translation is a sequence with a graph over its
//! positions (self, left and right edges, plus optional relation labels).
//! Because the graph seen at position `t` may differ from the one at `t + 1`,
//! every prefix length is decoded as its own copy of the sentence, all in one
//! batched pass, and the logits of each copy's last visible position are
//! gathered back afterwards.
//!
//! # Modules
//!
//! - [`config`]: [`DecoderConfig`] and [`LossLayout`]
//! - [`graph`]: time-indexed [`TargetGraph`]s and their expansion
//! - [`schedule`]: repetition, padding, masks and the diagonal gather
//! - [`decoder`]: [`GraphDecoder`] over an [`AttentionStack`]
//!
//! # Example
//!
//! ```rust
//! use candle_core::{Device, Tensor};
//! use sgcn_decoder::{gather_diagonal, prefix_attention_mask};
//!
//! # fn main() -> sgcn_core::Result<()> {
//! let device = Device::Cpu;
//! // batch 1, 2 timesteps, vocab 3
//! let logits = Tensor::arange(0f32, 12., &device)?.reshape((2, 2, 3))?;
//! let per_position = gather_diagonal(&logits)?;
//! assert_eq!(per_position.to_vec3::<f32>()?, vec![vec![vec![0., 1., 2.], vec![9., 10., 11.]]]);
//!
//! let mask = prefix_attention_mask(1, 2, false, &device)?;
//! assert_eq!(mask.dims(), &[2, 1, 1, 2]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod decoder;
pub mod graph;
pub mod schedule;

pub use config::{DecoderConfig, LossLayout};
pub use decoder::{AttentionStack, GraphDecoder};
pub use graph::{expand_graph, to_batch_major, ExpandedGraph, TargetGraph};
pub use schedule::{
    causal_mask, causal_target_ids, expand_loss_targets, gather_diagonal, pad_time,
    positional_signal, prefix_attention_mask, repeat_interleave, shift_right,
};
