//! Gated graph convolution over labeled sequence graphs.
//!
//! Vertices are sequence positions; edges carry a label (for example self,
//! left and right neighbor, or a dependency relation) and each label owns its
//! own linear map. A learned gate scales every (vertex, neighbor) contribution.
//!
//! ```text
//! h'_i = act( sum_j g_ij * ( sum_l A_ijl W_l h_j + sum_k B_ijk b_k ) )
//! ```
//!
//! Graphs can be passed sparsely ([`SparseTensor`](sgcn_core::SparseTensor))
//! or densely (`candle_core::Tensor`); both paths compute the same function.
//!
//! # Example
//!
//! ```rust
//! use candle_core::{DType, Device, Tensor};
//! use candle_nn::{VarBuilder, VarMap};
//! use sgcn_core::SparseTensor;
//! use sgcn_nn::{GatedGcnConv, GcnConfig};
//!
//! # fn main() -> sgcn_core::Result<()> {
//! let device = Device::Cpu;
//! let varmap = VarMap::new();
//! let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
//!
//! let gcn = GatedGcnConv::new(
//!     GcnConfig {
//!         units: Some(8),
//!         edge_labels_num: Some(3),
//!         use_bias: false,
//!         ..Default::default()
//!     },
//!     vb,
//! );
//!
//! // batch 1, 2 vertices: self loops plus 1 -> 0 as "left"
//! let edges = SparseTensor::from_entries(
//!     vec![1, 2, 2, 3],
//!     vec![(vec![0, 0, 0, 0], 1.0), (vec![0, 1, 0, 1], 1.0), (vec![0, 1, 1, 0], 1.0)],
//! )?;
//! let x = Tensor::randn(0f32, 1f32, (1, 2, 4), &device)?;
//! let h = gcn.forward(&x, (&edges).into(), None)?;
//! assert_eq!(h.dims(), &[1, 2, 8]);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod conv;
pub mod stack;

pub use config::{Activation, GateScope, GcnConfig};
pub use conv::{GatedGcnConv, GcnDims, GcnParams, GraphInput, InputShape};
pub use stack::GcnStack;
