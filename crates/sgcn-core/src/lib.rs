//! Sparse tensor primitives for graph-structured decoders.
//!
//! `sgcn-core` holds the pieces that the GCN layers and the decoder build on:
//! a validated coordinate-format [`SparseTensor`], sparse-dense matrix
//! products, and a generalized sparse-dense tensor contraction.
//!
//! # Modules
//!
//! - [`sparse`]: COO tensors with structural `transpose`/`reshape`/`select`/`filter`
//! - [`matmul`]: 2-D and batched sparse-dense matmul
//! - [`tensordot`]: `numpy.tensordot`-style contraction with a sparse lhs
//!
//! # Example
//!
//! ```rust
//! use candle_core::{Device, Tensor};
//! use sgcn_core::{sparse_tensordot, Axes, SparseTensor};
//!
//! # fn main() -> sgcn_core::Result<()> {
//! let device = Device::Cpu;
//! // (batch=1, vertices=2, vertices=2, labels=2)
//! let labels = SparseTensor::from_entries(
//!     vec![1, 2, 2, 2],
//!     vec![(vec![0, 0, 1, 1], 1.0), (vec![0, 1, 0, 0], 1.0)],
//! )?;
//! // one bias vector of 3 units per label: (units, labels)
//! let bias = Tensor::ones((3, 2), candle_core::DType::F32, &device)?;
//! let out = sparse_tensordot(&labels, &bias, Axes::Pairs(vec![-1], vec![-1]))?;
//! assert_eq!(out.dims(), &[1, 2, 2, 3]);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod matmul;
pub mod sparse;
pub mod tensordot;

pub use error::{Error, Result};
pub use matmul::{batch_sparse_matmul, sparse_dense_matmul};
pub use sparse::{index_tensor, SparseTensor};
pub use tensordot::{sparse_tensordot, Axes};
