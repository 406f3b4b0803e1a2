//! Sparse-dense matrix products.

use candle_core::Tensor;
use rayon::prelude::*;

use crate::sparse::{index_tensor, SparseTensor};
use crate::{Error, Result};

/// Sparse-dense matrix multiplication: `(M, K) x (K, N) -> (M, N)`.
///
/// Each stored entry `(r, c, v)` contributes `v * b[c, :]` to output row `r`.
/// Implemented as a row gather followed by a scatter-add, so gradients flow
/// into `b`.
pub fn sparse_dense_matmul(a: &SparseTensor, b: &Tensor) -> Result<Tensor> {
    if a.rank() != 2 {
        return Err(Error::shape("sparse_dense_matmul lhs rank", &[2], &[a.rank()]));
    }
    let (k, n) = b.dims2()?;
    let (m, ka) = (a.shape()[0], a.shape()[1]);
    if ka != k {
        return Err(Error::shape("sparse_dense_matmul inner dim", &[ka], &[k]));
    }

    let out = Tensor::zeros((m, n), b.dtype(), b.device())?;
    if a.nnz() == 0 {
        return Ok(out);
    }

    let (rows, cols): (Vec<usize>, Vec<usize>) = a.iter().map(|(c, _)| (c[0], c[1])).unzip();
    let rows = index_tensor(rows, b.device())?;
    let cols = index_tensor(cols, b.device())?;
    let values = a.values_tensor(b.dtype(), b.device())?;

    let contributions = b.index_select(&cols, 0)?.broadcast_mul(&values)?;
    Ok(out.index_add(&rows, &contributions, 0)?)
}

/// Batched sparse-dense matmul: `(B, M, N) x (B, N, K) -> (B, M, K)`.
///
/// A rank-2 `b` of shape `(N, K)` is shared by every batch slice. Slices are
/// independent, so they are multiplied in parallel and stacked in batch order.
pub fn batch_sparse_matmul(a: &SparseTensor, b: &Tensor) -> Result<Tensor> {
    if a.rank() != 3 {
        return Err(Error::shape("batch_sparse_matmul lhs rank", &[3], &[a.rank()]));
    }
    let batch = a.shape()[0];
    let shared = match b.rank() {
        2 => true,
        3 => {
            if b.dim(0)? != batch {
                return Err(Error::shape("batch_sparse_matmul batch", &[batch], &[b.dim(0)?]));
            }
            false
        }
        rank => return Err(Error::shape("batch_sparse_matmul rhs rank", &[3], &[rank])),
    };

    if batch == 0 {
        let k = b.dim(b.rank() - 1)?;
        return Ok(Tensor::zeros((0, a.shape()[1], k), b.dtype(), b.device())?);
    }

    let slices = a.split_outer()?;
    let products = slices
        .par_iter()
        .enumerate()
        .map(|(i, slice)| {
            let rhs = if shared { b.clone() } else { b.get(i)? };
            sparse_dense_matmul(slice, &rhs)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Tensor::stack(&products, 0)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_sparse_dense_matmul_matches_dense() {
        let device = Device::Cpu;
        let a = SparseTensor::from_entries(
            vec![2, 3],
            vec![(vec![0, 2], 2.0), (vec![1, 0], -1.0), (vec![1, 1], 0.5)],
        )
        .unwrap();
        let b = Tensor::new(&[[1f32, 2.], [3., 4.], [5., 6.]], &device).unwrap();

        let sparse = sparse_dense_matmul(&a, &b).unwrap();
        let dense = a.to_dense(&device).unwrap().matmul(&b).unwrap();
        assert_eq!(
            sparse.to_vec2::<f32>().unwrap(),
            dense.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn test_sparse_dense_matmul_empty_lhs() {
        let device = Device::Cpu;
        let a = SparseTensor::empty(vec![2, 3]).unwrap();
        let b = Tensor::ones((3, 4), candle_core::DType::F32, &device).unwrap();
        let out = sparse_dense_matmul(&a, &b).unwrap();
        assert_eq!(out.dims(), &[2, 4]);
        assert_eq!(out.sum_all().unwrap().to_scalar::<f32>().unwrap(), 0.0);
    }

    #[test]
    fn test_sparse_dense_matmul_inner_mismatch() {
        let device = Device::Cpu;
        let a = SparseTensor::empty(vec![2, 3]).unwrap();
        let b = Tensor::ones((2, 4), candle_core::DType::F32, &device).unwrap();
        assert!(matches!(
            sparse_dense_matmul(&a, &b),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_batch_identity_slices() {
        let device = Device::Cpu;
        let a = SparseTensor::from_entries(
            vec![2, 2, 2],
            vec![
                (vec![0, 0, 0], 1.0),
                (vec![0, 1, 1], 1.0),
                (vec![1, 0, 0], 1.0),
                (vec![1, 1, 1], 1.0),
            ],
        )
        .unwrap();
        let b = Tensor::new(&[[[1f32, 2.], [3., 4.]], [[5., 6.], [7., 8.]]], &device).unwrap();

        let out = batch_sparse_matmul(&a, &b).unwrap();
        assert_eq!(out.to_vec3::<f32>().unwrap(), b.to_vec3::<f32>().unwrap());
    }

    #[test]
    fn test_batch_shared_rhs() {
        let device = Device::Cpu;
        let a = SparseTensor::from_entries(
            vec![2, 1, 2],
            vec![(vec![0, 0, 1], 1.0), (vec![1, 0, 0], 2.0)],
        )
        .unwrap();
        let b = Tensor::new(&[[1f32, 2.], [3., 4.]], &device).unwrap();

        let out = batch_sparse_matmul(&a, &b).unwrap();
        assert_eq!(
            out.to_vec3::<f32>().unwrap(),
            vec![vec![vec![3., 4.]], vec![vec![2., 4.]]]
        );
    }
}
