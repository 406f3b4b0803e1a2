//! Tensor contraction between a sparse and a dense operand.
//!
//! Generalizes matrix multiplication the way `numpy.tensordot` does:
//!
//! ```text
//! out[free_a..., free_b...] = sum_{k...} a[free_a..., k...] * b[k..., free_b...]
//! ```
//!
//! # Algorithm
//!
//! 1. Resolve the contracted axes of both operands and derive the free ones.
//! 2. Sparse side: transpose so contracted axes trail, reshape to
//!    `(prod(free_a), prod(contracted))`. Coordinates are recomputed.
//! 3. Dense side: permute so contracted axes lead, reshape to
//!    `(prod(contracted), prod(free_b))`.
//! 4. Sparse-dense matmul.
//! 5. Reshape to `free_a dims ++ free_b dims`.

use candle_core::Tensor;

use crate::matmul::sparse_dense_matmul;
use crate::sparse::SparseTensor;
use crate::{Error, Result};

/// Which axes to contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Axes {
    /// Last `n` axes of `a` against the first `n` axes of `b`.
    Count(usize),
    /// Explicit axis lists, paired position by position. Negative values
    /// count from the end.
    Pairs(Vec<isize>, Vec<isize>),
}

impl From<usize> for Axes {
    fn from(n: usize) -> Self {
        Axes::Count(n)
    }
}

impl From<(Vec<isize>, Vec<isize>)> for Axes {
    fn from((a, b): (Vec<isize>, Vec<isize>)) -> Self {
        Axes::Pairs(a, b)
    }
}

impl From<(isize, isize)> for Axes {
    fn from((a, b): (isize, isize)) -> Self {
        Axes::Pairs(vec![a], vec![b])
    }
}

fn normalize(axes: &[isize], rank: usize) -> Result<Vec<usize>> {
    let mut out = Vec::with_capacity(axes.len());
    for &axis in axes {
        let normalized = if axis < 0 { axis + rank as isize } else { axis };
        if normalized < 0 || normalized >= rank as isize {
            return Err(Error::InvalidAxis { axis, rank });
        }
        let normalized = normalized as usize;
        if out.contains(&normalized) {
            return Err(Error::InvalidAxis { axis, rank });
        }
        out.push(normalized);
    }
    Ok(out)
}

impl Axes {
    /// Resolve to non-negative axis lists for operands of the given ranks.
    pub fn resolve(&self, rank_a: usize, rank_b: usize) -> Result<(Vec<usize>, Vec<usize>)> {
        match self {
            Axes::Count(n) => {
                let n = *n;
                if n > rank_a {
                    return Err(Error::InvalidAxis {
                        axis: n as isize,
                        rank: rank_a,
                    });
                }
                if n > rank_b {
                    return Err(Error::InvalidAxis {
                        axis: n as isize,
                        rank: rank_b,
                    });
                }
                Ok(((rank_a - n..rank_a).collect(), (0..n).collect()))
            }
            Axes::Pairs(a, b) => {
                if a.len() != b.len() {
                    return Err(Error::AxisCountMismatch {
                        a: a.len(),
                        b: b.len(),
                    });
                }
                Ok((normalize(a, rank_a)?, normalize(b, rank_b)?))
            }
        }
    }
}

/// Contract a sparse tensor with a dense one along `axes`.
///
/// # Arguments
/// - `a`: Sparse operand (rank >= 1)
/// - `b`: Dense operand
/// - `axes`: Axes to contract, see [`Axes`]
///
/// # Returns
/// Dense tensor of shape `free(a) ++ free(b)`, in `b`'s dtype.
///
/// # Errors
/// - [`Error::AxisCountMismatch`] if the axis lists differ in length
/// - [`Error::InvalidAxis`] for out-of-range or repeated axes
/// - [`Error::ShapeMismatch`] if paired axes have different sizes
pub fn sparse_tensordot(a: &SparseTensor, b: &Tensor, axes: impl Into<Axes>) -> Result<Tensor> {
    let shape_a = a.shape().to_vec();
    let shape_b = b.dims().to_vec();
    let (axes_a, axes_b) = axes.into().resolve(shape_a.len(), shape_b.len())?;

    let contracted_a: Vec<usize> = axes_a.iter().map(|&d| shape_a[d]).collect();
    let contracted_b: Vec<usize> = axes_b.iter().map(|&d| shape_b[d]).collect();
    if contracted_a != contracted_b {
        return Err(Error::shape("sparse_tensordot contracted axes", &contracted_a, &contracted_b));
    }

    let free_a: Vec<usize> = (0..shape_a.len()).filter(|d| !axes_a.contains(d)).collect();
    let free_b: Vec<usize> = (0..shape_b.len()).filter(|d| !axes_b.contains(d)).collect();
    let free_dims_a: Vec<usize> = free_a.iter().map(|&d| shape_a[d]).collect();
    let free_dims_b: Vec<usize> = free_b.iter().map(|&d| shape_b[d]).collect();
    let prod_free_a: usize = free_dims_a.iter().product();
    let prod_free_b: usize = free_dims_b.iter().product();
    let prod_axes: usize = contracted_a.iter().product();

    let perm_a: Vec<usize> = free_a.iter().chain(&axes_a).copied().collect();
    let a2 = a.transpose(&perm_a)?.reshape(&[prod_free_a, prod_axes])?;

    let b2 = if shape_b.is_empty() {
        b.reshape((1, 1))?
    } else {
        let perm_b: Vec<usize> = axes_b.iter().chain(&free_b).copied().collect();
        b.permute(perm_b)?
            .contiguous()?
            .reshape((prod_axes, prod_free_b))?
    };

    tracing::trace!(
        sparse = ?shape_a,
        dense = ?shape_b,
        lhs = ?a2.shape(),
        rhs = ?b2.dims(),
        "sparse_tensordot"
    );

    let product = sparse_dense_matmul(&a2, &b2)?;
    let out_shape: Vec<usize> = free_dims_a.into_iter().chain(free_dims_b).collect();
    Ok(product.reshape(out_shape)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn close(a: &Tensor, b: &Tensor) -> bool {
        let diff = (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        diff < 1e-5
    }

    #[test]
    fn test_count_axes_is_matmul() {
        let device = Device::Cpu;
        let a = SparseTensor::from_entries(
            vec![2, 3],
            vec![(vec![0, 1], 1.0), (vec![1, 2], 3.0)],
        )
        .unwrap();
        let b = Tensor::arange(0f32, 12., &device).unwrap().reshape((3, 4)).unwrap();
        let out = sparse_tensordot(&a, &b, Axes::Count(1)).unwrap();
        let expected = a.to_dense(&device).unwrap().matmul(&b).unwrap();
        assert!(close(&out, &expected));
    }

    #[test]
    fn test_last_axis_against_vector() {
        // (2, 2, 3) . (3,) over [-1], [-1] -> (2, 2)
        let device = Device::Cpu;
        let a = SparseTensor::from_entries(
            vec![2, 2, 3],
            vec![(vec![0, 1, 2], 1.0), (vec![1, 0, 0], 2.0), (vec![1, 0, 1], 1.0)],
        )
        .unwrap();
        let b = Tensor::new(&[10f32, 20., 30.], &device).unwrap();
        let out = sparse_tensordot(&a, &b, Axes::Pairs(vec![-1], vec![-1])).unwrap();
        assert_eq!(out.dims(), &[2, 2]);
        assert_eq!(
            out.to_vec2::<f32>().unwrap(),
            vec![vec![0., 30.], vec![40., 0.]]
        );
    }

    #[test]
    fn test_middle_axis_contraction() {
        // (2, 3, 2) . (4, 3) over [1], [1] -> (2, 2, 4)
        let device = Device::Cpu;
        let a = SparseTensor::from_entries(
            vec![2, 3, 2],
            vec![(vec![0, 2, 1], 1.5), (vec![1, 0, 0], -2.0), (vec![1, 1, 1], 1.0)],
        )
        .unwrap();
        let b = Tensor::arange(0f32, 12., &device).unwrap().reshape((4, 3)).unwrap();
        let out = sparse_tensordot(&a, &b, (1isize, 1isize)).unwrap();
        assert_eq!(out.dims(), &[2, 2, 4]);

        // dense reference: a^T over axis 1, then matmul with b^T
        let dense = a
            .to_dense(&device)
            .unwrap()
            .permute((0, 2, 1))
            .unwrap()
            .contiguous()
            .unwrap()
            .reshape((4, 3))
            .unwrap()
            .matmul(&b.t().unwrap())
            .unwrap()
            .reshape((2, 2, 4))
            .unwrap();
        assert!(close(&out, &dense));
    }

    #[test]
    fn test_axis_count_mismatch() {
        let device = Device::Cpu;
        let a = SparseTensor::empty(vec![2, 3]).unwrap();
        let b = Tensor::zeros((3, 2), DType::F32, &device).unwrap();
        assert!(matches!(
            sparse_tensordot(&a, &b, Axes::Pairs(vec![1, 0], vec![0])),
            Err(Error::AxisCountMismatch { a: 2, b: 1 })
        ));
    }

    #[test]
    fn test_size_mismatch() {
        let device = Device::Cpu;
        let a = SparseTensor::empty(vec![2, 3]).unwrap();
        let b = Tensor::zeros((2, 2), DType::F32, &device).unwrap();
        assert!(matches!(
            sparse_tensordot(&a, &b, Axes::Count(1)),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_axes() {
        let device = Device::Cpu;
        let a = SparseTensor::empty(vec![2, 3]).unwrap();
        let b = Tensor::zeros((3, 2), DType::F32, &device).unwrap();
        assert!(matches!(
            sparse_tensordot(&a, &b, Axes::Pairs(vec![2], vec![0])),
            Err(Error::InvalidAxis { .. })
        ));
        assert!(matches!(
            sparse_tensordot(&a, &b, Axes::Count(3)),
            Err(Error::InvalidAxis { .. })
        ));
    }
}
