//! Coordinate-format sparse tensors.
//!
//! A [`SparseTensor`] stores the coordinates of its nonzero entries in one flat
//! buffer (`nnz * rank` indices, row-major) next to a parallel value array and
//! the logical dense shape.
//!
//! # Canonical Order
//!
//! Every tensor produced by this module is *canonical*: coordinates are in
//! bounds, sorted lexicographically (equivalently, by row-major linear index)
//! and unique. Structural operations (`transpose`, `reshape`, `select`,
//! `filter`) preserve this, re-sorting where the operation would break it.
//! Untrusted coordinate lists go through [`SparseTensor::new`], which rejects
//! anything non-canonical, or [`SparseTensor::from_unsorted`], which sorts and
//! sums duplicates.

use candle_core::{DType, Device, Tensor};

use crate::{Error, Result};

/// Row-major strides for `shape`, failing on overflow.
fn strides(shape: &[usize]) -> Result<Vec<usize>> {
    let mut strides = vec![1usize; shape.len()];
    for d in (0..shape.len().saturating_sub(1)).rev() {
        strides[d] = strides[d + 1].checked_mul(shape[d + 1]).ok_or_else(|| {
            Error::InvalidSparse(format!("dense shape {shape:?} overflows usize"))
        })?;
    }
    Ok(strides)
}

fn numel(shape: &[usize]) -> Result<usize> {
    shape.iter().try_fold(1usize, |acc, &d| {
        acc.checked_mul(d)
            .ok_or_else(|| Error::InvalidSparse(format!("dense shape {shape:?} overflows usize")))
    })
}

fn linearize(coord: &[usize], strides: &[usize]) -> usize {
    coord.iter().zip(strides).map(|(c, s)| c * s).sum()
}

fn delinearize(mut linear: usize, strides: &[usize], out: &mut Vec<usize>) {
    for &s in strides {
        out.push(linear / s);
        linear %= s;
    }
}

/// Converts host indices into a `u32` index tensor for `index_select`/`index_add`.
pub fn index_tensor(indices: Vec<usize>, device: &Device) -> Result<Tensor> {
    let len = indices.len();
    let indices = indices
        .into_iter()
        .map(|i| {
            u32::try_from(i)
                .map_err(|_| Error::InvalidSparse(format!("index {i} does not fit in u32")))
        })
        .collect::<Result<Vec<u32>>>()?;
    Ok(Tensor::from_vec(indices, len, device)?)
}

/// Sparse tensor in coordinate (COO) format.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseTensor {
    shape: Vec<usize>,
    /// `nnz * rank` coordinates, one row per nonzero.
    indices: Vec<usize>,
    values: Vec<f32>,
}

impl SparseTensor {
    /// Create a sparse tensor from canonical coordinates.
    ///
    /// # Arguments
    /// - `shape`: Logical dense shape (rank >= 1)
    /// - `indices`: Flat coordinates, `values.len() * shape.len()` entries
    /// - `values`: One value per coordinate row
    ///
    /// # Errors
    /// [`Error::InvalidSparse`] if the buffer lengths disagree, a coordinate is
    /// out of bounds, or coordinates are unsorted or repeated.
    pub fn new(shape: Vec<usize>, indices: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let tensor = Self::unchecked(shape, indices, values)?;
        let strides = strides(&tensor.shape)?;
        let mut previous: Option<usize> = None;
        for k in 0..tensor.nnz() {
            let coord = tensor.coord(k);
            tensor.check_bounds(coord)?;
            let linear = linearize(coord, &strides);
            if let Some(prev) = previous {
                if linear <= prev {
                    return Err(Error::InvalidSparse(format!(
                        "coordinate {coord:?} at position {k} is unsorted or duplicated"
                    )));
                }
            }
            previous = Some(linear);
        }
        Ok(tensor)
    }

    /// Create a sparse tensor from coordinates in any order.
    ///
    /// Coordinates are sorted into canonical order and duplicates are summed.
    pub fn from_unsorted(shape: Vec<usize>, indices: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let tensor = Self::unchecked(shape, indices, values)?;
        let strides = strides(&tensor.shape)?;
        let mut keyed = Vec::with_capacity(tensor.nnz());
        for k in 0..tensor.nnz() {
            let coord = tensor.coord(k);
            tensor.check_bounds(coord)?;
            keyed.push((linearize(coord, &strides), tensor.values[k]));
        }
        keyed.sort_by_key(|&(linear, _)| linear);

        let mut merged: Vec<(usize, f32)> = Vec::with_capacity(keyed.len());
        for (linear, value) in keyed {
            match merged.last_mut() {
                Some((last, acc)) if *last == linear => *acc += value,
                _ => merged.push((linear, value)),
            }
        }

        let mut indices = Vec::with_capacity(merged.len() * tensor.rank());
        let mut values = Vec::with_capacity(merged.len());
        for (linear, value) in merged {
            delinearize(linear, &strides, &mut indices);
            values.push(value);
        }
        Ok(Self {
            shape: tensor.shape,
            indices,
            values,
        })
    }

    /// Create a sparse tensor from `(coordinate, value)` pairs in any order.
    pub fn from_entries<I>(shape: Vec<usize>, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Vec<usize>, f32)>,
    {
        let rank = shape.len();
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for (coord, value) in entries {
            if coord.len() != rank {
                return Err(Error::InvalidSparse(format!(
                    "coordinate {coord:?} has arity {}, expected {rank}",
                    coord.len()
                )));
            }
            indices.extend(coord);
            values.push(value);
        }
        Self::from_unsorted(shape, indices, values)
    }

    /// An all-zero sparse tensor.
    pub fn empty(shape: Vec<usize>) -> Result<Self> {
        Self::new(shape, Vec::new(), Vec::new())
    }

    /// Sparse view of the nonzero entries of a dense tensor.
    pub fn from_dense(dense: &Tensor) -> Result<Self> {
        let shape = dense.dims().to_vec();
        let data = dense.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
        let strides = strides(&shape)?;
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for (linear, &value) in data.iter().enumerate() {
            if value != 0.0 {
                delinearize(linear, &strides, &mut indices);
                values.push(value);
            }
        }
        Self::unchecked(shape, indices, values)
    }

    fn unchecked(shape: Vec<usize>, indices: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        if shape.is_empty() {
            return Err(Error::InvalidSparse("sparse tensors must have rank >= 1".into()));
        }
        if indices.len() != values.len() * shape.len() {
            return Err(Error::InvalidSparse(format!(
                "{} coordinates for {} values of rank {}",
                indices.len(),
                values.len(),
                shape.len()
            )));
        }
        Ok(Self {
            shape,
            indices,
            values,
        })
    }

    fn check_bounds(&self, coord: &[usize]) -> Result<()> {
        if coord.iter().zip(&self.shape).any(|(&c, &d)| c >= d) {
            return Err(Error::InvalidSparse(format!(
                "coordinate {coord:?} out of bounds for shape {:?}",
                self.shape
            )));
        }
        Ok(())
    }

    /// Logical dense shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Flat coordinate buffer, `nnz * rank` entries.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Coordinate of the `k`-th stored entry.
    pub fn coord(&self, k: usize) -> &[usize] {
        let rank = self.rank();
        &self.indices[k * rank..(k + 1) * rank]
    }

    /// Iterate `(coordinate, value)` pairs in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&[usize], f32)> + '_ {
        self.indices
            .chunks_exact(self.rank())
            .zip(self.values.iter().copied())
    }

    /// Permute axes: output axis `d` is input axis `perm[d]`.
    ///
    /// Coordinates are recomputed and re-sorted, not just the shape metadata.
    pub fn transpose(&self, perm: &[usize]) -> Result<Self> {
        let rank = self.rank();
        if perm.len() != rank {
            return Err(Error::AxisCountMismatch {
                a: perm.len(),
                b: rank,
            });
        }
        let mut seen = vec![false; rank];
        for &axis in perm {
            if axis >= rank || seen[axis] {
                return Err(Error::InvalidAxis {
                    axis: axis as isize,
                    rank,
                });
            }
            seen[axis] = true;
        }
        if perm.iter().enumerate().all(|(d, &p)| d == p) {
            return Ok(self.clone());
        }

        let shape = perm.iter().map(|&p| self.shape[p]).collect();
        let mut indices = Vec::with_capacity(self.indices.len());
        for (coord, _) in self.iter() {
            indices.extend(perm.iter().map(|&p| coord[p]));
        }
        Self::from_unsorted(shape, indices, self.values.clone())
    }

    /// Reinterpret the tensor under a new shape with the same element count.
    ///
    /// Row-major linear positions are preserved, so canonical order is too.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        if shape.is_empty() || numel(shape)? != numel(&self.shape)? {
            return Err(Error::shape("sparse reshape", &self.shape, shape));
        }
        let from = strides(&self.shape)?;
        let to = strides(shape)?;
        let mut indices = Vec::with_capacity(self.nnz() * shape.len());
        for (coord, _) in self.iter() {
            delinearize(linearize(coord, &from), &to, &mut indices);
        }
        Ok(Self {
            shape: shape.to_vec(),
            indices,
            values: self.values.clone(),
        })
    }

    /// Keep only entries whose coordinate along `axis` satisfies `keep`.
    ///
    /// The shape is unchanged; this is the structural replacement for scaling
    /// coordinates by 0/1 masks.
    pub fn filter<F>(&self, axis: usize, mut keep: F) -> Result<Self>
    where
        F: FnMut(usize) -> bool,
    {
        self.check_axis(axis)?;
        Ok(self.retain(|coord, _| keep(coord[axis])))
    }

    /// Keep only entries for which `keep(coordinate, value)` holds.
    pub fn retain<F>(&self, mut keep: F) -> Self
    where
        F: FnMut(&[usize], f32) -> bool,
    {
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for (coord, value) in self.iter() {
            if keep(coord, value) {
                indices.extend_from_slice(coord);
                values.push(value);
            }
        }
        Self {
            shape: self.shape.clone(),
            indices,
            values,
        }
    }

    /// Apply `f` to every stored value.
    pub fn map_values<F>(&self, f: F) -> Self
    where
        F: Fn(f32) -> f32,
    {
        Self {
            shape: self.shape.clone(),
            indices: self.indices.clone(),
            values: self.values.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Fix `axis` at `index` and drop it, lowering the rank by one.
    pub fn select(&self, axis: usize, index: usize) -> Result<Self> {
        self.check_axis(axis)?;
        if self.rank() < 2 {
            return Err(Error::InvalidAxis {
                axis: axis as isize,
                rank: self.rank(),
            });
        }
        if index >= self.shape[axis] {
            return Err(Error::InvalidSparse(format!(
                "index {index} out of bounds for axis {axis} of size {}",
                self.shape[axis]
            )));
        }
        let mut shape = self.shape.clone();
        shape.remove(axis);
        let mut indices = Vec::new();
        let mut values = Vec::new();
        for (coord, value) in self.iter() {
            if coord[axis] == index {
                indices.extend(
                    coord
                        .iter()
                        .enumerate()
                        .filter(|&(d, _)| d != axis)
                        .map(|(_, &c)| c),
                );
                values.push(value);
            }
        }
        Ok(Self {
            shape,
            indices,
            values,
        })
    }

    /// Split along axis 0 into `shape[0]` tensors of rank `rank - 1`.
    ///
    /// Runs in one pass over the entries since canonical order groups them
    /// by their leading coordinate.
    pub fn split_outer(&self) -> Result<Vec<Self>> {
        if self.rank() < 2 {
            return Err(Error::InvalidAxis {
                axis: 0,
                rank: self.rank(),
            });
        }
        let inner_shape = self.shape[1..].to_vec();
        let mut slices: Vec<Self> = (0..self.shape[0])
            .map(|_| Self {
                shape: inner_shape.clone(),
                indices: Vec::new(),
                values: Vec::new(),
            })
            .collect();
        for (coord, value) in self.iter() {
            let slice = &mut slices[coord[0]];
            slice.indices.extend_from_slice(&coord[1..]);
            slice.values.push(value);
        }
        Ok(slices)
    }

    /// Materialize as a dense `f32` tensor.
    pub fn to_dense(&self, device: &Device) -> Result<Tensor> {
        let strides = strides(&self.shape)?;
        let mut data = vec![0f32; numel(&self.shape)?];
        for (coord, value) in self.iter() {
            data[linearize(coord, &strides)] += value;
        }
        Ok(Tensor::from_vec(data, self.shape.clone(), device)?)
    }

    /// Values as a column tensor `(nnz, 1)` in `dtype`, ready to scale gathered rows.
    pub fn values_tensor(&self, dtype: DType, device: &Device) -> Result<Tensor> {
        Ok(Tensor::from_vec(self.values.clone(), (self.nnz(), 1), device)?.to_dtype(dtype)?)
    }

    fn check_axis(&self, axis: usize) -> Result<()> {
        if axis >= self.rank() {
            return Err(Error::InvalidAxis {
                axis: axis as isize,
                rank: self.rank(),
            });
        }
        Ok(())
    }
}
