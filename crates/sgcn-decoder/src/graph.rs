//! Time-indexed target graphs and their expansion over decoding timesteps.
//!
//! A target graph stores, for every edge (and bias label) between two target
//! positions, the 0-based decoding timestep from which it is known. Expanding
//! the graph for `T` timesteps produces one copy per prefix length: copy `t`
//! of sentence `b` sits at row `b * T + t` and holds exactly the edges whose
//! time is `<= t`, each with value 1.

use sgcn_core::{Error, Result, SparseTensor};

/// Transpose a time-major `[V, V, L, B]` graph tensor to batch-major `[B, V, V, L]`.
pub fn to_batch_major(t: &SparseTensor) -> Result<SparseTensor> {
    if t.rank() != 4 {
        return Err(Error::shape("time-major graph rank", &[4], &[t.rank()]));
    }
    t.transpose(&[3, 0, 1, 2])
}

fn check_times(times: &SparseTensor, what: &str) -> Result<()> {
    if let Some((coord, value)) = times
        .iter()
        .find(|&(_, v)| !(v.is_finite() && v >= 0.0 && v.fract() == 0.0))
    {
        return Err(Error::InvalidSparse(format!(
            "{what} time {value} at {coord:?} is not a non-negative integer"
        )));
    }
    Ok(())
}

/// Expand a batch-major time tensor `[B, V, V, L]` to `[B * T, V, V, L]`.
///
/// Row `b * T + t` keeps the entries of sentence `b` with time `<= t`, with
/// value 1. Entries whose time is `>= T` never become visible.
pub fn expand_graph(times: &SparseTensor, timesteps: usize) -> Result<SparseTensor> {
    if times.rank() != 4 {
        return Err(Error::shape("graph rank", &[4], &[times.rank()]));
    }
    check_times(times, "graph")?;
    let shape = times.shape();
    let mut indices = Vec::new();
    let mut values = Vec::new();
    for (coord, time) in times.iter() {
        let first = time as usize;
        for t in first..timesteps {
            indices.extend_from_slice(&[coord[0] * timesteps + t, coord[1], coord[2], coord[3]]);
            values.push(1.0);
        }
    }
    SparseTensor::from_unsorted(
        vec![shape[0] * timesteps, shape[1], shape[2], shape[3]],
        indices,
        values,
    )
}

/// Edge and label structure of one timestep-expanded batch.
#[derive(Debug, Clone)]
pub struct ExpandedGraph {
    /// `[B * T, V, V, edge_labels]`
    pub edges: SparseTensor,
    /// `[B * T, V, V, bias_labels]`
    pub labels: Option<SparseTensor>,
}

/// Target-side graph of a batch, with per-entry visibility times.
#[derive(Debug, Clone)]
pub struct TargetGraph {
    edges: SparseTensor,
    labels: Option<SparseTensor>,
}

impl TargetGraph {
    /// Wrap batch-major time tensors `[B, V, V, L]`.
    ///
    /// # Errors
    /// - [`Error::ShapeMismatch`] if a tensor is not rank 4 or the label
    ///   tensor disagrees with the edges on batch or vertex counts
    /// - [`Error::InvalidSparse`] if a time is negative or fractional
    pub fn new(edges: SparseTensor, labels: Option<SparseTensor>) -> Result<Self> {
        if edges.rank() != 4 {
            return Err(Error::shape("target graph edges rank", &[4], &[edges.rank()]));
        }
        let (es, vs) = (edges.shape(), edges.shape()[1]);
        if es[2] != vs {
            return Err(Error::shape("target graph edges", &[es[0], vs, vs, es[3]], es));
        }
        check_times(&edges, "edge")?;
        if let Some(labels) = &labels {
            let ls = labels.shape();
            if labels.rank() != 4 || ls[..3] != es[..3] {
                return Err(Error::shape("target graph labels", &es[..3], ls));
            }
            check_times(labels, "label")?;
        }
        Ok(Self { edges, labels })
    }

    /// Wrap time-major tensors `[V, V, L, B]`, the layout of the input pipeline.
    pub fn from_time_major(edges: &SparseTensor, labels: Option<&SparseTensor>) -> Result<Self> {
        let labels = labels.map(to_batch_major).transpose()?;
        Self::new(to_batch_major(edges)?, labels)
    }

    /// Build from a graph without explicit times, batch-major `[B, V, V, L]`.
    ///
    /// An entry between positions `i` and `j` becomes known once both are
    /// decoded, at timestep `max(i, j)`. Stored values are ignored.
    pub fn from_static(edges: &SparseTensor, labels: Option<&SparseTensor>) -> Result<Self> {
        let timed = |t: &SparseTensor| -> Result<SparseTensor> {
            if t.rank() != 4 {
                return Err(Error::shape("static graph rank", &[4], &[t.rank()]));
            }
            let values = t
                .iter()
                .map(|(c, _)| c[1].max(c[2]) as f32)
                .collect();
            SparseTensor::new(t.shape().to_vec(), t.indices().to_vec(), values)
        };
        Self::new(timed(edges)?, labels.map(timed).transpose()?)
    }

    pub fn batch_size(&self) -> usize {
        self.edges.shape()[0]
    }

    pub fn vertices(&self) -> usize {
        self.edges.shape()[1]
    }

    pub fn edge_labels(&self) -> usize {
        self.edges.shape()[3]
    }

    pub fn bias_labels(&self) -> Option<usize> {
        self.labels.as_ref().map(|l| l.shape()[3])
    }

    /// Edge times, `[B, V, V, edge_labels]`.
    pub fn edges(&self) -> &SparseTensor {
        &self.edges
    }

    /// Label times, `[B, V, V, bias_labels]`.
    pub fn labels(&self) -> Option<&SparseTensor> {
        self.labels.as_ref()
    }

    /// Expand both tensors for `timesteps` prefix lengths.
    pub fn expand(&self, timesteps: usize) -> Result<ExpandedGraph> {
        let edges = expand_graph(&self.edges, timesteps)?;
        if edges.nnz() == 0 {
            tracing::warn!(
                batch = self.batch_size(),
                timesteps,
                "target graph has no visible edges"
            );
        }
        Ok(ExpandedGraph {
            edges,
            labels: self
                .labels
                .as_ref()
                .map(|l| expand_graph(l, timesteps))
                .transpose()?,
        })
    }
}
