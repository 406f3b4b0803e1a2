//! Error types for sgcn.

use thiserror::Error;

/// sgcn error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Shape mismatch between two operands.
    #[error("shape mismatch in {context}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        context: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// The two contraction axis lists have different lengths.
    #[error("different number of contraction axes: {a} != {b}")]
    AxisCountMismatch { a: usize, b: usize },

    /// An axis index outside `[-rank, rank)`, or repeated.
    #[error("invalid axis {axis} for tensor of rank {rank}")]
    InvalidAxis { axis: isize, rank: usize },

    /// Sparse coordinates that do not describe a valid tensor.
    #[error("invalid sparse tensor: {0}")]
    InvalidSparse(String),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for [`Error::ShapeMismatch`].
    pub fn shape(context: &'static str, expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            context,
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}
