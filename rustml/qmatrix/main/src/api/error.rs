//! Error types for quantized matrix operations

use crate::api::types::MatrixHandle;
use thiserror::Error;

/// Result type for quantized matrix operations
pub type QMatrixResult<T> = Result<T, QMatrixError>;

/// Errors reported by the quantized matrix store and its kernels.
///
/// All of them are detected before any kernel runs and none are transient.
#[derive(Debug, Error)]
pub enum QMatrixError {
    #[error("Invalid permutation: {0}")]
    InvalidPermutation(String),

    #[error("Shape mismatch for {what}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    #[error("Stale or unknown handle: {0}")]
    StaleHandle(MatrixHandle),

    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl QMatrixError {
    pub(crate) fn shape(what: &'static str, expected: &[usize], actual: &[usize]) -> Self {
        QMatrixError::ShapeMismatch {
            what,
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}
