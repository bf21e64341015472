//! Facade re-exports for rustml-qmatrix

pub use crate::api::error::*;
pub use crate::api::types::*;

// Matrices and their store
pub use crate::core::matrix::{QMatrix, QMatrixParts};
pub use crate::core::permutation::{invert, Permutation};
pub use crate::core::store::MatrixStore;

// Handle-based operations
pub use crate::core::ops::{
    create_matrix, destroy_matrix, gemm_half_q_half, gemm_half_q_half_on, matrix_info, reconstruct,
    reconstruct_on,
};

// Runtime
pub use crate::core::runtime::{detect_simd, Capabilities, RuntimeConfig, Stream};
pub use crate::core::simd::axpy;

// Packing
pub use crate::core::pack::{make_sequential, GroupSpec, GroupedQuantizer, LegacyQuantizer, LegacyTensors};
