//! # RustML QMatrix
//!
//! In-memory engine for weight-quantized matrices used during inference.
//!
//! A quantized matrix stores sub-byte integer codes bit-packed into `u32`
//! words, grouped over a permuted row order with per-group bit widths and
//! per-column scales. Two kernels read it:
//!
//! - `reconstruct`: full dequantization into a dense half-precision matrix
//! - `gemm_half_q_half`: `C = A · dequant(B) + bias`, either fused (the weight
//!   tile is decoded next to the multiply-accumulate) or through the
//!   dequantize-then-multiply reference path
//!
//! Matrices live in a generation-checked handle table and are addressed by
//! opaque [`MatrixHandle`]s.
//!
//! ## Example
//!
//! ```rust
//! use half::f16;
//! use rustml_qmatrix::{
//!     create_matrix, destroy_matrix, gemm_half_q_half, GroupedQuantizer, MatrixMut, MatrixRef,
//! };
//!
//! let weights: Vec<f32> = (0..64 * 16).map(|i| ((i % 13) as f32 - 6.0) * 0.1).collect();
//! let parts = GroupedQuantizer::uniform(64, 4, 32).quantize(&weights, 64, 16).unwrap();
//! let handle = create_matrix(parts).unwrap();
//!
//! let a = vec![f16::ONE; 2 * 64];
//! let mut c = vec![f16::ZERO; 2 * 16];
//! gemm_half_q_half(
//!     &MatrixRef::new(&a, 2, 64).unwrap(),
//!     handle,
//!     &mut MatrixMut::new(&mut c, 2, 16).unwrap(),
//!     false,
//! )
//! .unwrap();
//!
//! destroy_matrix(handle).unwrap();
//! ```

pub mod api;
mod core;
mod saf;

pub use saf::*;
