pub mod bitpack;
pub mod dequant;
pub mod gemm;
pub mod matrix;
pub mod metadata;
pub mod ops;
pub mod pack;
pub mod permutation;
pub mod runtime;
pub mod simd;
pub mod store;
