//! Core types for quantized matrices

use crate::api::error::{QMatrixError, QMatrixResult};
use half::f16;
use rayon::prelude::*;

/// Bits per packed storage word.
pub const WORD_BITS: usize = 32;

/// Narrowest bit width accepted for grouped rows.
pub const MIN_GROUP_BITS: u8 = 2;

/// Widest bit width accepted for grouped rows.
pub const MAX_GROUP_BITS: u8 = 8;

/// Bits per packed scale / zero-point code.
pub const NIBBLE_BITS: usize = 4;

/// Scale (or legacy zero-point) codes per storage word.
pub const NIBBLES_PER_WORD: usize = WORD_BITS / NIBBLE_BITS;

/// Bit width of the legacy (non-grouped) scheme.
pub const LEGACY_BITS: u8 = 4;

/// Default column tile width of the fused kernel.
pub const FUSED_TILE_N: usize = 64;

/// Default reduction tile depth of the fused kernel.
pub const FUSED_TILE_K: usize = 32;

/// Opaque handle to a matrix owned by a `MatrixStore`.
///
/// Low 32 bits: slot index. High 32 bits: slot generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixHandle(u64);

impl MatrixHandle {
    pub(crate) fn new(index: u32, generation: u32) -> Self {
        MatrixHandle(((generation as u64) << 32) | index as u64)
    }

    /// Rebuild a handle previously obtained from [`MatrixHandle::into_raw`].
    pub fn from_raw(raw: u64) -> Self {
        MatrixHandle(raw)
    }

    /// Raw integer form, for passing through foreign code.
    pub fn into_raw(self) -> u64 {
        self.0
    }

    pub(crate) fn index(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    pub(crate) fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl std::fmt::Display for MatrixHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "qmatrix#{}@{}", self.index(), self.generation())
    }
}

/// GEMM execution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelPath {
    /// Weight tiles decoded next to the multiply-accumulate.
    Fused,
    /// Dequantize into the scratch buffer, then dense multiply.
    Reference,
}

impl std::fmt::Display for KernelPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KernelPath::Fused => write!(f, "fused"),
            KernelPath::Reference => write!(f, "reference"),
        }
    }
}

/// Which metadata scheme a matrix was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemeKind {
    Grouped,
    Legacy,
}

/// Summary of a stored matrix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatrixInfo {
    pub rows: usize,
    pub cols: usize,
    pub scheme: SchemeKind,
    pub groups: usize,
    /// Row count per bit width, indexed by bits (0..=8).
    pub rows_per_bits: [usize; 9],
    /// Size of the packed weight buffer in bytes.
    pub packed_bytes: usize,
    pub has_bias: bool,
    pub identity_permutation: bool,
}

/// A flat caller-supplied buffer with an explicit shape.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostTensor<T> {
    pub data: Vec<T>,
    pub shape: Vec<usize>,
}

impl<T> HostTensor<T> {
    pub fn new(data: Vec<T>, shape: Vec<usize>) -> Self {
        Self { data, shape }
    }

    /// Element count implied by the shape, or `None` if it overflows `usize`.
    pub fn numel(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    /// Check that the shape is 2D and agrees with the data length.
    pub(crate) fn dims2(&self, what: &'static str) -> QMatrixResult<(usize, usize)> {
        if self.shape.len() != 2 || self.numel() != Some(self.data.len()) {
            return Err(QMatrixError::shape(what, &[self.data.len()], &self.shape));
        }
        Ok((self.shape[0], self.shape[1]))
    }
}

fn check_view(what: &'static str, len: usize, rows: usize, cols: usize, row_stride: usize) -> QMatrixResult<()> {
    if row_stride < cols {
        return Err(QMatrixError::shape(what, &[rows, cols], &[rows, row_stride]));
    }
    let needed = match rows.checked_sub(1) {
        None => Some(0),
        Some(last) => last.checked_mul(row_stride).and_then(|v| v.checked_add(cols)),
    };
    match needed {
        Some(needed) if needed <= len => Ok(()),
        Some(needed) => Err(QMatrixError::shape(what, &[needed], &[len])),
        None => Err(QMatrixError::shape(what, &[rows, row_stride], &[len])),
    }
}

/// Read-only row-major half-precision matrix view.
#[derive(Debug, Clone, Copy)]
pub struct MatrixRef<'a> {
    data: &'a [f16],
    rows: usize,
    cols: usize,
    row_stride: usize,
}

impl<'a> MatrixRef<'a> {
    /// Contiguous view (`row_stride == cols`).
    pub fn new(data: &'a [f16], rows: usize, cols: usize) -> QMatrixResult<Self> {
        Self::with_stride(data, rows, cols, cols)
    }

    pub fn with_stride(data: &'a [f16], rows: usize, cols: usize, row_stride: usize) -> QMatrixResult<Self> {
        check_view("matrix view", data.len(), rows, cols, row_stride)?;
        Ok(Self { data, rows, cols, row_stride })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn row(&self, i: usize) -> &'a [f16] {
        let start = i * self.row_stride;
        &self.data[start..start + self.cols]
    }
}

/// Mutable row-major half-precision matrix view.
#[derive(Debug)]
pub struct MatrixMut<'a> {
    data: &'a mut [f16],
    rows: usize,
    cols: usize,
    row_stride: usize,
}

impl<'a> MatrixMut<'a> {
    /// Contiguous view (`row_stride == cols`).
    pub fn new(data: &'a mut [f16], rows: usize, cols: usize) -> QMatrixResult<Self> {
        Self::with_stride(data, rows, cols, cols)
    }

    pub fn with_stride(data: &'a mut [f16], rows: usize, cols: usize, row_stride: usize) -> QMatrixResult<Self> {
        check_view("matrix view", data.len(), rows, cols, row_stride)?;
        Ok(Self { data, rows, cols, row_stride })
    }

    /// Contiguous view over a buffer known to hold `rows * cols` elements.
    pub(crate) fn from_contiguous(data: &'a mut [f16], rows: usize, cols: usize) -> Self {
        debug_assert!(data.len() >= rows * cols);
        Self { data, rows, cols, row_stride: cols }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn shape(&self) -> [usize; 2] {
        [self.rows, self.cols]
    }

    pub fn row(&self, i: usize) -> &[f16] {
        let start = i * self.row_stride;
        &self.data[start..start + self.cols]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f16] {
        let start = i * self.row_stride;
        &mut self.data[start..start + self.cols]
    }

    /// Disjoint mutable rows, for row-parallel kernels.
    pub(crate) fn par_rows_mut(&mut self) -> impl IndexedParallelIterator<Item = &mut [f16]> + '_ {
        let cols = self.cols;
        self.data
            .par_chunks_mut(self.row_stride.max(1))
            .take(self.rows)
            .map(move |row| &mut row[..cols])
    }
}
