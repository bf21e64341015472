use crate::api::error::{QMatrixError, QMatrixResult};
use crate::api::types::*;
use crate::core::bitpack::read_code;
use crate::core::metadata::{GroupedMetadata, LegacyMetadata, QuantScheme, RowLayout};
use crate::core::permutation::Permutation;
use half::f16;
use std::sync::{Mutex, MutexGuard, TryLockError};

/// Raw buffers a quantized matrix is built from.
///
/// Exactly one of the grouped field set (`group_*`) or the legacy field set
/// (`legacy_*`) must be filled in.
#[derive(Debug, Clone, Default)]
pub struct QMatrixParts {
    /// `[packed_rows, cols]` words of bit-packed codes.
    pub packed_weights: HostTensor<u32>,
    /// `permutation[original_row] = permuted_row`.
    pub permutation: Option<Vec<u32>>,
    /// `inverse_permutation[permuted_row] = original_row`.
    pub inverse_permutation: Option<Vec<u32>>,
    /// `[groups, ceil(cols / 8)]` packed 4-bit scale codes.
    pub group_scales: Option<HostTensor<u32>>,
    pub group_scale_max: Option<Vec<f16>>,
    /// Group id of every permuted row.
    pub group_assignment: Option<Vec<u32>>,
    /// `[groups, 2]` pairs of `(bits, first_packed_row)`.
    pub group_boundary_map: Option<HostTensor<u32>>,
    /// `[groups, ceil(cols / 8)]` packed 4-bit zero codes, stored minus one.
    pub legacy_zero_points: Option<HostTensor<u32>>,
    /// `[groups, cols]`.
    pub legacy_scales: Option<HostTensor<f16>>,
    /// Group id of every permuted row.
    pub legacy_group_index: Option<Vec<u32>>,
    pub bias: Option<Vec<f16>>,
    /// At least `rows * cols` elements; allocated when absent.
    pub scratch_buffer: Option<Vec<f16>>,
}

/// Reusable reference-path buffers: the dequantized weights in half
/// precision and the same values widened for the dense multiply.
#[derive(Debug)]
pub(crate) struct Scratch {
    pub half: Vec<f16>,
    /// Grown on first use.
    pub wide: Vec<f32>,
}

/// An immutable quantized matrix plus its reusable scratch space.
#[derive(Debug)]
pub struct QMatrix {
    rows: usize,
    cols: usize,
    packed: Vec<u32>,
    permutation: Permutation,
    scheme: QuantScheme,
    layout: Vec<RowLayout>,
    bias: Option<Vec<f16>>,
    scratch: Mutex<Scratch>,
}

impl QMatrix {
    pub fn from_parts(parts: QMatrixParts) -> QMatrixResult<Self> {
        let QMatrixParts {
            packed_weights,
            permutation,
            inverse_permutation,
            group_scales,
            group_scale_max,
            group_assignment,
            group_boundary_map,
            legacy_zero_points,
            legacy_scales,
            legacy_group_index,
            bias,
            scratch_buffer,
        } = parts;

        let (qrows, cols) = packed_weights.dims2("packed_weights")?;
        if qrows == 0 || cols == 0 {
            return Err(QMatrixError::shape("packed_weights", &[qrows.max(1), cols.max(1)], &packed_weights.shape));
        }

        let grouped_fields = [
            group_scales.is_some(),
            group_scale_max.is_some(),
            group_assignment.is_some(),
            group_boundary_map.is_some(),
        ];
        let legacy_fields = [
            legacy_zero_points.is_some(),
            legacy_scales.is_some(),
            legacy_group_index.is_some(),
        ];
        let any_grouped = grouped_fields.iter().any(|&f| f);
        let any_legacy = legacy_fields.iter().any(|&f| f);

        let scheme = match (any_grouped, any_legacy) {
            (true, true) => {
                return Err(QMatrixError::InvalidMetadata(
                    "both grouped and legacy metadata supplied".into(),
                ))
            }
            (false, false) => {
                return Err(QMatrixError::InvalidMetadata(
                    "neither grouped nor legacy metadata supplied".into(),
                ))
            }
            (true, false) => match (group_scales, group_scale_max, group_assignment, group_boundary_map) {
                (Some(scales), Some(scale_max), Some(assignment), Some(boundary_map)) => {
                    let rows = assignment.len();
                    QuantScheme::Grouped(GroupedMetadata::new(
                        scales,
                        scale_max,
                        assignment,
                        boundary_map,
                        rows,
                        cols,
                        qrows,
                    )?)
                }
                _ => {
                    return Err(QMatrixError::InvalidMetadata(
                        "grouped metadata is incomplete".into(),
                    ))
                }
            },
            (false, true) => match (legacy_zero_points, legacy_scales, legacy_group_index) {
                (Some(zeros), Some(scales), Some(group_index)) => {
                    let rows = group_index.len();
                    QuantScheme::Legacy(LegacyMetadata::new(zeros, scales, group_index, rows, cols, qrows)?)
                }
                _ => {
                    return Err(QMatrixError::InvalidMetadata(
                        "legacy metadata is incomplete".into(),
                    ))
                }
            },
        };

        let rows = match &scheme {
            QuantScheme::Grouped(meta) => meta.assignment().len(),
            QuantScheme::Legacy(meta) => meta.group_index().len(),
        };
        if rows == 0 {
            return Err(QMatrixError::InvalidMetadata("matrix has no rows".into()));
        }

        let permutation = Permutation::resolve(rows, permutation, inverse_permutation)?;

        if let Some(b) = &bias {
            if b.len() != cols {
                return Err(QMatrixError::shape("bias", &[cols], &[b.len()]));
            }
        }

        let scratch = match scratch_buffer {
            Some(buf) if buf.len() < rows * cols => {
                return Err(QMatrixError::shape("scratch_buffer", &[rows * cols], &[buf.len()]));
            }
            Some(buf) => buf,
            None => vec![f16::ZERO; rows * cols],
        };

        let layout = scheme.row_layouts();

        Ok(Self {
            rows,
            cols,
            packed: packed_weights.data,
            permutation,
            scheme,
            layout,
            bias,
            scratch: Mutex::new(Scratch {
                half: scratch,
                wide: Vec::new(),
            }),
        })
    }

    /// Logical row count (GEMM reduction dimension).
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Logical column count (output features).
    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn permutation(&self) -> &Permutation {
        &self.permutation
    }

    pub fn bias(&self) -> Option<&[f16]> {
        self.bias.as_deref()
    }

    pub fn scheme_kind(&self) -> SchemeKind {
        self.scheme.kind()
    }

    pub fn info(&self) -> MatrixInfo {
        let mut rows_per_bits = [0usize; 9];
        for l in &self.layout {
            rows_per_bits[l.bits as usize] += 1;
        }
        MatrixInfo {
            rows: self.rows,
            cols: self.cols,
            scheme: self.scheme.kind(),
            groups: self.scheme.group_count(),
            rows_per_bits,
            packed_bytes: self.packed.len() * std::mem::size_of::<u32>(),
            has_bias: self.bias.is_some(),
            identity_permutation: self.permutation.is_identity(),
        }
    }

    /// Decode permuted row `p`, columns `col_start..col_start + out.len()`.
    ///
    /// Values are rounded to half precision once and returned widened to f32.
    pub(crate) fn decode_row_into(&self, p: usize, col_start: usize, out: &mut [f32]) {
        let l = self.layout[p];
        let (qrow, bit_pos, group) = (l.qrow as usize, l.bit_pos as usize, l.group as usize);
        match &self.scheme {
            QuantScheme::Grouped(meta) => {
                let zero = 1i32 << (l.bits - 1);
                for (j, o) in out.iter_mut().enumerate() {
                    let col = col_start + j;
                    let code = read_code(&self.packed, self.cols, qrow, bit_pos, l.bits, col) as i32;
                    let v = (code - zero) as f32 * meta.scale(group, col);
                    *o = f16::from_f32(v).to_f32();
                }
            }
            QuantScheme::Legacy(meta) => {
                for (j, o) in out.iter_mut().enumerate() {
                    let col = col_start + j;
                    let code = read_code(&self.packed, self.cols, qrow, bit_pos, l.bits, col) as i32;
                    let v = (code - meta.zero(group, col)) as f32 * meta.scale(group, col, self.cols);
                    *o = f16::from_f32(v).to_f32();
                }
            }
        }
    }

    /// Exclusive access to the scratch buffers, or `None` while another call holds them.
    ///
    /// Never blocks. The holder runs rayon work under the lock, so a waiting
    /// rayon worker could end up running the holder's own join.
    pub(crate) fn try_lock_scratch(&self) -> Option<MutexGuard<'_, Scratch>> {
        match self.scratch.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
}
