/// Quantizing packers that turn dense f32 weights into `QMatrixParts`.
///
/// These pick scales by max-abs and round to the nearest code. They do not
/// search bit widths or scales; the group layout is an input.
use crate::api::error::{QMatrixError, QMatrixResult};
use crate::api::types::*;
use crate::core::bitpack::{nibble_words, qrows_for, read_code, write_code, write_nibble};
use crate::core::matrix::QMatrixParts;
use crate::core::permutation::Permutation;
use half::f16;

/// Rows and bit width of one group, in permuted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSpec {
    pub rows: usize,
    pub bits: u8,
}

/// Smallest f16 that is >= `x` (for positive finite `x`).
fn f16_round_up(x: f32) -> QMatrixResult<f16> {
    let h = f16::from_f32(x);
    let h = if h.to_f32() < x { f16::from_bits(h.to_bits() + 1) } else { h };
    if !h.is_finite() {
        return Err(QMatrixError::InvalidMetadata(format!(
            "scale {} does not fit in half precision",
            x
        )));
    }
    Ok(h)
}

fn check_dense(weights: &[f32], rows: usize, cols: usize) -> QMatrixResult<()> {
    if rows == 0 || cols == 0 || weights.len() != rows * cols {
        return Err(QMatrixError::shape("dense weights", &[rows, cols], &[weights.len()]));
    }
    Ok(())
}

/// Packer for the grouped scheme.
#[derive(Debug, Clone)]
pub struct GroupedQuantizer {
    groups: Vec<GroupSpec>,
    permutation: Option<Permutation>,
}

impl GroupedQuantizer {
    pub fn new(groups: Vec<GroupSpec>) -> Self {
        Self {
            groups,
            permutation: None,
        }
    }

    /// `rows` split into groups of `group_size` rows (last one may be shorter), all at `bits`.
    pub fn uniform(rows: usize, bits: u8, group_size: usize) -> Self {
        let group_size = group_size.max(1);
        let groups = (0..rows)
            .step_by(group_size)
            .map(|start| GroupSpec {
                rows: group_size.min(rows - start),
                bits,
            })
            .collect();
        Self::new(groups)
    }

    /// Reorder rows before grouping.
    pub fn with_permutation(mut self, permutation: Permutation) -> Self {
        self.permutation = Some(permutation);
        self
    }

    /// Quantize a row-major `[rows, cols]` matrix (original row order).
    pub fn quantize(&self, weights: &[f32], rows: usize, cols: usize) -> QMatrixResult<QMatrixParts> {
        check_dense(weights, rows, cols)?;
        let covered: usize = self.groups.iter().map(|g| g.rows).sum();
        if covered != rows {
            return Err(QMatrixError::shape("group layout", &[rows], &[covered]));
        }
        if let Some(g) = self.groups.iter().find(|g| g.rows == 0) {
            return Err(QMatrixError::InvalidMetadata(format!("group spec {:?} has no rows", g)));
        }
        if let Some(g) = self
            .groups
            .iter()
            .find(|g| g.bits < MIN_GROUP_BITS || g.bits > MAX_GROUP_BITS)
        {
            return Err(QMatrixError::InvalidMetadata(format!(
                "unsupported bit width {} (expected {}..={})",
                g.bits, MIN_GROUP_BITS, MAX_GROUP_BITS
            )));
        }
        let perm = match &self.permutation {
            Some(p) if p.len() != rows => {
                return Err(QMatrixError::shape("permutation", &[rows], &[p.len()]));
            }
            Some(p) => p.clone(),
            None => Permutation::identity(rows),
        };

        let n_groups = self.groups.len();
        let qrows: usize = self.groups.iter().map(|g| qrows_for(g.rows, g.bits)).sum();
        let scale_words = nibble_words(cols);

        let mut packed = vec![0u32; qrows * cols];
        let mut scale_codes = vec![0u32; n_groups * scale_words];
        let mut scale_max = Vec::with_capacity(n_groups);
        let mut assignment = Vec::with_capacity(rows);
        let mut boundary = Vec::with_capacity(n_groups * 2);

        let mut first_row = 0usize;
        let mut first_qrow = 0usize;
        let mut col_target = vec![0.0f32; cols];
        for (g, spec) in self.groups.iter().enumerate() {
            let max_code = ((1u32 << spec.bits) - 1) as f32;
            let half_range = (1u32 << (spec.bits - 1)) as f32;
            let pos_limit = half_range - 1.0;

            let value = |p: usize, c: usize| weights[perm.original_index(p) * cols + c];

            // Per-column step that keeps the largest magnitude inside the code range.
            for (c, target) in col_target.iter_mut().enumerate() {
                let amax = (first_row..first_row + spec.rows).fold(0.0f32, |acc, p| acc.max(value(p, c).abs()));
                *target = amax / pos_limit;
            }
            let gmax = col_target.iter().fold(0.0f32, |acc, &v| acc.max(v));
            let smax = if gmax == 0.0 { f16::ONE } else { f16_round_up(gmax)? };
            let smax_f = smax.to_f32();

            for c in 0..cols {
                let code = (0..16u32)
                    .find(|&q| ((q + 1) * (q + 1)) as f32 / 256.0 * smax_f >= col_target[c])
                    .unwrap_or(15);
                write_nibble(&mut scale_codes, scale_words, g, c, code);
                let q = code as f32;
                let scale = (q + 1.0) * (q + 1.0) / 256.0 * smax_f;

                for r in 0..spec.rows {
                    let v = value(first_row + r, c);
                    let qv = if scale == 0.0 {
                        half_range
                    } else {
                        ((v / scale).round() + half_range).clamp(0.0, max_code)
                    };
                    write_code(&mut packed, cols, first_qrow, r * spec.bits as usize, spec.bits, c, qv as u32);
                }
            }

            scale_max.push(smax);
            assignment.extend(std::iter::repeat(g as u32).take(spec.rows));
            boundary.push(spec.bits as u32);
            boundary.push(first_qrow as u32);
            first_row += spec.rows;
            first_qrow += qrows_for(spec.rows, spec.bits);
        }

        let (forward, inverse) = perm.into_parts();
        Ok(QMatrixParts {
            packed_weights: HostTensor::new(packed, vec![qrows, cols]),
            permutation: Some(forward),
            inverse_permutation: Some(inverse),
            group_scales: Some(HostTensor::new(scale_codes, vec![n_groups, scale_words])),
            group_scale_max: Some(scale_max),
            group_assignment: Some(assignment),
            group_boundary_map: Some(HostTensor::new(boundary, vec![n_groups, 2])),
            ..Default::default()
        })
    }
}

/// Legacy-scheme tensors in original row order.
#[derive(Debug, Clone)]
pub struct LegacyTensors {
    /// `[ceil(rows / 8), cols]` 4-bit codes.
    pub qweight: HostTensor<u32>,
    /// `[groups, ceil(cols / 8)]` zero codes minus one.
    pub qzeros: HostTensor<u32>,
    /// `[groups, cols]`.
    pub scales: HostTensor<f16>,
    /// Group of every original row.
    pub g_idx: Vec<u32>,
}

impl LegacyTensors {
    /// Reorder into sequential group order and build store parts.
    pub fn into_parts(self) -> QMatrixResult<QMatrixParts> {
        let (_, cols) = self.qweight.dims2("qweight")?;
        let rows = self.g_idx.len();
        let (qweight, perm, g_idx) = make_sequential(&self.qweight.data, &self.g_idx, rows, cols)?;
        let (forward, inverse) = perm.into_parts();
        Ok(QMatrixParts {
            packed_weights: HostTensor::new(qweight, self.qweight.shape),
            permutation: Some(forward),
            inverse_permutation: Some(inverse),
            legacy_zero_points: Some(self.qzeros),
            legacy_scales: Some(self.scales),
            legacy_group_index: Some(g_idx),
            ..Default::default()
        })
    }
}

/// Reorder legacy rows so that group indices are ascending (stable).
///
/// Returns the reordered packed weights, the permutation
/// (`inverse[p]` = original row now stored at `p`), and the reordered group index.
pub fn make_sequential(
    qweight: &[u32],
    g_idx: &[u32],
    rows: usize,
    cols: usize,
) -> QMatrixResult<(Vec<u32>, Permutation, Vec<u32>)> {
    let qrows = qrows_for(rows, LEGACY_BITS);
    if qweight.len() != qrows * cols {
        return Err(QMatrixError::shape("qweight", &[qrows, cols], &[qweight.len()]));
    }
    let perm = Permutation::sort_by_key(g_idx);
    let mut out = vec![0u32; qweight.len()];
    for p in 0..rows {
        let orig = perm.original_index(p);
        for c in 0..cols {
            let code = read_code(qweight, cols, 0, orig * LEGACY_BITS as usize, LEGACY_BITS, c);
            write_code(&mut out, cols, 0, p * LEGACY_BITS as usize, LEGACY_BITS, c, code);
        }
    }
    let g_sorted = perm.inverse().iter().map(|&o| g_idx[o as usize]).collect();
    Ok((out, perm, g_sorted))
}

/// Packer for the legacy 4-bit scheme (symmetric, zero point 8).
#[derive(Debug, Clone)]
pub struct LegacyQuantizer {
    group_size: usize,
    g_idx: Option<Vec<u32>>,
}

impl LegacyQuantizer {
    pub fn new(group_size: usize) -> Self {
        Self {
            group_size: group_size.max(1),
            g_idx: None,
        }
    }

    /// Explicit group of every original row, in any order (activation order).
    pub fn with_group_index(mut self, g_idx: Vec<u32>) -> Self {
        self.g_idx = Some(g_idx);
        self
    }

    pub fn quantize(&self, weights: &[f32], rows: usize, cols: usize) -> QMatrixResult<LegacyTensors> {
        check_dense(weights, rows, cols)?;
        let g_idx = match &self.g_idx {
            Some(g) if g.len() != rows => {
                return Err(QMatrixError::shape("g_idx", &[rows], &[g.len()]));
            }
            Some(g) => g.clone(),
            None => (0..rows).map(|r| (r / self.group_size) as u32).collect(),
        };
        let n_groups = g_idx.iter().copied().max().map_or(0, |g| g as usize + 1);

        let mut amax = vec![0.0f32; n_groups * cols];
        for (r, &g) in g_idx.iter().enumerate() {
            for c in 0..cols {
                let slot = &mut amax[g as usize * cols + c];
                *slot = slot.max(weights[r * cols + c].abs());
            }
        }
        let scales = amax
            .iter()
            .map(|&a| if a == 0.0 { Ok(f16::ONE) } else { f16_round_up(a / 7.0) })
            .collect::<QMatrixResult<Vec<f16>>>()?;

        let zero_words = nibble_words(cols);
        let mut qzeros = vec![0u32; n_groups * zero_words];
        for g in 0..n_groups {
            for c in 0..cols {
                write_nibble(&mut qzeros, zero_words, g, c, 7);
            }
        }

        let qrows = qrows_for(rows, LEGACY_BITS);
        let mut qweight = vec![0u32; qrows * cols];
        for (r, &g) in g_idx.iter().enumerate() {
            for c in 0..cols {
                let scale = scales[g as usize * cols + c].to_f32();
                let q = ((weights[r * cols + c] / scale).round() + 8.0).clamp(0.0, 15.0) as u32;
                write_code(&mut qweight, cols, 0, r * LEGACY_BITS as usize, LEGACY_BITS, c, q);
            }
        }

        Ok(LegacyTensors {
            qweight: HostTensor::new(qweight, vec![qrows, cols]),
            qzeros: HostTensor::new(qzeros, vec![n_groups, zero_words]),
            scales: HostTensor::new(scales, vec![n_groups, cols]),
            g_idx,
        })
    }
}
