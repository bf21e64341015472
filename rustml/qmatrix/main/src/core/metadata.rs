/// Quantization metadata schemes.
///
/// A matrix carries exactly one scheme: grouped (variable bit width per
/// contiguous row group, 4-bit scale codes relative to a per-group maximum)
/// or legacy (fixed 4-bit codes with per-group scales and zero points).
use crate::api::error::{QMatrixError, QMatrixResult};
use crate::api::types::*;
use crate::core::bitpack::{nibble_words, qrows_for, read_nibble};
use half::f16;

/// Where a group's rows live in the packed buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupBoundary {
    pub bits: u8,
    pub first_qrow: usize,
    pub first_row: usize,
    pub rows: usize,
}

#[derive(Debug, Clone)]
pub struct GroupedMetadata {
    scale_codes: Vec<u32>,
    scale_words: usize,
    scale_max: Vec<f16>,
    groups: Vec<GroupBoundary>,
    assignment: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct LegacyMetadata {
    zero_codes: Vec<u32>,
    zero_words: usize,
    scales: Vec<f16>,
    group_index: Vec<u32>,
    groups: usize,
}

#[derive(Debug, Clone)]
pub enum QuantScheme {
    Grouped(GroupedMetadata),
    Legacy(LegacyMetadata),
}

/// Decode parameters of one permuted row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RowLayout {
    pub bits: u8,
    pub qrow: u32,
    pub bit_pos: u32,
    pub group: u32,
}

impl GroupedMetadata {
    /// Validate grouped metadata for a `rows` x `cols` matrix stored in `qrows` packed rows.
    pub fn new(
        scales: HostTensor<u32>,
        scale_max: Vec<f16>,
        assignment: Vec<u32>,
        boundary_map: HostTensor<u32>,
        rows: usize,
        cols: usize,
        qrows: usize,
    ) -> QMatrixResult<Self> {
        if assignment.len() != rows {
            return Err(QMatrixError::shape("group_assignment", &[rows], &[assignment.len()]));
        }
        let (n_groups, pair) = boundary_map.dims2("group_boundary_map")?;
        if pair != 2 || n_groups == 0 {
            return Err(QMatrixError::shape("group_boundary_map", &[n_groups.max(1), 2], &boundary_map.shape));
        }

        // Group ids must start at 0 and step by at most one per row.
        let mut row_counts = vec![0usize; n_groups];
        let mut first_rows = vec![0usize; n_groups];
        let mut prev: Option<u32> = None;
        for (p, &g) in assignment.iter().enumerate() {
            if g as usize >= n_groups {
                return Err(QMatrixError::InvalidMetadata(format!(
                    "row {} refers to group {} but only {} groups are defined",
                    p, g, n_groups
                )));
            }
            let expected_ok = match prev {
                None => g == 0,
                Some(q) => g == q || g == q + 1,
            };
            if !expected_ok {
                return Err(QMatrixError::InvalidMetadata(format!(
                    "group ids must be contiguous and ascending; row {} jumps to group {}",
                    p, g
                )));
            }
            if prev != Some(g) {
                first_rows[g as usize] = p;
            }
            row_counts[g as usize] += 1;
            prev = Some(g);
        }
        if let Some(g) = row_counts.iter().position(|&c| c == 0) {
            return Err(QMatrixError::InvalidMetadata(format!("group {} has no rows", g)));
        }

        let mut groups = Vec::with_capacity(n_groups);
        let mut next_free_qrow = 0usize;
        for g in 0..n_groups {
            let raw_bits = boundary_map.data[g * 2];
            let first_qrow = boundary_map.data[g * 2 + 1] as usize;
            if raw_bits < MIN_GROUP_BITS as u32 || raw_bits > MAX_GROUP_BITS as u32 {
                return Err(QMatrixError::InvalidMetadata(format!(
                    "group {} has unsupported bit width {} (expected {}..={})",
                    g, raw_bits, MIN_GROUP_BITS, MAX_GROUP_BITS
                )));
            }
            let bits = raw_bits as u8;
            if first_qrow != next_free_qrow {
                return Err(QMatrixError::InvalidMetadata(format!(
                    "group {} starts at packed row {} but the previous group ends at {}",
                    g, first_qrow, next_free_qrow
                )));
            }
            let end = first_qrow + qrows_for(row_counts[g], bits);
            if end > qrows {
                return Err(QMatrixError::shape("packed_weights", &[end, cols], &[qrows, cols]));
            }
            next_free_qrow = end;
            groups.push(GroupBoundary {
                bits,
                first_qrow,
                first_row: first_rows[g],
                rows: row_counts[g],
            });
        }
        if next_free_qrow != qrows {
            return Err(QMatrixError::shape("packed_weights", &[next_free_qrow, cols], &[qrows, cols]));
        }

        let scale_words = nibble_words(cols);
        let (s_rows, s_cols) = scales.dims2("group_scales")?;
        if s_rows != n_groups || s_cols != scale_words {
            return Err(QMatrixError::shape("group_scales", &[n_groups, scale_words], &scales.shape));
        }
        if scale_max.len() != n_groups {
            return Err(QMatrixError::shape("group_scale_max", &[n_groups], &[scale_max.len()]));
        }

        Ok(Self {
            scale_codes: scales.data,
            scale_words,
            scale_max,
            groups,
            assignment,
        })
    }

    pub fn groups(&self) -> &[GroupBoundary] {
        &self.groups
    }

    pub fn assignment(&self) -> &[u32] {
        &self.assignment
    }

    #[inline]
    pub fn scale(&self, group: usize, col: usize) -> f32 {
        let q = read_nibble(&self.scale_codes, self.scale_words, group, col) as f32;
        (q + 1.0) * (q + 1.0) / 256.0 * self.scale_max[group].to_f32()
    }
}

impl LegacyMetadata {
    /// Validate legacy metadata for a `rows` x `cols` matrix stored in `qrows` packed rows.
    pub fn new(
        zero_points: HostTensor<u32>,
        scales: HostTensor<f16>,
        group_index: Vec<u32>,
        rows: usize,
        cols: usize,
        qrows: usize,
    ) -> QMatrixResult<Self> {
        let needed = qrows_for(rows, LEGACY_BITS);
        if qrows != needed {
            return Err(QMatrixError::shape("packed_weights", &[needed, cols], &[qrows, cols]));
        }
        if group_index.len() != rows {
            return Err(QMatrixError::shape("legacy_group_index", &[rows], &[group_index.len()]));
        }
        let (groups, s_cols) = scales.dims2("legacy_scales")?;
        if groups == 0 || s_cols != cols {
            return Err(QMatrixError::shape("legacy_scales", &[groups.max(1), cols], &scales.shape));
        }
        let zero_words = nibble_words(cols);
        let (z_rows, z_cols) = zero_points.dims2("legacy_zero_points")?;
        if z_rows != groups || z_cols != zero_words {
            return Err(QMatrixError::shape("legacy_zero_points", &[groups, zero_words], &zero_points.shape));
        }
        if let Some(p) = group_index.iter().position(|&g| g as usize >= groups) {
            return Err(QMatrixError::InvalidMetadata(format!(
                "row {} refers to legacy group {} but only {} groups are defined",
                p, group_index[p], groups
            )));
        }

        Ok(Self {
            zero_codes: zero_points.data,
            zero_words,
            scales: scales.data,
            group_index,
            groups,
        })
    }

    pub fn group_index(&self) -> &[u32] {
        &self.group_index
    }

    #[inline]
    pub fn scale(&self, group: usize, col: usize, cols: usize) -> f32 {
        self.scales[group * cols + col].to_f32()
    }

    /// Stored zero codes are offset by one.
    #[inline]
    pub fn zero(&self, group: usize, col: usize) -> i32 {
        read_nibble(&self.zero_codes, self.zero_words, group, col) as i32 + 1
    }
}

impl QuantScheme {
    pub fn kind(&self) -> SchemeKind {
        match self {
            QuantScheme::Grouped(_) => SchemeKind::Grouped,
            QuantScheme::Legacy(_) => SchemeKind::Legacy,
        }
    }

    pub fn group_count(&self) -> usize {
        match self {
            QuantScheme::Grouped(g) => g.groups.len(),
            QuantScheme::Legacy(l) => l.groups,
        }
    }

    /// Per-row decode parameters, indexed by permuted row.
    pub(crate) fn row_layouts(&self) -> Vec<RowLayout> {
        match self {
            QuantScheme::Grouped(meta) => meta
                .assignment
                .iter()
                .enumerate()
                .map(|(p, &g)| {
                    let b = &meta.groups[g as usize];
                    RowLayout {
                        bits: b.bits,
                        qrow: b.first_qrow as u32,
                        bit_pos: ((p - b.first_row) * b.bits as usize) as u32,
                        group: g,
                    }
                })
                .collect(),
            QuantScheme::Legacy(meta) => meta
                .group_index
                .iter()
                .enumerate()
                .map(|(p, &g)| RowLayout {
                    bits: LEGACY_BITS,
                    qrow: 0,
                    bit_pos: (p * LEGACY_BITS as usize) as u32,
                    group: g,
                })
                .collect(),
        }
    }
}
