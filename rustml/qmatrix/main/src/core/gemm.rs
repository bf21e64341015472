use crate::api::error::{QMatrixError, QMatrixResult};
use crate::api::types::{KernelPath, MatrixMut, MatrixRef};
use crate::core::dequant::reconstruct_rows;
use crate::core::matrix::{QMatrix, Scratch};
use crate::core::runtime::{fused_tiles, Capabilities, Stream};
use crate::core::simd;
use half::f16;
use rayon::prelude::*;
use std::time::Instant;

/// `C = A · dequant(B) + bias`.
///
/// `a` is `[m, k]`, `b` is `[k, n]`, `c` is `[m, n]`. Products accumulate in
/// f32 over the whole `k` dimension and are rounded to half precision once;
/// the bias is then added in half precision. Returns the path that ran.
pub fn gemm_half_q_half(
    stream: &Stream,
    caps: &Capabilities,
    a: &MatrixRef,
    b: &QMatrix,
    c: &mut MatrixMut,
    force_reference_path: bool,
) -> QMatrixResult<KernelPath> {
    let (m, k, n) = (a.rows(), b.rows(), b.cols());
    if a.cols() != k {
        return Err(QMatrixError::shape("gemm input A", &[m, k], &a.shape()));
    }
    if c.shape() != [m, n] {
        return Err(QMatrixError::shape("gemm output C", &[m, n], &c.shape()));
    }

    let _t = if log::log_enabled!(log::Level::Trace) { Some(Instant::now()) } else { None };

    let path = caps.select_path(force_reference_path);
    stream.install(|| {
        match path {
            KernelPath::Fused => {
                let (tile_n, tile_k) = fused_tiles();
                gemm_fused(a, b, c, tile_n, tile_k);
            }
            KernelPath::Reference => gemm_reference(a, b, c),
        }
        if let Some(bias) = b.bias() {
            add_bias(c, bias);
        }
    });

    if let Some(t) = _t {
        log::trace!("[perf] qmatrix::gemm_half_q_half path={} [{}x{}]x[{}x{}] {:.3}ms",
            path, m, k, k, n, t.elapsed().as_secs_f64() * 1000.0);
    }
    Ok(path)
}

/// Dequantize into the matrix scratch buffer, then dense multiply with faer.
///
/// If another call holds the scratch, this call decodes into its own
/// buffers instead of waiting.
fn gemm_reference(a: &MatrixRef, b: &QMatrix, c: &mut MatrixMut) {
    let (m, k, n) = (a.rows(), b.rows(), b.cols());
    if m == 0 {
        return;
    }

    let lhs: Vec<f32> = (0..m).flat_map(|i| a.row(i).iter().map(|v| v.to_f32())).collect();
    let mut out = vec![0.0f32; m * n];

    match b.try_lock_scratch() {
        Some(mut scratch) => {
            let Scratch { half, wide } = &mut *scratch;
            dequantize_wide(b, half, wide);
            dense_matmul(&lhs, &wide[..k * n], &mut out, m, k, n);
        }
        None => {
            log::debug!("[qmatrix] scratch busy, reference gemm [{}x{}] uses a local buffer", k, n);
            let mut half = vec![f16::ZERO; k * n];
            let mut wide = Vec::new();
            dequantize_wide(b, &mut half, &mut wide);
            dense_matmul(&lhs, &wide, &mut out, m, k, n);
        }
    }

    c.par_rows_mut()
        .zip(out.par_chunks(n))
        .for_each(|(c_row, acc)| {
            for (o, &v) in c_row.iter_mut().zip(acc) {
                *o = f16::from_f32(v);
            }
        });
}

/// Reconstruct `b` into `half[..k * n]` and widen it into `wide`, which is
/// grown to `k * n` on first use and reused afterwards.
fn dequantize_wide(b: &QMatrix, half: &mut [f16], wide: &mut Vec<f32>) {
    let (k, n) = (b.rows(), b.cols());
    let dq = &mut half[..k * n];
    reconstruct_rows(b, &mut MatrixMut::from_contiguous(dq, k, n));
    wide.resize(k * n, 0.0);
    wide.par_iter_mut()
        .zip(dq.par_iter())
        .for_each(|(w, h)| *w = h.to_f32());
}

/// Row-major `out[m, n] = lhs[m, k] @ rhs[k, n]`.
fn dense_matmul(lhs: &[f32], rhs: &[f32], out: &mut [f32], m: usize, k: usize, n: usize) {
    // C^T = B^T @ A^T using faer column-major convention
    let a_t = faer::mat::from_column_major_slice::<f32>(lhs, k, m);
    let b_t = faer::mat::from_column_major_slice::<f32>(rhs, n, k);
    let mut c_t = faer::mat::from_column_major_slice_mut::<f32>(out, n, m);
    c_t.copy_from(b_t * a_t);
}

/// Tiled kernel that decodes one `tile_k x tile_n` weight block at a time
/// and never holds the full dequantized matrix.
///
/// Column tiles run in parallel; each owns an `[m, tile_n]` f32 accumulator.
/// `A` is gathered once into permuted column order so weight rows can be
/// consumed in packed order.
fn gemm_fused(a: &MatrixRef, b: &QMatrix, c: &mut MatrixMut, tile_n: usize, tile_k: usize) {
    let (m, k, n) = (a.rows(), b.rows(), b.cols());
    if m == 0 {
        return;
    }

    let perm = b.permutation();
    let mut a_perm = vec![0.0f32; m * k];
    a_perm
        .par_chunks_mut(k)
        .enumerate()
        .for_each(|(i, dst)| {
            let src = a.row(i);
            for (p, d) in dst.iter_mut().enumerate() {
                *d = src[perm.original_index(p)].to_f32();
            }
        });

    let n_tiles = (n + tile_n - 1) / tile_n;
    let mut acc = vec![0.0f32; n_tiles * m * tile_n];

    acc.par_chunks_mut(m * tile_n)
        .enumerate()
        .for_each_init(
            || vec![0.0f32; tile_k * tile_n],
            |w_tile, (t, acc_tile)| {
                let n0 = t * tile_n;
                let tn = tile_n.min(n - n0);
                let mut k0 = 0;
                while k0 < k {
                    let tk = tile_k.min(k - k0);
                    for kk in 0..tk {
                        b.decode_row_into(k0 + kk, n0, &mut w_tile[kk * tile_n..kk * tile_n + tn]);
                    }
                    for i in 0..m {
                        let a_seg = &a_perm[i * k + k0..i * k + k0 + tk];
                        let acc_row = &mut acc_tile[i * tile_n..i * tile_n + tn];
                        for (kk, &av) in a_seg.iter().enumerate() {
                            simd::axpy(av, &w_tile[kk * tile_n..kk * tile_n + tn], acc_row);
                        }
                    }
                    k0 += tk;
                }
            },
        );

    c.par_rows_mut()
        .enumerate()
        .for_each(|(i, c_row)| {
            for t in 0..n_tiles {
                let n0 = t * tile_n;
                let tn = tile_n.min(n - n0);
                let src = &acc[t * m * tile_n + i * tile_n..t * m * tile_n + i * tile_n + tn];
                for (o, &v) in c_row[n0..n0 + tn].iter_mut().zip(src) {
                    *o = f16::from_f32(v);
                }
            }
        });
}

/// Half-precision epilogue: `c[i][j] += bias[j]`.
fn add_bias(c: &mut MatrixMut, bias: &[f16]) {
    c.par_rows_mut().for_each(|row| {
        for (o, &bv) in row.iter_mut().zip(bias) {
            *o = *o + bv;
        }
    });
}
