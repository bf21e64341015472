use crate::api::error::{QMatrixError, QMatrixResult};
use crate::api::types::MatrixMut;
use crate::core::matrix::QMatrix;
use crate::core::runtime::Stream;
use half::f16;
use rayon::prelude::*;
use std::time::Instant;

/// Dequantize `matrix` into `output` in original (unpermuted) row order.
///
/// `output` must be `[rows, cols]`. Row `r` of the output is permuted row
/// `permutation[r]` of the packed buffer.
pub fn reconstruct(stream: &Stream, matrix: &QMatrix, output: &mut MatrixMut) -> QMatrixResult<()> {
    let expected = [matrix.rows(), matrix.cols()];
    if output.shape() != expected {
        return Err(QMatrixError::shape("reconstruct output", &expected, &output.shape()));
    }

    let _t = if log::log_enabled!(log::Level::Trace) { Some(Instant::now()) } else { None };

    stream.install(|| reconstruct_rows(matrix, output));

    if let Some(t) = _t {
        log::trace!("[perf] qmatrix::reconstruct [{}x{}] {:.3}ms",
            matrix.rows(), matrix.cols(), t.elapsed().as_secs_f64() * 1000.0);
    }
    Ok(())
}

/// Row-parallel body of `reconstruct`; shape already checked.
pub(crate) fn reconstruct_rows(matrix: &QMatrix, output: &mut MatrixMut) {
    let cols = matrix.cols();
    let perm = matrix.permutation();
    output
        .par_rows_mut()
        .enumerate()
        .for_each_init(
            || vec![0.0f32; cols],
            |buf, (orig, out_row)| {
                matrix.decode_row_into(perm.permuted_index(orig), 0, buf);
                for (o, &v) in out_row.iter_mut().zip(buf.iter()) {
                    *o = f16::from_f32(v);
                }
            },
        );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::HostTensor;
    use crate::core::bitpack::write_code;
    use crate::core::matrix::QMatrixParts;

    /// 4 rows x 1 col at 8 bits, scale 0.5, rows stored reversed.
    fn reversed_matrix() -> QMatrix {
        let mut packed = vec![0u32; 1];
        // permuted row p holds original row 3 - p with value (3 - p) + 1.
        for p in 0..4usize {
            let orig = 3 - p;
            let code = 128 + 2 * (orig as u32 + 1);
            write_code(&mut packed, 1, 0, p * 8, 8, 0, code);
        }
        QMatrix::from_parts(QMatrixParts {
            packed_weights: HostTensor::new(packed, vec![1, 1]),
            permutation: Some(vec![3, 2, 1, 0]),
            group_scales: Some(HostTensor::new(vec![0xF], vec![1, 1])),
            group_scale_max: Some(vec![f16::from_f32(0.5)]),
            group_assignment: Some(vec![0; 4]),
            group_boundary_map: Some(HostTensor::new(vec![8, 0], vec![1, 2])),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_reconstruct_restores_original_order() {
        let m = reversed_matrix();
        let mut out = vec![f16::ZERO; 4];
        reconstruct(&Stream::global(), &m, &mut MatrixMut::new(&mut out, 4, 1).unwrap()).unwrap();
        let vals: Vec<f32> = out.iter().map(|v| v.to_f32()).collect();
        assert_eq!(vals, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_reconstruct_strided_output() {
        let m = reversed_matrix();
        let mut out = vec![f16::from_f32(-9.0); 4 * 3];
        reconstruct(&Stream::global(), &m, &mut MatrixMut::with_stride(&mut out, 4, 1, 3).unwrap()).unwrap();
        assert_eq!(out[0].to_f32(), 1.0);
        assert_eq!(out[9].to_f32(), 4.0);
        // padding untouched
        assert_eq!(out[1].to_f32(), -9.0);
    }

    #[test]
    fn test_reconstruct_shape_mismatch() {
        let m = reversed_matrix();
        let mut out = vec![f16::ZERO; 8];
        let err = reconstruct(&Stream::global(), &m, &mut MatrixMut::new(&mut out, 4, 2).unwrap()).unwrap_err();
        assert!(matches!(err, QMatrixError::ShapeMismatch { .. }));
    }
}
