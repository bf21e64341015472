/// Handle-based entry points.
///
/// Free functions run against `MatrixStore::global()` with the global stream
/// and probed capabilities; the `MatrixStore` methods do the same for a
/// privately owned store.
use crate::api::error::QMatrixResult;
use crate::api::types::{KernelPath, MatrixHandle, MatrixInfo, MatrixMut, MatrixRef};
use crate::core::dequant;
use crate::core::gemm;
use crate::core::matrix::QMatrixParts;
use crate::core::runtime::{Capabilities, Stream};
use crate::core::store::MatrixStore;

impl MatrixStore {
    pub fn matrix_info(&self, handle: MatrixHandle) -> QMatrixResult<MatrixInfo> {
        Ok(self.get(handle)?.info())
    }

    pub fn reconstruct(&self, stream: &Stream, handle: MatrixHandle, output: &mut MatrixMut) -> QMatrixResult<()> {
        let matrix = self.get(handle)?;
        dequant::reconstruct(stream, &matrix, output)
    }

    pub fn gemm_half_q_half(
        &self,
        stream: &Stream,
        caps: &Capabilities,
        a: &MatrixRef,
        handle: MatrixHandle,
        c: &mut MatrixMut,
        force_reference_path: bool,
    ) -> QMatrixResult<KernelPath> {
        let matrix = self.get(handle)?;
        gemm::gemm_half_q_half(stream, caps, a, &matrix, c, force_reference_path)
    }
}

/// Validate `parts` and register the matrix in the global store.
pub fn create_matrix(parts: QMatrixParts) -> QMatrixResult<MatrixHandle> {
    MatrixStore::global().create(parts)
}

/// Release a matrix. Destroying twice yields `StaleHandle`.
pub fn destroy_matrix(handle: MatrixHandle) -> QMatrixResult<()> {
    MatrixStore::global().destroy(handle)
}

pub fn matrix_info(handle: MatrixHandle) -> QMatrixResult<MatrixInfo> {
    MatrixStore::global().matrix_info(handle)
}

/// Dequantize into `output` (`[rows, cols]`, original row order).
pub fn reconstruct(handle: MatrixHandle, output: &mut MatrixMut) -> QMatrixResult<()> {
    reconstruct_on(&Stream::global(), handle, output)
}

pub fn reconstruct_on(stream: &Stream, handle: MatrixHandle, output: &mut MatrixMut) -> QMatrixResult<()> {
    MatrixStore::global().reconstruct(stream, handle, output)
}

/// `C = A · dequant(B) + bias`; returns the path that ran.
pub fn gemm_half_q_half(
    a: &MatrixRef,
    handle: MatrixHandle,
    c: &mut MatrixMut,
    force_reference_path: bool,
) -> QMatrixResult<KernelPath> {
    gemm_half_q_half_on(&Stream::global(), &Capabilities::probe(), a, handle, c, force_reference_path)
}

pub fn gemm_half_q_half_on(
    stream: &Stream,
    caps: &Capabilities,
    a: &MatrixRef,
    handle: MatrixHandle,
    c: &mut MatrixMut,
    force_reference_path: bool,
) -> QMatrixResult<KernelPath> {
    MatrixStore::global().gemm_half_q_half(stream, caps, a, handle, c, force_reference_path)
}
