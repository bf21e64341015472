/// SIMD kernels for the fused GEMM inner loop.
///
/// Uses `std::arch` target-specific intrinsics with scalar fallbacks.
/// Multiply and add are issued separately (no FMA) so every backend produces
/// bit-identical results.
///
/// Dispatch hierarchy:
/// - x86_64: AVX2 (8 lanes) -> SSE2 (4 lanes)
/// - aarch64: NEON (4 lanes)
/// - Other: scalar fallback

/// Scalar `y += alpha * x`.
fn axpy_scalar(alpha: f32, x: &[f32], y: &mut [f32]) {
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += alpha * xi;
    }
}

// --- x86_64 SIMD implementations ---

#[cfg(target_arch = "x86_64")]
mod x86 {
    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn axpy_avx2(alpha: f32, x: &[f32], y: &mut [f32]) {
        use std::arch::x86_64::*;

        let n = x.len().min(y.len());
        let a = _mm256_set1_ps(alpha);
        let mut i = 0;
        while i + 8 <= n {
            let xv = _mm256_loadu_ps(x.as_ptr().add(i));
            let yv = _mm256_loadu_ps(y.as_ptr().add(i));
            _mm256_storeu_ps(y.as_mut_ptr().add(i), _mm256_add_ps(yv, _mm256_mul_ps(a, xv)));
            i += 8;
        }
        super::axpy_scalar(alpha, &x[i..n], &mut y[i..n]);
    }

    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn axpy_sse2(alpha: f32, x: &[f32], y: &mut [f32]) {
        use std::arch::x86_64::*;

        let n = x.len().min(y.len());
        let a = _mm_set1_ps(alpha);
        let mut i = 0;
        while i + 4 <= n {
            let xv = _mm_loadu_ps(x.as_ptr().add(i));
            let yv = _mm_loadu_ps(y.as_ptr().add(i));
            _mm_storeu_ps(y.as_mut_ptr().add(i), _mm_add_ps(yv, _mm_mul_ps(a, xv)));
            i += 4;
        }
        super::axpy_scalar(alpha, &x[i..n], &mut y[i..n]);
    }
}

// --- aarch64 NEON implementations ---

#[cfg(target_arch = "aarch64")]
mod arm {
    #[target_feature(enable = "neon")]
    pub(super) unsafe fn axpy_neon(alpha: f32, x: &[f32], y: &mut [f32]) {
        use std::arch::aarch64::*;

        let n = x.len().min(y.len());
        let a = vdupq_n_f32(alpha);
        let mut i = 0;
        while i + 4 <= n {
            let xv = vld1q_f32(x.as_ptr().add(i));
            let yv = vld1q_f32(y.as_ptr().add(i));
            vst1q_f32(y.as_mut_ptr().add(i), vaddq_f32(yv, vmulq_f32(a, xv)));
            i += 4;
        }
        super::axpy_scalar(alpha, &x[i..n], &mut y[i..n]);
    }
}

// --- Runtime dispatch ---

#[cfg(target_arch = "x86_64")]
fn axpy_dispatch(alpha: f32, x: &[f32], y: &mut [f32]) {
    if is_x86_feature_detected!("avx2") {
        unsafe { x86::axpy_avx2(alpha, x, y) }
    } else {
        unsafe { x86::axpy_sse2(alpha, x, y) }
    }
}

#[cfg(target_arch = "aarch64")]
fn axpy_dispatch(alpha: f32, x: &[f32], y: &mut [f32]) {
    unsafe { arm::axpy_neon(alpha, x, y) }
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
fn axpy_dispatch(alpha: f32, x: &[f32], y: &mut [f32]) {
    axpy_scalar(alpha, x, y)
}

/// Runtime-dispatched `y += alpha * x` over `min(x.len(), y.len())` elements.
#[inline]
pub fn axpy(alpha: f32, x: &[f32], y: &mut [f32]) {
    debug_assert_eq!(x.len(), y.len());
    axpy_dispatch(alpha, x, y)
}
