use crate::api::error::{QMatrixError, QMatrixResult};
use crate::api::types::{KernelPath, FUSED_TILE_K, FUSED_TILE_N};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Global switch for the fused GEMM kernel.
pub(crate) static FUSED_ENABLED: AtomicBool = AtomicBool::new(true);

/// Column tile width of the fused kernel.
pub(crate) static FUSED_TILE_N_CFG: AtomicUsize = AtomicUsize::new(FUSED_TILE_N);

/// Reduction tile depth of the fused kernel.
pub(crate) static FUSED_TILE_K_CFG: AtomicUsize = AtomicUsize::new(FUSED_TILE_K);

/// Runtime configuration for the quantized kernels.
/// Must be applied (via `apply()`) before any computation to take effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Number of threads for the global rayon pool.
    /// 0 means auto-detect (use all available cores).
    pub num_threads: usize,
    /// Allow the fused GEMM path (default true). When false every GEMM
    /// dequantizes into the scratch buffer first.
    pub fused_kernels: bool,
    /// Output columns per fused tile (default 64).
    pub fused_tile_n: usize,
    /// Reduction rows per fused tile (default 32).
    pub fused_tile_k: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            num_threads: 0,
            fused_kernels: true,
            fused_tile_n: FUSED_TILE_N,
            fused_tile_k: FUSED_TILE_K,
        }
    }
}

impl RuntimeConfig {
    /// Apply this runtime configuration globally.
    ///
    /// Optionally configures rayon's global thread pool and writes the kernel
    /// settings to global atomics. The pool can only be built once per
    /// process; a second attempt with `num_threads > 0` fails.
    pub fn apply(&self) -> QMatrixResult<()> {
        if self.fused_tile_n == 0 || self.fused_tile_k == 0 {
            return Err(QMatrixError::Runtime(format!(
                "fused tile sizes must be non-zero, got n={} k={}",
                self.fused_tile_n, self.fused_tile_k
            )));
        }

        if self.num_threads > 0 {
            rayon::ThreadPoolBuilder::new()
                .num_threads(self.num_threads)
                .build_global()
                .map_err(|e| QMatrixError::Runtime(format!("Failed to set rayon thread pool: {}", e)))?;
        }

        FUSED_ENABLED.store(self.fused_kernels, Ordering::Relaxed);
        FUSED_TILE_N_CFG.store(self.fused_tile_n, Ordering::Relaxed);
        FUSED_TILE_K_CFG.store(self.fused_tile_k, Ordering::Relaxed);

        log::info!(
            "[runtime] SIMD: {} rayon threads: {} fused kernels: {} tile: {}x{}",
            detect_simd(),
            rayon::current_num_threads(),
            self.fused_kernels,
            self.fused_tile_k,
            self.fused_tile_n
        );
        Ok(())
    }
}

/// Detect available SIMD instruction sets.
pub fn detect_simd() -> &'static str {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") {
            return "AVX2";
        }
        if is_x86_feature_detected!("sse2") {
            return "SSE2";
        }
    }
    #[cfg(target_arch = "aarch64")]
    {
        // NEON is always available on aarch64
        return "NEON";
    }
    "scalar"
}

/// What the current process can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub simd: &'static str,
    pub fused_kernels: bool,
}

impl Capabilities {
    pub fn probe() -> Self {
        Self {
            simd: detect_simd(),
            fused_kernels: FUSED_ENABLED.load(Ordering::Relaxed),
        }
    }

    /// Capabilities that only allow the reference path.
    pub fn reference_only() -> Self {
        Self {
            simd: detect_simd(),
            fused_kernels: false,
        }
    }

    pub fn select_path(&self, force_reference: bool) -> KernelPath {
        if force_reference || !self.fused_kernels {
            KernelPath::Reference
        } else {
            KernelPath::Fused
        }
    }
}

/// Compute queue that kernels are issued on: the global rayon pool or a
/// dedicated one. Work is complete when the issuing call returns.
#[derive(Debug, Clone, Default)]
pub struct Stream {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl Stream {
    /// Stream backed by the global rayon pool.
    pub fn global() -> Self {
        Self { pool: None }
    }

    /// Stream backed by a dedicated pool of `num_threads` workers.
    pub fn with_threads(num_threads: usize) -> QMatrixResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| QMatrixError::Runtime(format!("Failed to build stream thread pool: {}", e)))?;
        Ok(Self { pool: Some(Arc::new(pool)) })
    }

    pub fn num_threads(&self) -> usize {
        match &self.pool {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    /// Run `op` with this stream's pool as the rayon context.
    pub fn install<R, F>(&self, op: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

pub(crate) fn fused_tiles() -> (usize, usize) {
    (
        FUSED_TILE_N_CFG.load(Ordering::Relaxed).max(1),
        FUSED_TILE_K_CFG.load(Ordering::Relaxed).max(1),
    )
}
