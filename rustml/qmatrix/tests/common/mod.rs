#![allow(dead_code)]

use half::f16;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Uniform values in `[-range, range)` from a fixed seed.
pub fn random_f32(len: usize, range: f32, seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len).map(|_| rng.gen_range(-range..range)).collect()
}

pub fn random_f16(len: usize, range: f32, seed: u64) -> Vec<f16> {
    random_f32(len, range, seed).into_iter().map(f16::from_f32).collect()
}

/// Random bijection of `[0, n)`.
pub fn random_permutation(n: usize, seed: u64) -> Vec<u32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut p: Vec<u32> = (0..n as u32).collect();
    for i in (1..n).rev() {
        let j = rng.gen_range(0..=i);
        p.swap(i, j);
    }
    p
}

pub fn to_f32(data: &[f16]) -> Vec<f32> {
    data.iter().map(|v| v.to_f32()).collect()
}

/// Element-wise `|a - e| <= rel * max(|e|, 1)`.
pub fn assert_rel_near(actual: &[f32], expected: &[f32], rel: f32, msg: &str) {
    assert_eq!(actual.len(), expected.len(), "{}: length mismatch", msg);
    for (i, (&a, &e)) in actual.iter().zip(expected.iter()).enumerate() {
        let tol = rel * e.abs().max(1.0);
        assert!(
            (a - e).abs() <= tol,
            "{}: element [{}] mismatch: actual={}, expected={}, tolerance={}",
            msg,
            i,
            a,
            e,
            tol
        );
    }
}

/// Grouped-scheme step size of (group, column), decoded from the raw scale tables.
pub fn grouped_scale(scales: &[u32], scale_max: &[f16], cols: usize, group: usize, col: usize) -> f32 {
    let words = (cols + 7) / 8;
    let q = ((scales[group * words + col / 8] >> (4 * (col % 8))) & 0xF) as f32;
    (q + 1.0) * (q + 1.0) / 256.0 * scale_max[group].to_f32()
}
