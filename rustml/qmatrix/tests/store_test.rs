mod common;

use common::random_f32;
use half::f16;
use rustml_qmatrix::{
    create_matrix, destroy_matrix, gemm_half_q_half, matrix_info, reconstruct, Capabilities,
    GroupSpec, GroupedQuantizer, HostTensor, KernelPath, LegacyQuantizer, MatrixHandle, MatrixMut,
    MatrixRef, MatrixStore, QMatrixError, QMatrixParts, SchemeKind, Stream,
};
use rayon::prelude::*;
use std::sync::Arc;

fn small_parts(seed: u64) -> QMatrixParts {
    let weights = random_f32(32 * 8, 1.0, seed);
    GroupedQuantizer::uniform(32, 4, 16).quantize(&weights, 32, 8).unwrap()
}

#[test]
fn destroyed_handle_is_stale_everywhere() {
    let h = create_matrix(small_parts(1)).unwrap();
    destroy_matrix(h).unwrap();

    assert!(matches!(matrix_info(h), Err(QMatrixError::StaleHandle(x)) if x == h));

    let mut out = vec![f16::ZERO; 32 * 8];
    let err = reconstruct(h, &mut MatrixMut::new(&mut out, 32, 8).unwrap()).unwrap_err();
    assert!(matches!(err, QMatrixError::StaleHandle(_)));

    let a = vec![f16::ONE; 32];
    let mut c = vec![f16::ZERO; 8];
    let err = gemm_half_q_half(
        &MatrixRef::new(&a, 1, 32).unwrap(),
        h,
        &mut MatrixMut::new(&mut c, 1, 8).unwrap(),
        false,
    )
    .unwrap_err();
    assert!(matches!(err, QMatrixError::StaleHandle(_)));

    assert!(matches!(destroy_matrix(h), Err(QMatrixError::StaleHandle(_))));
}

#[test]
fn reused_slot_does_not_revive_old_handle() {
    let store = MatrixStore::new();
    let old = store.create(small_parts(2)).unwrap();
    store.destroy(old).unwrap();
    let new = store.create(small_parts(3)).unwrap();
    assert_ne!(old, new);
    assert!(!store.contains(old));
    assert!(store.contains(new));
    assert_eq!(MatrixHandle::from_raw(new.into_raw()), new);
}

#[test]
fn matrix_info_reports_layout() {
    let weights = random_f32(48 * 10, 1.0, 4);
    let mut parts = GroupedQuantizer::new(vec![
        GroupSpec { rows: 16, bits: 8 },
        GroupSpec { rows: 32, bits: 2 },
    ])
    .quantize(&weights, 48, 10)
    .unwrap();
    parts.bias = Some(vec![f16::ONE; 10]);
    let h = create_matrix(parts).unwrap();
    let info = matrix_info(h).unwrap();
    assert_eq!((info.rows, info.cols), (48, 10));
    assert_eq!(info.scheme, SchemeKind::Grouped);
    assert_eq!(info.groups, 2);
    assert_eq!(info.rows_per_bits[8], 16);
    assert_eq!(info.rows_per_bits[2], 32);
    // 16 rows * 8 bits = 4 qrows, 32 rows * 2 bits = 2 qrows
    assert_eq!(info.packed_bytes, 6 * 10 * 4);
    assert!(info.has_bias);
    assert!(info.identity_permutation);
    destroy_matrix(h).unwrap();

    let legacy = LegacyQuantizer::new(8).quantize(&random_f32(16 * 4, 1.0, 5), 16, 4).unwrap();
    let store = MatrixStore::new();
    let h = store.create(legacy.into_parts().unwrap()).unwrap();
    let info = store.matrix_info(h).unwrap();
    assert_eq!(info.scheme, SchemeKind::Legacy);
    assert_eq!(info.rows_per_bits[4], 16);
    assert!(!info.has_bias);
}

#[test]
fn create_rejects_inconsistent_buffers() {
    // packed buffer too short for the group layout
    let mut parts = small_parts(6);
    parts.packed_weights = HostTensor::new(vec![0; 3 * 8], vec![3, 8]);
    assert!(matches!(create_matrix(parts), Err(QMatrixError::ShapeMismatch { .. })));

    // declared shape disagrees with the data
    let mut parts = small_parts(6);
    parts.packed_weights.shape = vec![4, 9];
    assert!(matches!(create_matrix(parts), Err(QMatrixError::ShapeMismatch { .. })));

    // scale table for the wrong column count
    let mut parts = small_parts(6);
    parts.group_scales = Some(HostTensor::new(vec![0; 4], vec![2, 2]));
    assert!(matches!(create_matrix(parts), Err(QMatrixError::ShapeMismatch { .. })));

    // group id outside the boundary map
    let mut parts = small_parts(6);
    if let Some(a) = parts.group_assignment.as_mut() {
        a[31] = 2;
    }
    assert!(matches!(create_matrix(parts), Err(QMatrixError::InvalidMetadata(_))));

    // legacy and grouped metadata together
    let mut parts = small_parts(6);
    parts.legacy_group_index = Some(vec![0; 32]);
    assert!(matches!(create_matrix(parts), Err(QMatrixError::InvalidMetadata(_))));

    // neither scheme
    let parts = QMatrixParts {
        packed_weights: HostTensor::new(vec![0; 8], vec![1, 8]),
        ..Default::default()
    };
    assert!(matches!(create_matrix(parts), Err(QMatrixError::InvalidMetadata(_))));

    // one packed row more than the group layout fills
    let mut parts = small_parts(6);
    parts.packed_weights.data.extend([0; 8]);
    parts.packed_weights.shape = vec![5, 8];
    assert!(matches!(create_matrix(parts), Err(QMatrixError::ShapeMismatch { .. })));

    // same surplus row, placed as a gap between the two groups
    let mut parts = small_parts(6);
    parts.packed_weights.data.extend([0; 8]);
    parts.packed_weights.shape = vec![5, 8];
    parts.group_boundary_map = Some(HostTensor::new(vec![4, 0, 4, 3], vec![2, 2]));
    assert!(matches!(create_matrix(parts), Err(QMatrixError::InvalidMetadata(_))));

    let mut parts = small_parts(6);
    parts.group_scale_max = Some(vec![f16::ONE; 3]);
    assert!(matches!(create_matrix(parts), Err(QMatrixError::ShapeMismatch { .. })));

    // legacy packing of 32 rows needs exactly 4 packed rows
    let mut parts = LegacyQuantizer::new(16)
        .quantize(&random_f32(32 * 8, 1.0, 6), 32, 8)
        .unwrap()
        .into_parts()
        .unwrap();
    parts.packed_weights.data.extend([0; 8]);
    parts.packed_weights.shape = vec![5, 8];
    assert!(matches!(create_matrix(parts), Err(QMatrixError::ShapeMismatch { .. })));

    // shape whose element count overflows
    let mut parts = small_parts(6);
    parts.packed_weights = HostTensor::new(vec![], vec![1 << 62, 4]);
    assert!(matches!(create_matrix(parts), Err(QMatrixError::ShapeMismatch { .. })));

    let mut parts = small_parts(6);
    parts.bias = Some(vec![f16::ZERO; 7]);
    assert!(matches!(create_matrix(parts), Err(QMatrixError::ShapeMismatch { .. })));

    let mut parts = small_parts(6);
    parts.scratch_buffer = Some(vec![f16::ZERO; 32 * 8 - 1]);
    assert!(matches!(create_matrix(parts), Err(QMatrixError::ShapeMismatch { .. })));
}

#[test]
fn concurrent_create_and_destroy() {
    let store = Arc::new(MatrixStore::new());
    let parts = small_parts(7);
    std::thread::scope(|s| {
        for t in 0..8 {
            let store = Arc::clone(&store);
            let parts = parts.clone();
            s.spawn(move || {
                let mut live = Vec::new();
                for i in 0..40 {
                    live.push(store.create(parts.clone()).unwrap());
                    if i % 3 == t % 3 {
                        let h = live.remove(0);
                        store.destroy(h).unwrap();
                        assert!(!store.contains(h));
                    }
                }
                for h in live {
                    assert!(store.contains(h));
                    store.destroy(h).unwrap();
                }
            });
        }
    });
    assert!(store.is_empty());
}

#[test]
fn concurrent_reference_calls_on_one_handle() {
    let store = MatrixStore::new();
    let h = store.create(small_parts(8)).unwrap();
    let a = common::random_f16(4 * 32, 1.0, 9);
    let caps = Capabilities::reference_only();
    let stream = Stream::global();

    let run = || {
        let mut c = vec![f16::ZERO; 4 * 8];
        let path = store
            .gemm_half_q_half(
                &stream,
                &caps,
                &MatrixRef::new(&a, 4, 32).unwrap(),
                h,
                &mut MatrixMut::new(&mut c, 4, 8).unwrap(),
                false,
            )
            .unwrap();
        assert_eq!(path, KernelPath::Reference);
        c
    };
    let expected = run();
    std::thread::scope(|s| {
        let workers: Vec<_> = (0..6).map(|_| s.spawn(|| run())).collect();
        for w in workers {
            assert_eq!(w.join().unwrap(), expected);
        }
    });
}

#[test]
fn reference_calls_on_one_handle_inside_par_iter() {
    let (k, n) = (1024, 16);
    let weights = random_f32(k * n, 1.0, 10);
    let store = MatrixStore::new();
    let h = store
        .create(GroupedQuantizer::uniform(k, 4, 128).quantize(&weights, k, n).unwrap())
        .unwrap();
    let a = common::random_f16(2 * k, 1.0, 11);
    let caps = Capabilities::reference_only();

    let run = || {
        let mut c = vec![f16::ZERO; 2 * n];
        store
            .gemm_half_q_half(
                &Stream::global(),
                &caps,
                &MatrixRef::new(&a, 2, k).unwrap(),
                h,
                &mut MatrixMut::new(&mut c, 2, n).unwrap(),
                true,
            )
            .unwrap();
        c
    };
    let expected = run();

    let pool = Stream::with_threads(4).unwrap();
    let results: Vec<Vec<f16>> = pool.install(|| (0..128).into_par_iter().map(|_| run()).collect());
    assert_eq!(results.len(), 128);
    assert!(results.iter().all(|c| *c == expected));
}
