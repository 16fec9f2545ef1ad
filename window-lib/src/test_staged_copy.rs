use half::f16;

use crate::{
    api::TensorRef,
    element::ReduceOp,
    error::WindowLibError,
    staged_copy::StagedCopier,
};

#[test]
fn plain_copy_spanning_multiple_chunks() {
    // 8-byte stage, f32 input: two elements per chunk, trailing short chunk.
    let mut copier = StagedCopier::new(8).unwrap();
    let src: Vec<f32> = (0..7).map(|i| i as f32).collect();
    let mut dst = vec![0.0f32; 7];
    copier
        .copy(
            TensorRef::from_slice(&src),
            TensorRef::from_mut_slice(&mut dst),
            ReduceOp::CopyOnly,
        )
        .unwrap();
    assert_eq!(dst, src);
}

#[test]
fn zero_length_copy_is_a_noop() {
    let mut copier = StagedCopier::default();
    let src: Vec<f32> = Vec::new();
    let mut dst: Vec<f32> = Vec::new();
    copier
        .copy(
            TensorRef::from_slice(&src),
            TensorRef::from_mut_slice(&mut dst),
            ReduceOp::Sum,
        )
        .unwrap();
}

#[test]
fn sum_accumulates_in_place() {
    let mut copier = StagedCopier::new(16).unwrap();
    let src = vec![1.0f32, 2.0, 3.0, 4.0, 5.0];
    let mut dst = vec![10.0f32, 10.0, 10.0, 10.0, 10.0];
    copier
        .copy(
            TensorRef::from_slice(&src),
            TensorRef::from_mut_slice(&mut dst),
            ReduceOp::Sum,
        )
        .unwrap();
    assert_eq!(dst, vec![11.0, 12.0, 13.0, 14.0, 15.0]);
}

#[test]
fn max_and_min_pick_elementwise() {
    let mut copier = StagedCopier::new(16).unwrap();
    let src = vec![5i32, -7, 3];
    let mut hi = vec![4i32, 0, 9];
    let mut lo = vec![4i32, 0, 9];
    copier
        .copy(
            TensorRef::from_slice(&src),
            TensorRef::from_mut_slice(&mut hi),
            ReduceOp::Max,
        )
        .unwrap();
    copier
        .copy(
            TensorRef::from_slice(&src),
            TensorRef::from_mut_slice(&mut lo),
            ReduceOp::Min,
        )
        .unwrap();
    assert_eq!(hi, vec![5, 0, 9]);
    assert_eq!(lo, vec![4, -7, 3]);
}

#[test]
fn prod_is_sensitive_to_repetition() {
    // Multiplication exposes any double-application of the operator.
    let mut copier = StagedCopier::new(16).unwrap();
    let src = vec![2.0f32; 4];
    let mut dst = vec![3.0f32; 4];
    copier
        .copy(
            TensorRef::from_slice(&src),
            TensorRef::from_mut_slice(&mut dst),
            ReduceOp::Prod,
        )
        .unwrap();
    assert_eq!(dst, vec![6.0; 4]);
}

#[test]
fn mismatched_kinds_are_rejected() {
    let mut copier = StagedCopier::default();
    let src = vec![1.0f32; 4];
    let mut dst = vec![0i32; 4];
    assert!(matches!(
        copier.copy(
            TensorRef::from_slice(&src),
            TensorRef::from_mut_slice(&mut dst),
            ReduceOp::CopyOnly,
        ),
        Err(WindowLibError::UnsupportedElement(_))
    ));
}

#[test]
fn mismatched_lengths_are_rejected() {
    let mut copier = StagedCopier::default();
    let src = vec![1.0f32; 4];
    let mut dst = vec![0.0f32; 5];
    assert!(matches!(
        copier.copy(
            TensorRef::from_slice(&src),
            TensorRef::from_mut_slice(&mut dst),
            ReduceOp::CopyOnly,
        ),
        Err(WindowLibError::InvalidArgument(_))
    ));
}

#[test]
fn scaled_round_trip_stays_within_f16_tolerance() {
    let mut copier = StagedCopier::new(32).unwrap();
    let scale = 0.25f32;
    let src: Vec<f32> = (0..13).map(|i| 1.0 + i as f32 * 0.37).collect();
    let mut narrow = vec![f16::ZERO; 13];
    let mut wide = vec![0.0f32; 13];

    copier
        .copy_with_scale(
            TensorRef::from_slice(&src),
            TensorRef::from_mut_slice(&mut narrow),
            scale,
            ReduceOp::CopyOnly,
        )
        .unwrap();
    copier
        .copy_with_scale(
            TensorRef::from_slice(&narrow),
            TensorRef::from_mut_slice(&mut wide),
            1.0 / scale,
            ReduceOp::CopyOnly,
        )
        .unwrap();

    for (orig, got) in src.iter().zip(wide.iter()) {
        // f16 has ~3 decimal digits; the scale halves into range cleanly.
        assert!(
            (orig - got).abs() <= orig.abs() * 2e-3,
            "round trip drifted: {orig} -> {got}"
        );
    }
}

#[test]
fn scaled_widen_accumulates_in_the_wide_type() {
    let mut copier = StagedCopier::new(32).unwrap();
    let src: Vec<f16> = (1..=5).map(|i| f16::from_f32(i as f32)).collect();
    let mut acc = vec![100.0f32; 5];
    copier
        .copy_with_scale(
            TensorRef::from_slice(&src),
            TensorRef::from_mut_slice(&mut acc),
            2.0,
            ReduceOp::Sum,
        )
        .unwrap();
    assert_eq!(acc, vec![102.0, 104.0, 106.0, 108.0, 110.0]);
}

#[test]
fn scaled_narrow_rejects_accumulation() {
    let mut copier = StagedCopier::default();
    let src = vec![1.0f32; 4];
    let mut dst = vec![f16::ZERO; 4];
    assert!(matches!(
        copier.copy_with_scale(
            TensorRef::from_slice(&src),
            TensorRef::from_mut_slice(&mut dst),
            1.0,
            ReduceOp::Sum,
        ),
        Err(WindowLibError::UnsupportedElement(_))
    ));
}

#[test]
fn scaled_copy_rejects_same_kind_pairs() {
    let mut copier = StagedCopier::default();
    let src = vec![1.0f32; 4];
    let mut dst = vec![0.0f32; 4];
    assert!(matches!(
        copier.copy_with_scale(
            TensorRef::from_slice(&src),
            TensorRef::from_mut_slice(&mut dst),
            1.0,
            ReduceOp::CopyOnly,
        ),
        Err(WindowLibError::UnsupportedElement(_))
    ));
}
