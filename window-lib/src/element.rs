use half::f16;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WindowLibError};

/// Closed set of element types moving through the copy primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    F32,
    F16,
    I32,
}

impl ElementKind {
    pub fn size_of(self) -> usize {
        match self {
            ElementKind::F32 => 4,
            ElementKind::F16 => 2,
            ElementKind::I32 => 4,
        }
    }
}

/// Reduction operator selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    /// Plain copy, no accumulation. The first contributing rank establishes
    /// the output buffer with this before peers accumulate on top.
    CopyOnly,
    Sum,
    Prod,
    Max,
    Min,
}

pub trait Element: Copy + Send + Sync + 'static {
    const KIND: ElementKind;

    fn combine(op: ReduceOp, acc: Self, rhs: Self) -> Self;
}

impl Element for f32 {
    const KIND: ElementKind = ElementKind::F32;

    fn combine(op: ReduceOp, acc: Self, rhs: Self) -> Self {
        match op {
            ReduceOp::CopyOnly => rhs,
            ReduceOp::Sum => acc + rhs,
            ReduceOp::Prod => acc * rhs,
            ReduceOp::Max => acc.max(rhs),
            ReduceOp::Min => acc.min(rhs),
        }
    }
}

impl Element for f16 {
    const KIND: ElementKind = ElementKind::F16;

    fn combine(op: ReduceOp, acc: Self, rhs: Self) -> Self {
        // f16 has no hardware arithmetic here; go through f32.
        f16::from_f32(f32::combine(op, acc.to_f32(), rhs.to_f32()))
    }
}

impl Element for i32 {
    const KIND: ElementKind = ElementKind::I32;

    fn combine(op: ReduceOp, acc: Self, rhs: Self) -> Self {
        match op {
            ReduceOp::CopyOnly => rhs,
            ReduceOp::Sum => acc.wrapping_add(rhs),
            ReduceOp::Prod => acc.wrapping_mul(rhs),
            ReduceOp::Max => acc.max(rhs),
            ReduceOp::Min => acc.min(rhs),
        }
    }
}

fn accumulate<T: Element>(dst: &mut [T], src: &[T], op: ReduceOp) {
    for (d, s) in dst.iter_mut().zip(src.iter()) {
        *d = T::combine(op, *d, *s);
    }
}

/// Apply `op` element-wise, `dst[i] = op(dst[i], src[i])`, over raw byte
/// spans of `count` elements of `kind`.
///
/// This is the single dispatch point over the `ElementKind x ReduceOp`
/// space; each kind monomorphizes `accumulate` exactly once. Both spans
/// must be element-aligned and non-overlapping.
#[allow(clippy::not_unsafe_ptr_arg_deref)]
pub(crate) fn accumulate_bytes(
    kind: ElementKind,
    op: ReduceOp,
    dst: *mut u8,
    src: *const u8,
    count: usize,
) {
    fn spans<'a, T: Element>(
        dst: *mut u8,
        src: *const u8,
        count: usize,
    ) -> (&'a mut [T], &'a [T]) {
        unsafe {
            (
                std::slice::from_raw_parts_mut(dst as *mut T, count),
                std::slice::from_raw_parts(src as *const T, count),
            )
        }
    }

    match kind {
        ElementKind::F32 => {
            let (d, s) = spans::<f32>(dst, src, count);
            accumulate(d, s, op);
        }
        ElementKind::F16 => {
            let (d, s) = spans::<f16>(dst, src, count);
            accumulate(d, s, op);
        }
        ElementKind::I32 => {
            let (d, s) = spans::<i32>(dst, src, count);
            accumulate(d, s, op);
        }
    }
}

/// `dst[i] = op(dst[i], widen(src[i]) * scale)` for the narrow/wide pair.
/// Only the `F16 -> F32` direction is defined; the reverse path goes through
/// `narrow_scaled_bytes`.
pub(crate) fn widen_scaled_bytes(
    src_kind: ElementKind,
    dst_kind: ElementKind,
    op: ReduceOp,
    scale: f32,
    dst: *mut u8,
    src: *const u8,
    count: usize,
) -> Result<()> {
    if src_kind != ElementKind::F16 || dst_kind != ElementKind::F32 {
        return Err(WindowLibError::UnsupportedElement(
            "scaled widen is only defined for f16 -> f32",
        ));
    }
    let (d, s) = unsafe {
        (
            std::slice::from_raw_parts_mut(dst as *mut f32, count),
            std::slice::from_raw_parts(src as *const f16, count),
        )
    };
    for (d, s) in d.iter_mut().zip(s.iter()) {
        *d = f32::combine(op, *d, s.to_f32() * scale);
    }
    Ok(())
}

/// `dst[i] = narrow(src[i] * scale)` for the wide/narrow pair.
pub(crate) fn narrow_scaled_bytes(
    src_kind: ElementKind,
    dst_kind: ElementKind,
    scale: f32,
    dst: *mut u8,
    src: *const u8,
    count: usize,
) -> Result<()> {
    if src_kind != ElementKind::F32 || dst_kind != ElementKind::F16 {
        return Err(WindowLibError::UnsupportedElement(
            "scaled narrow is only defined for f32 -> f16",
        ));
    }
    let (d, s) = unsafe {
        (
            std::slice::from_raw_parts_mut(dst as *mut f16, count),
            std::slice::from_raw_parts(src as *const f32, count),
        )
    };
    for (d, s) in d.iter_mut().zip(s.iter()) {
        *d = f16::from_f32(*s * scale);
    }
    Ok(())
}
