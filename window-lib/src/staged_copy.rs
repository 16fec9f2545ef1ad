use crate::{
    api::TensorRef,
    element::{
        ElementKind, ReduceOp, accumulate_bytes, narrow_scaled_bytes,
        widen_scaled_bytes,
    },
    error::{Result, WindowLibError},
};

/// Default staging buffer capacity in bytes.
pub const DEFAULT_STAGE_CAPACITY: usize = 8192;

/// Chunked copy/reduce through a pair of staging buffers.
///
/// Models the on-chip staging path: a block of elements moves
/// `src -> stage[i % 2] -> dst` one stage-sized chunk at a time, the two
/// buffers alternating so the inbound transfer of chunk `i + 1` can overlap
/// the outbound drain of chunk `i`. Transfers here are synchronous memcpys,
/// so a stage is always free by the time its turn comes around again; the
/// chunking and alternation are the algorithm.
///
/// One copier per execution unit; the staging buffers are private to it.
pub struct StagedCopier {
    stages: [Box<[u64]>; 2],
    capacity: usize,
}

impl StagedCopier {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 || !capacity.is_multiple_of(8) {
            return Err(WindowLibError::InvalidArgument(format!(
                "stage capacity must be a non-zero multiple of 8, got {}",
                capacity
            )));
        }
        let words = capacity / 8;
        Ok(Self {
            stages: [
                vec![0u64; words].into_boxed_slice(),
                vec![0u64; words].into_boxed_slice(),
            ],
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn stage_ptr(&mut self, chunk: usize) -> *mut u8 {
        self.stages[chunk % 2].as_mut_ptr() as *mut u8
    }

    /// Move `src` into `dst`, applying `op` element-wise in the output
    /// element type (`CopyOnly` overwrites). Both references must agree on
    /// kind and element count; a zero-length copy is a no-op and a trailing
    /// partial chunk is handled.
    pub fn copy(&mut self, src: TensorRef, dst: TensorRef, op: ReduceOp) -> Result<()> {
        if src.kind() != dst.kind() {
            return Err(WindowLibError::UnsupportedElement(
                "unscaled copy requires matching element kinds",
            ));
        }
        if src.count() != dst.count() {
            return Err(WindowLibError::InvalidArgument(format!(
                "copy length mismatch: {} vs {} elements",
                src.count(),
                dst.count()
            )));
        }
        let kind = src.kind();
        let per_chunk = self.capacity / kind.size_of();
        let mut done = 0usize;
        let mut chunk = 0usize;
        while done < src.count() {
            let count = per_chunk.min(src.count() - done);
            let bytes = count * kind.size_of();
            let stage = self.stage_ptr(chunk);
            let src_ptr = unsafe { src.as_ptr().add(done * kind.size_of()) };
            let dst_ptr = unsafe { dst.as_ptr().add(done * kind.size_of()) };
            unsafe {
                std::ptr::copy_nonoverlapping(src_ptr.as_ptr(), stage, bytes);
            }
            match op {
                ReduceOp::CopyOnly => unsafe {
                    std::ptr::copy_nonoverlapping(stage, dst_ptr.as_ptr(), bytes);
                },
                op => accumulate_bytes(kind, op, dst_ptr.as_ptr(), stage, count),
            }
            done += count;
            chunk += 1;
        }
        Ok(())
    }

    /// The quantized variant: convert between the narrow and wide element
    /// kinds while staged, multiplying by `scale`.
    ///
    /// `f32 -> f16` narrows (`CopyOnly` only, quantized values are never an
    /// accumulation target here); `f16 -> f32` widens and may accumulate
    /// with `op` in the wide type.
    pub fn copy_with_scale(
        &mut self,
        src: TensorRef,
        dst: TensorRef,
        scale: f32,
        op: ReduceOp,
    ) -> Result<()> {
        if src.count() != dst.count() {
            return Err(WindowLibError::InvalidArgument(format!(
                "scaled copy length mismatch: {} vs {} elements",
                src.count(),
                dst.count()
            )));
        }
        let narrowing = match (src.kind(), dst.kind()) {
            (ElementKind::F32, ElementKind::F16) => {
                if op != ReduceOp::CopyOnly {
                    return Err(WindowLibError::UnsupportedElement(
                        "scaled narrow only supports CopyOnly",
                    ));
                }
                true
            }
            (ElementKind::F16, ElementKind::F32) => false,
            _ => {
                return Err(WindowLibError::UnsupportedElement(
                    "scaled copy requires the f16/f32 pair",
                ));
            }
        };

        // Chunk on the source side; the stage holds source-kind elements.
        let per_chunk = self.capacity / src.kind().size_of();
        let src_size = src.kind().size_of();
        let dst_size = dst.kind().size_of();
        let mut done = 0usize;
        let mut chunk = 0usize;
        while done < src.count() {
            let count = per_chunk.min(src.count() - done);
            let stage = self.stage_ptr(chunk);
            let src_ptr = unsafe { src.as_ptr().add(done * src_size) };
            let dst_ptr = unsafe { dst.as_ptr().add(done * dst_size) };
            unsafe {
                std::ptr::copy_nonoverlapping(src_ptr.as_ptr(), stage, count * src_size);
            }
            if narrowing {
                narrow_scaled_bytes(
                    src.kind(),
                    dst.kind(),
                    scale,
                    dst_ptr.as_ptr(),
                    stage,
                    count,
                )?;
            } else {
                widen_scaled_bytes(
                    src.kind(),
                    dst.kind(),
                    op,
                    scale,
                    dst_ptr.as_ptr(),
                    stage,
                    count,
                )?;
            }
            done += count;
            chunk += 1;
        }
        Ok(())
    }
}

impl Default for StagedCopier {
    fn default() -> Self {
        Self::new(DEFAULT_STAGE_CAPACITY).expect("default stage capacity is valid")
    }
}
