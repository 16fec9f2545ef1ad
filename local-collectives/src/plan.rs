use window_lib::{Partition, Result, WindowLibError, partition};

use crate::comm_args::TopologyHints;

/// Where one execution unit sits inside a driver's role groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSlot {
    /// Role group index in `[0, group_count)`.
    pub group: usize,
    /// Position inside the group.
    pub sub: usize,
    /// Units per group.
    pub units: usize,
}

/// Map `block_idx` to its role group.
///
/// `block_num / group_count` units serve each group. On a PCIe-only
/// topology every group runs a single unit regardless of how many blocks
/// the caller launched. Units beyond `group_count * units` are spare:
/// `Ok(None)`, a documented no-op. A `block_num` too small to populate
/// every group, or a `block_idx` outside the launch, is an error.
pub fn split_groups(
    block_idx: usize,
    block_num: usize,
    group_count: usize,
    hints: TopologyHints,
) -> Result<Option<GroupSlot>> {
    if group_count == 0 {
        return Err(WindowLibError::InvalidArgument("no role groups".into()));
    }
    if block_idx >= block_num {
        return Err(WindowLibError::InvalidArgument(format!(
            "block {} outside block_num {}",
            block_idx, block_num
        )));
    }
    let mut units = block_num / group_count;
    if units == 0 {
        return Err(WindowLibError::InvalidArgument(format!(
            "{} blocks cannot populate {} role groups",
            block_num, group_count
        )));
    }
    if hints.pcie_only() {
        units = 1;
    }
    if block_idx >= group_count * units {
        return Ok(None);
    }
    Ok(Some(GroupSlot { group: block_idx / units, sub: block_idx % units, units }))
}

/// Chunking of an element range into ring steps.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlan {
    count: usize,
    per_step: usize,
}

impl ChunkPlan {
    pub fn new(count: usize, per_step: usize) -> Result<Self> {
        if per_step == 0 {
            return Err(WindowLibError::InvalidArgument(
                "slot capacity below one element".into(),
            ));
        }
        Ok(Self { count, per_step })
    }

    pub fn steps(&self) -> usize {
        self.count.div_ceil(self.per_step)
    }

    /// Element span of chunk `k`; the last chunk may be short.
    pub fn span(&self, k: usize) -> Partition {
        let offset = k * self.per_step;
        if offset >= self.count {
            return Partition { offset: 0, count: 0 };
        }
        Partition { offset, count: self.per_step.min(self.count - offset) }
    }

    /// The step band this unit walks: a contiguous slice of `[0, steps)`.
    pub fn band(&self, slot: GroupSlot) -> Partition {
        partition(self.steps(), slot.units, slot.sub)
    }
}
