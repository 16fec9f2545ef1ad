use std::sync::Arc;

use serde::{Deserialize, Serialize};
use window_lib::{
    FlagSync, ReduceOp, Result, Window, WindowLibError,
    api::TensorRef,
};

use crate::dfx::DfxHandle;

/// Capability bitmask describing the node topology. The orchestration layer
/// sets these from the detected interconnect; the drivers only size their
/// role groups from them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyHints(u32);

impl TopologyHints {
    pub const RDMA: TopologyHints = TopologyHints(1 << 0);
    pub const PCIE_ONLY: TopologyHints = TopologyHints(1 << 1);

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: TopologyHints) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn rdma(self) -> bool {
        self.contains(Self::RDMA)
    }

    pub fn pcie_only(self) -> bool {
        self.contains(Self::PCIE_ONLY)
    }
}

impl std::ops::BitOr for TopologyHints {
    type Output = TopologyHints;

    fn bitor(self, rhs: TopologyHints) -> TopologyHints {
        TopologyHints(self.0 | rhs.0)
    }
}

/// Per-process communication arguments, built once and reused across calls.
#[derive(Clone)]
pub struct CommArgs {
    pub rank: usize,
    pub rank_size: usize,
    pub local_rank: usize,
    pub local_rank_size: usize,
    /// Flag synchronizer over the per-peer shared windows (the `peerMems`
    /// list of the call ABI).
    pub sync: Arc<FlagSync>,
    /// Diagnostics record of this rank, written at driver entry and exit.
    pub dfx: DfxHandle,
    pub hints: TopologyHints,
    /// Staging buffer capacity for each unit's copier.
    pub stage_capacity: usize,
}

impl CommArgs {
    pub fn validate(&self) -> Result<()> {
        if self.rank_size == 0 || self.rank >= self.rank_size {
            return Err(WindowLibError::InvalidArgument(format!(
                "rank {} out of range for rank_size {}",
                self.rank, self.rank_size
            )));
        }
        if self.sync.rank_size() != self.rank_size {
            return Err(WindowLibError::InvalidArgument(format!(
                "peer window list covers {} ranks, call says {}",
                self.sync.rank_size(),
                self.rank_size
            )));
        }
        if self.local_rank >= self.local_rank_size
            || self.local_rank_size > self.rank_size
        {
            return Err(WindowLibError::InvalidArgument(format!(
                "local rank {}/{} inconsistent with rank_size {}",
                self.local_rank, self.local_rank_size, self.rank_size
            )));
        }
        Ok(())
    }

    pub fn window(&self, rank: usize) -> Result<Arc<Window>> {
        Ok(self.sync.window(rank)?.clone())
    }
}

/// Optional quantization parameters for the scaled copy variant.
///
/// Only a scalar scale is supported: `offset` must be zero and
/// `scale_count` at most one. Per-block scale tables stay with the
/// orchestration layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantArgs {
    pub scale: f32,
    pub scale_count: usize,
    pub offset: usize,
}

impl QuantArgs {
    pub fn scalar(scale: f32) -> Self {
        Self { scale, scale_count: 1, offset: 0 }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scale == 0.0 || !self.scale.is_finite() {
            return Err(WindowLibError::InvalidArgument(format!(
                "quantization scale {} is not usable",
                self.scale
            )));
        }
        if self.offset != 0 || self.scale_count > 1 {
            return Err(WindowLibError::InvalidArgument(
                "per-block scale tables are not supported".into(),
            ));
        }
        Ok(())
    }
}

/// One collective invocation: caller-owned buffers plus the round tag.
#[derive(Clone, Copy)]
pub struct CollectiveCall {
    pub input: TensorRef,
    pub output: TensorRef,
    /// Total element count to process, in input elements.
    pub len: usize,
    /// The round/epoch counter; must advance between calls that reuse the
    /// same windows.
    pub magic: u64,
    pub op: ReduceOp,
    /// Source rank for broadcast-style collectives.
    pub root: usize,
    pub quant: Option<QuantArgs>,
}

impl CollectiveCall {
    pub fn new(input: TensorRef, output: TensorRef, len: usize, magic: u64) -> Self {
        Self {
            input,
            output,
            len,
            magic,
            op: ReduceOp::Sum,
            root: 0,
            quant: None,
        }
    }

    pub fn with_op(mut self, op: ReduceOp) -> Self {
        self.op = op;
        self
    }

    pub fn with_root(mut self, root: usize) -> Self {
        self.root = root;
        self
    }

    pub fn with_quant(mut self, quant: QuantArgs) -> Self {
        self.quant = Some(quant);
        self
    }
}
