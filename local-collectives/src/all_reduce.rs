use tracing::debug;
use window_lib::{
    FlagOps, IpcRingQueue, Partition, ReduceOp, Result, StagedCopier, WindowLibError,
    api::Queue,
    partition,
};

use crate::{
    comm_args::{CollectiveCall, CommArgs},
    plan::{ChunkPlan, GroupSlot, split_groups},
    reduce_scatter::{check_lanes, produce_lane},
};

#[derive(Clone, Copy)]
pub(crate) enum Role {
    Producer { dest: usize, band: Partition },
    Reducer { band: Partition },
    Gatherer { peer: usize, band: Partition },
    Spare,
}

/// Role layout shared by the big-data and quantized AllReduce drivers:
/// `rank_size` producer groups, one reducer group, `rank_size` gather
/// groups.
pub(crate) fn assign_role(
    args: &CommArgs,
    len: usize,
    per_step: usize,
    block_idx: usize,
    block_num: usize,
) -> Result<Role> {
    let groups = 2 * args.rank_size + 1;
    let Some(slot) = split_groups(block_idx, block_num, groups, args.hints)? else {
        return Ok(Role::Spare);
    };
    let band_for = |slice_rank: usize, slot: GroupSlot| -> Result<Partition> {
        let slice = partition(len, args.rank_size, slice_rank);
        Ok(ChunkPlan::new(slice.count, per_step)?.band(slot))
    };
    Ok(if slot.group < args.rank_size {
        Role::Producer { dest: slot.group, band: band_for(slot.group, slot)? }
    } else if slot.group == args.rank_size {
        Role::Reducer { band: band_for(args.rank, slot)? }
    } else {
        let peer = slot.group - args.rank_size - 1;
        Role::Gatherer { peer, band: band_for(peer, slot)? }
    })
}

/// Big-tensor AllReduce: reduce-scatter into the Result queue, then an
/// all-gather of the reduced slices.
///
/// Producers push each rank-owned slice of the local input onto its Inbox
/// lane; the reducer folds all contributions for the own slice into the
/// Result ring (plain copy from the first rank, the operator for the rest)
/// and flags each finished slice; gather groups pull every rank's reduced
/// slice back to the local output with a final plain copy. The reducer
/// recycles a Result slot only after all ranks' outer flags confirm the
/// previous slice reached every peer.
pub struct AllReduce<'a> {
    args: &'a CommArgs,
    call: CollectiveCall,
    role: Role,
    copier: StagedCopier,
}

impl<'a> AllReduce<'a> {
    pub fn new(
        args: &'a CommArgs,
        call: &CollectiveCall,
        block_idx: usize,
        block_num: usize,
    ) -> Result<Self> {
        args.validate()?;
        check_lanes(args)?;
        let kind = call.input.kind();
        if call.output.kind() != kind {
            return Err(WindowLibError::UnsupportedElement(
                "all_reduce input and output kinds must match",
            ));
        }
        if call.input.count() != call.len || call.output.count() != call.len {
            return Err(WindowLibError::InvalidArgument(format!(
                "all_reduce buffers must both hold len = {} elements, got {} and {}",
                call.len,
                call.input.count(),
                call.output.count()
            )));
        }

        let layout = *args.sync.window(args.rank)?.layout();
        let per_step = layout.slot_capacity() / kind.size_of();
        let role = assign_role(args, call.len, per_step, block_idx, block_num)?;

        Ok(Self { args, call: *call, role, copier: StagedCopier::new(args.stage_capacity)? })
    }

    pub fn run(mut self) -> Result<()> {
        self.args.dfx.enter(self.call.magic, self.call.len, self.call.op);
        let result = match self.role {
            Role::Spare => Ok(()),
            Role::Producer { dest, band } => {
                produce_lane(self.args, &self.call, &mut self.copier, dest, band)
            }
            Role::Reducer { band } => self.reduce(band),
            Role::Gatherer { peer, band } => self.gather(peer, band),
        };
        self.args.dfx.exit();
        result
    }

    fn reduce(&mut self, band: Partition) -> Result<()> {
        let args = self.args;
        let sync = args.sync.clone();
        let kind = self.call.input.kind();
        let window = args.window(args.rank)?;
        let slot_count = window.layout().slot_count();
        let own_slice = partition(self.call.len, args.rank_size, args.rank);
        let per_step = window.layout().slot_capacity() / kind.size_of();
        let plan = ChunkPlan::new(own_slice.count, per_step)?;
        debug!(rank = args.rank, magic = self.call.magic, "all_reduce reduce");

        let mut inboxes = Vec::with_capacity(args.rank_size);
        for p in 0..args.rank_size {
            inboxes.push(IpcRingQueue::new(
                sync.clone(),
                args.window(p)?,
                self.call.magic,
                Queue::Inbox,
            ));
        }
        let mut results = IpcRingQueue::starting_at(
            sync.clone(),
            window,
            self.call.magic,
            Queue::Result,
            band.offset as u32,
        );

        for k in band.offset..band.end() {
            let step = (k * args.rank_size + args.rank) as u32;
            let span = plan.span(k);
            // The reduced value must have reached every peer before this
            // Result slot is recycled.
            if k >= slot_count {
                sync.wait_outer(
                    args.rank,
                    self.call.magic,
                    Queue::Result,
                    (k - slot_count) as u32,
                    args.rank_size,
                )?;
            }
            let (rstep, rslot) = results.enqueue();
            let reduced = rslot.tensor(kind, span.count)?;
            for (p, inbox) in inboxes.iter_mut().enumerate() {
                let slot = inbox.dequeue(step)?;
                let op = if p == 0 { ReduceOp::CopyOnly } else { self.call.op };
                self.copier.copy(slot.tensor(kind, span.count)?, reduced, op)?;
                sync.set_outer(p, args.rank, self.call.magic, Queue::Inbox, step)?;
            }
            results.commit(rstep);
        }
        Ok(())
    }

    fn gather(&mut self, peer: usize, band: Partition) -> Result<()> {
        let args = self.args;
        let sync = args.sync.clone();
        let kind = self.call.input.kind();
        let slice = partition(self.call.len, args.rank_size, peer);
        let per_step =
            args.sync.window(args.rank)?.layout().slot_capacity() / kind.size_of();
        let plan = ChunkPlan::new(slice.count, per_step)?;

        let mut results = IpcRingQueue::starting_at(
            sync.clone(),
            args.window(peer)?,
            self.call.magic,
            Queue::Result,
            band.offset as u32,
        );
        for k in band.offset..band.end() {
            let slot = results.dequeue(k as u32)?;
            let span = plan.span(k);
            self.copier.copy(
                slot.tensor(kind, span.count)?,
                self.call.output.slice(slice.offset + span.offset, span.count)?,
                ReduceOp::CopyOnly,
            )?;
            sync.set_outer(
                peer,
                args.rank,
                self.call.magic,
                Queue::Result,
                k as u32,
            )?;
        }
        Ok(())
    }
}
