use tracing::debug;
use window_lib::{
    FlagOps, IpcRingQueue, Partition, ReduceOp, Result, StagedCopier, WindowLibError,
    api::Queue,
};

use crate::{
    comm_args::{CollectiveCall, CommArgs},
    plan::{ChunkPlan, split_groups},
};

#[derive(Clone, Copy)]
enum Role {
    Producer { band: Partition },
    Consumer { peer: usize, band: Partition },
    Spare,
}

/// AllGather: every rank contributes `len` elements and ends with the
/// concatenation of all contributions in rank order.
///
/// One producer group streams the local input through the rank's Inbox
/// ring; one consumer group per peer pulls that peer's slots into the right
/// segment of the local output. Every slot is read by all ranks, so ring
/// reuse is gated on the full set of outer flags.
pub struct AllGather<'a> {
    args: &'a CommArgs,
    call: CollectiveCall,
    plan: ChunkPlan,
    role: Role,
    copier: StagedCopier,
}

impl<'a> AllGather<'a> {
    pub fn new(
        args: &'a CommArgs,
        call: &CollectiveCall,
        block_idx: usize,
        block_num: usize,
    ) -> Result<Self> {
        args.validate()?;
        let kind = call.input.kind();
        if call.output.kind() != kind {
            return Err(WindowLibError::UnsupportedElement(
                "all_gather input and output kinds must match",
            ));
        }
        if call.input.count() != call.len {
            return Err(WindowLibError::InvalidArgument(format!(
                "input holds {} elements, len says {}",
                call.input.count(),
                call.len
            )));
        }
        if call.output.count() != args.rank_size * call.len {
            return Err(WindowLibError::InvalidArgument(format!(
                "all_gather output must hold rank_size * len = {} elements, got {}",
                args.rank_size * call.len,
                call.output.count()
            )));
        }

        let layout = *args.sync.window(args.rank)?.layout();
        let plan = ChunkPlan::new(call.len, layout.slot_capacity() / kind.size_of())?;
        let groups = 1 + args.rank_size;
        let role = match split_groups(block_idx, block_num, groups, args.hints)? {
            None => Role::Spare,
            Some(slot) if slot.group == 0 => Role::Producer { band: plan.band(slot) },
            Some(slot) => {
                Role::Consumer { peer: slot.group - 1, band: plan.band(slot) }
            }
        };

        Ok(Self {
            args,
            call: *call,
            plan,
            role,
            copier: StagedCopier::new(args.stage_capacity)?,
        })
    }

    pub fn run(mut self) -> Result<()> {
        self.args.dfx.enter(self.call.magic, self.call.len, ReduceOp::CopyOnly);
        let result = match self.role {
            Role::Spare => Ok(()),
            Role::Producer { band } => self.produce(band),
            Role::Consumer { peer, band } => self.consume(peer, band),
        };
        self.args.dfx.exit();
        result
    }

    fn produce(&mut self, band: Partition) -> Result<()> {
        let sync = self.args.sync.clone();
        let window = self.args.window(self.args.rank)?;
        let slot_count = window.layout().slot_count();
        let kind = self.call.input.kind();
        debug!(rank = self.args.rank, magic = self.call.magic, "all_gather produce");

        let mut queue = IpcRingQueue::starting_at(
            sync.clone(),
            window,
            self.call.magic,
            Queue::Inbox,
            band.offset as u32,
        );
        for k in band.offset..band.end() {
            // Recycling a wrapped slot needs the previous occupant drained
            // by every rank.
            if k >= slot_count {
                sync.wait_outer(
                    self.args.rank,
                    self.call.magic,
                    Queue::Inbox,
                    (k - slot_count) as u32,
                    self.args.rank_size,
                )?;
            }
            let (step, slot) = queue.enqueue();
            let span = self.plan.span(k);
            self.copier.copy(
                self.call.input.slice(span.offset, span.count)?,
                slot.tensor(kind, span.count)?,
                ReduceOp::CopyOnly,
            )?;
            queue.commit(step);
        }
        Ok(())
    }

    fn consume(&mut self, peer: usize, band: Partition) -> Result<()> {
        let sync = self.args.sync.clone();
        let kind = self.call.input.kind();
        let mut queue = IpcRingQueue::starting_at(
            sync.clone(),
            self.args.window(peer)?,
            self.call.magic,
            Queue::Inbox,
            band.offset as u32,
        );
        for k in band.offset..band.end() {
            let slot = queue.dequeue(k as u32)?;
            let span = self.plan.span(k);
            self.copier.copy(
                slot.tensor(kind, span.count)?,
                self.call.output.slice(peer * self.call.len + span.offset, span.count)?,
                ReduceOp::CopyOnly,
            )?;
            sync.set_outer(
                peer,
                self.args.rank,
                self.call.magic,
                Queue::Inbox,
                k as u32,
            )?;
        }
        Ok(())
    }
}
