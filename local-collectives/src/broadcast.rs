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
    Consumer { band: Partition },
    Spare,
}

/// Broadcast: the root rank streams its input through its Inbox ring and
/// every rank (the root included) pulls the slots into its local output.
///
/// The fan-out read path: consumers peek the produced slot without
/// consuming it, so one produced value serves all readers; the root
/// recycles a slot only after every rank's outer flag confirms the read.
pub struct Broadcast<'a> {
    args: &'a CommArgs,
    call: CollectiveCall,
    plan: ChunkPlan,
    role: Role,
    copier: StagedCopier,
}

impl<'a> Broadcast<'a> {
    pub fn new(
        args: &'a CommArgs,
        call: &CollectiveCall,
        block_idx: usize,
        block_num: usize,
    ) -> Result<Self> {
        args.validate()?;
        if call.root >= args.rank_size {
            return Err(WindowLibError::InvalidArgument(format!(
                "root {} out of range for rank_size {}",
                call.root, args.rank_size
            )));
        }
        let kind = call.output.kind();
        if call.output.count() != call.len {
            return Err(WindowLibError::InvalidArgument(format!(
                "broadcast output must hold len = {} elements, got {}",
                call.len,
                call.output.count()
            )));
        }
        if args.rank == call.root
            && (call.input.kind() != kind || call.input.count() != call.len)
        {
            return Err(WindowLibError::InvalidArgument(
                "broadcast root input must match the output shape".into(),
            ));
        }

        let layout = *args.sync.window(args.rank)?.layout();
        let plan = ChunkPlan::new(call.len, layout.slot_capacity() / kind.size_of())?;
        // Group 0 produces (only populated on the root); group 1 consumes
        // on every rank.
        let role = match split_groups(block_idx, block_num, 2, args.hints)? {
            None => Role::Spare,
            Some(slot) if slot.group == 0 => {
                if args.rank == call.root {
                    Role::Producer { band: plan.band(slot) }
                } else {
                    Role::Spare
                }
            }
            Some(slot) => Role::Consumer { band: plan.band(slot) },
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
            Role::Consumer { band } => self.consume(band),
        };
        self.args.dfx.exit();
        result
    }

    fn produce(&mut self, band: Partition) -> Result<()> {
        let args = self.args;
        let sync = args.sync.clone();
        let window = args.window(args.rank)?;
        let slot_count = window.layout().slot_count();
        let kind = self.call.input.kind();
        debug!(root = args.rank, magic = self.call.magic, "broadcast produce");

        let mut queue = IpcRingQueue::starting_at(
            sync.clone(),
            window,
            self.call.magic,
            Queue::Inbox,
            band.offset as u32,
        );
        for k in band.offset..band.end() {
            if k >= slot_count {
                sync.wait_outer(
                    args.rank,
                    self.call.magic,
                    Queue::Inbox,
                    (k - slot_count) as u32,
                    args.rank_size,
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

    fn consume(&mut self, band: Partition) -> Result<()> {
        let args = self.args;
        let sync = args.sync.clone();
        let kind = self.call.output.kind();
        let mut queue = IpcRingQueue::starting_at(
            sync.clone(),
            args.window(self.call.root)?,
            self.call.magic,
            Queue::Inbox,
            band.offset as u32,
        );
        for k in band.offset..band.end() {
            let slot = queue.peek_front()?;
            let span = self.plan.span(k);
            self.copier.copy(
                slot.tensor(kind, span.count)?,
                self.call.output.slice(span.offset, span.count)?,
                ReduceOp::CopyOnly,
            )?;
            queue.advance_front();
            sync.set_outer(
                self.call.root,
                args.rank,
                self.call.magic,
                Queue::Inbox,
                k as u32,
            )?;
        }
        Ok(())
    }
}
