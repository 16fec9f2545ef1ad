use tracing::debug;
use window_lib::{
    FlagOps, IpcRingQueue, Partition, ReduceOp, Result, StagedCopier, WindowLibError,
    api::Queue,
    partition,
};

use crate::{
    comm_args::{CollectiveCall, CommArgs},
    plan::{ChunkPlan, split_groups},
};

#[derive(Clone, Copy)]
enum Role {
    Producer { dest: usize, band: Partition },
    Reducer { band: Partition },
    Spare,
}

/// ReduceScatter: the input is partitioned across ranks; every rank ends
/// with its own slice reduced over all ranks' contributions.
///
/// Producer group `d` streams the slice owned by rank `d` out of the local
/// input into the Inbox ring on lane `d` (step = chunk * rank_size + d);
/// the reducer group pulls every peer's lane for the own slice and folds it
/// into the local output, first contributor by plain copy, the rest through
/// the reduction operator, so each rank is applied exactly once.
pub struct ReduceScatter<'a> {
    args: &'a CommArgs,
    call: CollectiveCall,
    role: Role,
    copier: StagedCopier,
}

pub(crate) fn check_lanes(args: &CommArgs) -> Result<usize> {
    let slot_count = args.sync.window(args.rank)?.layout().slot_count();
    if !slot_count.is_multiple_of(args.rank_size) {
        return Err(WindowLibError::InvalidArgument(format!(
            "slot_count {} must be a multiple of rank_size {} for lane stepping",
            slot_count, args.rank_size
        )));
    }
    Ok(slot_count)
}

impl<'a> ReduceScatter<'a> {
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
                "reduce_scatter input and output kinds must match",
            ));
        }
        if call.input.count() != call.len {
            return Err(WindowLibError::InvalidArgument(format!(
                "input holds {} elements, len says {}",
                call.input.count(),
                call.len
            )));
        }
        let own_slice = partition(call.len, args.rank_size, args.rank);
        if call.output.count() != own_slice.count {
            return Err(WindowLibError::InvalidArgument(format!(
                "reduce_scatter output must hold the own slice of {} elements, got {}",
                own_slice.count,
                call.output.count()
            )));
        }

        let layout = *args.sync.window(args.rank)?.layout();
        let per_step = layout.slot_capacity() / kind.size_of();
        let groups = args.rank_size + 1;
        let role = match split_groups(block_idx, block_num, groups, args.hints)? {
            None => Role::Spare,
            Some(slot) if slot.group < args.rank_size => {
                let dest = slot.group;
                let slice = partition(call.len, args.rank_size, dest);
                let plan = ChunkPlan::new(slice.count, per_step)?;
                Role::Producer { dest, band: plan.band(slot) }
            }
            Some(slot) => {
                let plan = ChunkPlan::new(own_slice.count, per_step)?;
                Role::Reducer { band: plan.band(slot) }
            }
        };

        Ok(Self { args, call: *call, role, copier: StagedCopier::new(args.stage_capacity)? })
    }

    pub fn run(mut self) -> Result<()> {
        self.args.dfx.enter(self.call.magic, self.call.len, self.call.op);
        let result = match self.role {
            Role::Spare => Ok(()),
            Role::Producer { dest, band } => self.produce(dest, band),
            Role::Reducer { band } => self.reduce(band),
        };
        self.args.dfx.exit();
        result
    }

    fn produce(&mut self, dest: usize, band: Partition) -> Result<()> {
        produce_lane(
            self.args,
            &self.call,
            &mut self.copier,
            dest,
            band,
        )
    }

    fn reduce(&mut self, band: Partition) -> Result<()> {
        let args = self.args;
        let sync = args.sync.clone();
        let kind = self.call.input.kind();
        let own_slice = partition(self.call.len, args.rank_size, args.rank);
        let per_step =
            args.sync.window(args.rank)?.layout().slot_capacity() / kind.size_of();
        let plan = ChunkPlan::new(own_slice.count, per_step)?;
        debug!(rank = args.rank, magic = self.call.magic, "reduce_scatter reduce");

        let mut inboxes = Vec::with_capacity(args.rank_size);
        for p in 0..args.rank_size {
            inboxes.push(IpcRingQueue::new(
                sync.clone(),
                args.window(p)?,
                self.call.magic,
                Queue::Inbox,
            ));
        }

        for k in band.offset..band.end() {
            let step = (k * args.rank_size + args.rank) as u32;
            let span = plan.span(k);
            for (p, inbox) in inboxes.iter_mut().enumerate() {
                let slot = inbox.dequeue(step)?;
                let op = if p == 0 { ReduceOp::CopyOnly } else { self.call.op };
                self.copier.copy(
                    slot.tensor(kind, span.count)?,
                    self.call.output.slice(span.offset, span.count)?,
                    op,
                )?;
                sync.set_outer(p, args.rank, self.call.magic, Queue::Inbox, step)?;
            }
        }
        Ok(())
    }
}

/// Producer loop shared with the AllReduce drivers: stream the slice owned
/// by `dest` out of the local input into the own Inbox ring on lane `dest`.
pub(crate) fn produce_lane(
    args: &CommArgs,
    call: &CollectiveCall,
    copier: &mut StagedCopier,
    dest: usize,
    band: Partition,
) -> Result<()> {
    let sync = args.sync.clone();
    let window = args.window(args.rank)?;
    let slot_count = window.layout().slot_count();
    let kind = call.input.kind();
    let slice = partition(call.len, args.rank_size, dest);
    let per_step = window.layout().slot_capacity() / kind.size_of();
    let plan = ChunkPlan::new(slice.count, per_step)?;

    let mut queue = IpcRingQueue::strided(
        sync.clone(),
        window,
        call.magic,
        Queue::Inbox,
        (band.offset * args.rank_size + dest) as u32,
        args.rank_size as u32,
    );
    for k in band.offset..band.end() {
        let step = (k * args.rank_size + dest) as u32;
        // The previous occupant of this slot belongs to the same lane and
        // has exactly one reader: rank `dest`'s reducer.
        if step as usize >= slot_count {
            sync.wait_outer_from(
                args.rank,
                dest,
                call.magic,
                Queue::Inbox,
                step - slot_count as u32,
            )?;
        }
        let (s, slot) = queue.enqueue();
        let span = plan.span(k);
        copier.copy(
            call.input.slice(slice.offset + span.offset, span.count)?,
            slot.tensor(kind, span.count)?,
            ReduceOp::CopyOnly,
        )?;
        queue.commit(s);
    }
    Ok(())
}
