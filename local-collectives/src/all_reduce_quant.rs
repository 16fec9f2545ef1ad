use tracing::debug;
use window_lib::{
    ElementKind, FlagOps, IpcRingQueue, Partition, ReduceOp, Result, StagedCopier,
    WindowLibError,
    api::Queue,
    partition,
};

use crate::{
    all_reduce::{Role, assign_role},
    comm_args::{CollectiveCall, CommArgs, QuantArgs},
    plan::ChunkPlan,
    reduce_scatter::check_lanes,
};

/// Quantized AllReduce: ranks exchange reduced-precision partial sums.
///
/// Same data movement as the big-data AllReduce, but producers narrow
/// `f32 -> f16` with the call's scale factor while staging into the Inbox
/// slots, and the reducer widens back with the inverse scale while
/// accumulating in `f32`. Reduced slices and the final pull-back stay in
/// full precision.
pub struct AllReduceQuant<'a> {
    args: &'a CommArgs,
    call: CollectiveCall,
    quant: QuantArgs,
    role: Role,
    copier: StagedCopier,
}

impl<'a> AllReduceQuant<'a> {
    pub fn new(
        args: &'a CommArgs,
        call: &CollectiveCall,
        block_idx: usize,
        block_num: usize,
    ) -> Result<Self> {
        args.validate()?;
        check_lanes(args)?;
        let Some(quant) = call.quant else {
            return Err(WindowLibError::InvalidArgument(
                "quantized all_reduce requires scale arguments".into(),
            ));
        };
        quant.validate()?;
        if call.input.kind() != ElementKind::F32
            || call.output.kind() != ElementKind::F32
        {
            return Err(WindowLibError::UnsupportedElement(
                "quantized all_reduce exchanges f16 but reduces in f32",
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

        // Chunk by the wide kind so a reduced f32 slice and its narrow
        // counterpart land on the same step numbering.
        let layout = *args.sync.window(args.rank)?.layout();
        let per_step = layout.slot_capacity() / ElementKind::F32.size_of();
        let role = assign_role(args, call.len, per_step, block_idx, block_num)?;

        Ok(Self {
            args,
            call: *call,
            quant,
            role,
            copier: StagedCopier::new(args.stage_capacity)?,
        })
    }

    pub fn run(mut self) -> Result<()> {
        self.args.dfx.enter(self.call.magic, self.call.len, self.call.op);
        let result = match self.role {
            Role::Spare => Ok(()),
            Role::Producer { dest, band } => self.produce(dest, band),
            Role::Reducer { band } => self.reduce(band),
            Role::Gatherer { peer, band } => self.gather(peer, band),
        };
        self.args.dfx.exit();
        result
    }

    fn per_step(&self) -> Result<usize> {
        let layout = *self.args.sync.window(self.args.rank)?.layout();
        Ok(layout.slot_capacity() / ElementKind::F32.size_of())
    }

    fn produce(&mut self, dest: usize, band: Partition) -> Result<()> {
        let args = self.args;
        let sync = args.sync.clone();
        let window = args.window(args.rank)?;
        let slot_count = window.layout().slot_count();
        let slice = partition(self.call.len, args.rank_size, dest);
        let plan = ChunkPlan::new(slice.count, self.per_step()?)?;
        debug!(rank = args.rank, dest, magic = self.call.magic, "quant produce");

        let mut queue = IpcRingQueue::strided(
            sync.clone(),
            window,
            self.call.magic,
            Queue::Inbox,
            (band.offset * args.rank_size + dest) as u32,
            args.rank_size as u32,
        );
        for k in band.offset..band.end() {
            let step = (k * args.rank_size + dest) as u32;
            if step as usize >= slot_count {
                sync.wait_outer_from(
                    args.rank,
                    dest,
                    self.call.magic,
                    Queue::Inbox,
                    step - slot_count as u32,
                )?;
            }
            let (s, slot) = queue.enqueue();
            let span = plan.span(k);
            self.copier.copy_with_scale(
                self.call.input.slice(slice.offset + span.offset, span.count)?,
                slot.tensor(ElementKind::F16, span.count)?,
                self.quant.scale,
                ReduceOp::CopyOnly,
            )?;
            queue.commit(s);
        }
        Ok(())
    }

    fn reduce(&mut self, band: Partition) -> Result<()> {
        let args = self.args;
        let sync = args.sync.clone();
        let window = args.window(args.rank)?;
        let slot_count = window.layout().slot_count();
        let own_slice = partition(self.call.len, args.rank_size, args.rank);
        let plan = ChunkPlan::new(own_slice.count, self.per_step()?)?;
        let inv_scale = 1.0 / self.quant.scale;

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
            let reduced = rslot.tensor(ElementKind::F32, span.count)?;
            for (p, inbox) in inboxes.iter_mut().enumerate() {
                let slot = inbox.dequeue(step)?;
                let op = if p == 0 { ReduceOp::CopyOnly } else { self.call.op };
                self.copier.copy_with_scale(
                    slot.tensor(ElementKind::F16, span.count)?,
                    reduced,
                    inv_scale,
                    op,
                )?;
                sync.set_outer(p, args.rank, self.call.magic, Queue::Inbox, step)?;
            }
            results.commit(rstep);
        }
        Ok(())
    }

    fn gather(&mut self, peer: usize, band: Partition) -> Result<()> {
        let args = self.args;
        let sync = args.sync.clone();
        let slice = partition(self.call.len, args.rank_size, peer);
        let plan = ChunkPlan::new(slice.count, self.per_step()?)?;

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
                slot.tensor(ElementKind::F32, span.count)?,
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
