use std::sync::Arc;

use crate::{
    api::{Queue, SlotRef},
    error::Result,
    interface::FlagOps,
    window::Window,
};

/// Bounded ring of fixed-size slots over one rank's window, bound to a
/// round and a logical queue.
///
/// The producer side hands out slots in step order and flags them with
/// `commit`; the consumer side waits for the inner flag before exposing a
/// slot for reading. A queue instance is one unit's view: `first_step` lets
/// several units walk disjoint step bands of the same physical ring.
///
/// The queue enforces nothing about slot reuse across ring wraps; callers
/// gate re-enqueueing a wrapped step on the previous occupant's outer flags.
/// It is not reentrant within a round.
pub struct IpcRingQueue<S> {
    sync: Arc<S>,
    window: Arc<Window>,
    round: u64,
    queue: Queue,
    next_enqueue: u32,
    front: u32,
    stride: u32,
}

impl<S: FlagOps> IpcRingQueue<S> {
    pub fn new(sync: Arc<S>, window: Arc<Window>, round: u64, queue: Queue) -> Self {
        Self::starting_at(sync, window, round, queue, 0)
    }

    /// A view whose enqueue/front positions start at `first_step`.
    pub fn starting_at(
        sync: Arc<S>,
        window: Arc<Window>,
        round: u64,
        queue: Queue,
        first_step: u32,
    ) -> Self {
        Self::strided(sync, window, round, queue, first_step, 1)
    }

    /// A view that advances by `stride` steps at a time. Producers whose
    /// streams interleave with other producers on the same physical ring
    /// (step = chunk * stride + lane) each take a strided view; the lanes
    /// stay disjoint as long as the slot count is a multiple of the stride.
    pub fn strided(
        sync: Arc<S>,
        window: Arc<Window>,
        round: u64,
        queue: Queue,
        first_step: u32,
        stride: u32,
    ) -> Self {
        Self {
            sync,
            window,
            round,
            queue,
            next_enqueue: first_step,
            front: first_step,
            stride,
        }
    }

    pub fn rank(&self) -> usize {
        self.window.rank()
    }

    pub fn slot_count(&self) -> usize {
        self.window.layout().slot_count()
    }

    /// Producer side: the slot for step `last_enqueued + 1`. Never blocks;
    /// the caller fills the slot and then calls `commit`.
    pub fn enqueue(&mut self) -> (u32, SlotRef) {
        let step = self.next_enqueue;
        self.next_enqueue += self.stride;
        (step, self.window.view().slot(self.round, self.queue, step))
    }

    /// Flag `step` as produced.
    pub fn commit(&self, step: u32) {
        self.sync.set_inner(self.rank(), self.round, self.queue, step);
    }

    /// Consumer side: wait for `step` to be produced, return its slot and
    /// advance the front past it.
    pub fn dequeue(&mut self, step: u32) -> Result<SlotRef> {
        self.sync.wait_inner(self.rank(), self.round, self.queue, step)?;
        self.front = step + self.stride;
        Ok(self.window.view().slot(self.round, self.queue, step))
    }

    /// Read the current front slot without consuming it, so the same
    /// produced value can be pulled again (or by other readers).
    pub fn peek_front(&self) -> Result<SlotRef> {
        self.sync.wait_inner(self.rank(), self.round, self.queue, self.front)?;
        Ok(self.window.view().slot(self.round, self.queue, self.front))
    }

    pub fn front(&self) -> u32 {
        self.front
    }

    /// Step the front forward after a `peek_front` read.
    pub fn advance_front(&mut self) {
        self.front += self.stride;
    }
}
