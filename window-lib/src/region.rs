use std::{ptr::NonNull, sync::atomic::AtomicU64};

use crate::{
    api::{FlagCoord, PING_PONG_DEPTH, Queue, QUEUE_COUNT, SlotRef},
    error::{Result, WindowLibError},
    window::Window,
};

/// Debug-record words at the head of every window (run status, last magic,
/// last len, last op code).
pub const DFX_WORDS: usize = 4;

/// Word-granular layout of one rank's shared window.
///
/// ```text
/// [dfx][copy 0: inner flags | outer flags | data][copy 1: ...]
/// ```
///
/// Each of the `PING_PONG_DEPTH` copies holds one inner flag cell per
/// `(queue, slot)`, one outer flag cell per `(queue, slot, consumer rank)`
/// and `QUEUE_COUNT * slot_count` data slots of `slot_capacity` bytes.
/// All offsets are in `u64` words; slot capacities are word-aligned, which
/// also keeps every element kind aligned inside a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowLayout {
    rank_size: usize,
    slot_count: usize,
    slot_capacity: usize,
}

impl WindowLayout {
    pub fn new(rank_size: usize, slot_count: usize, slot_capacity: usize) -> Result<Self> {
        if rank_size == 0 || slot_count == 0 {
            return Err(WindowLibError::InvalidArgument(
                "rank_size and slot_count must be non-zero".into(),
            ));
        }
        if slot_capacity == 0 || !slot_capacity.is_multiple_of(8) {
            return Err(WindowLibError::InvalidArgument(format!(
                "slot_capacity must be a non-zero multiple of 8, got {}",
                slot_capacity
            )));
        }
        Ok(Self { rank_size, slot_count, slot_capacity })
    }

    pub fn rank_size(&self) -> usize {
        self.rank_size
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    fn inner_flag_words(&self) -> usize {
        QUEUE_COUNT * self.slot_count
    }

    fn outer_flag_words(&self) -> usize {
        self.rank_size * QUEUE_COUNT * self.slot_count
    }

    fn data_words(&self) -> usize {
        QUEUE_COUNT * self.slot_count * self.slot_capacity / 8
    }

    /// Stride between consecutive ping-pong copies.
    fn copy_stride(&self) -> usize {
        self.inner_flag_words() + self.outer_flag_words() + self.data_words()
    }

    pub fn words_total(&self) -> usize {
        DFX_WORDS + PING_PONG_DEPTH as usize * self.copy_stride()
    }

    /// Base of the active copy for `round`:
    /// `base + (round % PING_PONG_DEPTH) * window_stride`.
    fn copy_base(&self, round: u64) -> usize {
        DFX_WORDS + (round % PING_PONG_DEPTH) as usize * self.copy_stride()
    }

    pub(crate) fn slot_of(&self, step: u32) -> usize {
        step as usize % self.slot_count
    }

    pub(crate) fn inner_word(&self, round: u64, queue: Queue, step: u32) -> usize {
        self.copy_base(round) + queue.index() * self.slot_count + self.slot_of(step)
    }

    pub(crate) fn outer_word(
        &self,
        round: u64,
        queue: Queue,
        step: u32,
        from_rank: usize,
    ) -> usize {
        self.copy_base(round)
            + self.inner_flag_words()
            + (from_rank * QUEUE_COUNT + queue.index()) * self.slot_count
            + self.slot_of(step)
    }

    /// Word offset of a slot's data span.
    pub(crate) fn slot_word(&self, round: u64, queue: Queue, step: u32) -> usize {
        self.copy_base(round)
            + self.inner_flag_words()
            + self.outer_flag_words()
            + (queue.index() * self.slot_count + self.slot_of(step)) * self.slot_capacity
                / 8
    }
}

/// Typed, bounds-checked view over one rank's window.
///
/// All raw offset arithmetic lives in `WindowLayout`; nothing outside this
/// module ever computes a word index, so a miscalculated offset cannot read
/// or write across slot boundaries.
#[derive(Clone, Copy)]
pub struct RegionView<'a> {
    window: &'a Window,
}

impl<'a> RegionView<'a> {
    pub fn new(window: &'a Window) -> Self {
        Self { window }
    }

    fn layout(&self) -> &WindowLayout {
        self.window.layout()
    }

    /// Producer-done flag cell for `(round, queue, step)`.
    pub fn inner_flag(&self, round: u64, queue: Queue, step: u32) -> &'a AtomicU64 {
        self.window.word(self.layout().inner_word(round, queue, step))
    }

    /// Consumer-done flag cell written by `from_rank`.
    pub fn outer_flag(
        &self,
        round: u64,
        queue: Queue,
        step: u32,
        from_rank: usize,
    ) -> Result<&'a AtomicU64> {
        if from_rank >= self.layout().rank_size() {
            return Err(WindowLibError::SlotOutOfBounds(FlagCoord {
                rank: from_rank,
                round,
                queue,
                step,
            }));
        }
        Ok(self.window.word(self.layout().outer_word(round, queue, step, from_rank)))
    }

    /// Data span of the slot backing `(round, queue, step)`.
    pub fn slot(&self, round: u64, queue: Queue, step: u32) -> SlotRef {
        let word = self.layout().slot_word(round, queue, step);
        let ptr = self.window.word(word).as_ptr() as *mut u8;
        SlotRef::new(
            unsafe { NonNull::new_unchecked(ptr) },
            self.layout().slot_capacity(),
        )
    }

    pub fn dfx_word(&self, index: usize) -> Result<&'a AtomicU64> {
        if index >= DFX_WORDS {
            return Err(WindowLibError::InvalidArgument(format!(
                "dfx word {} out of range",
                index
            )));
        }
        Ok(self.window.word(index))
    }
}
