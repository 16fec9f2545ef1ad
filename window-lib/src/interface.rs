use mockall::automock;

use crate::{api::Queue, error::Result};

/// The flag handshake contract.
///
/// This is the only cross-core signaling primitive: a slot write becomes
/// visible to a reader exactly when the writer's `set_inner`/`set_outer` is
/// observed by the reader's matching wait. Reading a slot that has not been
/// flagged is a data race by definition.
#[automock]
pub trait FlagOps: Send + Sync {
    /// Mark `(round, queue, step)` in `rank`'s window as produced.
    fn set_inner(&self, rank: usize, round: u64, queue: Queue, step: u32);

    /// Spin until `rank`'s producer has flagged `(round, queue, step)`.
    fn wait_inner(&self, rank: usize, round: u64, queue: Queue, step: u32)
    -> Result<()>;

    /// Mark `(round, queue, step)` in `owner`'s window as consumed by `from`.
    fn set_outer(
        &self,
        owner: usize,
        from: usize,
        round: u64,
        queue: Queue,
        step: u32,
    ) -> Result<()>;

    /// Spin until ranks `0..expected_ranks` have all consumed
    /// `(round, queue, step)` in `owner`'s window.
    fn wait_outer(
        &self,
        owner: usize,
        round: u64,
        queue: Queue,
        step: u32,
        expected_ranks: usize,
    ) -> Result<()>;

    /// Spin until the single rank `from` has consumed `(round, queue, step)`
    /// in `owner`'s window. Used when a slot has exactly one reader.
    fn wait_outer_from(
        &self,
        owner: usize,
        from: usize,
        round: u64,
        queue: Queue,
        step: u32,
    ) -> Result<()>;
}
