use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use crate::{
    api::{FlagCoord, Queue, SmallVec, flag_epoch},
    error::{Result, WindowLibError},
    interface::FlagOps,
    spin::{SpinBudget, SpinWait},
    window::Window,
};

/// Flag synchronizer over the windows of every rank in the call.
///
/// Flag stores are Release, flag loads Acquire: observing the epoch value
/// makes the slot bytes written before the matching `set_*` visible. Cells
/// only ever grow, so a comparison against the expected epoch is immune to
/// stale flags from earlier rounds.
pub struct FlagSync {
    peers: SmallVec<Arc<Window>>,
    budget: SpinBudget,
}

impl FlagSync {
    pub fn new(peers: SmallVec<Arc<Window>>, budget: SpinBudget) -> Result<Self> {
        if peers.is_empty() {
            return Err(WindowLibError::InvalidArgument(
                "peer window list is empty".into(),
            ));
        }
        let layout = *peers[0].layout();
        if layout.rank_size() != peers.len() {
            return Err(WindowLibError::WindowMismatch);
        }
        for (rank, peer) in peers.iter().enumerate() {
            if peer.rank() != rank || *peer.layout() != layout {
                return Err(WindowLibError::WindowMismatch);
            }
        }
        Ok(Self { peers, budget })
    }

    pub fn rank_size(&self) -> usize {
        self.peers.len()
    }

    pub fn budget(&self) -> SpinBudget {
        self.budget
    }

    pub fn window(&self, rank: usize) -> Result<&Arc<Window>> {
        self.peers.get(rank).ok_or_else(|| {
            WindowLibError::InvalidArgument(format!(
                "rank {} out of range for rank_size {}",
                rank,
                self.peers.len()
            ))
        })
    }

    fn spin_until(
        &self,
        cell: &AtomicU64,
        want: u64,
        kind: &'static str,
        coord: FlagCoord,
    ) -> Result<()> {
        let mut spin = SpinWait::new(self.budget);
        while cell.load(Ordering::Acquire) < want {
            if !spin.spin() {
                tracing::warn!(%coord, kind, spins = spin.spun(), "flag wait timed out");
                return Err(WindowLibError::FlagTimeout {
                    kind,
                    coord,
                    spins: spin.spun(),
                });
            }
        }
        Ok(())
    }
}

impl FlagOps for FlagSync {
    fn set_inner(&self, rank: usize, round: u64, queue: Queue, step: u32) {
        if let Ok(window) = self.window(rank) {
            window
                .view()
                .inner_flag(round, queue, step)
                .store(flag_epoch(round, step), Ordering::Release);
        }
    }

    fn wait_inner(
        &self,
        rank: usize,
        round: u64,
        queue: Queue,
        step: u32,
    ) -> Result<()> {
        let cell = self.window(rank)?.view().inner_flag(round, queue, step);
        self.spin_until(
            cell,
            flag_epoch(round, step),
            "inner",
            FlagCoord { rank, round, queue, step },
        )
    }

    fn set_outer(
        &self,
        owner: usize,
        from: usize,
        round: u64,
        queue: Queue,
        step: u32,
    ) -> Result<()> {
        self.window(owner)?
            .view()
            .outer_flag(round, queue, step, from)?
            .store(flag_epoch(round, step), Ordering::Release);
        Ok(())
    }

    fn wait_outer(
        &self,
        owner: usize,
        round: u64,
        queue: Queue,
        step: u32,
        expected_ranks: usize,
    ) -> Result<()> {
        for from in 0..expected_ranks {
            self.wait_outer_from(owner, from, round, queue, step)?;
        }
        Ok(())
    }

    fn wait_outer_from(
        &self,
        owner: usize,
        from: usize,
        round: u64,
        queue: Queue,
        step: u32,
    ) -> Result<()> {
        let cell = self.window(owner)?.view().outer_flag(round, queue, step, from)?;
        self.spin_until(
            cell,
            flag_epoch(round, step),
            "outer",
            FlagCoord { rank: owner, round, queue, step },
        )
    }
}
