use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, anyhow};
use tracing::debug;
use window_lib::{FlagSync, Result as LibResult, WindowArena, WindowLayout};

use crate::{
    comm_args::{CommArgs, TopologyHints},
    config::CommConfig,
    dfx::DfxHandle,
};

/// The per-node communication world: one window per rank, the shared flag
/// synchronizer over them, and the advancing round counter.
///
/// Built once per process group and reused across collective calls; every
/// call takes a fresh `magic` from `next_magic` so consecutive rounds land
/// on alternating window copies.
pub struct CommWorld {
    rank_size: usize,
    sync: Arc<FlagSync>,
    dfx: Vec<DfxHandle>,
    hints: TopologyHints,
    stage_capacity: usize,
    pin_base: Option<u16>,
    magic: AtomicU64,
}

impl CommWorld {
    pub fn new(
        rank_size: usize,
        config: &CommConfig,
        hints: TopologyHints,
    ) -> anyhow::Result<Self> {
        let layout =
            WindowLayout::new(rank_size, config.slot_count, config.slot_capacity)?;
        let arena = WindowArena::new(layout);
        for rank in 0..rank_size {
            arena.map(rank)?;
        }
        let peers = arena.peers()?;
        let dfx = peers.iter().map(|w| DfxHandle::new(w.clone())).collect();
        let sync = Arc::new(FlagSync::new(peers, config.budget())?);
        debug!(rank_size, ?hints, "communication world ready");
        Ok(Self {
            rank_size,
            sync,
            dfx,
            hints,
            stage_capacity: config.stage_capacity,
            pin_base: config.pin_base,
            magic: AtomicU64::new(0),
        })
    }

    pub fn rank_size(&self) -> usize {
        self.rank_size
    }

    pub fn next_magic(&self) -> u64 {
        self.magic.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn dfx(&self, rank: usize) -> Option<&DfxHandle> {
        self.dfx.get(rank)
    }

    pub fn args(&self, rank: usize) -> LibResult<CommArgs> {
        let args = CommArgs {
            rank,
            rank_size: self.rank_size,
            local_rank: rank,
            local_rank_size: self.rank_size,
            sync: self.sync.clone(),
            dfx: self.dfx[rank].clone(),
            hints: self.hints,
            stage_capacity: self.stage_capacity,
        };
        args.validate()?;
        Ok(args)
    }

    /// Run `block_num` execution units on every rank, `f(args, block_idx)`
    /// each, and join them all, surfacing the first failure.
    ///
    /// Units are plain named threads (optionally CPU-pinned) with a oneshot
    /// init handshake; once running they synchronize through flags only.
    pub fn run_units<F>(&self, block_num: usize, f: F) -> anyhow::Result<()>
    where
        F: Fn(CommArgs, usize) -> LibResult<()> + Send + Sync + 'static,
    {
        if block_num == 0 {
            return Err(anyhow!("block_num must be non-zero"));
        }
        let f = Arc::new(f);
        let total = self.rank_size * block_num;
        let (done_tx, done_rx) = crossbeam_channel::bounded(total);
        let mut handles = Vec::with_capacity(total);
        let mut init_rxs = Vec::with_capacity(total);

        for rank in 0..self.rank_size {
            let args = self.args(rank)?;
            for block in 0..block_num {
                let (init_tx, init_rx) = oneshot::channel();
                init_rxs.push(init_rx);
                let f = f.clone();
                let args = args.clone();
                let done_tx = done_tx.clone();
                let cpu =
                    self.pin_base.map(|base| base + (rank * block_num + block) as u16);
                let handle = thread_lib::spawn_unit(
                    format!("lcc-r{rank}b{block}"),
                    cpu,
                    move || {
                        if init_tx.send(()).is_err() {
                            return;
                        }
                        let result = f(args, block);
                        let _ = done_tx.send((rank, block, result));
                    },
                )
                .context("failed to spawn execution unit")?;
                handles.push(handle);
            }
        }
        drop(done_tx);

        for init_rx in init_rxs {
            init_rx.recv().context("execution unit failed to start")?;
        }

        let mut first_err = None;
        while let Ok((rank, block, result)) = done_rx.recv() {
            if let Err(e) = result
                && first_err.is_none()
            {
                first_err = Some(anyhow!("unit r{rank}b{block} failed: {e}"));
            }
        }
        for handle in handles {
            handle.join().map_err(|_| anyhow!("execution unit panicked"))?;
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
