use std::{
    collections::HashMap,
    sync::{Arc, atomic::AtomicU64},
};

use parking_lot::RwLock;

use crate::{
    api::SmallVec,
    error::{Result, WindowLibError},
    region::{RegionView, WindowLayout},
};

/// One rank's slice of the shared memory fabric.
///
/// Allocated once per rank and reused across collective calls; the advancing
/// round index is the only per-call state. The backing store is a flat word
/// array so flag cells and slot data share a single allocation the way the
/// on-device window does.
pub struct Window {
    rank: usize,
    layout: WindowLayout,
    words: Box<[AtomicU64]>,
}

impl Window {
    pub fn new(rank: usize, layout: WindowLayout) -> Self {
        let words =
            (0..layout.words_total()).map(|_| AtomicU64::new(0)).collect::<Vec<_>>();
        Self { rank, layout, words: words.into_boxed_slice() }
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn layout(&self) -> &WindowLayout {
        &self.layout
    }

    pub(crate) fn word(&self, index: usize) -> &AtomicU64 {
        &self.words[index]
    }

    pub fn view(&self) -> RegionView<'_> {
        RegionView::new(self)
    }
}

/// Process-local registry of per-rank windows.
///
/// Stands in for the shared-memory mapping step of the original: every rank
/// allocates its window here once, and peers look each other up by rank to
/// build their `peerMems` list.
pub struct WindowArena {
    layout: WindowLayout,
    windows: RwLock<HashMap<usize, Arc<Window>>>,
}

impl WindowArena {
    pub fn new(layout: WindowLayout) -> Self {
        Self { layout, windows: RwLock::new(HashMap::new()) }
    }

    pub fn layout(&self) -> &WindowLayout {
        &self.layout
    }

    /// Allocate (or return the already-mapped) window for `rank`.
    pub fn map(&self, rank: usize) -> Result<Arc<Window>> {
        if rank >= self.layout.rank_size() {
            return Err(WindowLibError::InvalidArgument(format!(
                "rank {} out of range for rank_size {}",
                rank,
                self.layout.rank_size()
            )));
        }
        let mut windows = self.windows.write();
        Ok(windows
            .entry(rank)
            .or_insert_with(|| Arc::new(Window::new(rank, self.layout)))
            .clone())
    }

    pub fn window(&self, rank: usize) -> Option<Arc<Window>> {
        self.windows.read().get(&rank).cloned()
    }

    /// The full peer list in rank order. Every rank must have been mapped.
    pub fn peers(&self) -> Result<SmallVec<Arc<Window>>> {
        let windows = self.windows.read();
        let mut peers = SmallVec::with_capacity(self.layout.rank_size());
        for rank in 0..self.layout.rank_size() {
            let Some(w) = windows.get(&rank) else {
                return Err(WindowLibError::InvalidArgument(format!(
                    "rank {} has no mapped window",
                    rank
                )));
            };
            peers.push(w.clone());
        }
        Ok(peers)
    }
}
