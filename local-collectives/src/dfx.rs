use std::sync::{Arc, atomic::Ordering};

use window_lib::{ReduceOp, Window};

/// Run-status sentinels stored in the first dfx word.
pub const DFX_RUNNING: u64 = 0x600D;
pub const DFX_IDLE: u64 = 0x0D1E;

const WORD_STATUS: usize = 0;
const WORD_MAGIC: usize = 1;
const WORD_LEN: usize = 2;
const WORD_OP: usize = 3;

pub fn op_code(op: ReduceOp) -> u64 {
    match op {
        ReduceOp::CopyOnly => 0,
        ReduceOp::Sum => 1,
        ReduceOp::Prod => 2,
        ReduceOp::Max => 3,
        ReduceOp::Min => 4,
    }
}

/// Diagnostics handle over one rank's dfx record.
///
/// Purely observational: drivers stamp the record at entry and exit so an
/// external inspector can see what the rank was last doing, but nothing in
/// the protocol reads it. Stores are relaxed; the record is not a flag.
#[derive(Clone)]
pub struct DfxHandle {
    window: Arc<Window>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfxRecord {
    pub running: bool,
    pub magic: u64,
    pub len: u64,
    pub op: u64,
}

impl DfxHandle {
    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }

    fn store(&self, word: usize, value: u64) {
        if let Ok(cell) = self.window.view().dfx_word(word) {
            cell.store(value, Ordering::Relaxed);
        }
    }

    /// Stamp the record at call entry.
    pub fn enter(&self, magic: u64, len: usize, op: ReduceOp) {
        self.store(WORD_MAGIC, magic);
        self.store(WORD_LEN, len as u64);
        self.store(WORD_OP, op_code(op));
        self.store(WORD_STATUS, DFX_RUNNING);
    }

    /// Stamp the record at call exit.
    pub fn exit(&self) {
        self.store(WORD_STATUS, DFX_IDLE);
    }

    pub fn snapshot(&self) -> DfxRecord {
        let view = self.window.view();
        let load = |word: usize| {
            view.dfx_word(word).map(|c| c.load(Ordering::Relaxed)).unwrap_or(0)
        };
        DfxRecord {
            running: load(WORD_STATUS) == DFX_RUNNING,
            magic: load(WORD_MAGIC),
            len: load(WORD_LEN),
            op: load(WORD_OP),
        }
    }
}
