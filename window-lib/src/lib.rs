pub mod api;
mod element;
mod error;
mod flag_sync;
mod interface;
mod partition;
mod region;
mod ring_queue;
mod spin;
mod staged_copy;
mod window;

pub use element::{Element, ElementKind, ReduceOp};
pub use error::{Result, WindowLibError};
pub use flag_sync::FlagSync;
pub use interface::{FlagOps, MockFlagOps};
pub use partition::{Partition, partition};
pub use region::{DFX_WORDS, RegionView, WindowLayout};
pub use ring_queue::IpcRingQueue;
pub use spin::SpinBudget;
pub use staged_copy::{DEFAULT_STAGE_CAPACITY, StagedCopier};
pub use window::{Window, WindowArena};

#[cfg(test)]
mod test_flag_sync;




#[cfg(test)]
mod test_staged_copy;
