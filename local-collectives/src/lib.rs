mod all_gather;
mod all_reduce;
mod all_reduce_quant;
mod broadcast;
mod comm_args;
mod config;
mod dfx;
mod launch;
mod plan;
mod reduce_scatter;

pub use all_gather::AllGather;
pub use all_reduce::AllReduce;
pub use all_reduce_quant::AllReduceQuant;
pub use broadcast::Broadcast;
pub use comm_args::{CollectiveCall, CommArgs, QuantArgs, TopologyHints};
pub use config::CommConfig;
pub use dfx::{DFX_IDLE, DFX_RUNNING, DfxHandle, DfxRecord};
pub use launch::CommWorld;
pub use plan::{ChunkPlan, GroupSlot, split_groups};
pub use reduce_scatter::ReduceScatter;

#[cfg(test)]
mod test_collectives;
