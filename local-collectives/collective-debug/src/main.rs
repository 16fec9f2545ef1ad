use std::{sync::Arc, time::Instant};

use anyhow::anyhow;
use clap::Parser;
use local_collectives::{
    AllReduce, CollectiveCall, CommConfig, CommWorld, TopologyHints,
};
use tracing::info;
use window_lib::{ReduceOp, api::TensorRef};

/// Drives a sum AllReduce across simulated ranks and verifies the result.
#[derive(Debug, Parser)]
struct Opts {
    #[clap(flatten)]
    logging: logging_lib::LoggingOpts,

    #[clap(flatten)]
    config: CommConfig,

    #[clap(long, default_value_t = 4)]
    rank_size: usize,

    /// Execution units per rank; 0 picks the minimum for the collective.
    #[clap(long, default_value_t = 0)]
    block_num: usize,

    /// Elements per rank.
    #[clap(long, default_value_t = 1 << 20)]
    len: usize,

    #[clap(long, default_value_t = 3)]
    iters: usize,

    /// Topology capability bits (1 = RDMA, 2 = PCIe-only).
    #[clap(long, default_value_t = 0)]
    hints: u32,
}

fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    logging_lib::init(&opts.logging)?;

    let hints = TopologyHints::from_bits(opts.hints);
    let world = Arc::new(CommWorld::new(opts.rank_size, &opts.config, hints)?);
    let groups = 2 * opts.rank_size + 1;
    let block_num = if opts.block_num == 0 { groups } else { opts.block_num };
    info!(
        rank_size = opts.rank_size,
        block_num,
        len = opts.len,
        "running sum all_reduce"
    );

    let mut inputs: Vec<Vec<f32>> = (0..opts.rank_size)
        .map(|r| (0..opts.len).map(|i| (r + 1) as f32 + (i % 11) as f32).collect())
        .collect();
    let mut outputs = vec![vec![0.0f32; opts.len]; opts.rank_size];
    let in_refs: Arc<Vec<TensorRef>> =
        Arc::new(inputs.iter_mut().map(|b| TensorRef::from_mut_slice(b)).collect());
    let out_refs: Arc<Vec<TensorRef>> =
        Arc::new(outputs.iter_mut().map(|b| TensorRef::from_mut_slice(b)).collect());

    let rank_constant_sum =
        (1..=opts.rank_size).map(|r| r as f32).sum::<f32>();
    for iter in 0..opts.iters {
        let magic = world.next_magic();
        let len = opts.len;
        let in_refs = in_refs.clone();
        let out_refs = out_refs.clone();

        let start = Instant::now();
        world.run_units(block_num, move |args, block| {
            let call =
                CollectiveCall::new(in_refs[args.rank], out_refs[args.rank], len, magic)
                    .with_op(ReduceOp::Sum);
            AllReduce::new(&args, &call, block, block_num)?.run()
        })?;
        let elapsed = start.elapsed();

        for output in &outputs {
            for (i, value) in output.iter().enumerate() {
                let expected =
                    rank_constant_sum + (opts.rank_size * (i % 11)) as f32;
                if *value != expected {
                    return Err(anyhow!(
                        "iter {iter}: element {i} is {value}, expected {expected}"
                    ));
                }
            }
        }

        let bytes = opts.len * size_of::<f32>() * opts.rank_size;
        info!(
            iter,
            magic,
            elapsed_us = elapsed.as_micros() as u64,
            gib_per_s = bytes as f64 / elapsed.as_secs_f64() / (1 << 30) as f64,
            "all_reduce verified"
        );
    }
    Ok(())
}
