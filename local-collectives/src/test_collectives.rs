use std::sync::Arc;

use half::f16;
use window_lib::{ReduceOp, api::TensorRef, partition};

use crate::{
    AllGather, AllReduce, AllReduceQuant, Broadcast, CollectiveCall, CommConfig,
    CommWorld, QuantArgs, ReduceScatter, TopologyHints,
    dfx::op_code,
};

fn test_config() -> CommConfig {
    CommConfig {
        // Small rings and slots so every collective wraps the ring and the
        // copier splits chunks; generous spins for oversubscribed CI hosts.
        slot_count: 4,
        slot_capacity: 64,
        stage_capacity: 32,
        spin_budget: Some(1 << 28),
        pin_base: None,
    }
}

fn test_world(rank_size: usize) -> Arc<CommWorld> {
    Arc::new(CommWorld::new(rank_size, &test_config(), TopologyHints::default()).unwrap())
}

fn tensor_refs(buffers: &mut [Vec<f32>]) -> Arc<Vec<TensorRef>> {
    Arc::new(buffers.iter_mut().map(|b| TensorRef::from_mut_slice(b)).collect())
}

fn run_all_gather(
    world: &Arc<CommWorld>,
    inputs: &mut [Vec<f32>],
    outputs: &mut [Vec<f32>],
    len: usize,
    block_num: usize,
) {
    let magic = world.next_magic();
    let in_refs = tensor_refs(inputs);
    let out_refs = tensor_refs(outputs);
    world
        .run_units(block_num, move |args, block| {
            let call =
                CollectiveCall::new(in_refs[args.rank], out_refs[args.rank], len, magic);
            AllGather::new(&args, &call, block, block_num)?.run()
        })
        .unwrap();
}

#[test]
fn all_gather_concatenates_in_rank_order() {
    let rank_size = 4;
    let len = 100;
    let world = test_world(rank_size);
    let mut inputs: Vec<Vec<f32>> = (0..rank_size)
        .map(|r| (0..len).map(|i| (r * 1000 + i) as f32).collect())
        .collect();
    let mut outputs = vec![vec![0.0f32; rank_size * len]; rank_size];

    run_all_gather(&world, &mut inputs, &mut outputs, len, 1 + rank_size);

    for output in &outputs {
        for peer in 0..rank_size {
            for i in 0..len {
                assert_eq!(output[peer * len + i], (peer * 1000 + i) as f32);
            }
        }
    }
}

#[test]
fn all_gather_with_multiple_units_per_group() {
    let rank_size = 2;
    let len = 77;
    let world = test_world(rank_size);
    let mut inputs: Vec<Vec<f32>> = (0..rank_size)
        .map(|r| (0..len).map(|i| (r * 500 + i) as f32).collect())
        .collect();
    let mut outputs = vec![vec![0.0f32; rank_size * len]; rank_size];

    // Two units per role group plus a spare that must stay a no-op.
    run_all_gather(&world, &mut inputs, &mut outputs, len, 2 * (1 + rank_size) + 1);

    for output in &outputs {
        for peer in 0..rank_size {
            for i in 0..len {
                assert_eq!(output[peer * len + i], (peer * 500 + i) as f32);
            }
        }
    }
}

fn run_all_reduce(
    world: &Arc<CommWorld>,
    inputs: &mut [Vec<f32>],
    outputs: &mut [Vec<f32>],
    len: usize,
    op: ReduceOp,
    magic: u64,
) {
    let block_num = 2 * world.rank_size() + 1;
    let in_refs = tensor_refs(inputs);
    let out_refs = tensor_refs(outputs);
    world
        .run_units(block_num, move |args, block| {
            let call =
                CollectiveCall::new(in_refs[args.rank], out_refs[args.rank], len, magic)
                    .with_op(op);
            AllReduce::new(&args, &call, block, block_num)?.run()
        })
        .unwrap();
}

#[test]
fn all_reduce_sums_across_ranks() {
    let rank_size = 4;
    let len = 130;
    let world = test_world(rank_size);
    let mut inputs: Vec<Vec<f32>> = (0..rank_size)
        .map(|r| (0..len).map(|i| (r + 1) as f32 + (i % 7) as f32).collect())
        .collect();
    let mut outputs = vec![vec![0.0f32; len]; rank_size];

    let magic = world.next_magic();
    run_all_reduce(&world, &mut inputs, &mut outputs, len, ReduceOp::Sum, magic);

    for output in &outputs {
        for (i, value) in output.iter().enumerate() {
            let expected = 10.0 + 4.0 * (i % 7) as f32;
            assert_eq!(*value, expected);
        }
    }
}

#[test]
fn consecutive_rounds_give_identical_results() {
    let rank_size = 2;
    let len = 96;
    let world = test_world(rank_size);
    let mut inputs: Vec<Vec<f32>> = (0..rank_size)
        .map(|r| (0..len).map(|i| (r * 13 + i) as f32).collect())
        .collect();

    let mut first = vec![vec![0.0f32; len]; rank_size];
    let magic = world.next_magic();
    run_all_reduce(&world, &mut inputs, &mut first, len, ReduceOp::Sum, magic);

    let mut second = vec![vec![0.0f32; len]; rank_size];
    let magic = world.next_magic();
    run_all_reduce(&world, &mut inputs, &mut second, len, ReduceOp::Sum, magic);

    assert_eq!(first, second);
}

#[test]
fn reduction_applies_each_rank_exactly_once() {
    // A product reduction is sensitive to repetition: any double-counted
    // contribution changes the expected power.
    let rank_size = 4;
    let len = 64;
    let primes = [2.0f32, 3.0, 5.0, 7.0];
    let world = test_world(rank_size);
    let mut inputs: Vec<Vec<f32>> =
        (0..rank_size).map(|r| vec![primes[r]; len]).collect();
    let mut outputs = vec![vec![0.0f32; len]; rank_size];

    let magic = world.next_magic();
    run_all_reduce(&world, &mut inputs, &mut outputs, len, ReduceOp::Prod, magic);

    for output in &outputs {
        for value in output {
            assert_eq!(*value, 210.0);
        }
    }
}

#[test]
fn concurrent_rounds_are_isolated() {
    let rank_size = 2;
    let len = 80;
    let world = test_world(rank_size);

    let mut rounds = Vec::new();
    for _ in 0..2 {
        let world = world.clone();
        let magic = world.next_magic();
        rounds.push(std::thread::spawn(move || {
            let mut inputs: Vec<Vec<f32>> = (0..rank_size)
                .map(|r| (0..len).map(|i| (magic as usize * 100 + r + i) as f32).collect())
                .collect();
            let mut outputs = vec![vec![0.0f32; len]; rank_size];
            run_all_reduce(&world, &mut inputs, &mut outputs, len, ReduceOp::Sum, magic);
            for output in &outputs {
                for (i, value) in output.iter().enumerate() {
                    let expected = (0..rank_size)
                        .map(|r| (magic as usize * 100 + r + i) as f32)
                        .sum::<f32>();
                    assert_eq!(*value, expected, "round {magic} corrupted");
                }
            }
        }));
    }
    for round in rounds {
        round.join().unwrap();
    }
}

#[test]
fn reduce_scatter_reduces_the_own_slice() {
    let rank_size = 4;
    let len = 102; // last slice absorbs the remainder
    let world = test_world(rank_size);
    let mut inputs: Vec<Vec<f32>> = (0..rank_size)
        .map(|r| (0..len).map(|i| ((r + 1) * 1000 + i) as f32).collect())
        .collect();
    let mut outputs: Vec<Vec<f32>> = (0..rank_size)
        .map(|r| vec![0.0f32; partition(len, rank_size, r).count])
        .collect();

    let magic = world.next_magic();
    let block_num = rank_size + 1;
    let in_refs = tensor_refs(&mut inputs);
    let out_refs = tensor_refs(&mut outputs);
    world
        .run_units(block_num, move |args, block| {
            let call =
                CollectiveCall::new(in_refs[args.rank], out_refs[args.rank], len, magic)
                    .with_op(ReduceOp::Sum);
            ReduceScatter::new(&args, &call, block, block_num)?.run()
        })
        .unwrap();

    for (rank, output) in outputs.iter().enumerate() {
        let slice = partition(len, rank_size, rank);
        assert_eq!(output.len(), slice.count);
        for (j, value) in output.iter().enumerate() {
            let global = slice.offset + j;
            let expected =
                (0..rank_size).map(|r| ((r + 1) * 1000 + global) as f32).sum::<f32>();
            assert_eq!(*value, expected);
        }
    }
}

#[test]
fn broadcast_copies_root_to_every_rank() {
    let rank_size = 4;
    let len = 90;
    let root = 2;
    let world = test_world(rank_size);
    let mut inputs: Vec<Vec<f32>> = (0..rank_size)
        .map(|r| (0..len).map(|i| (r * 10_000 + i) as f32).collect())
        .collect();
    let mut outputs = vec![vec![0.0f32; len]; rank_size];

    let magic = world.next_magic();
    let block_num = 2;
    let in_refs = tensor_refs(&mut inputs);
    let out_refs = tensor_refs(&mut outputs);
    world
        .run_units(block_num, move |args, block| {
            let call =
                CollectiveCall::new(in_refs[args.rank], out_refs[args.rank], len, magic)
                    .with_root(root);
            Broadcast::new(&args, &call, block, block_num)?.run()
        })
        .unwrap();

    for output in &outputs {
        for (i, value) in output.iter().enumerate() {
            assert_eq!(*value, (root * 10_000 + i) as f32);
        }
    }
}

#[test]
fn quantized_all_reduce_matches_the_narrowed_sum() {
    let rank_size = 2;
    let len = 72;
    let scale = 0.5f32;
    let world = test_world(rank_size);
    let mut inputs: Vec<Vec<f32>> = (0..rank_size)
        .map(|r| (0..len).map(|i| 1.0 + (r * 31 + i) as f32 * 0.125).collect())
        .collect();
    let mut outputs = vec![vec![0.0f32; len]; rank_size];

    let magic = world.next_magic();
    let block_num = 2 * rank_size + 1;
    let in_refs = tensor_refs(&mut inputs);
    let out_refs = tensor_refs(&mut outputs);
    world
        .run_units(block_num, move |args, block| {
            let call =
                CollectiveCall::new(in_refs[args.rank], out_refs[args.rank], len, magic)
                    .with_op(ReduceOp::Sum)
                    .with_quant(QuantArgs::scalar(scale));
            AllReduceQuant::new(&args, &call, block, block_num)?.run()
        })
        .unwrap();

    // The reference folds the same narrow/widen chain in the same order.
    for output in &outputs {
        for (i, value) in output.iter().enumerate() {
            let expected: f32 = (0..rank_size)
                .map(|r| f16::from_f32(inputs[r][i] * scale).to_f32() / scale)
                .sum();
            assert!(
                (value - expected).abs() <= expected.abs() * 2e-3,
                "element {i}: {value} vs {expected}"
            );
        }
    }
}

#[test]
fn dfx_record_tracks_the_last_call() {
    let rank_size = 2;
    let len = 32;
    let world = test_world(rank_size);
    let mut inputs = vec![vec![1.0f32; len]; rank_size];
    let mut outputs = vec![vec![0.0f32; len]; rank_size];

    let magic = world.next_magic();
    run_all_reduce(&world, &mut inputs, &mut outputs, len, ReduceOp::Sum, magic);

    for rank in 0..rank_size {
        let record = world.dfx(rank).unwrap().snapshot();
        assert!(!record.running);
        assert_eq!(record.magic, magic);
        assert_eq!(record.len, len as u64);
        assert_eq!(record.op, op_code(ReduceOp::Sum));
    }
}

#[test]
fn undersized_block_count_is_rejected() {
    let rank_size = 4;
    let world = test_world(rank_size);
    let args = world.args(0).unwrap();
    let input = vec![0.0f32; 16];
    let mut output = vec![0.0f32; 16];
    let call = CollectiveCall::new(
        TensorRef::from_slice(&input),
        TensorRef::from_mut_slice(&mut output),
        16,
        1,
    );
    // AllReduce needs 2 * rank_size + 1 = 9 groups.
    assert!(AllReduce::new(&args, &call, 0, 3).is_err());
    // And a block index outside the launch is malformed, not spare.
    assert!(AllReduce::new(&args, &call, 9, 9).is_err());
}

#[test]
fn mismatched_output_shape_is_rejected() {
    let rank_size = 2;
    let world = test_world(rank_size);
    let args = world.args(0).unwrap();
    let input = vec![0.0f32; 16];
    let mut output = vec![0.0f32; 16]; // must be rank_size * len
    let call = CollectiveCall::new(
        TensorRef::from_slice(&input),
        TensorRef::from_mut_slice(&mut output),
        16,
        1,
    );
    assert!(AllGather::new(&args, &call, 0, 3).is_err());
}

#[test]
fn broadcast_rejects_out_of_range_root() {
    let rank_size = 2;
    let world = test_world(rank_size);
    let args = world.args(0).unwrap();
    let input = vec![0.0f32; 8];
    let mut output = vec![0.0f32; 8];
    let call = CollectiveCall::new(
        TensorRef::from_slice(&input),
        TensorRef::from_mut_slice(&mut output),
        8,
        1,
    )
    .with_root(5);
    assert!(Broadcast::new(&args, &call, 0, 2).is_err());
}

#[test]
fn quantized_all_reduce_requires_a_scalar_scale() {
    let rank_size = 2;
    let world = test_world(rank_size);
    let args = world.args(0).unwrap();
    let input = vec![0.0f32; 8];
    let mut output = vec![0.0f32; 8];
    let base = CollectiveCall::new(
        TensorRef::from_slice(&input),
        TensorRef::from_mut_slice(&mut output),
        8,
        1,
    );
    assert!(AllReduceQuant::new(&args, &base, 0, 5).is_err());

    let table = base.with_quant(QuantArgs { scale: 0.5, scale_count: 8, offset: 4 });
    assert!(AllReduceQuant::new(&args, &table, 0, 5).is_err());
}

#[test]
fn lane_stepping_requires_aligned_slot_count() {
    // slot_count 4 is not a multiple of rank_size 3.
    let world =
        Arc::new(CommWorld::new(3, &test_config(), TopologyHints::default()).unwrap());
    let args = world.args(0).unwrap();
    let input = vec![0.0f32; 9];
    let mut output = vec![0.0f32; 3];
    let call = CollectiveCall::new(
        TensorRef::from_slice(&input),
        TensorRef::from_mut_slice(&mut output),
        9,
        1,
    );
    assert!(ReduceScatter::new(&args, &call, 0, 4).is_err());
}
