use std::sync::Arc;

use crate::{
    api::{Queue, SmallVec, flag_epoch},
    error::WindowLibError,
    flag_sync::FlagSync,
    interface::FlagOps,
    region::WindowLayout,
    spin::SpinBudget,
    window::Window,
};

fn sync_for(rank_size: usize, budget: SpinBudget) -> Arc<FlagSync> {
    let layout = WindowLayout::new(rank_size, 4, 64).unwrap();
    let peers: SmallVec<Arc<Window>> =
        (0..rank_size).map(|r| Arc::new(Window::new(r, layout))).collect();
    Arc::new(FlagSync::new(peers, budget).unwrap())
}

#[test]
fn inner_set_then_wait() {
    let sync = sync_for(2, SpinBudget::new(1000));
    sync.set_inner(1, 7, Queue::Inbox, 3);
    sync.wait_inner(1, 7, Queue::Inbox, 3).unwrap();
}

#[test]
fn wait_across_threads() {
    let sync = sync_for(2, SpinBudget::default());
    let setter = {
        let sync = sync.clone();
        std::thread::spawn(move || {
            for step in 0..16 {
                sync.set_inner(0, 1, Queue::Inbox, step);
            }
        })
    };
    for step in 0..16 {
        sync.wait_inner(0, 1, Queue::Inbox, step).unwrap();
    }
    setter.join().unwrap();
}

#[test]
fn missing_set_times_out_instead_of_hanging() {
    let sync = sync_for(2, SpinBudget::new(200));
    let err = sync.wait_inner(0, 1, Queue::Inbox, 0).unwrap_err();
    match err {
        WindowLibError::FlagTimeout { kind, coord, .. } => {
            assert_eq!(kind, "inner");
            assert_eq!(coord.rank, 0);
            assert_eq!(coord.step, 0);
        }
        other => panic!("expected FlagTimeout, got {other:?}"),
    }
}

#[test]
fn stale_flag_from_previous_round_is_ignored() {
    let sync = sync_for(1, SpinBudget::new(200));
    // Round 4 signals step 2, then round 6 reuses the same physical copy
    // (depth 2). The old epoch must not satisfy the new wait.
    sync.set_inner(0, 4, Queue::Inbox, 2);
    assert!(flag_epoch(4, 2) < flag_epoch(6, 2));
    assert!(matches!(
        sync.wait_inner(0, 6, Queue::Inbox, 2),
        Err(WindowLibError::FlagTimeout { .. })
    ));
}

#[test]
fn outer_counts_every_contributing_rank() {
    let sync = sync_for(4, SpinBudget::new(2000));
    for from in 0..3 {
        sync.set_outer(2, from, 9, Queue::Result, 5).unwrap();
    }
    // Three of four ranks signaled: the full wait must time out ...
    assert!(matches!(
        sync.wait_outer(2, 9, Queue::Result, 5, 4),
        Err(WindowLibError::FlagTimeout { .. })
    ));
    // ... and succeed once the last rank signs off.
    sync.set_outer(2, 3, 9, Queue::Result, 5).unwrap();
    sync.wait_outer(2, 9, Queue::Result, 5, 4).unwrap();
}

#[test]
fn outer_from_single_rank() {
    let sync = sync_for(3, SpinBudget::new(500));
    sync.set_outer(1, 2, 3, Queue::Inbox, 0).unwrap();
    sync.wait_outer_from(1, 2, 3, Queue::Inbox, 0).unwrap();
    assert!(matches!(
        sync.wait_outer_from(1, 0, 3, Queue::Inbox, 0),
        Err(WindowLibError::FlagTimeout { .. })
    ));
}

#[test]
fn out_of_range_consumer_rank_is_rejected() {
    let sync = sync_for(2, SpinBudget::new(100));
    assert!(matches!(
        sync.set_outer(0, 5, 1, Queue::Inbox, 0),
        Err(WindowLibError::SlotOutOfBounds(_))
    ));
}

#[test]
fn mismatched_peer_list_is_rejected() {
    let layout_a = WindowLayout::new(2, 4, 64).unwrap();
    let layout_b = WindowLayout::new(2, 8, 64).unwrap();
    let peers: SmallVec<Arc<Window>> = [
        Arc::new(Window::new(0, layout_a)),
        Arc::new(Window::new(1, layout_b)),
    ]
    .into_iter()
    .collect();
    assert!(matches!(
        FlagSync::new(peers, SpinBudget::default()),
        Err(WindowLibError::WindowMismatch)
    ));
}
