//! Distribute-then-collect through the plan-driven transport.

use strata_compute::{Communicator, ThreadGroup};
use strata_core::matrix::RowBlock;
use strata_core::transport::{Striped, Transport, TransportError};
use strata_core::{Fill, Matrix, PartitionMode, PartitionPlan};

fn round_trip(n: usize, participants: usize, mode: PartitionMode) {
    let plan = PartitionPlan::new(n, participants, mode).unwrap();
    let original = Matrix::new(n, Fill::Seeded(n as u64)).unwrap();

    let outcomes = ThreadGroup::run(participants, |comm| {
        let transport = Transport::new(&comm, &plan).unwrap();
        if comm.is_coordinator() {
            let mut full = original.clone();
            transport.distribute_striped(Striped::Full(&mut full)).unwrap();
            // Wipe every row the coordinator does not own; collection must restore them.
            let own = plan.stripe(0);
            for (i, row) in full.as_mut_slice().chunks_mut(n.max(1)).enumerate() {
                if i < own.from || i >= own.to {
                    row.fill(-1.0);
                }
            }
            transport.collect_striped(Striped::Full(&mut full)).unwrap();
            Some(full)
        } else {
            let mut block = RowBlock::zeros(plan.stripe(comm.rank()), n).unwrap();
            transport.distribute_striped(Striped::Block(&mut block)).unwrap();
            transport.collect_striped(Striped::Block(&mut block)).unwrap();
            assert_eq!(
                block.as_slice(),
                original.rows(plan.stripe(comm.rank())).unwrap()
            );
            None
        }
    })
    .unwrap();

    let collected = outcomes.into_iter().next().flatten().unwrap();
    assert_eq!(collected, original, "n={n} P={participants} {mode:?}");
}

#[test]
fn variable_size_round_trip_reproduces_matrix() {
    for n in [0, 1, 5, 10, 17] {
        for participants in 1..=6 {
            round_trip(n, participants, PartitionMode::Remainder);
        }
    }
}

#[test]
fn fixed_size_round_trip_reproduces_matrix() {
    for (n, participants) in [(6, 3), (8, 4), (9, 1), (12, 6)] {
        round_trip(n, participants, PartitionMode::Strict);
    }
}

#[test]
fn replicate_full_reaches_every_participant() {
    let n = 6;
    let plan = PartitionPlan::new(n, 4, PartitionMode::Remainder).unwrap();
    let source = Matrix::new(n, Fill::Seeded(3)).unwrap();
    let copies = ThreadGroup::run(4, |comm| {
        let transport = Transport::new(&comm, &plan).unwrap();
        let mut m = if comm.is_coordinator() {
            source.clone()
        } else {
            Matrix::zeros(n).unwrap()
        };
        transport.replicate_full(&mut m).unwrap();
        m
    })
    .unwrap();
    assert!(copies.iter().all(|m| *m == source));
}

#[test]
fn group_size_must_match_plan() {
    let plan = PartitionPlan::new(4, 2, PartitionMode::Remainder).unwrap();
    let errs = ThreadGroup::run(3, |comm| Transport::new(&comm, &plan).err()).unwrap();
    assert!(errs
        .iter()
        .all(|e| matches!(e, Some(TransportError::GroupSize { plan: 2, group: 3 }))));
}

#[test]
fn coordinator_must_pass_the_full_side() {
    let plan = PartitionPlan::new(4, 1, PartitionMode::Remainder).unwrap();
    let results = ThreadGroup::run(1, |comm| {
        let transport = Transport::new(&comm, &plan).unwrap();
        let mut block = RowBlock::zeros(plan.stripe(0), 4).unwrap();
        transport.distribute_striped(Striped::Block(&mut block))
    })
    .unwrap();
    assert!(matches!(results[0], Err(TransportError::WrongSide { rank: 0 })));
}
