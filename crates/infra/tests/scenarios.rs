//! End-to-end scenarios through the engine surface.

mod common;

use std::sync::Barrier;
use std::thread;

use medstock_arrivals::ArrivalState;
use medstock_core::{AggregateRoot, DomainResult, ErrorKind, Invariant};
use medstock_infra::store::LotTxn;
use medstock_ledger::{MovementFilter, MovementKind};
use medstock_lots::LotState;

use common::{GAUZE, PARACETAMOL, code, date, fixture};

#[test]
fn fefo_picks_the_earlier_lot_first() {
    let f = fixture();
    let a = f.receive(PARACETAMOL, "A-2601", date(2026, 1, 15), &[(f.bins[0], 30)]);
    let b = f.receive(PARACETAMOL, "B-2603", date(2026, 3, 1), &[(f.bins[1], 40)]);

    let (id, proposal) = f.proposal_in_preparation(PARACETAMOL, 50);
    let picks: Vec<_> = proposal
        .assignments()
        .map(|x| (x.lot_id, x.qty))
        .collect();
    assert_eq!(picks, vec![(a, 30), (b, 20)]);
    assert!(!proposal.has_shortfall());

    for assignment in proposal.assignments() {
        f.engine
            .pick_item(&f.actors.picker, id, assignment.id, assignment.qty)
            .unwrap();
    }
    f.engine.finalise_proposal(&f.actors.dispatcher, id).unwrap();

    let lot_a = f.engine.lot(a).unwrap();
    let lot_b = f.engine.lot(b).unwrap();
    assert_eq!(lot_a.lot.available_qty, 0);
    assert_eq!(lot_a.lot.state, LotState::Consumed);
    assert_eq!(lot_b.lot.available_qty, 20);
    assert_eq!(lot_b.lot.reserved_qty, 0);

    let folio = f.engine.request(id).unwrap().folio().to_string();
    let outbound = f
        .engine
        .ledger_query(&MovementFilter {
            kind: Some(MovementKind::OutboundOrder),
            reference: Some(folio),
            ..MovementFilter::default()
        })
        .unwrap();
    let qtys: Vec<i64> = outbound.iter().map(|e| e.movement.qty).collect();
    assert_eq!(qtys, vec![30, 20]);
}

#[test]
fn concurrent_reservations_on_one_placement() {
    let f = fixture();
    let lot = f.receive(PARACETAMOL, "L-CONC", date(2026, 6, 30), &[(f.bins[0], 10)]);
    let placement = f.placement_at(lot, f.bins[0]);
    let barrier = Barrier::new(2);
    let (store, barrier) = (f.engine.store(), &barrier);

    let results: Vec<DomainResult<()>> = thread::scope(|s| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                s.spawn(move || {
                    barrier.wait();
                    let rows = store.lots.rows([lot])?;
                    let mut txn = LotTxn::lock(&rows)?;
                    txn.draft(lot)?.reserve(placement, 7)?;
                    txn.commit()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(Result::err).unwrap();
    assert!(matches!(
        err.as_invariant(),
        Some(Invariant::NotEnoughFree { requested: 7, free: 3 })
    ));

    let record = f.engine.lot(lot).unwrap();
    assert_eq!(record.lot.reserved_qty, 7);
    assert_eq!(record.placement(placement).unwrap().reserved_qty, 7);
}

#[test]
fn concurrent_validations_never_overbook() {
    let f = fixture();
    let lot = f.receive(PARACETAMOL, "L-OVR", date(2026, 6, 30), &[(f.bins[0], 10)]);
    let first = f.pending_request(PARACETAMOL, 7);
    let second = f.pending_request(PARACETAMOL, 7);
    let barrier = Barrier::new(2);

    let mut allocated: Vec<i64> = thread::scope(|s| {
        let handles: Vec<_> = [first, second]
            .into_iter()
            .map(|id| {
                let (f, barrier) = (&f, &barrier);
                s.spawn(move || {
                    barrier.wait();
                    f.engine
                        .validate_request(&f.actors.validator, id, Vec::new())
                        .unwrap()
                        .items[0]
                        .assignments
                        .iter()
                        .map(|a| a.qty)
                        .sum::<i64>()
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    allocated.sort();

    assert_eq!(allocated, vec![3, 7]);
    assert_eq!(f.engine.lot(lot).unwrap().lot.reserved_qty, 10);
    f.engine.check_lot(lot).unwrap();
}

#[test]
fn concurrent_adjustments_keep_the_ledger_continuous() {
    let f = fixture();
    let lot = f.receive(GAUZE, "G-100", date(2027, 1, 31), &[(f.bins[0], 100)]);
    let placement = f.placement_at(lot, f.bins[0]);

    thread::scope(|s| {
        for i in 0..8 {
            let f = &f;
            s.spawn(move || {
                let delta = if i % 2 == 0 { 3 } else { -2 };
                for _ in 0..10 {
                    f.engine
                        .adjust_lot(&f.actors.control, lot, placement, delta, "recount")
                        .unwrap();
                }
            });
        }
    });

    let record = f.engine.lot(lot).unwrap();
    assert_eq!(record.lot.available_qty, 100 + 4 * 10 * 3 - 4 * 10 * 2);
    assert_eq!(record.ledger.movements().len(), 81);
    f.engine.check_lot(lot).unwrap();
}

#[test]
fn three_pass_count_adjusts_down() {
    let f = fixture();
    let lot = f.receive(GAUZE, "G-CNT", date(2027, 1, 31), &[(f.bins[2], 100)]);
    let placement = f.placement_at(lot, f.bins[2]);
    let who = &f.actors.control;

    let count = f.engine.start_count(who, lot, placement).unwrap();
    assert_eq!(count.subject.system_qty, 100);
    f.engine.record_count_pass(who, count.id, 1, 98, false).unwrap();
    f.engine.record_count_pass(who, count.id, 2, 100, false).unwrap();
    let done = f.engine.record_count_pass(who, count.id, 3, 97, true).unwrap();

    assert!(done.is_completed());
    assert_eq!(done.difference(), Some(-3));
    let record = f.engine.lot(lot).unwrap();
    assert_eq!(record.placement(placement).unwrap().qty, 97);
    assert_eq!(record.lot.available_qty, 97);

    let adjustment = record.movement(done.adjustment().unwrap()).unwrap();
    assert_eq!(adjustment.kind, MovementKind::AdjustNegative);
    assert_eq!(adjustment.qty, 3);
    f.engine.check_lot(lot).unwrap();
}

#[test]
fn arrival_placement_mismatch_blocks_finalise() {
    let f = fixture();
    let arrival = f.arrival_at_placement(f.line(PARACETAMOL, "MM-1", date(2026, 8, 31), 50));
    let id = *arrival.id();
    let item = arrival.items()[0].id;
    f.engine
        .set_placement(&f.actors.storekeeper, id, item, &[(f.bins[0], 49)])
        .unwrap();

    let err = f.engine.finalise_arrival(&f.actors.storekeeper, id).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Invariant);
    assert!(matches!(
        err.as_invariant(),
        Some(Invariant::PlacementMismatch { expected: 50, placed: 49, .. })
    ));

    assert_eq!(f.engine.arrival(id).unwrap().state(), ArrivalState::Placement);
    assert!(f.engine.lots_by_product(&code(PARACETAMOL)).unwrap().is_empty());
    assert!(f.engine.ledger_query(&MovementFilter::default()).unwrap().is_empty());
}

#[test]
fn partial_pick_releases_the_rest() {
    let f = fixture();
    let lot = f.receive(PARACETAMOL, "P-10", date(2026, 6, 30), &[(f.bins[0], 10)]);
    let placement = f.placement_at(lot, f.bins[0]);
    let (id, proposal) = f.proposal_in_preparation(PARACETAMOL, 10);
    let assignment = proposal.items[0].assignments[0].clone();
    assert_eq!(assignment.qty, 10);

    let outcome = f
        .engine
        .pick_item(&f.actors.picker, id, assignment.id, 8)
        .unwrap();
    assert!(outcome.partial);

    let record = f.engine.lot(lot).unwrap();
    let movement = record.movement(outcome.movement.unwrap()).unwrap();
    assert_eq!((movement.kind, movement.qty), (MovementKind::OutboundOrder, 8));
    let p = record.placement(placement).unwrap();
    assert_eq!((p.qty, p.reserved_qty), (2, 0));
    assert_eq!(record.lot.reserved_qty, 0);

    let request = f.engine.request(id).unwrap();
    assert!(request.lines()[0].partial);
    assert!(request.lines()[0].shortfall_reason.is_some());
    f.engine.finalise_proposal(&f.actors.dispatcher, id).unwrap();
}

#[test]
fn reversing_the_latest_movement_restores_the_lot() {
    let f = fixture();
    let lot = f.receive(PARACETAMOL, "R-100", date(2026, 6, 30), &[(f.bins[0], 100)]);
    let (id, proposal) = f.proposal_in_preparation(PARACETAMOL, 20);
    let assignment = &proposal.items[0].assignments[0];
    let outbound = f
        .engine
        .pick_item(&f.actors.picker, id, assignment.id, 20)
        .unwrap()
        .movement
        .unwrap();

    let inbound = f.engine.lot(lot).unwrap().ledger.movements()[0].id;
    let err = f
        .engine
        .reverse_movement(&f.actors.control, lot, inbound, "wrong supplier")
        .unwrap_err();
    assert!(matches!(err.as_invariant(), Some(Invariant::NotReversible(m)) if *m == inbound));

    let reversal = f
        .engine
        .reverse_movement(&f.actors.control, lot, outbound, "picked from wrong lot")
        .unwrap();
    let record = f.engine.lot(lot).unwrap();
    assert_eq!(record.lot.available_qty, 100);
    assert!(record.movement(outbound).unwrap().voided);
    assert_eq!(record.movement(reversal).unwrap().reverses, Some(outbound));
    assert_eq!(f.engine.ledger_replay(lot).unwrap().len(), 1);
    f.engine.check_lot(lot).unwrap();
}
