use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use medstock_auth::{Actor, Role};
use medstock_core::{BinId, DomainError, DomainResult, LotId, MovementId, PlacementId, RequestId};
use medstock_events::{EventBus, EventEnvelope};
use medstock_lots::{Lot, LotRecord, LotState, SyncOutcome};

use super::{InventoryEngine, require};
use crate::store::{LotTxn, lock_row};

impl<B> InventoryEngine<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Shift one placement by a signed delta, writing an adjustment movement.
    #[instrument(skip_all, fields(lot = %lot, delta, actor = %actor.name))]
    pub fn adjust_lot(
        &self,
        actor: &Actor,
        lot: LotId,
        placement: PlacementId,
        delta: i64,
        reason: &str,
    ) -> DomainResult<MovementId> {
        require(actor, &Role::INVENTORY_CONTROL)?;
        let movement = self.with_lot(lot, |record, at| {
            record.adjust(placement, delta, reason, self.store.stamp(at, actor.id))
        })?;
        info!(%movement, "lot adjusted");
        Ok(movement)
    }

    /// Expire, quarantine or release a lot. Reservations stay in place.
    #[instrument(skip_all, fields(lot = %lot, state = %state, actor = %actor.name))]
    pub fn mark_lot_state(&self, actor: &Actor, lot: LotId, state: LotState, reason: &str) -> DomainResult<Lot> {
        require(actor, &Role::INVENTORY_CONTROL)?;
        let updated = self.with_lot(lot, |record, at| {
            record.mark_state(state, reason, actor.id, at)?;
            Ok(record.lot.clone())
        })?;
        if updated.reserved_qty > 0 {
            warn!(reserved = updated.reserved_qty, "lot marked while reservations are outstanding");
        }
        info!(number = %updated.number, "lot state changed");
        Ok(updated)
    }

    /// Undo the latest effective movement of a lot.
    #[instrument(skip_all, fields(lot = %lot, movement = %movement, actor = %actor.name))]
    pub fn reverse_movement(
        &self,
        actor: &Actor,
        lot: LotId,
        movement: MovementId,
        reason: &str,
    ) -> DomainResult<MovementId> {
        require(actor, &Role::INVENTORY_CONTROL)?;
        let reversal = self.with_lot(lot, |record, at| {
            record.reverse_movement(movement, reason, self.store.stamp(at, actor.id))
        })?;
        info!(%reversal, "movement reversed");
        Ok(reversal)
    }

    /// Recompute lot totals from placements.
    #[instrument(skip_all, fields(lot = %lot, actor = %actor.name))]
    pub fn synchronise_lot(&self, actor: &Actor, lot: LotId) -> DomainResult<SyncOutcome> {
        require(actor, &Role::INVENTORY_CONTROL)?;
        let rows = self.store.lots.rows([lot])?;
        let mut txn = LotTxn::lock(&rows)?;
        let outcome = txn.draft(lot)?.synchronise();
        txn.commit()?;
        if outcome.changed() {
            warn!(?outcome, "lot totals were out of sync");
        }
        Ok(outcome)
    }

    /// Verify aggregation, reservation bounds and ledger continuity of a lot.
    pub fn check_lot(&self, lot: LotId) -> DomainResult<()> {
        self.store.lots.snapshot(lot)?.check_invariants()
    }

    /// Move free quantity to another bin of the lot's warehouse.
    #[instrument(skip_all, fields(lot = %lot, qty, actor = %actor.name))]
    pub fn transfer(
        &self,
        actor: &Actor,
        lot: LotId,
        placement: PlacementId,
        to_bin: BinId,
        qty: i64,
        reason: &str,
    ) -> DomainResult<(PlacementId, MovementId)> {
        require(actor, &Role::STOREKEEPER)?;
        let moved = self.with_lot(lot, |record, at| {
            self.check_target_bins(record, [to_bin])?;
            record.transfer(placement, to_bin, qty, reason, self.store.stamp(at, actor.id))
        })?;
        info!(placement = %moved.0, movement = %moved.1, "stock transferred");
        Ok(moved)
    }

    /// Carve free quantity off a placement into other bins.
    #[instrument(skip_all, fields(lot = %lot, actor = %actor.name))]
    pub fn split_placement(
        &self,
        actor: &Actor,
        lot: LotId,
        source: PlacementId,
        parts: &[(BinId, i64)],
    ) -> DomainResult<Vec<PlacementId>> {
        require(actor, &Role::STOREKEEPER)?;
        let created = self.with_lot(lot, |record, _| {
            self.check_target_bins(record, parts.iter().map(|(bin, _)| *bin))?;
            record.split_placement(source, parts)
        })?;
        info!(parts = created.len(), "placement split");
        Ok(created)
    }

    /// Combine placements of a lot into one bin.
    ///
    /// Reservations move with their quantity, so the proposals holding them
    /// are locked and repointed in the same transaction.
    #[instrument(skip_all, fields(lot = %lot, actor = %actor.name))]
    pub fn merge_placements(
        &self,
        actor: &Actor,
        lot: LotId,
        sources: &[PlacementId],
        target_bin: BinId,
    ) -> DomainResult<PlacementId> {
        require(actor, &Role::STOREKEEPER)?;

        let request_ids: Vec<RequestId> = self.store.requests_reserving(lot)?;
        let request_rows = request_ids
            .iter()
            .map(|id| self.store.requests.row(*id))
            .collect::<DomainResult<Vec<_>>>()?;
        let mut requests = request_rows
            .iter()
            .map(|row| lock_row(row, "request"))
            .collect::<DomainResult<Vec<_>>>()?;

        let lot_rows = self.store.lots.rows([lot])?;
        let mut txn = LotTxn::lock(&lot_rows)?;
        let record = txn.draft(lot)?;
        self.check_target_bins(record, [target_bin])?;

        let mut held: HashMap<PlacementId, i64> = HashMap::new();
        for row in &requests {
            for proposal in row.proposals.iter().filter(|p| p.state.is_open()) {
                for a in proposal.assignments().filter(|a| a.lot_id == lot) {
                    *held.entry(a.placement).or_default() += a.outstanding();
                }
            }
        }
        for source in sources {
            let reserved = record.placement(*source)?.reserved_qty;
            if held.get(source).copied().unwrap_or_default() != reserved {
                return Err(DomainError::conflict(format!(
                    "reservations on placement {source} changed during merge; retry"
                )));
            }
        }

        let (target, remaps) = record.merge_placements(sources, target_bin)?;
        let bin_code = self.catalog()?.bin(target_bin)?.code.clone();
        txn.commit()?;

        let mut repointed = 0;
        for row in &mut requests {
            for proposal in row.proposals.iter_mut().filter(|p| p.state.is_open()) {
                for a in proposal.items.iter_mut().flat_map(|i| i.assignments.iter_mut()) {
                    if let Some(remap) = remaps.iter().find(|r| r.from == a.placement) {
                        a.placement = remap.to;
                        a.bin = remap.to_bin;
                        a.bin_code = bin_code.clone();
                        repointed += 1;
                    }
                }
            }
        }
        info!(placement = %target, merged = remaps.len(), repointed, "placements merged");
        Ok(target)
    }

    /// Run `f` on a draft of one lot and commit if it succeeds.
    fn with_lot<T>(
        &self,
        lot: LotId,
        f: impl FnOnce(&mut LotRecord, DateTime<Utc>) -> DomainResult<T>,
    ) -> DomainResult<T> {
        let rows = self.store.lots.rows([lot])?;
        let mut txn = LotTxn::lock(&rows)?;
        let out = f(txn.draft(lot)?, self.now())?;
        txn.commit()?;
        Ok(out)
    }

    /// Target bins must be active and belong to the lot's warehouse.
    fn check_target_bins(&self, record: &LotRecord, bins: impl IntoIterator<Item = BinId>) -> DomainResult<()> {
        let catalog = self.catalog()?;
        for id in bins {
            let bin = catalog.active_bin(id)?;
            if bin.warehouse != record.lot.warehouse {
                return Err(DomainError::validation(format!(
                    "bin {} is in another warehouse; lot {} stays in its receiving warehouse",
                    bin.code, record.lot.number
                )));
            }
        }
        Ok(())
    }
}
