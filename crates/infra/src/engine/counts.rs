use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use medstock_auth::{Actor, Role};
use medstock_core::{CountId, DomainError, DomainResult, LotId, PlacementId};
use medstock_counts::{CountFilter, CountRecord, CountStatistics, CountSubject, Pass, count_statistics};
use medstock_events::{EventBus, EventEnvelope};

use super::{InventoryEngine, require};
use crate::store::{LotTxn, lock_row};

const COUNT_REASON: &str = "physical count";

impl<B> InventoryEngine<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Open a count on one placement, snapshotting its current quantity.
    #[instrument(skip_all, fields(lot = %lot, placement = %placement, actor = %actor.name))]
    pub fn start_count(&self, actor: &Actor, lot: LotId, placement: PlacementId) -> DomainResult<CountRecord> {
        require(actor, &Role::INVENTORY_CONTROL)?;
        let record = self.store.lots.snapshot(lot)?;
        let p = record.placement(placement)?;
        let subject = CountSubject {
            placement,
            lot_id: lot,
            lot_number: record.lot.number.clone(),
            bin: p.bin,
            product: record.lot.product.clone(),
            unit_price: record.lot.unit_price,
            system_qty: p.qty,
        };

        let id = CountId::new();
        self.store.claim_count(placement, id)?;
        let count = CountRecord::start(id, subject, actor.id, self.now());
        if let Err(err) = self.store.counts.insert(id, count.clone()) {
            self.store.release_count(placement, id)?;
            return Err(err);
        }
        info!(count = %id, system_qty = count.subject.system_qty, "count started");
        Ok(count)
    }

    /// Record pass 1, 2 or 3. With `completed` on pass 3 the placement is
    /// resized to the counted quantity in the same transaction.
    #[instrument(skip_all, fields(count = %count, pass, value, actor = %actor.name))]
    pub fn record_count_pass(
        &self,
        actor: &Actor,
        count: CountId,
        pass: u8,
        value: i64,
        completed: bool,
    ) -> DomainResult<CountRecord> {
        require(actor, &Role::INVENTORY_CONTROL)?;
        let pass = Pass::try_from(pass)?;
        if completed && pass != Pass::Third {
            return Err(DomainError::validation("only the third pass can complete a count"));
        }

        let row = self.store.counts.row(count)?;
        let mut guard = lock_row(&row, "count")?;
        let mut draft = guard.clone();
        let at = self.now();
        match draft.pass(pass).map(|e| e.value) {
            // A saved third pass is committed later by resubmitting its value.
            Some(saved) if completed && saved == value => {}
            _ => draft.record_pass(pass, value, actor.id, at)?,
        }

        if completed {
            let lot_rows = self.store.lots.rows([draft.subject.lot_id])?;
            let mut txn = LotTxn::lock(&lot_rows)?;
            let record = txn.draft(draft.subject.lot_id)?;
            let placement = record.placement(draft.subject.placement)?;
            let difference = draft.commit_delta(placement.qty, placement.reserved_qty)?;
            let movement = record.resize_placement(
                draft.subject.placement,
                value,
                COUNT_REASON,
                Some(format!("count {count}")),
                self.store.stamp(at, actor.id),
            )?;
            txn.commit()?;
            draft.mark_completed(difference, movement);
            info!(difference, adjusted = movement.is_some(), "count committed");
        }

        *guard = draft.clone();
        drop(guard);
        if draft.is_completed() {
            self.store.release_count(draft.subject.placement, count)?;
        }
        Ok(draft)
    }

    pub fn count(&self, id: CountId) -> DomainResult<CountRecord> {
        self.store.counts.snapshot(id)
    }

    pub fn count_statistics(&self, filter: &CountFilter) -> DomainResult<CountStatistics> {
        let counts = self.store.counts.snapshots()?;
        Ok(count_statistics(&counts, filter))
    }
}
