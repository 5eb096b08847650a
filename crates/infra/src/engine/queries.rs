//! Read-only views over committed state.
//!
//! Each query snapshots the rows it needs one at a time, so a result may mix
//! states from before and after a concurrent transaction on a different lot,
//! but never a half-applied transaction on the same lot.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use serde::Serialize;
use serde_json::Value as JsonValue;

use medstock_catalog::{InstitutionKey, ProductCode};
use medstock_core::{BinId, DomainError, DomainResult, LotId, WarehouseId};
use medstock_events::{EventBus, EventEnvelope};
use medstock_ledger::{Movement, MovementFilter};
use medstock_lots::{Lot, LotRecord, Placement};
use medstock_orders::{FefoCandidate, FefoPolicy, ordered_candidates};

use super::InventoryEngine;
use super::orders::fefo_candidate;

/// A lot with its placements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LotSummary {
    pub lot: Lot,
    pub placements: Vec<Placement>,
    pub free_qty: i64,
}

/// Stock of one product in one bin, summed over lots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BinFreeQty {
    pub bin: BinId,
    pub bin_code: String,
    pub qty: i64,
    pub reserved: i64,
    pub free: i64,
}

/// A movement with the lot context a report needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub movement: Movement,
    pub lot_number: String,
    pub product: ProductCode,
}

impl<B> InventoryEngine<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn lot(&self, id: LotId) -> DomainResult<LotRecord> {
        self.store.lots.snapshot(id)
    }

    /// Lots of a product, soonest expiry first.
    pub fn lots_by_product(&self, product: &ProductCode) -> DomainResult<Vec<LotSummary>> {
        let mut lots = self
            .snapshots(self.store.lots.ids_for_product(product)?)?
            .into_iter()
            .map(|r| LotSummary {
                free_qty: r.lot.free_qty(),
                lot: r.lot,
                placements: r.placements,
            })
            .collect::<Vec<_>>();
        lots.sort_by(|a, b| {
            a.lot
                .expiry
                .cmp(&b.lot.expiry)
                .then_with(|| a.lot.number.cmp(&b.lot.number))
        });
        Ok(lots)
    }

    /// Per-bin totals of a product in one warehouse, by bin code.
    pub fn free_qty_by_bin(&self, product: &ProductCode, warehouse: WarehouseId) -> DomainResult<Vec<BinFreeQty>> {
        let records = self.snapshots(self.store.lots.ids_for_product(product)?)?;
        let catalog = self.catalog()?;
        let mut bins: BTreeMap<BinId, BinFreeQty> = BTreeMap::new();
        for p in records
            .iter()
            .filter(|r| r.lot.warehouse == warehouse)
            .flat_map(|r| r.placements.iter())
            .filter(|p| p.qty > 0)
        {
            let entry = match bins.entry(p.bin) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => e.insert(BinFreeQty {
                    bin: p.bin,
                    bin_code: catalog.bin(p.bin)?.code.clone(),
                    qty: 0,
                    reserved: 0,
                    free: 0,
                }),
            };
            entry.qty += p.qty;
            entry.reserved += p.reserved_qty;
            entry.free += p.free_qty();
        }
        let mut out: Vec<BinFreeQty> = bins.into_values().collect();
        out.sort_by(|a, b| a.bin_code.cmp(&b.bin_code));
        Ok(out)
    }

    /// Lots a picker would be sent to, in the order they would be used.
    pub fn fefo_candidates(
        &self,
        product: &ProductCode,
        institution: &InstitutionKey,
    ) -> DomainResult<Vec<FefoCandidate>> {
        let records = self.snapshots(self.store.lots.ids_for_product(product)?)?;
        let candidates: Vec<FefoCandidate> = {
            let catalog = self.catalog()?;
            records.iter().map(|r| fefo_candidate(r, &catalog)).collect()
        };
        let policy = FefoPolicy {
            today: self.today(),
            near_expiry_days: self.config.orders.near_expiry_days,
        };
        Ok(ordered_candidates(&candidates, product, institution, &policy)
            .into_iter()
            .cloned()
            .collect())
    }

    /// Movements across lots matching `filter`, ordered by (timestamp, sequence).
    pub fn ledger_query(&self, filter: &MovementFilter) -> DomainResult<Vec<LedgerEntry>> {
        let ids = match filter.lot {
            Some(lot) => vec![lot],
            None => self.store.lots.ids()?,
        };
        let mut entries: Vec<LedgerEntry> = self
            .snapshots(ids)?
            .into_iter()
            .flat_map(|r| {
                let (number, product) = (r.lot.number, r.lot.product);
                r.ledger
                    .movements()
                    .iter()
                    .filter(|m| filter.matches(m))
                    .map(|m| LedgerEntry {
                        movement: m.clone(),
                        lot_number: number.clone(),
                        product: product.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        entries.sort_by_key(|e| (e.movement.occurred_at, e.movement.sequence));
        Ok(entries)
    }

    /// Effective movements of one lot in replay order.
    pub fn ledger_replay(&self, lot: LotId) -> DomainResult<Vec<Movement>> {
        let record = self.store.lots.snapshot(lot)?;
        Ok(record.ledger.replay().into_iter().cloned().collect())
    }

    /// Run the invariant check on every lot; returns the lots that fail.
    pub fn audit_lots(&self) -> DomainResult<Vec<(LotId, DomainError)>> {
        Ok(self
            .store
            .lots
            .ids()?
            .into_iter()
            .filter_map(|id| self.check_lot(id).err().map(|e| (id, e)))
            .collect())
    }

    fn snapshots(&self, ids: Vec<LotId>) -> DomainResult<Vec<LotRecord>> {
        ids.into_iter().map(|id| self.store.lots.snapshot(id)).collect()
    }
}
