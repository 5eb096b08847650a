//! In-memory transactional store.
//!
//! Lock order for every operation: one aggregate row (arrival, request,
//! return or count) first, then lot rows in ascending [`LotId`] order.
//! Table-level locks are only held to look rows up, never across a row lock.

pub mod lots;
pub mod table;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};

use medstock_arrivals::Arrival;
use medstock_core::{
    ActorId, AggregateRoot, ArrivalId, CountId, DomainError, DomainResult, LotId, PlacementId, ProposalId,
    RequestId, ReturnId,
};
use medstock_counts::CountRecord;
use medstock_ledger::MovementStamp;
use medstock_orders::{Proposal, PurchaseRequest};
use medstock_returns::SupplierReturn;

use crate::folio::FolioCounter;

pub use lots::{LotRow, LotTable, LotTxn};
pub use table::{Table, lock_row};

/// A purchase request together with every proposal generated for it.
#[derive(Debug, Clone)]
pub struct RequestRow {
    pub request: PurchaseRequest,
    /// Oldest first; superseded and cancelled proposals are kept.
    pub proposals: Vec<Proposal>,
}

impl RequestRow {
    pub fn new(request: PurchaseRequest) -> Self {
        Self {
            request,
            proposals: Vec::new(),
        }
    }

    /// The proposal the request currently points at.
    pub fn current(&self) -> DomainResult<&Proposal> {
        let id = self.current_id()?;
        self.proposal(id)
    }

    pub fn current_mut(&mut self) -> DomainResult<&mut Proposal> {
        let id = self.current_id()?;
        self.proposals
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| DomainError::not_found(format!("proposal {id}")))
    }

    pub fn proposal(&self, id: ProposalId) -> DomainResult<&Proposal> {
        self.proposals
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| DomainError::not_found(format!("proposal {id}")))
    }

    /// Insert `proposal`, replacing the stored copy with the same id.
    pub fn put_proposal(&mut self, proposal: Proposal) {
        match self.proposals.iter_mut().find(|p| p.id == proposal.id) {
            Some(existing) => *existing = proposal,
            None => self.proposals.push(proposal),
        }
    }

    /// Lots holding reservations for any open proposal of this request.
    pub fn reserved_lots(&self) -> Vec<LotId> {
        let mut lots: Vec<LotId> = self
            .proposals
            .iter()
            .filter(|p| p.state.is_open())
            .flat_map(|p| p.outstanding_lots())
            .collect();
        lots.sort();
        lots.dedup();
        lots
    }

    fn current_id(&self) -> DomainResult<ProposalId> {
        self.request.proposal().ok_or_else(|| {
            DomainError::state(format!("request {} has no proposal", self.request.folio()))
        })
    }
}

pub struct InventoryStore {
    pub lots: LotTable,
    pub arrivals: Table<ArrivalId, Arrival>,
    pub requests: Table<RequestId, RequestRow>,
    pub returns: Table<ReturnId, SupplierReturn>,
    pub counts: Table<CountId, CountRecord>,
    pub folios: FolioCounter,
    arrival_folios: RwLock<HashMap<String, ArrivalId>>,
    /// At most one uncompleted count per placement.
    open_counts: Mutex<HashMap<PlacementId, CountId>>,
    sequence: AtomicU64,
}

impl Default for InventoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InventoryStore {
    pub fn new() -> Self {
        Self {
            lots: LotTable::new(),
            arrivals: Table::new("arrival"),
            requests: Table::new("request"),
            returns: Table::new("return"),
            counts: Table::new("count"),
            folios: FolioCounter::new(),
            arrival_folios: RwLock::new(HashMap::new()),
            open_counts: Mutex::new(HashMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// Fresh movement stamp. Take it while holding the lot lock so that
    /// sequences on one lot are strictly increasing.
    pub fn stamp(&self, at: DateTime<Utc>, actor: ActorId) -> MovementStamp {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        MovementStamp::new(sequence, at, actor)
    }

    pub fn insert_arrival(&self, arrival: Arrival) -> DomainResult<()> {
        let (id, folio) = (*arrival.id(), arrival.folio().to_string());
        let mut folios = self
            .arrival_folios
            .write()
            .map_err(|_| DomainError::conflict("arrival folio index lock poisoned"))?;
        if folios.contains_key(&folio) {
            return Err(DomainError::conflict(format!("folio {folio} already used")));
        }
        self.arrivals.insert(id, arrival)?;
        folios.insert(folio, id);
        Ok(())
    }

    pub fn arrival_id_by_folio(&self, folio: &str) -> DomainResult<ArrivalId> {
        self.arrival_folios
            .read()
            .map_err(|_| DomainError::conflict("arrival folio index lock poisoned"))?
            .get(folio)
            .copied()
            .ok_or_else(|| DomainError::not_found(format!("arrival {folio}")))
    }

    /// Register `count` as the open count of `placement`.
    pub fn claim_count(&self, placement: PlacementId, count: CountId) -> DomainResult<()> {
        let mut open = lock_row(&self.open_counts, "open counts")?;
        if let Some(existing) = open.get(&placement) {
            return Err(DomainError::conflict(format!(
                "placement {placement} already has open count {existing}"
            )));
        }
        open.insert(placement, count);
        Ok(())
    }

    pub fn release_count(&self, placement: PlacementId, count: CountId) -> DomainResult<()> {
        let mut open = lock_row(&self.open_counts, "open counts")?;
        if open.get(&placement) == Some(&count) {
            open.remove(&placement);
        }
        Ok(())
    }

    /// Requests whose open proposals hold reservations on `lot`.
    ///
    /// Rows are read one at a time; callers lock the returned rows and
    /// re-check under the lock.
    pub fn requests_reserving(&self, lot: LotId) -> DomainResult<Vec<RequestId>> {
        let mut ids = Vec::new();
        for id in self.requests.keys()? {
            if self.requests.snapshot(id)?.reserved_lots().contains(&lot) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medstock_core::ErrorKind;

    #[test]
    fn stamps_are_strictly_increasing() {
        let store = InventoryStore::new();
        let actor = ActorId::new();
        let a = store.stamp(Utc::now(), actor);
        let b = store.stamp(Utc::now(), actor);
        assert!(b.sequence > a.sequence);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn one_open_count_per_placement() {
        let store = InventoryStore::new();
        let placement = PlacementId::new();
        let first = CountId::new();
        store.claim_count(placement, first).unwrap();
        let err = store.claim_count(placement, CountId::new()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        store.release_count(placement, first).unwrap();
        store.claim_count(placement, CountId::new()).unwrap();
    }

    #[test]
    fn unknown_folio_is_not_found() {
        let store = InventoryStore::new();
        assert_eq!(
            store.arrival_id_by_folio("ENT-20251001-0001").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
