//! Lot rows and multi-lot transactions.
//!
//! Every operation that touches lot quantities locks the rows of all the lots
//! it needs in ascending [`LotId`] order, works on cloned drafts and writes
//! the drafts back only when every step succeeded and every touched record
//! still satisfies its invariants.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::debug;

use medstock_catalog::ProductCode;
use medstock_core::{DomainError, DomainResult, LotId};
use medstock_lots::{LotIdentity, LotRecord};

use crate::store::table::lock_row;

pub type LotRow = Arc<Mutex<LotRecord>>;

#[derive(Debug, Default)]
pub struct LotTable {
    rows: RwLock<HashMap<LotId, LotRow>>,
    by_product: RwLock<HashMap<ProductCode, BTreeSet<LotId>>>,
    /// Held across the identity check and the insert of new lots.
    identities: Mutex<HashSet<LotIdentity>>,
}

impl LotTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows for `ids`, sorted and deduplicated: the order locks must be taken in.
    pub fn rows(&self, ids: impl IntoIterator<Item = LotId>) -> DomainResult<Vec<(LotId, LotRow)>> {
        let wanted: BTreeSet<LotId> = ids.into_iter().collect();
        let rows = self
            .rows
            .read()
            .map_err(|_| DomainError::conflict("lot table lock poisoned"))?;
        wanted
            .into_iter()
            .map(|id| {
                rows.get(&id)
                    .cloned()
                    .map(|row| (id, row))
                    .ok_or_else(|| DomainError::not_found(format!("lot {id}")))
            })
            .collect()
    }

    pub fn ids_for_product(&self, product: &ProductCode) -> DomainResult<Vec<LotId>> {
        let index = self
            .by_product
            .read()
            .map_err(|_| DomainError::conflict("lot index lock poisoned"))?;
        Ok(index
            .get(product)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default())
    }

    pub fn ids(&self) -> DomainResult<Vec<LotId>> {
        let rows = self
            .rows
            .read()
            .map_err(|_| DomainError::conflict("lot table lock poisoned"))?;
        let mut ids: Vec<LotId> = rows.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    pub fn snapshot(&self, id: LotId) -> DomainResult<LotRecord> {
        let rows = self.rows([id])?;
        let (_, row) = rows
            .first()
            .ok_or_else(|| DomainError::not_found(format!("lot {id}")))?;
        let guard = lock_row(row, "lot")?;
        Ok(guard.clone())
    }

    pub fn exists(&self, identity: &LotIdentity) -> DomainResult<bool> {
        let identities = lock_row(&self.identities, "lot identity")?;
        Ok(identities.contains(identity))
    }

    /// Insert freshly created lots. Fails with `validation` if any identity
    /// (product, number, institution) is already taken; nothing is inserted then.
    pub fn insert_new(&self, records: Vec<LotRecord>) -> DomainResult<()> {
        let mut identities = lock_row(&self.identities, "lot identity")?;
        let mut rows = self
            .rows
            .write()
            .map_err(|_| DomainError::conflict("lot table lock poisoned"))?;
        let mut by_product = self
            .by_product
            .write()
            .map_err(|_| DomainError::conflict("lot index lock poisoned"))?;

        let mut batch = HashSet::new();
        for record in &records {
            let identity = record.lot.identity();
            if identities.contains(&identity) || !batch.insert(identity.clone()) {
                return Err(DomainError::validation(format!(
                    "lot {} of {} already exists for {}",
                    identity.number, identity.product, identity.institution
                )));
            }
            if rows.contains_key(&record.lot.id) {
                return Err(DomainError::conflict(format!("lot {} already exists", record.lot.id)));
            }
            record.check_invariants()?;
        }

        for record in records {
            let id = record.lot.id;
            by_product.entry(record.lot.product.clone()).or_default().insert(id);
            rows.insert(id, Arc::new(Mutex::new(record)));
        }
        identities.extend(batch);
        Ok(())
    }
}

/// Exclusive hold on a set of lot rows.
pub struct LotTxn<'a> {
    guards: BTreeMap<LotId, MutexGuard<'a, LotRecord>>,
    drafts: BTreeMap<LotId, LotRecord>,
}

impl<'a> LotTxn<'a> {
    /// Lock every row. `rows` must come from [`LotTable::rows`] (sorted).
    pub fn lock(rows: &'a [(LotId, LotRow)]) -> DomainResult<Self> {
        let mut guards = BTreeMap::new();
        for (id, row) in rows {
            guards.insert(*id, lock_row(row, "lot")?);
        }
        Ok(Self {
            guards,
            drafts: BTreeMap::new(),
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = LotId> + '_ {
        self.guards.keys().copied()
    }

    /// Current view: the draft if one exists, otherwise the committed record.
    pub fn get(&self, id: LotId) -> DomainResult<&LotRecord> {
        if let Some(draft) = self.drafts.get(&id) {
            return Ok(draft);
        }
        self.guards
            .get(&id)
            .map(|g| &**g)
            .ok_or_else(|| DomainError::state(format!("lot {id} is not locked by this operation")))
    }

    pub fn draft(&mut self, id: LotId) -> DomainResult<&mut LotRecord> {
        match self.drafts.entry(id) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(e) => {
                let committed = self.guards.get(&id).ok_or_else(|| {
                    DomainError::state(format!("lot {id} is not locked by this operation"))
                })?;
                Ok(e.insert((**committed).clone()))
            }
        }
    }

    /// Write all drafts back, or none if any draft breaks an invariant.
    pub fn commit(mut self) -> DomainResult<()> {
        for draft in self.drafts.values() {
            draft.check_invariants()?;
        }
        for (id, draft) in std::mem::take(&mut self.drafts) {
            if let Some(guard) = self.guards.get_mut(&id) {
                **guard = draft;
                debug!(lot = %id, "lot committed");
            }
        }
        Ok(())
    }
}
