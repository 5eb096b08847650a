use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{info, instrument};

use medstock_auth::Actor;
use medstock_catalog::SupplierTaxId;
use medstock_core::{
    AggregateRoot, DomainError, DomainResult, LotId, PlacementId, ReturnId, ReturnItemId, WarehouseId,
    execute,
};
use medstock_events::{EventBus, EventEnvelope};
use medstock_ledger::MovementKind;
use medstock_returns::{
    AuthoriseReturn, CloseReturn, CompleteReturn, CreateReturn, Dispatch, ReturnCommand, ReturnItem,
    SupplierReturn,
};

use super::{InventoryEngine, apply_all, decide};
use crate::store::{LotTxn, lock_row};

const AGGREGATE: &str = "supplier_return";

/// A placement quantity to send back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnLine {
    pub lot: LotId,
    pub placement: PlacementId,
    pub qty: i64,
    pub reason: Option<String>,
}

impl<B> InventoryEngine<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Open a return against lots of one supplier held in one warehouse.
    /// Unit prices are frozen from the lots.
    #[instrument(skip_all, fields(supplier = %supplier, actor = %actor.name))]
    pub fn create_return(
        &self,
        actor: &Actor,
        supplier: SupplierTaxId,
        warehouse: WarehouseId,
        reason: &str,
        lines: Vec<ReturnLine>,
    ) -> DomainResult<SupplierReturn> {
        let institution = {
            let catalog = self.catalog()?;
            catalog.supplier(&supplier)?;
            catalog.warehouse(warehouse)?.institution.clone()
        };

        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let record = self.store.lots.snapshot(line.lot)?;
            let lot = &record.lot;
            if lot.supplier.as_ref() != Some(&supplier) {
                return Err(DomainError::validation(format!(
                    "lot {} was not supplied by {supplier}",
                    lot.number
                )));
            }
            if lot.warehouse != warehouse {
                return Err(DomainError::validation(format!(
                    "lot {} is held in another warehouse",
                    lot.number
                )));
            }
            let placement = record.placement(line.placement)?;
            if line.qty > placement.qty {
                return Err(DomainError::validation(format!(
                    "cannot return {} of lot {}; placement holds {}",
                    line.qty, lot.number, placement.qty
                )));
            }
            items.push(ReturnItem {
                id: ReturnItemId::new(),
                lot_id: lot.id,
                lot_number: lot.number.clone(),
                product: lot.product.clone(),
                placement: placement.id,
                bin: placement.bin,
                qty: line.qty,
                unit_price: lot.unit_price,
                reason: line.reason,
                movement: None,
            });
        }

        let id = ReturnId::new();
        let folio = self.store.folios.next(&self.config.returns.folio_prefix, self.today())?;
        let mut ret = SupplierReturn::empty(id);
        let events = execute(
            &mut ret,
            &ReturnCommand::Create(CreateReturn {
                return_id: id,
                folio: folio.clone(),
                supplier,
                institution,
                warehouse,
                reason: reason.to_string(),
                items,
                actor: actor.clone(),
                at: self.now(),
            }),
        )?;
        self.store.returns.insert(id, ret.clone())?;
        info!(%folio, items = ret.items().len(), "return created");
        self.publish(id, AGGREGATE, 0, &events);
        Ok(ret)
    }

    #[instrument(skip_all, fields(ret = %id, actor = %actor.name))]
    pub fn authorise_return(&self, actor: &Actor, id: ReturnId, number: &str) -> DomainResult<SupplierReturn> {
        self.return_transition(id, |at| {
            ReturnCommand::Authorise(AuthoriseReturn {
                authorisation_number: number.to_string(),
                actor: actor.clone(),
                at,
            })
        })
    }

    #[instrument(skip_all, fields(ret = %id, actor = %actor.name))]
    pub fn reject_return(&self, actor: &Actor, id: ReturnId, reason: &str) -> DomainResult<SupplierReturn> {
        self.return_transition(id, |at| ReturnCommand::Reject(close(actor, reason, at)))
    }

    #[instrument(skip_all, fields(ret = %id, actor = %actor.name))]
    pub fn cancel_return(&self, actor: &Actor, id: ReturnId, reason: &str) -> DomainResult<SupplierReturn> {
        self.return_transition(id, |at| ReturnCommand::Cancel(close(actor, reason, at)))
    }

    /// Ship the goods: write one `outbound-return` per item and close the
    /// return. Any item that cannot be withdrawn fails the whole return.
    #[instrument(skip_all, fields(ret = %id, actor = %actor.name))]
    pub fn complete_return(&self, actor: &Actor, id: ReturnId, dispatch: Dispatch) -> DomainResult<SupplierReturn> {
        let row = self.store.returns.row(id)?;
        let mut ret = lock_row(&row, AGGREGATE)?;
        ret.check_complete(&dispatch)?;

        let lot_rows = self.store.lots.rows(ret.lots())?;
        let mut txn = LotTxn::lock(&lot_rows)?;
        let at = self.now();
        let reference = ret.folio().to_string();
        let mut movements = Vec::with_capacity(ret.items().len());
        for item in ret.items() {
            let reason = item.reason.clone().unwrap_or_else(|| ret.reason().to_string());
            let movement = txn.draft(item.lot_id)?.withdraw(
                item.placement,
                item.qty,
                MovementKind::OutboundReturn,
                reason,
                Some(reference.clone()),
                self.store.stamp(at, actor.id),
            )?;
            movements.push((item.id, movement));
        }

        let (version, events) = decide(
            &*ret,
            &ReturnCommand::Complete(CompleteReturn {
                dispatch,
                movements,
                actor: actor.clone(),
                at,
            }),
        )?;
        txn.commit()?;
        apply_all(&mut *ret, &events);
        let snapshot = ret.clone();
        drop(ret);

        info!(folio = snapshot.folio(), amount = %snapshot.total_amount(), "return completed");
        self.publish(id, AGGREGATE, version, &events);
        Ok(snapshot)
    }

    pub fn supplier_return(&self, id: ReturnId) -> DomainResult<SupplierReturn> {
        self.store.returns.snapshot(id)
    }

    fn return_transition(
        &self,
        id: ReturnId,
        command: impl FnOnce(DateTime<Utc>) -> ReturnCommand,
    ) -> DomainResult<SupplierReturn> {
        let row = self.store.returns.row(id)?;
        let (version, events, snapshot) = {
            let mut ret = lock_row(&row, AGGREGATE)?;
            let version = ret.version();
            let events = execute(&mut *ret, &command(self.now()))?;
            (version, events, ret.clone())
        };
        info!(folio = snapshot.folio(), state = ?snapshot.state(), "return transitioned");
        self.publish(id, AGGREGATE, version, &events);
        Ok(snapshot)
    }
}

fn close(actor: &Actor, reason: &str, at: DateTime<Utc>) -> CloseReturn {
    CloseReturn {
        reason: reason.to_string(),
        actor: actor.clone(),
        at,
    }
}
