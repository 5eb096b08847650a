use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use tracing::{info, instrument, warn};

use medstock_arrivals::{
    Approve, Arrival, ArrivalCommand, ArrivalEvent, ArrivalHeader, AttachDocument, CreateArrival,
    DocumentKind, Finalise, InvoicingData, ItemInput, ItemPrice, PlannedPlacement, Reject,
    SetPlacement, SubmitInvoicing, SubmitReception, UpdateReception,
};
use medstock_auth::Actor;
use medstock_catalog::{Catalog, ProductCode};
use medstock_core::{
    AggregateRoot, ArrivalId, ArrivalItemId, BinId, DocumentId, DomainError, DomainResult, LotId,
    execute,
};
use medstock_events::{EventBus, EventEnvelope};
use medstock_lots::{LotRecord, NewLot};

use super::{InventoryEngine, apply_all, decide};
use crate::store::lock_row;

const AGGREGATE: &str = "arrival";

/// One delivered line as captured at reception.
///
/// Description, unit and tax rate are resolved from the catalog when the line
/// is saved and frozen on the arrival item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrivalLine {
    /// Set when updating an existing item; new lines get a fresh id.
    pub item: Option<ArrivalItemId>,
    pub product: ProductCode,
    pub lot_number: String,
    pub expiry: NaiveDate,
    pub qty_shipped: i64,
    pub qty_received: i64,
    pub unit_price: Decimal,
    pub manufacturer: Option<String>,
    pub brand: Option<String>,
}

impl<B> InventoryEngine<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    #[instrument(skip_all, fields(actor = %actor.name))]
    pub fn create_arrival(&self, actor: &Actor, header: ArrivalHeader, lines: Vec<ArrivalLine>) -> DomainResult<Arrival> {
        let items = {
            let catalog = self.catalog()?;
            check_header(&catalog, &header)?;
            self.resolve_lines(&catalog, lines)?
        };
        let id = ArrivalId::new();
        let folio = self.store.folios.next(&self.config.arrival.folio_prefix, self.today())?;

        let mut arrival = Arrival::empty(id);
        let events = execute(
            &mut arrival,
            &ArrivalCommand::Create(CreateArrival {
                arrival_id: id,
                folio: folio.clone(),
                header,
                items,
                actor: actor.clone(),
                at: self.now(),
            }),
        )?;
        self.store.insert_arrival(arrival.clone())?;
        info!(%folio, arrival = %id, "arrival created");
        self.publish(id, AGGREGATE, 0, &events);
        Ok(arrival)
    }

    #[instrument(skip_all, fields(arrival = %id, actor = %actor.name))]
    pub fn update_reception(
        &self,
        actor: &Actor,
        id: ArrivalId,
        header: ArrivalHeader,
        lines: Vec<ArrivalLine>,
    ) -> DomainResult<Arrival> {
        let items = {
            let catalog = self.catalog()?;
            check_header(&catalog, &header)?;
            self.resolve_lines(&catalog, lines)?
        };
        self.transition(id, |at| {
            ArrivalCommand::UpdateReception(UpdateReception {
                header,
                items,
                actor: actor.clone(),
                at,
            })
        })
    }

    #[instrument(skip_all, fields(arrival = %id, actor = %actor.name))]
    pub fn submit_reception(&self, actor: &Actor, id: ArrivalId, notes: Option<String>) -> DomainResult<Arrival> {
        let today = self.today();
        let min_expiry_days = self.config.arrival.min_expiry_days;
        self.transition(id, |at| {
            ArrivalCommand::SubmitReception(SubmitReception {
                today,
                min_expiry_days,
                notes,
                actor: actor.clone(),
                at,
            })
        })
    }

    #[instrument(skip_all, fields(arrival = %id, actor = %actor.name))]
    pub fn approve_quality(&self, actor: &Actor, id: ArrivalId, notes: Option<String>) -> DomainResult<Arrival> {
        self.transition(id, |at| ArrivalCommand::ApproveQuality(approve(actor, notes, at)))
    }

    #[instrument(skip_all, fields(arrival = %id, actor = %actor.name))]
    pub fn reject_quality(&self, actor: &Actor, id: ArrivalId, reason: &str) -> DomainResult<Arrival> {
        self.transition(id, |at| ArrivalCommand::RejectQuality(reject(actor, reason, at)))
    }

    #[instrument(skip_all, fields(arrival = %id, actor = %actor.name))]
    pub fn submit_invoicing(
        &self,
        actor: &Actor,
        id: ArrivalId,
        invoicing: InvoicingData,
        prices: Vec<ItemPrice>,
    ) -> DomainResult<Arrival> {
        self.transition(id, |at| {
            ArrivalCommand::SubmitInvoicing(SubmitInvoicing {
                invoicing,
                prices,
                actor: actor.clone(),
                at,
            })
        })
    }

    #[instrument(skip_all, fields(arrival = %id, actor = %actor.name))]
    pub fn approve_supervision(&self, actor: &Actor, id: ArrivalId, notes: Option<String>) -> DomainResult<Arrival> {
        self.transition(id, |at| ArrivalCommand::ApproveSupervision(approve(actor, notes, at)))
    }

    #[instrument(skip_all, fields(arrival = %id, actor = %actor.name))]
    pub fn reject_supervision(&self, actor: &Actor, id: ArrivalId, reason: &str) -> DomainResult<Arrival> {
        self.transition(id, |at| ArrivalCommand::RejectSupervision(reject(actor, reason, at)))
    }

    /// Cancel from any open stage; the arrival is archived as rejected.
    #[instrument(skip_all, fields(arrival = %id, actor = %actor.name))]
    pub fn cancel_arrival(&self, actor: &Actor, id: ArrivalId, reason: &str) -> DomainResult<Arrival> {
        self.transition(id, |at| ArrivalCommand::Cancel(reject(actor, reason, at)))
    }

    /// Replace one item's placement plan. Bins must be active.
    #[instrument(skip_all, fields(arrival = %id, item = %item, actor = %actor.name))]
    pub fn set_placement(
        &self,
        actor: &Actor,
        id: ArrivalId,
        item: ArrivalItemId,
        plan: &[(BinId, i64)],
    ) -> DomainResult<Arrival> {
        let plan = {
            let catalog = self.catalog()?;
            plan.iter()
                .map(|(bin, qty)| {
                    let bin = catalog.active_bin(*bin)?;
                    Ok(PlannedPlacement {
                        bin: bin.id,
                        warehouse: bin.warehouse,
                        qty: *qty,
                    })
                })
                .collect::<DomainResult<Vec<_>>>()?
        };
        self.transition(id, |at| {
            ArrivalCommand::SetPlacement(SetPlacement {
                item,
                plan,
                actor: actor.clone(),
                at,
            })
        })
    }

    /// Approve the arrival: create one lot per received item, place it as
    /// planned and write its `inbound-supplier` movement. All lots or none.
    #[instrument(skip_all, fields(arrival = %id, actor = %actor.name))]
    pub fn finalise_arrival(&self, actor: &Actor, id: ArrivalId) -> DomainResult<Arrival> {
        let row = self.store.arrivals.row(id)?;
        let mut arrival = lock_row(&row, AGGREGATE)?;

        let lots: Vec<(ArrivalItemId, LotId)> = arrival
            .items()
            .iter()
            .filter(|i| i.produces_lot())
            .map(|i| (i.id, LotId::new()))
            .collect();
        let at = self.now();
        let (version, events) = decide(
            &*arrival,
            &ArrivalCommand::Finalise(Finalise {
                lots,
                actor: actor.clone(),
                at,
            }),
        )?;
        let produced = events
            .iter()
            .find_map(|e| match e {
                ArrivalEvent::Approved(approved) => Some(approved.produced.clone()),
                _ => None,
            })
            .ok_or_else(|| DomainError::state("finalise produced no approval"))?;
        let header = arrival
            .header()
            .cloned()
            .ok_or_else(|| DomainError::state("arrival has no header"))?;

        let received_on = self.today();
        let mut records = Vec::with_capacity(produced.len());
        for p in &produced {
            let item = arrival.item(p.item)?;
            let mut record = LotRecord::create(
                NewLot {
                    id: p.lot,
                    product: item.product.clone(),
                    number: item.lot_number.clone(),
                    institution: header.institution.clone(),
                    warehouse: header.warehouse,
                    expiry: item.expiry,
                    initial_qty: item.qty_received,
                    unit_price: item.unit_price,
                    received_on,
                    supplier: Some(header.supplier.clone()),
                    source_item: Some(item.id),
                },
                arrival.folio(),
                self.store.stamp(at, actor.id),
            )?;
            for planned in &item.placement_plan {
                record.place(planned.bin, planned.qty)?;
            }
            records.push(record);
        }
        let created = records.len();
        self.store.lots.insert_new(records)?;

        apply_all(&mut *arrival, &events);
        let snapshot = arrival.clone();
        drop(arrival);

        info!(folio = snapshot.folio(), lots = created, "arrival approved; lots created");
        self.publish(id, AGGREGATE, version, &events);
        Ok(snapshot)
    }

    /// Store the document bytes, then record the attachment. Allowed in every
    /// state; a blob store failure fails only this call.
    #[instrument(skip_all, fields(arrival = %id, actor = %actor.name))]
    pub fn attach_document(
        &self,
        actor: &Actor,
        id: ArrivalId,
        kind: DocumentKind,
        content_type: &str,
        bytes: &[u8],
        description: &str,
    ) -> DomainResult<Arrival> {
        // Fail fast on an unknown arrival before writing the blob.
        self.store.arrivals.row(id)?;
        let blob = self.blobs.put(content_type, bytes).map_err(|e| {
            warn!(error = %e, "document upload failed");
            DomainError::from(e)
        })?;
        self.transition(id, |at| {
            ArrivalCommand::AttachDocument(AttachDocument {
                document: DocumentId::new(),
                kind,
                blob,
                description: description.to_string(),
                actor: actor.clone(),
                at,
            })
        })
    }

    pub fn arrival(&self, id: ArrivalId) -> DomainResult<Arrival> {
        self.store.arrivals.snapshot(id)
    }

    pub fn arrival_by_folio(&self, folio: &str) -> DomainResult<Arrival> {
        let id = self.store.arrival_id_by_folio(folio)?;
        self.store.arrivals.snapshot(id)
    }

    /// Run a command that touches nothing but the arrival row.
    fn transition(
        &self,
        id: ArrivalId,
        command: impl FnOnce(DateTime<Utc>) -> ArrivalCommand,
    ) -> DomainResult<Arrival> {
        let row = self.store.arrivals.row(id)?;
        let (version, events, snapshot) = {
            let mut arrival = lock_row(&row, AGGREGATE)?;
            let version = arrival.version();
            let events = execute(&mut *arrival, &command(self.now()))?;
            (version, events, arrival.clone())
        };
        info!(folio = snapshot.folio(), state = ?snapshot.state(), "arrival transitioned");
        self.publish(id, AGGREGATE, version, &events);
        Ok(snapshot)
    }

    fn resolve_lines(&self, catalog: &Catalog, lines: Vec<ArrivalLine>) -> DomainResult<Vec<ItemInput>> {
        lines
            .into_iter()
            .map(|line| {
                let product = catalog.product(&line.product)?;
                Ok(ItemInput {
                    id: line.item.unwrap_or_else(ArrivalItemId::new),
                    description: product.description.clone(),
                    unit: product.unit.clone(),
                    tax_pct: self.tax.rate_for(&line.product),
                    product: line.product,
                    lot_number: line.lot_number,
                    expiry: line.expiry,
                    qty_shipped: line.qty_shipped,
                    qty_received: line.qty_received,
                    unit_price: line.unit_price,
                    manufacturer: line.manufacturer,
                    brand: line.brand,
                })
            })
            .collect()
    }
}

fn check_header(catalog: &Catalog, header: &ArrivalHeader) -> DomainResult<()> {
    catalog.supplier(&header.supplier)?;
    catalog.institution(&header.institution)?;
    let warehouse = catalog.warehouse(header.warehouse)?;
    if warehouse.institution != header.institution {
        return Err(DomainError::validation(format!(
            "warehouse {} does not belong to {}",
            warehouse.name, header.institution
        )));
    }
    Ok(())
}

fn approve(actor: &Actor, notes: Option<String>, at: DateTime<Utc>) -> Approve {
    Approve {
        notes,
        actor: actor.clone(),
        at,
    }
}

fn reject(actor: &Actor, reason: &str, at: DateTime<Utc>) -> Reject {
    Reject {
        reason: reason.to_string(),
        actor: actor.clone(),
        at,
    }
}
