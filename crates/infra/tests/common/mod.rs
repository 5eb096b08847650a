//! Shared fixture: a seeded catalog, one warehouse with bins, one actor per role.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;

use medstock_arrivals::{Arrival, ArrivalHeader, InvoicingData};
use medstock_auth::{Actor, Role};
use medstock_catalog::{Catalog, InstitutionKey, Product, ProductCode, SupplierTaxId, SupplyKind};
use medstock_core::{AggregateRoot, BinId, Clock, FixedClock, LotId, PlacementId, RequestId, WarehouseId};
use medstock_events::{EventBus, EventEnvelope, InMemoryEventBus};
use medstock_infra::{ArrivalLine, BlobStore, EngineConfig, InMemoryBlobStore, InventoryEngine};
use medstock_lots::LotRecord;
use medstock_orders::Proposal;

pub type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

pub const PARACETAMOL: &str = "010.000.0104.00";
pub const GAUZE: &str = "060.000.0001.00";

pub struct Actors {
    pub reception: Actor,
    pub quality: Actor,
    pub invoicing: Actor,
    pub supervisor: Actor,
    pub storekeeper: Actor,
    pub requester: Actor,
    pub validator: Actor,
    pub dispatcher: Actor,
    pub picker: Actor,
    pub control: Actor,
    pub returns: Actor,
    pub returns_authoriser: Actor,
}

impl Actors {
    fn new() -> Self {
        Self {
            reception: Actor::new("rosa", [Role::RECEPTION]),
            quality: Actor::new("quique", [Role::QUALITY]),
            invoicing: Actor::new("ines", [Role::INVOICING]),
            supervisor: Actor::new("sara", [Role::SUPERVISION]),
            storekeeper: Actor::new("alma", [Role::STOREKEEPER]),
            requester: Actor::new("ramon", [Role::REQUESTER]),
            validator: Actor::new("vero", [Role::VALIDATOR]),
            dispatcher: Actor::new("dario", [Role::DISPATCHER]),
            picker: Actor::new("pepe", [Role::PICKER]),
            control: Actor::new("carla", [Role::INVENTORY_CONTROL]),
            returns: Actor::new("rene", [Role::RETURNS]),
            returns_authoriser: Actor::new("aurora", [Role::RETURNS_AUTHORISER]),
        }
    }
}

pub struct Fixture<B = Bus> {
    pub engine: InventoryEngine<B>,
    pub clock: Arc<FixedClock>,
    pub blobs: Arc<dyn BlobStore>,
    pub actors: Actors,
    pub institution: InstitutionKey,
    pub warehouse: WarehouseId,
    pub other_warehouse: WarehouseId,
    /// `A-01` .. `A-04` in `warehouse`.
    pub bins: Vec<BinId>,
    /// `B-01` in `other_warehouse`.
    pub foreign_bin: BinId,
    pub supplier: SupplierTaxId,
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn code(raw: &str) -> ProductCode {
    ProductCode::parse(raw).unwrap()
}

/// Engine with the default in-memory bus, pinned at 2025-10-01.
pub fn fixture() -> Fixture {
    fixture_with_bus(Arc::new(InMemoryEventBus::new()))
}

pub fn fixture_with_bus<B>(bus: B) -> Fixture<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fixture_with(bus, Arc::new(InMemoryBlobStore::new()))
}

pub fn fixture_with<B>(bus: B, blobs: Arc<dyn BlobStore>) -> Fixture<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let institution = InstitutionKey::parse("HGZ-01").unwrap();
    let supplier = SupplierTaxId::parse("DIS010203AB1").unwrap();

    let mut catalog = Catalog::new();
    catalog.register_institution(institution.clone(), "Hospital General de Zona 1").unwrap();
    catalog.register_supplier(supplier.clone(), "Distribuidora del Centro").unwrap();
    catalog
        .register_product(Product::new(code(PARACETAMOL), "Paracetamol 500 mg tab", "caja", SupplyKind::Medicine))
        .unwrap();
    catalog
        .register_product(Product::new(code(GAUZE), "Gasa esteril 10x10", "pieza", SupplyKind::HealingMaterial))
        .unwrap();
    let warehouse = catalog.add_warehouse("Farmacia central", &institution).unwrap();
    let other_warehouse = catalog.add_warehouse("Almacen norte", &institution).unwrap();
    let bins = ["A-01", "A-02", "A-03", "A-04"]
        .iter()
        .map(|c| catalog.add_bin(warehouse, *c).unwrap())
        .collect();
    let foreign_bin = catalog.add_bin(other_warehouse, "B-01").unwrap();

    let config = EngineConfig::default();
    config.init_logging();
    let clock = Arc::new(FixedClock::at_date(date(2025, 10, 1)));
    let engine = InventoryEngine::new(config, catalog, bus, clock.clone(), blobs.clone());

    Fixture {
        engine,
        clock,
        blobs,
        actors: Actors::new(),
        institution,
        warehouse,
        other_warehouse,
        bins,
        foreign_bin,
        supplier,
    }
}

impl<B> Fixture<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn header(&self) -> ArrivalHeader {
        ArrivalHeader {
            appointment_ref: None,
            supplier: self.supplier.clone(),
            institution: self.institution.clone(),
            warehouse: self.warehouse,
            remission_number: "REM-881".to_string(),
            cold_chain: false,
        }
    }

    pub fn line(&self, product: &str, number: &str, expiry: NaiveDate, qty: i64) -> ArrivalLine {
        ArrivalLine {
            item: None,
            product: code(product),
            lot_number: number.to_string(),
            expiry,
            qty_shipped: qty,
            qty_received: qty,
            unit_price: Decimal::new(1250, 2),
            manufacturer: None,
            brand: None,
        }
    }

    /// Drive one single-item arrival up to the placement stage.
    pub fn arrival_at_placement(&self, line: ArrivalLine) -> Arrival {
        let a = &self.actors;
        let arrival = self.engine.create_arrival(&a.reception, self.header(), vec![line]).unwrap();
        let id = *arrival.id();
        self.engine.submit_reception(&a.reception, id, None).unwrap();
        self.engine.approve_quality(&a.quality, id, None).unwrap();
        self.engine
            .submit_invoicing(
                &a.invoicing,
                id,
                InvoicingData {
                    invoice_number: "FAC-2291".to_string(),
                    ..InvoicingData::default()
                },
                Vec::new(),
            )
            .unwrap();
        self.engine.approve_supervision(&a.supervisor, id, None).unwrap()
    }

    /// Receive a lot of `qty` units spread over `plan`, returning its id.
    pub fn receive(&self, product: &str, number: &str, expiry: NaiveDate, plan: &[(BinId, i64)]) -> LotId {
        let qty = plan.iter().map(|(_, q)| q).sum();
        let arrival = self.arrival_at_placement(self.line(product, number, expiry, qty));
        let id = *arrival.id();
        let item = arrival.items()[0].id;
        self.engine.set_placement(&self.actors.storekeeper, id, item, plan).unwrap();
        self.engine.finalise_arrival(&self.actors.storekeeper, id).unwrap();
        self.lot_by_number(product, number).lot.id
    }

    pub fn lot_by_number(&self, product: &str, number: &str) -> LotRecord {
        let summary = self
            .engine
            .lots_by_product(&code(product))
            .unwrap()
            .into_iter()
            .find(|s| s.lot.number == number)
            .unwrap();
        self.engine.lot(summary.lot.id).unwrap()
    }

    pub fn placement_at(&self, lot: LotId, bin: BinId) -> PlacementId {
        self.engine.lot(lot).unwrap().placement_at(bin).unwrap().id
    }

    /// Create, fill and submit a request with one line.
    pub fn pending_request(&self, product: &str, qty: i64) -> RequestId {
        let a = &self.actors;
        let request = self
            .engine
            .create_request(&a.requester, self.institution.clone(), self.warehouse, None)
            .unwrap();
        let id = *request.id();
        self.engine.add_line(&a.requester, id, code(product), qty).unwrap();
        self.engine.submit_request(&a.requester, id).unwrap();
        id
    }

    /// Validate with the requested quantities and review the proposal.
    pub fn proposal_in_preparation(&self, product: &str, qty: i64) -> (RequestId, Proposal) {
        let id = self.pending_request(product, qty);
        self.engine.validate_request(&self.actors.validator, id, Vec::new()).unwrap();
        let proposal = self.engine.review_proposal(&self.actors.dispatcher, id, true).unwrap();
        (id, proposal)
    }

    pub fn now(&self) -> chrono::DateTime<Utc> {
        self.clock.now()
    }
}
