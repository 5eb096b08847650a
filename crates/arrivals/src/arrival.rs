use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use medstock_auth::{Role, authorize};
use medstock_catalog::{InstitutionKey, SupplierTaxId};
use medstock_core::{
    ActorId, Aggregate, AggregateRoot, ArrivalId, ArrivalItemId, DomainError, DomainResult,
    Invariant, WarehouseId,
};

use crate::command::*;
use crate::event::*;
use crate::{ArrivalDocument, ArrivalItem, ItemInput, PlannedPlacement, ProducedLot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArrivalState {
    Reception,
    Quality,
    Invoicing,
    Supervision,
    Placement,
    Approved,
    Rejected,
}

impl ArrivalState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ArrivalState::Approved | ArrivalState::Rejected)
    }

    /// The stage an open arrival is waiting on.
    pub fn stage(self) -> Option<Stage> {
        match self {
            ArrivalState::Reception => Some(Stage::Reception),
            ArrivalState::Quality => Some(Stage::Quality),
            ArrivalState::Invoicing => Some(Stage::Invoicing),
            ArrivalState::Supervision => Some(Stage::Supervision),
            ArrivalState::Placement => Some(Stage::Placement),
            ArrivalState::Approved | ArrivalState::Rejected => None,
        }
    }
}

/// Pipeline stage; a rejection records the stage it happened at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Reception,
    Quality,
    Invoicing,
    Supervision,
    Placement,
}

/// Reception-owned header fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalHeader {
    pub appointment_ref: Option<String>,
    pub supplier: SupplierTaxId,
    pub institution: InstitutionKey,
    pub warehouse: WarehouseId,
    pub remission_number: String,
    pub cold_chain: bool,
}

/// Invoicing-owned fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoicingData {
    pub invoice_number: String,
    pub supply_order: Option<String>,
    pub contract: Option<String>,
    pub procedure: Option<String>,
    pub budget_program: Option<String>,
    pub purchase_type: Option<String>,
}

/// Who signed a stage, when, and with what notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    pub actor: ActorId,
    pub at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// Aggregate root: Arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arrival {
    id: ArrivalId,
    folio: String,
    header: Option<ArrivalHeader>,
    items: Vec<ArrivalItem>,
    state: ArrivalState,
    rejected_at: Option<Stage>,
    rejection_reason: Option<String>,
    archived: bool,
    reception: Option<Signature>,
    quality: Option<Signature>,
    invoicing: Option<InvoicingData>,
    invoicing_signature: Option<Signature>,
    supervision: Option<Signature>,
    placement: Option<Signature>,
    documents: Vec<ArrivalDocument>,
    created_by: Option<ActorId>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Arrival {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: ArrivalId) -> Self {
        Self {
            id,
            folio: String::new(),
            header: None,
            items: Vec::new(),
            state: ArrivalState::Reception,
            rejected_at: None,
            rejection_reason: None,
            archived: false,
            reception: None,
            quality: None,
            invoicing: None,
            invoicing_signature: None,
            supervision: None,
            placement: None,
            documents: Vec::new(),
            created_by: None,
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn folio(&self) -> &str {
        &self.folio
    }

    pub fn state(&self) -> ArrivalState {
        self.state
    }

    pub fn header(&self) -> Option<&ArrivalHeader> {
        self.header.as_ref()
    }

    pub fn items(&self) -> &[ArrivalItem] {
        &self.items
    }

    pub fn item(&self, id: ArrivalItemId) -> DomainResult<&ArrivalItem> {
        self.items
            .iter()
            .find(|i| i.id == id)
            .ok_or_else(|| DomainError::not_found(format!("arrival item {id}")))
    }

    pub fn rejected_at(&self) -> Option<Stage> {
        self.rejected_at
    }

    pub fn rejection_reason(&self) -> Option<&str> {
        self.rejection_reason.as_deref()
    }

    pub fn is_archived(&self) -> bool {
        self.archived
    }

    pub fn signature(&self, stage: Stage) -> Option<&Signature> {
        match stage {
            Stage::Reception => self.reception.as_ref(),
            Stage::Quality => self.quality.as_ref(),
            Stage::Invoicing => self.invoicing_signature.as_ref(),
            Stage::Supervision => self.supervision.as_ref(),
            Stage::Placement => self.placement.as_ref(),
        }
    }

    pub fn invoicing(&self) -> Option<&InvoicingData> {
        self.invoicing.as_ref()
    }

    pub fn documents(&self) -> &[ArrivalDocument] {
        &self.documents
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn pieces_shipped(&self) -> i64 {
        self.items.iter().map(|i| i.qty_shipped).sum()
    }

    pub fn pieces_received(&self) -> i64 {
        self.items.iter().map(|i| i.qty_received).sum()
    }

    pub fn totals(&self) -> ArrivalTotals {
        self.items.iter().fold(ArrivalTotals::default(), |acc, i| ArrivalTotals {
            subtotal: acc.subtotal + i.amounts.subtotal,
            tax: acc.tax + i.amounts.tax,
            total: acc.total + i.amounts.total,
        })
    }
}

impl AggregateRoot for Arrival {
    type Id = ArrivalId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for Arrival {
    type Command = ArrivalCommand;
    type Event = ArrivalEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ArrivalEvent::Created(e) => {
                self.id = e.arrival_id;
                self.folio = e.folio.clone();
                self.header = Some(e.header.clone());
                self.items = e.items.clone();
                self.state = ArrivalState::Reception;
                self.created_by = Some(e.actor);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            ArrivalEvent::ReceptionUpdated(e) => {
                self.header = Some(e.header.clone());
                self.items = e.items.clone();
            }
            ArrivalEvent::StageSigned(e) => {
                let signature = Some(Signature {
                    actor: e.actor,
                    at: e.occurred_at,
                    notes: e.notes.clone(),
                });
                match e.stage {
                    Stage::Reception => {
                        self.reception = signature;
                        self.state = ArrivalState::Quality;
                    }
                    Stage::Quality => {
                        self.quality = signature;
                        self.state = ArrivalState::Invoicing;
                    }
                    Stage::Supervision => {
                        self.supervision = signature;
                        self.state = ArrivalState::Placement;
                    }
                    Stage::Invoicing | Stage::Placement => {}
                }
            }
            ArrivalEvent::InvoicingSubmitted(e) => {
                self.invoicing = Some(e.invoicing.clone());
                for r in &e.repriced {
                    if let Some(item) = self.items.iter_mut().find(|i| i.id == r.item) {
                        item.unit_price = r.unit_price;
                        item.amounts = r.amounts;
                    }
                }
                self.invoicing_signature = Some(Signature {
                    actor: e.actor,
                    at: e.occurred_at,
                    notes: None,
                });
                self.state = ArrivalState::Supervision;
            }
            ArrivalEvent::PlacementPlanned(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.id == e.item) {
                    item.placement_plan = e.plan.clone();
                }
            }
            ArrivalEvent::Approved(e) => {
                for produced in &e.produced {
                    if let Some(item) = self.items.iter_mut().find(|i| i.id == produced.item) {
                        item.produced_lot = Some(produced.lot);
                    }
                }
                self.placement = Some(Signature {
                    actor: e.actor,
                    at: e.occurred_at,
                    notes: None,
                });
                self.state = ArrivalState::Approved;
            }
            ArrivalEvent::Rejected(e) => {
                self.state = ArrivalState::Rejected;
                self.rejected_at = Some(e.stage);
                self.rejection_reason = Some(e.reason.clone());
                self.archived = self.archived || e.cancelled;
            }
            ArrivalEvent::DocumentAttached(e) => {
                self.documents.push(e.document.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ArrivalCommand::Create(cmd) => self.handle_create(cmd),
            ArrivalCommand::UpdateReception(cmd) => self.handle_update_reception(cmd),
            ArrivalCommand::SubmitReception(cmd) => self.handle_submit_reception(cmd),
            ArrivalCommand::ApproveQuality(cmd) => self.handle_approve_quality(cmd),
            ArrivalCommand::RejectQuality(cmd) => {
                self.handle_reject(cmd, ArrivalState::Quality, Role::QUALITY)
            }
            ArrivalCommand::SubmitInvoicing(cmd) => self.handle_submit_invoicing(cmd),
            ArrivalCommand::ApproveSupervision(cmd) => self.handle_approve_supervision(cmd),
            ArrivalCommand::RejectSupervision(cmd) => {
                self.handle_reject(cmd, ArrivalState::Supervision, Role::SUPERVISION)
            }
            ArrivalCommand::SetPlacement(cmd) => self.handle_set_placement(cmd),
            ArrivalCommand::Finalise(cmd) => self.handle_finalise(cmd),
            ArrivalCommand::Cancel(cmd) => self.handle_cancel(cmd),
            ArrivalCommand::AttachDocument(cmd) => self.handle_attach(cmd),
        }
    }
}

impl Arrival {
    fn ensure_created(&self) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found(format!("arrival {}", self.id)));
        }
        Ok(())
    }

    fn ensure_state(&self, expected: ArrivalState) -> DomainResult<()> {
        self.ensure_created()?;
        if self.state != expected {
            return Err(DomainError::state(format!(
                "arrival {} is {:?}, expected {:?}",
                self.folio, self.state, expected
            )));
        }
        Ok(())
    }

    fn header_warehouse(&self) -> DomainResult<WarehouseId> {
        self.header
            .as_ref()
            .map(|h| h.warehouse)
            .ok_or_else(|| DomainError::state("arrival has no header"))
    }

    fn build_items(inputs: &[ItemInput]) -> DomainResult<Vec<ArrivalItem>> {
        let mut seen = BTreeSet::new();
        let mut items = Vec::with_capacity(inputs.len());
        for input in inputs {
            if input.qty_shipped < 0 || input.qty_received < 0 {
                return Err(DomainError::validation(format!(
                    "item {}: quantities cannot be negative",
                    input.product
                )));
            }
            if input.qty_received > input.qty_shipped {
                return Err(DomainError::validation(format!(
                    "item {}: received {} exceeds shipped {}",
                    input.product, input.qty_received, input.qty_shipped
                )));
            }
            if input.unit_price < Decimal::ZERO || input.tax_pct < Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "item {}: price and tax cannot be negative",
                    input.product
                )));
            }
            let number = input.lot_number.trim().to_string();
            if !number.is_empty() && !seen.insert((input.product.clone(), number.clone())) {
                return Err(DomainError::validation(format!(
                    "lot {number} of {} appears twice in the arrival",
                    input.product
                )));
            }
            items.push(ArrivalItem::from_input(input.clone())?);
        }
        Ok(items)
    }

    fn handle_create(&self, cmd: &CreateArrival) -> DomainResult<Vec<ArrivalEvent>> {
        authorize(&cmd.actor, &Role::RECEPTION)?;
        if self.created {
            return Err(DomainError::conflict("arrival already exists"));
        }
        if cmd.folio.trim().is_empty() {
            return Err(DomainError::validation("folio is required"));
        }
        validate_header(&cmd.header)?;
        let items = Self::build_items(&cmd.items)?;

        Ok(vec![ArrivalEvent::Created(ArrivalCreated {
            arrival_id: cmd.arrival_id,
            folio: cmd.folio.clone(),
            header: cmd.header.clone(),
            items,
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_update_reception(&self, cmd: &UpdateReception) -> DomainResult<Vec<ArrivalEvent>> {
        authorize(&cmd.actor, &Role::RECEPTION)?;
        self.ensure_state(ArrivalState::Reception)?;
        validate_header(&cmd.header)?;
        let items = Self::build_items(&cmd.items)?;

        Ok(vec![ArrivalEvent::ReceptionUpdated(ReceptionUpdated {
            arrival_id: self.id,
            header: cmd.header.clone(),
            items,
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_submit_reception(&self, cmd: &SubmitReception) -> DomainResult<Vec<ArrivalEvent>> {
        authorize(&cmd.actor, &Role::RECEPTION)?;
        self.ensure_state(ArrivalState::Reception)?;
        if self.items.is_empty() {
            return Err(DomainError::validation("arrival has no items"));
        }
        let earliest = cmd
            .today
            .checked_add_signed(Duration::days(i64::from(cmd.min_expiry_days)))
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "minimum expiry window of {} days is out of range",
                    cmd.min_expiry_days
                ))
            })?;
        for item in &self.items {
            if item.lot_number.is_empty() {
                return Err(DomainError::validation(format!(
                    "item {} has no lot number",
                    item.product
                )));
            }
            if item.expiry <= earliest {
                return Err(DomainError::validation(format!(
                    "lot {} of {} expires {}, must be after {}",
                    item.lot_number, item.product, item.expiry, earliest
                )));
            }
            if item.qty_received < 0 || item.qty_received > item.qty_shipped {
                return Err(DomainError::validation(format!(
                    "item {}: received {} outside 0..={}",
                    item.product, item.qty_received, item.qty_shipped
                )));
            }
        }

        Ok(vec![ArrivalEvent::StageSigned(StageSigned {
            arrival_id: self.id,
            stage: Stage::Reception,
            notes: cmd.notes.clone(),
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_approve_quality(&self, cmd: &Approve) -> DomainResult<Vec<ArrivalEvent>> {
        authorize(&cmd.actor, &Role::QUALITY)?;
        self.ensure_state(ArrivalState::Quality)?;
        if self.signed_by(Stage::Reception, cmd.actor.id) {
            return Err(DomainError::unauthorized(
                "quality sign-off must come from a different actor than reception",
            ));
        }

        Ok(vec![ArrivalEvent::StageSigned(StageSigned {
            arrival_id: self.id,
            stage: Stage::Quality,
            notes: cmd.notes.clone(),
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_reject(
        &self,
        cmd: &Reject,
        expected: ArrivalState,
        role: Role,
    ) -> DomainResult<Vec<ArrivalEvent>> {
        authorize(&cmd.actor, &role)?;
        self.ensure_state(expected)?;
        let reason = required_reason(&cmd.reason)?;
        let stage = expected
            .stage()
            .ok_or_else(|| DomainError::state("terminal arrivals cannot be rejected"))?;

        Ok(vec![ArrivalEvent::Rejected(ArrivalRejected {
            arrival_id: self.id,
            stage,
            reason,
            cancelled: false,
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_submit_invoicing(&self, cmd: &SubmitInvoicing) -> DomainResult<Vec<ArrivalEvent>> {
        authorize(&cmd.actor, &Role::INVOICING)?;
        self.ensure_state(ArrivalState::Invoicing)?;
        if cmd.invoicing.invoice_number.trim().is_empty() {
            return Err(DomainError::validation("invoice number is required"));
        }

        let mut repriced = Vec::new();
        for price in &cmd.prices {
            if price.unit_price < Decimal::ZERO {
                return Err(DomainError::validation("unit price cannot be negative"));
            }
            let mut item = self.item(price.item)?.clone();
            item.reprice(price.unit_price)?;
            repriced.push(RepricedItem {
                item: item.id,
                unit_price: item.unit_price,
                amounts: item.amounts,
            });
        }
        for item in self.items.iter().filter(|i| i.produces_lot()) {
            let price = repriced
                .iter()
                .find(|r| r.item == item.id)
                .map(|r| r.unit_price)
                .unwrap_or(item.unit_price);
            if price <= Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "item {} lot {} has no unit price",
                    item.product, item.lot_number
                )));
            }
        }

        Ok(vec![ArrivalEvent::InvoicingSubmitted(InvoicingSubmitted {
            arrival_id: self.id,
            invoicing: cmd.invoicing.clone(),
            repriced,
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_approve_supervision(&self, cmd: &Approve) -> DomainResult<Vec<ArrivalEvent>> {
        authorize(&cmd.actor, &Role::SUPERVISION)?;
        self.ensure_state(ArrivalState::Supervision)?;
        if self.signed_by(Stage::Reception, cmd.actor.id) || self.signed_by(Stage::Quality, cmd.actor.id)
        {
            return Err(DomainError::unauthorized(
                "supervisor must differ from the reception and quality actors",
            ));
        }

        Ok(vec![ArrivalEvent::StageSigned(StageSigned {
            arrival_id: self.id,
            stage: Stage::Supervision,
            notes: cmd.notes.clone(),
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_set_placement(&self, cmd: &SetPlacement) -> DomainResult<Vec<ArrivalEvent>> {
        authorize(&cmd.actor, &Role::STOREKEEPER)?;
        self.ensure_state(ArrivalState::Placement)?;
        let item = self.item(cmd.item)?;
        let warehouse = self.header_warehouse()?;
        validate_plan(item, &cmd.plan, warehouse)?;

        Ok(vec![ArrivalEvent::PlacementPlanned(PlacementPlanned {
            arrival_id: self.id,
            item: cmd.item,
            plan: cmd.plan.clone(),
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_finalise(&self, cmd: &Finalise) -> DomainResult<Vec<ArrivalEvent>> {
        authorize(&cmd.actor, &Role::STOREKEEPER)?;
        self.ensure_state(ArrivalState::Placement)?;
        let warehouse = self.header_warehouse()?;

        let mut produced = Vec::new();
        for item in &self.items {
            validate_plan(item, &item.placement_plan, warehouse)?;
            let planned = item.planned_qty();
            if planned != item.qty_received {
                return Err(Invariant::PlacementMismatch {
                    item: format!("{} lot {}", item.product, item.lot_number),
                    expected: item.qty_received,
                    placed: planned,
                }
                .into());
            }
            if !item.produces_lot() {
                continue;
            }
            let lot = cmd
                .lots
                .iter()
                .find(|(id, _)| *id == item.id)
                .map(|(_, lot)| *lot)
                .ok_or_else(|| {
                    DomainError::validation(format!("no lot id assigned to item {}", item.id))
                })?;
            produced.push(ProducedLot { item: item.id, lot });
        }

        Ok(vec![ArrivalEvent::Approved(ArrivalApproved {
            arrival_id: self.id,
            folio: self.folio.clone(),
            produced,
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_cancel(&self, cmd: &Reject) -> DomainResult<Vec<ArrivalEvent>> {
        authorize(&cmd.actor, &Role::SUPERVISION)?;
        self.ensure_created()?;
        let stage = self.state.stage().ok_or_else(|| {
            DomainError::state(format!("arrival {} is already {:?}", self.folio, self.state))
        })?;
        let reason = required_reason(&cmd.reason)?;

        Ok(vec![ArrivalEvent::Rejected(ArrivalRejected {
            arrival_id: self.id,
            stage,
            reason,
            cancelled: true,
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_attach(&self, cmd: &AttachDocument) -> DomainResult<Vec<ArrivalEvent>> {
        self.ensure_created()?;
        if self.documents.iter().any(|d| d.id == cmd.document) {
            return Err(DomainError::conflict(format!(
                "document {} already attached",
                cmd.document
            )));
        }

        Ok(vec![ArrivalEvent::DocumentAttached(DocumentAttached {
            arrival_id: self.id,
            document: ArrivalDocument {
                id: cmd.document,
                kind: cmd.kind,
                blob: cmd.blob,
                description: cmd.description.clone(),
                attached_by: cmd.actor.id,
                attached_at: cmd.at,
            },
        })])
    }

    fn signed_by(&self, stage: Stage, actor: ActorId) -> bool {
        self.signature(stage).is_some_and(|s| s.actor == actor)
    }
}

fn validate_header(header: &ArrivalHeader) -> DomainResult<()> {
    if header.remission_number.trim().is_empty() {
        return Err(DomainError::validation("remission number is required"));
    }
    Ok(())
}

fn validate_plan(
    item: &ArrivalItem,
    plan: &[PlannedPlacement],
    warehouse: WarehouseId,
) -> DomainResult<()> {
    let mut bins = BTreeSet::new();
    for p in plan {
        if p.qty <= 0 {
            return Err(DomainError::validation(format!(
                "placement qty must be positive, got {}",
                p.qty
            )));
        }
        if p.warehouse != warehouse {
            return Err(DomainError::validation(format!(
                "bin {} does not belong to the arrival's warehouse",
                p.bin
            )));
        }
        if !bins.insert(p.bin) {
            return Err(DomainError::validation(format!("bin {} listed twice", p.bin)));
        }
    }
    let planned: i64 = plan.iter().map(|p| p.qty).sum();
    if planned > item.qty_received {
        return Err(Invariant::PlacementMismatch {
            item: format!("{} lot {}", item.product, item.lot_number),
            expected: item.qty_received,
            placed: planned,
        }
        .into());
    }
    Ok(())
}

fn required_reason(reason: &str) -> DomainResult<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(DomainError::validation("a reason is required"));
    }
    Ok(reason.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use medstock_auth::Actor;
    use medstock_catalog::ProductCode;
    use medstock_core::{BinId, ErrorKind, LotId, execute};
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn today() -> NaiveDate {
        test_time().date_naive()
    }

    struct Crew {
        reception: Actor,
        quality: Actor,
        invoicing: Actor,
        supervisor: Actor,
        storekeeper: Actor,
    }

    fn crew() -> Crew {
        Crew {
            reception: Actor::new("rosa", [Role::RECEPTION]),
            quality: Actor::new("quique", [Role::QUALITY]),
            invoicing: Actor::new("ines", [Role::INVOICING]),
            supervisor: Actor::new("sara", [Role::SUPERVISION]),
            storekeeper: Actor::new("alma", [Role::STOREKEEPER]),
        }
    }

    fn test_header(warehouse: WarehouseId) -> ArrivalHeader {
        ArrivalHeader {
            appointment_ref: Some("CITA-77".into()),
            supplier: SupplierTaxId::parse("LAB850101AB1").unwrap(),
            institution: InstitutionKey::parse("HGZ-01").unwrap(),
            warehouse,
            remission_number: "REM-1001".into(),
            cold_chain: false,
        }
    }

    fn test_item(number: &str, qty: i64) -> ItemInput {
        ItemInput {
            id: ArrivalItemId::new(),
            product: ProductCode::parse("060.125.0018").unwrap(),
            description: "Gasa esteril".into(),
            unit: "paquete".into(),
            lot_number: number.into(),
            expiry: NaiveDate::from_ymd_opt(2027, 1, 31).unwrap(),
            qty_shipped: qty,
            qty_received: qty,
            unit_price: dec!(4.25),
            tax_pct: dec!(16),
            manufacturer: None,
            brand: None,
        }
    }

    fn created(c: &Crew, warehouse: WarehouseId, items: Vec<ItemInput>) -> Arrival {
        let mut arrival = Arrival::empty(ArrivalId::new());
        let id = *arrival.id();
        execute(
            &mut arrival,
            &ArrivalCommand::Create(CreateArrival {
                arrival_id: id,
                folio: "ARR-20251001-0001".into(),
                header: test_header(warehouse),
                items,
                actor: c.reception.clone(),
                at: test_time(),
            }),
        )
        .unwrap();
        arrival
    }

    fn submit_reception(c: &Crew) -> ArrivalCommand {
        ArrivalCommand::SubmitReception(SubmitReception {
            today: today(),
            min_expiry_days: 60,
            notes: None,
            actor: c.reception.clone(),
            at: test_time(),
        })
    }

    fn approve(actor: &Actor) -> Approve {
        Approve {
            notes: None,
            actor: actor.clone(),
            at: test_time(),
        }
    }

    /// Drive an arrival up to the placement stage.
    fn at_placement(c: &Crew, warehouse: WarehouseId, items: Vec<ItemInput>) -> Arrival {
        let mut arrival = created(c, warehouse, items);
        execute(&mut arrival, &submit_reception(c)).unwrap();
        execute(&mut arrival, &ArrivalCommand::ApproveQuality(approve(&c.quality))).unwrap();
        execute(
            &mut arrival,
            &ArrivalCommand::SubmitInvoicing(SubmitInvoicing {
                invoicing: InvoicingData {
                    invoice_number: "FAC-555".into(),
                    ..InvoicingData::default()
                },
                prices: vec![],
                actor: c.invoicing.clone(),
                at: test_time(),
            }),
        )
        .unwrap();
        execute(&mut arrival, &ArrivalCommand::ApproveSupervision(approve(&c.supervisor))).unwrap();
        assert_eq!(arrival.state(), ArrivalState::Placement);
        arrival
    }

    #[test]
    fn create_computes_lines_and_version() {
        let c = crew();
        let arrival = created(&c, WarehouseId::new(), vec![test_item("L1", 10)]);
        assert_eq!(arrival.version(), 1);
        assert_eq!(arrival.items()[0].amounts.total, dec!(49.30));
        assert_eq!(arrival.totals().tax, dec!(6.80));
    }

    #[test]
    fn duplicate_lot_in_one_arrival_is_rejected() {
        let c = crew();
        let arrival = Arrival::empty(ArrivalId::new());
        let err = arrival
            .handle(&ArrivalCommand::Create(CreateArrival {
                arrival_id: *arrival.id(),
                folio: "ARR-1".into(),
                header: test_header(WarehouseId::new()),
                items: vec![test_item("L1", 1), test_item(" L1 ", 2)],
                actor: c.reception.clone(),
                at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn reception_rejects_short_expiry() {
        let c = crew();
        let mut item = test_item("L1", 10);
        item.expiry = today() + Duration::days(60);
        let arrival = created(&c, WarehouseId::new(), vec![item]);

        let err = arrival.handle(&submit_reception(&c)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn reception_rejects_unrepresentable_expiry_window() {
        let c = crew();
        let arrival = created(&c, WarehouseId::new(), vec![test_item("L1", 10)]);
        let err = arrival
            .handle(&ArrivalCommand::SubmitReception(SubmitReception {
                today: today(),
                min_expiry_days: u32::MAX,
                notes: None,
                actor: c.reception.clone(),
                at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn create_rejects_line_amounts_out_of_range() {
        let c = crew();
        let mut item = test_item("L1", i64::MAX);
        item.unit_price = Decimal::MAX;
        let arrival = Arrival::empty(ArrivalId::new());
        let err = arrival
            .handle(&ArrivalCommand::Create(CreateArrival {
                arrival_id: *arrival.id(),
                folio: "ARR-2".into(),
                header: test_header(WarehouseId::new()),
                items: vec![item],
                actor: c.reception.clone(),
                at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn quality_must_differ_from_reception() {
        let c = crew();
        let mut arrival = created(&c, WarehouseId::new(), vec![test_item("L1", 10)]);
        execute(&mut arrival, &submit_reception(&c)).unwrap();

        let mut both = c.reception.clone();
        both.roles.push(Role::QUALITY);
        let err = arrival
            .handle(&ArrivalCommand::ApproveQuality(approve(&both)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorisation);
    }

    #[test]
    fn role_gate_applies() {
        let c = crew();
        let mut arrival = created(&c, WarehouseId::new(), vec![test_item("L1", 10)]);
        execute(&mut arrival, &submit_reception(&c)).unwrap();
        let err = arrival
            .handle(&ArrivalCommand::ApproveQuality(approve(&c.invoicing)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorisation);
    }

    #[test]
    fn supervisor_must_differ_from_earlier_stages() {
        let c = crew();
        let mut arrival = created(&c, WarehouseId::new(), vec![test_item("L1", 10)]);
        execute(&mut arrival, &submit_reception(&c)).unwrap();
        execute(&mut arrival, &ArrivalCommand::ApproveQuality(approve(&c.quality))).unwrap();
        execute(
            &mut arrival,
            &ArrivalCommand::SubmitInvoicing(SubmitInvoicing {
                invoicing: InvoicingData {
                    invoice_number: "FAC-1".into(),
                    ..InvoicingData::default()
                },
                prices: vec![],
                actor: c.invoicing.clone(),
                at: test_time(),
            }),
        )
        .unwrap();

        let mut quality_supervisor = c.quality.clone();
        quality_supervisor.roles.push(Role::SUPERVISION);
        let err = arrival
            .handle(&ArrivalCommand::ApproveSupervision(approve(&quality_supervisor)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorisation);
    }

    #[test]
    fn invoicing_requires_invoice_number_and_reprices() {
        let c = crew();
        let mut arrival = created(&c, WarehouseId::new(), vec![test_item("L1", 10)]);
        execute(&mut arrival, &submit_reception(&c)).unwrap();
        execute(&mut arrival, &ArrivalCommand::ApproveQuality(approve(&c.quality))).unwrap();

        let missing = ArrivalCommand::SubmitInvoicing(SubmitInvoicing {
            invoicing: InvoicingData::default(),
            prices: vec![],
            actor: c.invoicing.clone(),
            at: test_time(),
        });
        assert_eq!(arrival.handle(&missing).unwrap_err().kind(), ErrorKind::Validation);

        let item = arrival.items()[0].id;
        execute(
            &mut arrival,
            &ArrivalCommand::SubmitInvoicing(SubmitInvoicing {
                invoicing: InvoicingData {
                    invoice_number: "FAC-9".into(),
                    ..InvoicingData::default()
                },
                prices: vec![ItemPrice { item, unit_price: dec!(5) }],
                actor: c.invoicing.clone(),
                at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(arrival.items()[0].amounts.total, dec!(58.00));
        assert_eq!(arrival.state(), ArrivalState::Supervision);
    }

    #[test]
    fn finalise_with_mismatched_plan_fails() {
        let c = crew();
        let wh = WarehouseId::new();
        let mut arrival = at_placement(&c, wh, vec![test_item("L1", 50)]);
        let item = arrival.items()[0].id;
        execute(
            &mut arrival,
            &ArrivalCommand::SetPlacement(SetPlacement {
                item,
                plan: vec![PlannedPlacement { bin: BinId::new(), warehouse: wh, qty: 49 }],
                actor: c.storekeeper.clone(),
                at: test_time(),
            }),
        )
        .unwrap();

        let err = arrival
            .handle(&ArrivalCommand::Finalise(Finalise {
                lots: vec![(item, LotId::new())],
                actor: c.storekeeper.clone(),
                at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(
            err.as_invariant(),
            Some(Invariant::PlacementMismatch { expected: 50, placed: 49, .. })
        ));
        assert_eq!(arrival.state(), ArrivalState::Placement);
    }

    #[test]
    fn plan_with_foreign_bin_is_rejected() {
        let c = crew();
        let wh = WarehouseId::new();
        let arrival = at_placement(&c, wh, vec![test_item("L1", 5)]);
        let item = arrival.items()[0].id;
        let err = arrival
            .handle(&ArrivalCommand::SetPlacement(SetPlacement {
                item,
                plan: vec![PlannedPlacement { bin: BinId::new(), warehouse: WarehouseId::new(), qty: 5 }],
                actor: c.storekeeper.clone(),
                at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn finalise_skips_items_received_with_zero() {
        let c = crew();
        let wh = WarehouseId::new();
        let mut missing = test_item("L2", 5);
        missing.qty_received = 0;
        let mut arrival = at_placement(&c, wh, vec![test_item("L1", 5), missing]);
        let first = arrival.items()[0].id;
        execute(
            &mut arrival,
            &ArrivalCommand::SetPlacement(SetPlacement {
                item: first,
                plan: vec![PlannedPlacement { bin: BinId::new(), warehouse: wh, qty: 5 }],
                actor: c.storekeeper.clone(),
                at: test_time(),
            }),
        )
        .unwrap();

        let lot = LotId::new();
        let events = execute(
            &mut arrival,
            &ArrivalCommand::Finalise(Finalise {
                lots: vec![(first, lot)],
                actor: c.storekeeper.clone(),
                at: test_time(),
            }),
        )
        .unwrap();
        match &events[0] {
            ArrivalEvent::Approved(e) => assert_eq!(e.produced, vec![ProducedLot { item: first, lot }]),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(arrival.state(), ArrivalState::Approved);
        assert_eq!(arrival.items()[0].produced_lot, Some(lot));
    }

    #[test]
    fn reject_requires_reason() {
        let c = crew();
        let mut arrival = created(&c, WarehouseId::new(), vec![test_item("L1", 10)]);
        execute(&mut arrival, &submit_reception(&c)).unwrap();
        let blank = ArrivalCommand::RejectQuality(Reject {
            reason: " ".into(),
            actor: c.quality.clone(),
            at: test_time(),
        });
        assert_eq!(arrival.handle(&blank).unwrap_err().kind(), ErrorKind::Validation);

        execute(
            &mut arrival,
            &ArrivalCommand::RejectQuality(Reject {
                reason: "broken seals".into(),
                actor: c.quality.clone(),
                at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(arrival.state(), ArrivalState::Rejected);
        assert_eq!(arrival.rejected_at(), Some(Stage::Quality));
        assert!(!arrival.is_archived());
    }

    #[test]
    fn cancel_archives_and_blocks_further_transitions() {
        let c = crew();
        let mut arrival = created(&c, WarehouseId::new(), vec![test_item("L1", 10)]);
        execute(
            &mut arrival,
            &ArrivalCommand::Cancel(Reject {
                reason: "appointment missed".into(),
                actor: c.supervisor.clone(),
                at: test_time(),
            }),
        )
        .unwrap();
        assert!(arrival.is_archived());
        assert_eq!(arrival.handle(&submit_reception(&c)).unwrap_err().kind(), ErrorKind::State);
    }

    #[test]
    fn retried_submit_fails_with_state() {
        let c = crew();
        let mut arrival = created(&c, WarehouseId::new(), vec![test_item("L1", 10)]);
        execute(&mut arrival, &submit_reception(&c)).unwrap();
        assert_eq!(arrival.handle(&submit_reception(&c)).unwrap_err().kind(), ErrorKind::State);
    }

    #[test]
    fn documents_attach_in_any_state() {
        let c = crew();
        let mut arrival = created(&c, WarehouseId::new(), vec![test_item("L1", 10)]);
        execute(
            &mut arrival,
            &ArrivalCommand::Cancel(Reject {
                reason: "duplicate".into(),
                actor: c.supervisor.clone(),
                at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut arrival,
            &ArrivalCommand::AttachDocument(AttachDocument {
                document: medstock_core::DocumentId::new(),
                kind: crate::DocumentKind::Remission,
                blob: medstock_core::BlobId::new(),
                description: "scan".into(),
                actor: c.reception.clone(),
                at: test_time(),
            }),
        )
        .unwrap();
        assert_eq!(arrival.documents().len(), 1);
    }
}
