use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use medstock_auth::{Role, authorize};
use medstock_catalog::{InstitutionKey, ProductCode, SupplierTaxId};
use medstock_core::{
    ActorId, Aggregate, AggregateRoot, BinId, DomainError, DomainResult, LotId, MovementId,
    PlacementId, ReturnId, ReturnItemId, WarehouseId,
};

use crate::{
    AuthoriseReturn, CloseReturn, CompleteReturn, CreateReturn, ReturnAuthorised, ReturnClosed,
    ReturnCommand, ReturnCompleted, ReturnCreated, ReturnEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnState {
    Pending,
    Authorised,
    Completed,
    Cancelled,
    Rejected,
}

impl ReturnState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReturnState::Completed | ReturnState::Cancelled | ReturnState::Rejected
        )
    }
}

/// One lot placement going back to the supplier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItem {
    pub id: ReturnItemId,
    pub lot_id: LotId,
    pub lot_number: String,
    pub product: ProductCode,
    pub placement: PlacementId,
    pub bin: BinId,
    pub qty: i64,
    /// Frozen from the lot at creation.
    pub unit_price: Decimal,
    pub reason: Option<String>,
    pub movement: Option<MovementId>,
}

impl ReturnItem {
    pub fn amount(&self) -> Decimal {
        (Decimal::from(self.qty) * self.unit_price).round_dp(2)
    }
}

/// Shipping data captured on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dispatch {
    pub delivered_on: NaiveDate,
    pub carrier: String,
    pub guide_number: String,
    pub credit_note_number: Option<String>,
    pub credit_note_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNote {
    pub number: Option<String>,
    pub date: Option<NaiveDate>,
    pub amount: Decimal,
}

/// Aggregate root: SupplierReturn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupplierReturn {
    id: ReturnId,
    folio: String,
    supplier: Option<SupplierTaxId>,
    institution: Option<InstitutionKey>,
    warehouse: Option<WarehouseId>,
    reason: String,
    items: Vec<ReturnItem>,
    state: ReturnState,
    created_by: Option<ActorId>,
    authorisation_number: Option<String>,
    authorised_by: Option<ActorId>,
    authorised_at: Option<DateTime<Utc>>,
    dispatch: Option<Dispatch>,
    credit_note: Option<CreditNote>,
    completed_at: Option<DateTime<Utc>>,
    closing_reason: Option<String>,
    version: u64,
    created: bool,
}

impl SupplierReturn {
    pub fn empty(id: ReturnId) -> Self {
        Self {
            id,
            folio: String::new(),
            supplier: None,
            institution: None,
            warehouse: None,
            reason: String::new(),
            items: Vec::new(),
            state: ReturnState::Pending,
            created_by: None,
            authorisation_number: None,
            authorised_by: None,
            authorised_at: None,
            dispatch: None,
            credit_note: None,
            completed_at: None,
            closing_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn folio(&self) -> &str {
        &self.folio
    }

    pub fn state(&self) -> ReturnState {
        self.state
    }

    pub fn items(&self) -> &[ReturnItem] {
        &self.items
    }

    pub fn supplier(&self) -> Option<&SupplierTaxId> {
        self.supplier.as_ref()
    }

    pub fn warehouse(&self) -> Option<WarehouseId> {
        self.warehouse
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn authorisation_number(&self) -> Option<&str> {
        self.authorisation_number.as_deref()
    }

    pub fn dispatch(&self) -> Option<&Dispatch> {
        self.dispatch.as_ref()
    }

    pub fn credit_note(&self) -> Option<&CreditNote> {
        self.credit_note.as_ref()
    }

    pub fn closing_reason(&self) -> Option<&str> {
        self.closing_reason.as_deref()
    }

    /// Σ qty × unit price over the items.
    pub fn total_amount(&self) -> Decimal {
        self.items.iter().map(ReturnItem::amount).sum()
    }

    /// Lots touched on completion, sorted and deduplicated.
    pub fn lots(&self) -> Vec<LotId> {
        let mut lots: Vec<LotId> = self.items.iter().map(|i| i.lot_id).collect();
        lots.sort();
        lots.dedup();
        lots
    }
}

impl AggregateRoot for SupplierReturn {
    type Id = ReturnId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for SupplierReturn {
    type Command = ReturnCommand;
    type Event = ReturnEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReturnEvent::Created(e) => {
                self.id = e.return_id;
                self.folio = e.folio.clone();
                self.supplier = Some(e.supplier.clone());
                self.institution = Some(e.institution.clone());
                self.warehouse = Some(e.warehouse);
                self.reason = e.reason.clone();
                self.items = e.items.clone();
                self.created_by = Some(e.actor);
                self.state = ReturnState::Pending;
                self.created = true;
            }
            ReturnEvent::Authorised(e) => {
                self.authorisation_number = Some(e.authorisation_number.clone());
                self.authorised_by = Some(e.actor);
                self.authorised_at = Some(e.occurred_at);
                self.state = ReturnState::Authorised;
            }
            ReturnEvent::Completed(e) => {
                for (item_id, movement) in &e.movements {
                    if let Some(item) = self.items.iter_mut().find(|i| i.id == *item_id) {
                        item.movement = Some(*movement);
                    }
                }
                self.dispatch = Some(e.dispatch.clone());
                self.credit_note = Some(e.credit_note.clone());
                self.completed_at = Some(e.occurred_at);
                self.state = ReturnState::Completed;
            }
            ReturnEvent::Closed(e) => {
                self.closing_reason = Some(e.reason.clone());
                self.state = e.to;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReturnCommand::Create(cmd) => self.handle_create(cmd),
            ReturnCommand::Authorise(cmd) => self.handle_authorise(cmd),
            ReturnCommand::Reject(cmd) => self.handle_reject(cmd),
            ReturnCommand::Complete(cmd) => self.handle_complete(cmd),
            ReturnCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl SupplierReturn {
    fn ensure_state(&self, expected: ReturnState) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found(format!("return {}", self.id)));
        }
        if self.state != expected {
            return Err(DomainError::state(format!(
                "return {} is {:?}, expected {:?}",
                self.folio, self.state, expected
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateReturn) -> DomainResult<Vec<ReturnEvent>> {
        authorize(&cmd.actor, &Role::RETURNS)?;
        if self.created {
            return Err(DomainError::conflict("return already exists"));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("a return reason is required"));
        }
        if cmd.items.is_empty() {
            return Err(DomainError::validation("return has no items"));
        }
        for (i, item) in cmd.items.iter().enumerate() {
            if item.qty <= 0 {
                return Err(DomainError::validation(format!(
                    "return qty for lot {} must be positive, got {}",
                    item.lot_number, item.qty
                )));
            }
            if cmd.items[..i].iter().any(|other| other.placement == item.placement) {
                return Err(DomainError::validation(format!(
                    "placement {} listed twice",
                    item.placement
                )));
            }
        }

        Ok(vec![ReturnEvent::Created(ReturnCreated {
            return_id: cmd.return_id,
            folio: cmd.folio.clone(),
            supplier: cmd.supplier.clone(),
            institution: cmd.institution.clone(),
            warehouse: cmd.warehouse,
            reason: cmd.reason.trim().to_string(),
            items: cmd.items.clone(),
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_authorise(&self, cmd: &AuthoriseReturn) -> DomainResult<Vec<ReturnEvent>> {
        authorize(&cmd.actor, &Role::RETURNS_AUTHORISER)?;
        self.ensure_state(ReturnState::Pending)?;
        let number = cmd.authorisation_number.trim();
        if number.is_empty() {
            return Err(DomainError::validation("an authorisation number is required"));
        }
        Ok(vec![ReturnEvent::Authorised(ReturnAuthorised {
            return_id: self.id,
            authorisation_number: number.to_string(),
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    fn handle_reject(&self, cmd: &CloseReturn) -> DomainResult<Vec<ReturnEvent>> {
        authorize(&cmd.actor, &Role::RETURNS_AUTHORISER)?;
        self.ensure_state(ReturnState::Pending)?;
        self.close(cmd, ReturnState::Rejected)
    }

    fn handle_cancel(&self, cmd: &CloseReturn) -> DomainResult<Vec<ReturnEvent>> {
        authorize(&cmd.actor, &Role::RETURNS)?;
        if !self.created {
            return Err(DomainError::not_found(format!("return {}", self.id)));
        }
        if self.state.is_terminal() {
            return Err(DomainError::state(format!(
                "return {} is already {:?}",
                self.folio, self.state
            )));
        }
        self.close(cmd, ReturnState::Cancelled)
    }

    fn close(&self, cmd: &CloseReturn, to: ReturnState) -> DomainResult<Vec<ReturnEvent>> {
        let reason = cmd.reason.trim();
        if reason.is_empty() {
            return Err(DomainError::validation("a reason is required"));
        }
        Ok(vec![ReturnEvent::Closed(ReturnClosed {
            return_id: self.id,
            to,
            reason: reason.to_string(),
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }

    /// Validate completion before the store touches any placement.
    pub fn check_complete(&self, dispatch: &Dispatch) -> DomainResult<()> {
        self.ensure_state(ReturnState::Authorised)?;
        if dispatch.carrier.trim().is_empty() {
            return Err(DomainError::validation("carrier is required"));
        }
        if dispatch.guide_number.trim().is_empty() {
            return Err(DomainError::validation("guide number is required"));
        }
        Ok(())
    }

    fn handle_complete(&self, cmd: &CompleteReturn) -> DomainResult<Vec<ReturnEvent>> {
        authorize(&cmd.actor, &Role::RETURNS)?;
        self.check_complete(&cmd.dispatch)?;
        for item in &self.items {
            if !cmd.movements.iter().any(|(id, _)| *id == item.id) {
                return Err(DomainError::validation(format!(
                    "no return movement recorded for lot {}",
                    item.lot_number
                )));
            }
        }

        Ok(vec![ReturnEvent::Completed(ReturnCompleted {
            return_id: self.id,
            dispatch: cmd.dispatch.clone(),
            credit_note: CreditNote {
                number: cmd.dispatch.credit_note_number.clone(),
                date: cmd.dispatch.credit_note_date,
                amount: self.total_amount(),
            },
            movements: cmd.movements.clone(),
            actor: cmd.actor.id,
            occurred_at: cmd.at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use medstock_auth::Actor;
    use medstock_core::{ErrorKind, execute};
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .unwrap()
            .and_hms_opt(11, 0, 0)
            .unwrap()
            .and_utc()
    }

    fn clerk() -> Actor {
        Actor::new("rosa", [Role::RETURNS])
    }

    fn authoriser() -> Actor {
        Actor::new("alma", [Role::RETURNS_AUTHORISER])
    }

    fn item(qty: i64, price: Decimal) -> ReturnItem {
        ReturnItem {
            id: ReturnItemId::new(),
            lot_id: LotId::new(),
            lot_number: "L-7".into(),
            product: ProductCode::parse("060.000.0001.00").unwrap(),
            placement: PlacementId::new(),
            bin: BinId::new(),
            qty,
            unit_price: price,
            reason: Some("damaged packaging".into()),
            movement: None,
        }
    }

    fn pending(items: Vec<ReturnItem>) -> SupplierReturn {
        let mut r = SupplierReturn::empty(ReturnId::new());
        let id = *r.id();
        execute(
            &mut r,
            &ReturnCommand::Create(CreateReturn {
                return_id: id,
                folio: "DEV-20251001-0001".into(),
                supplier: SupplierTaxId::parse("LAB850101XX1").unwrap(),
                institution: InstitutionKey::parse("HGZ-01").unwrap(),
                warehouse: WarehouseId::new(),
                reason: "quality recall".into(),
                items,
                actor: clerk(),
                at: test_time(),
            }),
        )
        .unwrap();
        r
    }

    fn dispatch() -> Dispatch {
        Dispatch {
            delivered_on: test_time().date_naive(),
            carrier: "Paqueteria Sur".into(),
            guide_number: "G-5531".into(),
            credit_note_number: Some("NC-88".into()),
            credit_note_date: None,
        }
    }

    #[test]
    fn authorisation_number_is_required() {
        let r = pending(vec![item(5, dec!(10))]);
        let err = r
            .handle(&ReturnCommand::Authorise(AuthoriseReturn {
                authorisation_number: "  ".into(),
                actor: authoriser(),
                at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn clerk_cannot_authorise() {
        let r = pending(vec![item(5, dec!(10))]);
        let err = r
            .handle(&ReturnCommand::Authorise(AuthoriseReturn {
                authorisation_number: "AUT-1".into(),
                actor: clerk(),
                at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorisation);
    }

    #[test]
    fn completion_records_credit_note_amount() {
        let items = vec![item(5, dec!(10.00)), item(2, dec!(3.25))];
        let movements = items.iter().map(|i| (i.id, MovementId::new())).collect();
        let mut r = pending(items);
        execute(
            &mut r,
            &ReturnCommand::Authorise(AuthoriseReturn {
                authorisation_number: "AUT-1".into(),
                actor: authoriser(),
                at: test_time(),
            }),
        )
        .unwrap();
        execute(
            &mut r,
            &ReturnCommand::Complete(CompleteReturn {
                dispatch: dispatch(),
                movements,
                actor: clerk(),
                at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(r.state(), ReturnState::Completed);
        assert_eq!(r.credit_note().unwrap().amount, dec!(56.50));
        assert!(r.items().iter().all(|i| i.movement.is_some()));
    }

    #[test]
    fn pending_return_cannot_complete() {
        let r = pending(vec![item(1, dec!(1))]);
        assert_eq!(r.check_complete(&dispatch()).unwrap_err().kind(), ErrorKind::State);
    }

    #[test]
    fn cancel_requires_reason_and_is_terminal() {
        let mut r = pending(vec![item(1, dec!(1))]);
        let blank = ReturnCommand::Cancel(CloseReturn {
            reason: "".into(),
            actor: clerk(),
            at: test_time(),
        });
        assert_eq!(r.handle(&blank).unwrap_err().kind(), ErrorKind::Validation);

        let cancel = ReturnCommand::Cancel(CloseReturn {
            reason: "supplier refused".into(),
            actor: clerk(),
            at: test_time(),
        });
        execute(&mut r, &cancel).unwrap();
        assert_eq!(r.state(), ReturnState::Cancelled);
        assert_eq!(r.handle(&cancel).unwrap_err().kind(), ErrorKind::State);
    }

    #[test]
    fn duplicate_placements_are_rejected() {
        let first = item(1, dec!(1));
        let mut second = item(2, dec!(1));
        second.placement = first.placement;
        let mut r = SupplierReturn::empty(ReturnId::new());
        let id = *r.id();
        let err = execute(
            &mut r,
            &ReturnCommand::Create(CreateReturn {
                return_id: id,
                folio: "DEV-1".into(),
                supplier: SupplierTaxId::parse("LAB850101XX1").unwrap(),
                institution: InstitutionKey::parse("HGZ-01").unwrap(),
                warehouse: WarehouseId::new(),
                reason: "recall".into(),
                items: vec![first, second],
                actor: clerk(),
                at: test_time(),
            }),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
