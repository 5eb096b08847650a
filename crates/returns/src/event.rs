use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medstock_catalog::{InstitutionKey, SupplierTaxId};
use medstock_core::{ActorId, MovementId, ReturnId, ReturnItemId, WarehouseId};
use medstock_events::Event;

use crate::{CreditNote, Dispatch, ReturnItem, ReturnState};

/// Event: ReturnCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnCreated {
    pub return_id: ReturnId,
    pub folio: String,
    pub supplier: SupplierTaxId,
    pub institution: InstitutionKey,
    pub warehouse: WarehouseId,
    pub reason: String,
    pub items: Vec<ReturnItem>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnAuthorised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnAuthorised {
    pub return_id: ReturnId,
    pub authorisation_number: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnCompleted {
    pub return_id: ReturnId,
    pub dispatch: Dispatch,
    pub credit_note: CreditNote,
    pub movements: Vec<(ReturnItemId, MovementId)>,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnClosed (rejected or cancelled).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnClosed {
    pub return_id: ReturnId,
    pub to: ReturnState,
    pub reason: String,
    pub actor: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnEvent {
    Created(ReturnCreated),
    Authorised(ReturnAuthorised),
    Completed(ReturnCompleted),
    Closed(ReturnClosed),
}

impl Event for ReturnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReturnEvent::Created(_) => "returns.return.created",
            ReturnEvent::Authorised(_) => "returns.return.authorised",
            ReturnEvent::Completed(_) => "returns.return.completed",
            ReturnEvent::Closed(e) if e.to == ReturnState::Rejected => "returns.return.rejected",
            ReturnEvent::Closed(_) => "returns.return.cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReturnEvent::Created(e) => e.occurred_at,
            ReturnEvent::Authorised(e) => e.occurred_at,
            ReturnEvent::Completed(e) => e.occurred_at,
            ReturnEvent::Closed(e) => e.occurred_at,
        }
    }
}
