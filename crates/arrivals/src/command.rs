use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use medstock_auth::Actor;
use medstock_core::{ArrivalId, ArrivalItemId, BlobId, DocumentId, LotId};

use crate::{ArrivalHeader, DocumentKind, InvoicingData, ItemInput, PlannedPlacement};

/// Command: CreateArrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateArrival {
    pub arrival_id: ArrivalId,
    pub folio: String,
    pub header: ArrivalHeader,
    pub items: Vec<ItemInput>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: UpdateReception. Replaces header and items while in reception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReception {
    pub header: ArrivalHeader,
    pub items: Vec<ItemInput>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: SubmitReception.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReception {
    pub today: NaiveDate,
    /// Expiry must be later than `today + min_expiry_days`.
    pub min_expiry_days: u32,
    pub notes: Option<String>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: ApproveQuality / ApproveSupervision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approve {
    pub notes: Option<String>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: RejectQuality / RejectSupervision / Cancel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reject {
    pub reason: String,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPrice {
    pub item: ArrivalItemId,
    pub unit_price: Decimal,
}

/// Command: SubmitInvoicing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitInvoicing {
    pub invoicing: InvoicingData,
    /// Price corrections; items not listed keep their reception price.
    pub prices: Vec<ItemPrice>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: SetPlacement. Replaces one item's placement plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPlacement {
    pub item: ArrivalItemId,
    pub plan: Vec<PlannedPlacement>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: Finalise. `lots` assigns a fresh lot id to every item that
/// produces a lot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finalise {
    pub lots: Vec<(ArrivalItemId, LotId)>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: AttachDocument. Allowed in every state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachDocument {
    pub document: DocumentId,
    pub kind: DocumentKind,
    pub blob: BlobId,
    pub description: String,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrivalCommand {
    Create(CreateArrival),
    UpdateReception(UpdateReception),
    SubmitReception(SubmitReception),
    ApproveQuality(Approve),
    RejectQuality(Reject),
    SubmitInvoicing(SubmitInvoicing),
    ApproveSupervision(Approve),
    RejectSupervision(Reject),
    SetPlacement(SetPlacement),
    Finalise(Finalise),
    Cancel(Reject),
    AttachDocument(AttachDocument),
}
