use chrono::{DateTime, Utc};

use medstock_auth::Actor;
use medstock_catalog::{InstitutionKey, SupplierTaxId};
use medstock_core::{MovementId, ReturnId, ReturnItemId, WarehouseId};

use crate::{Dispatch, ReturnItem};

/// Command: CreateReturn. Items arrive resolved against their lots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateReturn {
    pub return_id: ReturnId,
    pub folio: String,
    pub supplier: SupplierTaxId,
    pub institution: InstitutionKey,
    pub warehouse: WarehouseId,
    pub reason: String,
    pub items: Vec<ReturnItem>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: AuthoriseReturn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthoriseReturn {
    pub authorisation_number: String,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: CompleteReturn. `movements` are the `outbound-return` movements
/// the store wrote for each item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteReturn {
    pub dispatch: Dispatch,
    pub movements: Vec<(ReturnItemId, MovementId)>,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// Command: RejectReturn / CancelReturn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReturn {
    pub reason: String,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnCommand {
    Create(CreateReturn),
    Authorise(AuthoriseReturn),
    Reject(CloseReturn),
    Complete(CompleteReturn),
    Cancel(CloseReturn),
}
