use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Role identifier used for transition gates.
///
/// Roles are opaque strings; the well-known ones the engine checks are the
/// associated constants below. `admin` satisfies every gate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    /// Captures deliveries at the dock (arrival reception stage).
    pub const RECEPTION: Role = Role(Cow::Borrowed("reception"));
    pub const QUALITY: Role = Role(Cow::Borrowed("quality"));
    pub const INVOICING: Role = Role(Cow::Borrowed("invoicing"));
    pub const SUPERVISION: Role = Role(Cow::Borrowed("supervision"));
    /// Assigns bins, moves stock between bins.
    pub const STOREKEEPER: Role = Role(Cow::Borrowed("storekeeper"));
    pub const REQUESTER: Role = Role(Cow::Borrowed("requester"));
    /// Approves request quantities.
    pub const VALIDATOR: Role = Role(Cow::Borrowed("validator"));
    /// Reviews proposals, finalises and delivers prepared requests.
    pub const DISPATCHER: Role = Role(Cow::Borrowed("dispatcher"));
    pub const PICKER: Role = Role(Cow::Borrowed("picker"));
    /// Counts, adjustments, lot state changes and ledger reversals.
    pub const INVENTORY_CONTROL: Role = Role(Cow::Borrowed("inventory-control"));
    pub const RETURNS: Role = Role(Cow::Borrowed("returns"));
    pub const RETURNS_AUTHORISER: Role = Role(Cow::Borrowed("returns-authoriser"));
    pub const ADMIN: Role = Role(Cow::Borrowed("admin"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.as_str() == Self::ADMIN.as_str()
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
