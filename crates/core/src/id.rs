//! Strongly-typed identifiers used across the domain.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $t:ident, $name:literal) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(Uuid);

        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

uuid_id!(
    /// Identifier of an acting user (actor identity).
    ActorId,
    "ActorId"
);
uuid_id!(WarehouseId, "WarehouseId");
uuid_id!(BinId, "BinId");
uuid_id!(
    /// Identifier of a lot. Ordered so that lot locks can be taken in a stable order.
    LotId,
    "LotId"
);
uuid_id!(PlacementId, "PlacementId");
uuid_id!(MovementId, "MovementId");
uuid_id!(ArrivalId, "ArrivalId");
uuid_id!(ArrivalItemId, "ArrivalItemId");
uuid_id!(DocumentId, "DocumentId");
uuid_id!(
    /// Opaque reference to a document held by the blob store.
    BlobId,
    "BlobId"
);
uuid_id!(RequestId, "RequestId");
uuid_id!(ProposalId, "ProposalId");
uuid_id!(ProposalItemId, "ProposalItemId");
uuid_id!(AssignmentId, "AssignmentId");
uuid_id!(CountId, "CountId");
uuid_id!(ReturnId, "ReturnId");
uuid_id!(ReturnItemId, "ReturnItemId");
