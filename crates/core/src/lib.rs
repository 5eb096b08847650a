//! `medstock-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! typed identifiers, the error taxonomy, the aggregate contract and the clock.

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, execute};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult, ErrorKind, Invariant};
pub use id::{
    ActorId, ArrivalId, ArrivalItemId, AssignmentId, BinId, BlobId, CountId, DocumentId, LotId,
    MovementId, PlacementId, ProposalId, ProposalItemId, RequestId, ReturnId, ReturnItemId,
    WarehouseId,
};
