//! Append-only movement ledger.
//!
//! Every change to a lot's quantity is recorded as a [`Movement`] carrying the
//! before/after totals. The ledger is the system of record for history: a
//! lot's `available_qty` is a cached aggregate that must always equal the
//! replay of its effective movements.

pub mod kind;
pub mod ledger;
pub mod movement;
pub mod query;

pub use kind::{Direction, MovementKind};
pub use ledger::LotLedger;
pub use movement::{Movement, MovementDraft, MovementStamp};
pub use query::MovementFilter;
