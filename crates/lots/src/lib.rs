//! Lots, their per-bin placements and the reservation protocol.
//!
//! A [`LotRecord`] (lot + placements + ledger) is the consistency unit: every
//! operation here mutates exactly one record and leaves it satisfying the
//! aggregation, reservation-bound and ledger invariants, or fails. Locking
//! and all-or-nothing commits across several records belong to the store.

pub mod lot;
pub mod placement;
pub mod record;
pub mod reservation;

pub use lot::{Lot, LotIdentity, LotState, NewLot};
pub use placement::Placement;
pub use record::{LotRecord, PlacementRemap, SyncOutcome};
pub use reservation::{Consumption, Reservation};
