//! Supplier arrival pipeline (pure state machine).
//!
//! Reception -> Quality -> Invoicing -> Supervision -> Placement -> Approved,
//! with role gates, separation of duties between stages and a cancel edge
//! that archives the arrival as rejected. Lot creation on approval is carried
//! out by the store; this crate only decides.

pub mod arrival;
pub mod command;
pub mod event;
pub mod item;

pub use arrival::{Arrival, ArrivalHeader, ArrivalState, ArrivalTotals, InvoicingData, Signature, Stage};
pub use command::*;
pub use event::*;
pub use item::{
    ArrivalDocument, ArrivalItem, DocumentKind, ItemInput, LineAmounts, PlannedPlacement, ProducedLot,
};
