//! Returns of received stock to its supplier.
//!
//! `pending -> authorised -> completed`, plus `cancelled` and `rejected`.
//! Completion is where stock leaves: the store withdraws each item from its
//! placement as `outbound-return` in the same transaction that applies the
//! `Completed` event.

pub mod command;
pub mod event;
pub mod supplier_return;

pub use command::*;
pub use event::*;
pub use supplier_return::{CreditNote, Dispatch, ReturnItem, ReturnState, SupplierReturn};
