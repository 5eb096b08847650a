//! Infrastructure layer: transactional store, engine surface, config and
//! external adapters.

pub mod blob;
pub mod config;
pub mod engine;
pub mod folio;
pub mod notifier;
pub mod store;

pub use blob::{Blob, BlobError, BlobStore, InMemoryBlobStore};
pub use config::{EngineConfig, EngineConfigError};
pub use engine::{
    ArrivalLine, BinFreeQty, InventoryEngine, LedgerEntry, LotSummary, PickOutcome, ReturnLine,
};
pub use store::InventoryStore;
