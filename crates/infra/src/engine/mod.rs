//! Command surface of the inventory engine.
//!
//! Every public method is one logical transaction: it locks the aggregate row
//! it transitions (if any), then the lot rows it touches, decides, commits
//! everything or nothing, and publishes the resulting events after commit.
//!
//! ```text
//! lock aggregate row
//!   ↓
//! aggregate.handle(command)        (pure decision; nothing mutated yet)
//!   ↓
//! lock lots (ascending LotId), mutate drafts
//!   ↓
//! commit lot drafts (invariants re-checked), apply events to the aggregate
//!   ↓
//! publish envelopes (failures logged, never surfaced)
//! ```

mod arrivals;
mod counts;
mod lots;
mod orders;
mod queries;
mod returns;

use std::sync::{Arc, RwLock, RwLockReadGuard};

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use medstock_auth::Actor;
use medstock_catalog::{Catalog, TaxClassifier};
use medstock_core::{Aggregate, Clock, DomainError, DomainResult};
use medstock_events::{Event, EventBus, EventEnvelope};

use crate::blob::BlobStore;
use crate::config::EngineConfig;
use crate::notifier::Notifier;
use crate::store::InventoryStore;

pub use arrivals::ArrivalLine;
pub use orders::PickOutcome;
pub use queries::{BinFreeQty, LedgerEntry, LotSummary};
pub use returns::ReturnLine;

pub struct InventoryEngine<B> {
    config: EngineConfig,
    tax: TaxClassifier,
    catalog: RwLock<Catalog>,
    store: InventoryStore,
    clock: Arc<dyn Clock>,
    blobs: Arc<dyn BlobStore>,
    notifier: Notifier<B>,
}

impl<B> InventoryEngine<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        config: EngineConfig,
        catalog: Catalog,
        bus: B,
        clock: Arc<dyn Clock>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let tax = config.tax_classifier();
        Self {
            config,
            tax,
            catalog: RwLock::new(catalog),
            store: InventoryStore::new(),
            clock,
            blobs,
            notifier: Notifier::new(bus),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn bus(&self) -> &B {
        self.notifier.bus()
    }

    pub fn store(&self) -> &InventoryStore {
        &self.store
    }

    pub fn blobs(&self) -> &dyn BlobStore {
        self.blobs.as_ref()
    }

    /// Shared read access to reference data.
    pub fn catalog(&self) -> DomainResult<RwLockReadGuard<'_, Catalog>> {
        self.catalog
            .read()
            .map_err(|_| DomainError::conflict("catalog lock poisoned"))
    }

    /// Mutate reference data. Never called while lot rows are locked.
    pub fn update_catalog<T>(&self, f: impl FnOnce(&mut Catalog) -> DomainResult<T>) -> DomainResult<T> {
        let mut catalog = self
            .catalog
            .write()
            .map_err(|_| DomainError::conflict("catalog lock poisoned"))?;
        f(&mut catalog)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    fn publish<E>(&self, aggregate_id: impl Into<Uuid>, aggregate_type: &str, version_before: u64, events: &[E])
    where
        E: Event + Serialize,
    {
        self.notifier
            .publish(aggregate_id.into(), aggregate_type, version_before, events);
    }
}

/// Apply already-decided events to the locked aggregate.
fn apply_all<A: Aggregate>(aggregate: &mut A, events: &[A::Event]) {
    for event in events {
        aggregate.apply(event);
    }
}

/// Decide without mutating; also returns the version the events build on.
fn decide<A>(aggregate: &A, command: &A::Command) -> DomainResult<(u64, Vec<A::Event>)>
where
    A: Aggregate<Error = DomainError>,
{
    let events = aggregate.handle(command)?;
    Ok((aggregate.version(), events))
}

/// Role gate for commands that have no state machine of their own.
fn require(actor: &Actor, role: &medstock_auth::Role) -> DomainResult<()> {
    medstock_auth::authorize(actor, role)?;
    Ok(())
}
