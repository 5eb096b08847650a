//! Domain events and the notification bus.
//!
//! State machines emit typed events; the engine wraps committed events in an
//! [`EventEnvelope`] and publishes them on an [`EventBus`]. Delivery is
//! fire-and-forget from the engine's point of view.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
