//! Post-commit event publication.

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

use medstock_events::{Event, EventBus, EventEnvelope};

/// Wraps committed state-machine events in envelopes and publishes them.
///
/// Publication is fire-and-forget: a failing bus is logged and never fails
/// the command that produced the events.
#[derive(Debug)]
pub struct Notifier<B> {
    bus: B,
}

impl<B> Notifier<B>
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// `version_before` is the aggregate version prior to applying `events`.
    pub fn publish<E>(&self, aggregate_id: Uuid, aggregate_type: &str, version_before: u64, events: &[E])
    where
        E: Event + Serialize,
    {
        for (i, event) in events.iter().enumerate() {
            let sequence = version_before + i as u64 + 1;
            let envelope = match EventEnvelope::from_typed(aggregate_id, aggregate_type, sequence, event) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(event_type = event.event_type(), error = %e, "event serialization failed; notification dropped");
                    continue;
                }
            };
            match self.bus.publish(envelope) {
                Ok(()) => debug!(event_type = event.event_type(), %aggregate_id, sequence, "event published"),
                Err(e) => warn!(event_type = event.event_type(), error = ?e, "notification sink failed; continuing"),
            }
        }
    }
}
