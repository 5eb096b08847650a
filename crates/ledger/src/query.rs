use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medstock_core::{ActorId, LotId};

use crate::{Movement, MovementKind};

/// Movement filters. Unset fields match everything; the date range
/// is half-open (`from` inclusive, `to` exclusive).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub lot: Option<LotId>,
    pub kind: Option<MovementKind>,
    pub actor: Option<ActorId>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub reference: Option<String>,
    pub include_voided: bool,
}

impl MovementFilter {
    pub fn matches(&self, m: &Movement) -> bool {
        if !self.include_voided && m.voided {
            return false;
        }
        if self.lot.is_some_and(|lot| lot != m.lot_id) {
            return false;
        }
        if self.kind.is_some_and(|kind| kind != m.kind) {
            return false;
        }
        if self.actor.is_some_and(|actor| actor != m.actor) {
            return false;
        }
        if self.from.is_some_and(|from| m.occurred_at < from) {
            return false;
        }
        if self.to.is_some_and(|to| m.occurred_at >= to) {
            return false;
        }
        if let Some(reference) = &self.reference {
            if m.reference.as_deref() != Some(reference.as_str()) {
                return false;
            }
        }
        true
    }
}
