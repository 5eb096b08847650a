use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use medstock_core::{ActorId, BinId, LotId, MovementId};

use crate::MovementKind;

/// An immutable ledger record describing a delta on one lot.
///
/// Only the `voided*` fields are ever written after creation, and only by a
/// reversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    /// Store-global sequence; tiebreak for equal timestamps.
    pub sequence: u64,
    pub lot_id: LotId,
    pub kind: MovementKind,
    /// Always positive.
    pub qty: i64,
    pub before: i64,
    pub after: i64,
    pub actor: ActorId,
    pub reason: String,
    pub reference: Option<String>,
    pub occurred_at: DateTime<Utc>,
    /// Bin the movement affected (source bin for transfers).
    pub bin: Option<BinId>,
    /// Destination bin of a transfer.
    pub to_bin: Option<BinId>,
    pub voided: bool,
    /// The reversal that voided this movement.
    pub voided_by: Option<MovementId>,
    pub voided_at: Option<DateTime<Utc>>,
    pub voided_by_actor: Option<ActorId>,
    /// Set on reversal movements: the movement they compensate.
    pub reverses: Option<MovementId>,
}

impl Movement {
    /// Signed change to the lot total.
    pub fn delta(&self) -> i64 {
        self.after - self.before
    }

    /// Counts towards replay: not voided and not itself a reversal.
    pub fn is_effective(&self) -> bool {
        !self.voided && self.kind != MovementKind::Reversal
    }
}

/// What the caller wants recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementDraft {
    pub kind: MovementKind,
    pub qty: i64,
    pub reason: String,
    pub reference: Option<String>,
    pub bin: Option<BinId>,
    pub to_bin: Option<BinId>,
}

impl MovementDraft {
    pub fn new(kind: MovementKind, qty: i64, reason: impl Into<String>) -> Self {
        Self {
            kind,
            qty,
            reason: reason.into(),
            reference: None,
            bin: None,
            to_bin: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn at_bin(mut self, bin: BinId) -> Self {
        self.bin = Some(bin);
        self
    }

    pub fn to_bin(mut self, bin: BinId) -> Self {
        self.to_bin = Some(bin);
        self
    }
}

/// Identity, ordering and authorship assigned by the store when a movement is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MovementStamp {
    pub id: MovementId,
    pub sequence: u64,
    pub at: DateTime<Utc>,
    pub actor: ActorId,
}

impl MovementStamp {
    pub fn new(sequence: u64, at: DateTime<Utc>, actor: ActorId) -> Self {
        Self {
            id: MovementId::new(),
            sequence,
            at,
            actor,
        }
    }
}
