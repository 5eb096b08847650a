//! Per-lot movement chain.

use serde::{Deserialize, Serialize};

use medstock_core::{DomainError, DomainResult, Invariant, LotId, MovementId};

use crate::{Direction, Movement, MovementDraft, MovementKind, MovementStamp};

/// The ordered movements of one lot.
///
/// Movements are kept in write order, which is also (timestamp, sequence)
/// order: `append` never lets a timestamp go backwards and requires strictly
/// increasing sequences.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotLedger {
    lot_id: LotId,
    movements: Vec<Movement>,
}

impl LotLedger {
    pub fn new(lot_id: LotId) -> Self {
        Self {
            lot_id,
            movements: Vec::new(),
        }
    }

    pub fn lot_id(&self) -> LotId {
        self.lot_id
    }

    /// Every movement, including voided ones and reversals, in write order.
    pub fn movements(&self) -> &[Movement] {
        &self.movements
    }

    pub fn get(&self, id: MovementId) -> DomainResult<&Movement> {
        self.movements
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| DomainError::not_found(format!("movement {id}")))
    }

    /// Lot total after the last written movement.
    pub fn balance(&self) -> i64 {
        self.movements.last().map(|m| m.after).unwrap_or(0)
    }

    /// Record a movement against `current`, the lot's available quantity.
    ///
    /// Fails with `insufficient-stock` when a debit exceeds `current`. Nothing
    /// is written on failure.
    pub fn append(
        &mut self,
        current: i64,
        draft: MovementDraft,
        stamp: MovementStamp,
    ) -> DomainResult<&Movement> {
        if draft.qty <= 0 {
            return Err(DomainError::validation(format!(
                "movement qty must be positive, got {}",
                draft.qty
            )));
        }
        if draft.kind == MovementKind::Reversal {
            return Err(DomainError::validation(
                "reversals are written through reverse()",
            ));
        }
        if draft.reason.trim().is_empty() {
            return Err(DomainError::validation("movement reason is required"));
        }

        let after = match draft.kind.direction() {
            Direction::Credit => current + draft.qty,
            Direction::Debit => {
                if draft.qty > current {
                    return Err(Invariant::InsufficientStock {
                        requested: draft.qty,
                        available: current,
                    }
                    .into());
                }
                current - draft.qty
            }
            Direction::Neutral => current,
        };

        let at = self.chain_checks(current, &stamp)?;
        self.movements.push(Movement {
            id: stamp.id,
            sequence: stamp.sequence,
            lot_id: self.lot_id,
            kind: draft.kind,
            qty: draft.qty,
            before: current,
            after,
            actor: stamp.actor,
            reason: draft.reason,
            reference: draft.reference,
            occurred_at: at,
            bin: draft.bin,
            to_bin: draft.to_bin,
            voided: false,
            voided_by: None,
            voided_at: None,
            voided_by_actor: None,
            reverses: None,
        });
        self.last_written()
    }

    /// Compensate the latest effective movement.
    ///
    /// The reversal carries the opposite delta (for transfers: the opposite
    /// bins) and marks the target voided.
    pub fn reverse(
        &mut self,
        current: i64,
        target: MovementId,
        reason: impl Into<String>,
        stamp: MovementStamp,
    ) -> DomainResult<&Movement> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("reversal reason is required"));
        }

        let idx = self
            .movements
            .iter()
            .position(|m| m.id == target)
            .ok_or_else(|| DomainError::not_found(format!("movement {target}")))?;
        let original = &self.movements[idx];
        if original.voided {
            return Err(DomainError::AlreadyVoided(target));
        }
        if original.kind == MovementKind::Reversal {
            return Err(Invariant::NotReversible(target).into());
        }
        let latest = self
            .movements
            .iter()
            .rev()
            .find(|m| m.is_effective())
            .map(|m| m.id);
        if latest != Some(target) {
            return Err(Invariant::NotReversible(target).into());
        }

        let after = current - original.delta();
        if after < 0 {
            return Err(Invariant::InsufficientStock {
                requested: original.delta(),
                available: current,
            }
            .into());
        }
        let (bin, to_bin) = match original.kind {
            MovementKind::Transfer => (original.to_bin, original.bin),
            _ => (original.bin, None),
        };
        let qty = original.qty;
        let reference = original.reference.clone();

        let at = self.chain_checks(current, &stamp)?;
        let voided = &mut self.movements[idx];
        voided.voided = true;
        voided.voided_by = Some(stamp.id);
        voided.voided_at = Some(at);
        voided.voided_by_actor = Some(stamp.actor);

        self.movements.push(Movement {
            id: stamp.id,
            sequence: stamp.sequence,
            lot_id: self.lot_id,
            kind: MovementKind::Reversal,
            qty,
            before: current,
            after,
            actor: stamp.actor,
            reason,
            reference,
            occurred_at: at,
            bin,
            to_bin,
            voided: false,
            voided_by: None,
            voided_at: None,
            voided_by_actor: None,
            reverses: Some(target),
        });
        self.last_written()
    }

    /// Effective movements (non-voided, non-reversal) ordered by (timestamp, sequence).
    pub fn replay(&self) -> Vec<&Movement> {
        let mut effective: Vec<&Movement> =
            self.movements.iter().filter(|m| m.is_effective()).collect();
        effective.sort_by_key(|m| (m.occurred_at, m.sequence));
        effective
    }

    /// Total obtained by replaying effective movements from zero.
    pub fn replayed_total(&self) -> i64 {
        self.replay().iter().map(|m| m.delta()).sum()
    }

    /// Check continuity of both the physical chain and the replay, and that
    /// the replay reproduces `expected`.
    pub fn verify(&self, expected: i64) -> DomainResult<()> {
        let mut running = 0;
        for m in &self.movements {
            if m.before != running {
                return Err(Invariant::Continuity(format!(
                    "movement {} starts at {} but the chain is at {}",
                    m.id, m.before, running
                ))
                .into());
            }
            running = m.after;
        }

        let replay = self.replay();
        if let Some(first) = replay.first() {
            if first.before != 0 {
                return Err(Invariant::Continuity(format!(
                    "first effective movement {} starts at {}",
                    first.id, first.before
                ))
                .into());
            }
        }
        for pair in replay.windows(2) {
            if pair[1].before != pair[0].after {
                return Err(Invariant::Continuity(format!(
                    "movement {} starts at {} after {} ended at {}",
                    pair[1].id, pair[1].before, pair[0].id, pair[0].after
                ))
                .into());
            }
        }

        let replayed = self.replayed_total();
        if replayed != expected {
            return Err(Invariant::Continuity(format!(
                "replay yields {replayed}, lot holds {expected}"
            ))
            .into());
        }
        Ok(())
    }

    fn chain_checks(
        &self,
        current: i64,
        stamp: &MovementStamp,
    ) -> DomainResult<chrono::DateTime<chrono::Utc>> {
        let Some(last) = self.movements.last() else {
            return Ok(stamp.at);
        };
        if last.after != current {
            return Err(Invariant::Continuity(format!(
                "lot holds {current} but the last movement ended at {}",
                last.after
            ))
            .into());
        }
        if stamp.sequence <= last.sequence {
            return Err(DomainError::conflict(format!(
                "movement sequence {} is not after {}",
                stamp.sequence, last.sequence
            )));
        }
        Ok(stamp.at.max(last.occurred_at))
    }

    fn last_written(&self) -> DomainResult<&Movement> {
        self.movements
            .last()
            .ok_or_else(|| DomainError::invariant(Invariant::Continuity("empty ledger".into())))
    }
}
