//! Lot store operations on a single lot record.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use medstock_core::{ActorId, BinId, DomainError, DomainResult, Invariant, MovementId, PlacementId};
use medstock_ledger::{LotLedger, Movement, MovementDraft, MovementKind, MovementStamp};

use crate::{Lot, LotState, NewLot, Placement};

/// A lot together with its placements and movement ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LotRecord {
    pub lot: Lot,
    pub placements: Vec<Placement>,
    pub ledger: LotLedger,
}

/// Placement ids rewritten by a merge: reservations held on `from` now live on `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlacementRemap {
    pub from: PlacementId,
    pub to: PlacementId,
    pub to_bin: BinId,
}

/// Totals before and after [`LotRecord::synchronise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub available_before: i64,
    pub available_after: i64,
    pub reserved_before: i64,
    pub reserved_after: i64,
}

impl SyncOutcome {
    pub fn changed(&self) -> bool {
        self.available_before != self.available_after || self.reserved_before != self.reserved_after
    }
}

impl LotRecord {
    /// Create a lot and write its `inbound-supplier` movement.
    ///
    /// The lot starts with `available_qty = initial_qty` and no placements;
    /// the caller must then `place` exactly `initial_qty` before committing.
    pub fn create(new: NewLot, reference: impl Into<String>, stamp: MovementStamp) -> DomainResult<Self> {
        let number = new.number.trim().to_string();
        if number.is_empty() {
            return Err(DomainError::validation("lot number is required"));
        }
        if new.initial_qty <= 0 {
            return Err(DomainError::validation(format!(
                "initial qty must be positive, got {}",
                new.initial_qty
            )));
        }
        if new.unit_price < Decimal::ZERO {
            return Err(DomainError::validation("unit price cannot be negative"));
        }

        let mut ledger = LotLedger::new(new.id);
        ledger.append(
            0,
            MovementDraft::new(MovementKind::InboundSupplier, new.initial_qty, "supplier arrival")
                .with_reference(reference),
            stamp,
        )?;

        Ok(Self {
            lot: Lot {
                id: new.id,
                number,
                product: new.product,
                institution: new.institution,
                warehouse: new.warehouse,
                expiry: new.expiry,
                initial_qty: new.initial_qty,
                available_qty: new.initial_qty,
                reserved_qty: 0,
                unit_price: new.unit_price.round_dp(2),
                state: LotState::Available,
                received_on: new.received_on,
                supplier: new.supplier,
                source_item: new.source_item,
                state_reason: None,
                state_changed_by: None,
                state_changed_at: None,
                created_by: stamp.actor,
                created_at: stamp.at,
            },
            placements: Vec::new(),
            ledger,
        })
    }

    pub fn placement(&self, id: PlacementId) -> DomainResult<&Placement> {
        self.placements
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| DomainError::not_found(format!("placement {id}")))
    }

    pub(crate) fn placement_mut(&mut self, id: PlacementId) -> DomainResult<&mut Placement> {
        self.placements
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| DomainError::not_found(format!("placement {id}")))
    }

    pub fn placement_at(&self, bin: BinId) -> Option<&Placement> {
        self.placements.iter().find(|p| p.bin == bin)
    }

    pub fn placed_qty(&self) -> i64 {
        self.placements.iter().map(|p| p.qty).sum()
    }

    pub fn movement(&self, id: MovementId) -> DomainResult<&Movement> {
        self.ledger.get(id)
    }

    /// Create or increment the placement at `bin`.
    ///
    /// Fails with `placement-overflow` when the placements would exceed the
    /// lot's available quantity.
    pub fn place(&mut self, bin: BinId, qty: i64) -> DomainResult<PlacementId> {
        if qty <= 0 {
            return Err(DomainError::validation(format!(
                "placement qty must be positive, got {qty}"
            )));
        }
        let placed = self.placed_qty();
        if placed + qty > self.lot.available_qty {
            return Err(Invariant::PlacementOverflow {
                placed,
                adding: qty,
                available: self.lot.available_qty,
            }
            .into());
        }
        Ok(self.upsert_at(bin, qty))
    }

    /// Set a placement to `new_qty`, writing an `adjust±` movement for the delta.
    ///
    /// Returns `None` when the quantity is unchanged (no movement written).
    pub fn resize_placement(
        &mut self,
        placement: PlacementId,
        new_qty: i64,
        reason: impl Into<String>,
        reference: Option<String>,
        stamp: MovementStamp,
    ) -> DomainResult<Option<MovementId>> {
        if new_qty < 0 {
            return Err(DomainError::validation(format!(
                "placement qty cannot be negative, got {new_qty}"
            )));
        }
        let current = self.placement(placement)?;
        if new_qty < current.reserved_qty {
            return Err(Invariant::BelowReserved {
                requested: new_qty,
                reserved: current.reserved_qty,
            }
            .into());
        }
        let delta = new_qty - current.qty;
        let bin = current.bin;
        let Some(kind) = MovementKind::adjustment_for(delta) else {
            return Ok(None);
        };

        let mut draft = MovementDraft::new(kind, delta.abs(), reason).at_bin(bin);
        draft.reference = reference;
        let movement = self.ledger.append(self.lot.available_qty, draft, stamp)?;
        let (id, after) = (movement.id, movement.after);

        self.placement_mut(placement)?.qty = new_qty;
        self.lot.available_qty = after;
        if delta > 0 {
            self.revive();
        }
        Ok(Some(id))
    }

    /// Shift a placement by a signed delta with a mandatory reason.
    pub fn adjust(
        &mut self,
        placement: PlacementId,
        delta: i64,
        reason: impl Into<String>,
        stamp: MovementStamp,
    ) -> DomainResult<MovementId> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("adjustment reason is required"));
        }
        if delta == 0 {
            return Err(DomainError::validation("adjustment delta cannot be zero"));
        }
        let current = self.placement(placement)?.qty;
        if current + delta < 0 {
            return Err(Invariant::InsufficientStock {
                requested: -delta,
                available: current,
            }
            .into());
        }
        self.resize_placement(placement, current + delta, reason, None, stamp)?
            .ok_or_else(|| DomainError::validation("adjustment delta cannot be zero"))
    }

    /// Debit free quantity from a placement (`outbound-order`, `outbound-return`).
    ///
    /// A lot left at zero by an order becomes `consumed`; by a return, `returned`.
    pub fn withdraw(
        &mut self,
        placement: PlacementId,
        qty: i64,
        kind: MovementKind,
        reason: impl Into<String>,
        reference: Option<String>,
        stamp: MovementStamp,
    ) -> DomainResult<MovementId> {
        if !matches!(kind, MovementKind::OutboundOrder | MovementKind::OutboundReturn) {
            return Err(DomainError::validation(format!(
                "{kind} is not a withdrawal"
            )));
        }
        let current = self.placement(placement)?;
        if qty > current.qty {
            return Err(Invariant::InsufficientStock {
                requested: qty,
                available: current.qty,
            }
            .into());
        }
        // Returns may not eat into stock promised to a proposal.
        if kind == MovementKind::OutboundReturn && current.qty - qty < current.reserved_qty {
            return Err(Invariant::BelowReserved {
                requested: current.qty - qty,
                reserved: current.reserved_qty,
            }
            .into());
        }
        if qty > current.free_qty() {
            return Err(Invariant::NotEnoughFree {
                requested: qty,
                free: current.free_qty(),
            }
            .into());
        }
        let bin = current.bin;

        let mut draft = MovementDraft::new(kind, qty, reason).at_bin(bin);
        draft.reference = reference;
        let movement = self.ledger.append(self.lot.available_qty, draft, stamp)?;
        let (id, after) = (movement.id, movement.after);

        self.placement_mut(placement)?.qty -= qty;
        self.lot.available_qty = after;
        if after == 0 && self.lot.state == LotState::Available {
            self.lot.state = match kind {
                MovementKind::OutboundReturn => LotState::Returned,
                _ => LotState::Consumed,
            };
        }
        Ok(id)
    }

    /// Combine placements into one at `target_bin`. Quantities and
    /// reservations are summed; no movement is written.
    pub fn merge_placements(
        &mut self,
        sources: &[PlacementId],
        target_bin: BinId,
    ) -> DomainResult<(PlacementId, Vec<PlacementRemap>)> {
        if sources.is_empty() {
            return Err(DomainError::validation("nothing to merge"));
        }
        if sources
            .iter()
            .enumerate()
            .any(|(i, id)| sources[..i].contains(id))
        {
            return Err(DomainError::validation("placement listed twice in merge"));
        }
        let mut qty = 0;
        let mut reserved = 0;
        for id in sources {
            let p = self.placement(*id)?;
            qty += p.qty;
            reserved += p.reserved_qty;
        }

        let target = match self.placement_at(target_bin) {
            Some(existing) => existing.id,
            None => {
                let created = Placement::new(self.lot.id, target_bin, 0);
                let id = created.id;
                self.placements.push(created);
                id
            }
        };

        let mut remaps = Vec::new();
        for id in sources.iter().filter(|id| **id != target) {
            remaps.push(PlacementRemap {
                from: *id,
                to: target,
                to_bin: target_bin,
            });
        }
        let moved: Vec<PlacementId> = remaps.iter().map(|r| r.from).collect();
        let (moved_qty, moved_reserved) = if sources.contains(&target) {
            let t = self.placement(target)?;
            (qty - t.qty, reserved - t.reserved_qty)
        } else {
            (qty, reserved)
        };

        self.placements.retain(|p| !moved.contains(&p.id));
        let t = self.placement_mut(target)?;
        t.qty += moved_qty;
        t.reserved_qty += moved_reserved;
        Ok((target, remaps))
    }

    /// Carve free quantity off a placement into other bins. Reservations stay
    /// on the source; no movement is written.
    pub fn split_placement(
        &mut self,
        source: PlacementId,
        spec: &[(BinId, i64)],
    ) -> DomainResult<Vec<PlacementId>> {
        let from = self.placement(source)?;
        let from_bin = from.bin;
        let free = from.free_qty();

        let mut total = 0;
        for (bin, qty) in spec {
            if *qty <= 0 {
                return Err(DomainError::validation(format!(
                    "split qty must be positive, got {qty}"
                )));
            }
            if *bin == from_bin {
                return Err(DomainError::validation("cannot split into the source bin"));
            }
            total += qty;
        }
        if total > free {
            return Err(Invariant::NotEnoughFree {
                requested: total,
                free,
            }
            .into());
        }

        self.placement_mut(source)?.qty -= total;
        let ids: Vec<PlacementId> = spec.iter().map(|(bin, qty)| self.upsert_at(*bin, *qty)).collect();
        self.placements.retain(|p| p.id != source || !p.is_empty());
        Ok(ids)
    }

    /// Move free quantity to another bin, writing a neutral `transfer` movement.
    ///
    /// Bin ownership (same warehouse) is checked by the caller against the catalog.
    pub fn transfer(
        &mut self,
        source: PlacementId,
        to_bin: BinId,
        qty: i64,
        reason: impl Into<String>,
        stamp: MovementStamp,
    ) -> DomainResult<(PlacementId, MovementId)> {
        let from = self.placement(source)?;
        if from.bin == to_bin {
            return Err(DomainError::validation("transfer target is the source bin"));
        }
        if qty <= 0 {
            return Err(DomainError::validation(format!(
                "transfer qty must be positive, got {qty}"
            )));
        }
        if qty > from.free_qty() {
            return Err(Invariant::NotEnoughFree {
                requested: qty,
                free: from.free_qty(),
            }
            .into());
        }
        let from_bin = from.bin;

        let draft = MovementDraft::new(MovementKind::Transfer, qty, reason)
            .at_bin(from_bin)
            .to_bin(to_bin);
        let movement = self.ledger.append(self.lot.available_qty, draft, stamp)?.id;

        self.placement_mut(source)?.qty -= qty;
        let target = self.upsert_at(to_bin, qty);
        Ok((target, movement))
    }

    /// Reverse the latest effective movement and undo its placement effect.
    pub fn reverse_movement(
        &mut self,
        target: MovementId,
        reason: impl Into<String>,
        stamp: MovementStamp,
    ) -> DomainResult<MovementId> {
        let original = self.ledger.get(target)?.clone();
        let mut ledger = self.ledger.clone();
        let reversal = ledger.reverse(self.lot.available_qty, target, reason, stamp)?;
        let (id, delta, after) = (reversal.id, reversal.delta(), reversal.after);

        let mut placements = self.placements.clone();

        match original.kind {
            MovementKind::InboundSupplier => {
                for p in &mut placements {
                    if p.reserved_qty > 0 {
                        return Err(Invariant::BelowReserved {
                            requested: 0,
                            reserved: p.reserved_qty,
                        }
                        .into());
                    }
                    p.qty = 0;
                }
            }
            MovementKind::AdjustPositive => {
                let bin = bin_of(&original)?;
                debit_bin(&mut placements, bin, original.qty)?;
            }
            MovementKind::OutboundOrder
            | MovementKind::OutboundReturn
            | MovementKind::AdjustNegative => {
                let bin = bin_of(&original)?;
                match placements.iter_mut().find(|p| p.bin == bin) {
                    Some(p) => p.qty += original.qty,
                    None => placements.push(Placement::new(self.lot.id, bin, original.qty)),
                }
            }
            MovementKind::Transfer => {
                let from = bin_of(&original)?;
                let to = original
                    .to_bin
                    .ok_or_else(|| DomainError::validation("transfer has no destination bin"))?;
                debit_bin(&mut placements, to, original.qty)?;
                match placements.iter_mut().find(|p| p.bin == from) {
                    Some(p) => p.qty += original.qty,
                    None => placements.push(Placement::new(self.lot.id, from, original.qty)),
                }
            }
            MovementKind::Reversal => return Err(Invariant::NotReversible(target).into()),
        }

        self.ledger = ledger;
        self.placements = placements;
        self.lot.available_qty = after;
        if delta > 0 {
            self.revive();
        }
        Ok(id)
    }

    /// Expire, quarantine, or release from quarantine.
    pub fn mark_state(
        &mut self,
        state: LotState,
        reason: impl Into<String>,
        actor: ActorId,
        at: DateTime<Utc>,
    ) -> DomainResult<()> {
        let reason = reason.into();
        if reason.trim().is_empty() {
            return Err(DomainError::validation("state change reason is required"));
        }
        let from = self.lot.state;
        let allowed = match (from, state) {
            (LotState::Expired, _) => false,
            (_, LotState::Expired) => true,
            (LotState::Available, LotState::Quarantined) => true,
            (LotState::Quarantined, LotState::Available) => true,
            _ => false,
        };
        if !allowed {
            return Err(DomainError::state(format!(
                "lot {} cannot go from {from} to {state}",
                self.lot.number
            )));
        }
        self.lot.state = state;
        self.lot.state_reason = Some(reason);
        self.lot.state_changed_by = Some(actor);
        self.lot.state_changed_at = Some(at);
        Ok(())
    }

    /// Recompute lot totals from placements. A no-op on a consistent record.
    pub fn synchronise(&mut self) -> SyncOutcome {
        let outcome = SyncOutcome {
            available_before: self.lot.available_qty,
            available_after: self.placed_qty(),
            reserved_before: self.lot.reserved_qty,
            reserved_after: self.placements.iter().map(|p| p.reserved_qty).sum(),
        };
        self.lot.available_qty = outcome.available_after;
        self.lot.reserved_qty = outcome.reserved_after;
        outcome
    }

    /// Aggregation, reservation bound and ledger reconstruction/continuity.
    pub fn check_invariants(&self) -> DomainResult<()> {
        let placed = self.placed_qty();
        if placed != self.lot.available_qty {
            return Err(Invariant::Aggregation(format!(
                "lot {} holds {} but placements sum to {placed}",
                self.lot.number, self.lot.available_qty
            ))
            .into());
        }
        let reserved: i64 = self.placements.iter().map(|p| p.reserved_qty).sum();
        if reserved != self.lot.reserved_qty {
            return Err(Invariant::Aggregation(format!(
                "lot {} reserves {} but placements reserve {reserved}",
                self.lot.number, self.lot.reserved_qty
            ))
            .into());
        }
        if let Some(p) = self
            .placements
            .iter()
            .find(|p| p.qty < 0 || p.reserved_qty < 0 || p.reserved_qty > p.qty)
        {
            return Err(Invariant::Aggregation(format!(
                "placement {} holds {} with {} reserved",
                p.id, p.qty, p.reserved_qty
            ))
            .into());
        }
        self.ledger.verify(self.lot.available_qty)
    }

    fn upsert_at(&mut self, bin: BinId, qty: i64) -> PlacementId {
        match self.placements.iter_mut().find(|p| p.bin == bin) {
            Some(existing) => {
                existing.qty += qty;
                existing.id
            }
            None => {
                let created = Placement::new(self.lot.id, bin, qty);
                let id = created.id;
                self.placements.push(created);
                id
            }
        }
    }

    /// A credit brings a consumed or returned lot back into stock.
    fn revive(&mut self) {
        if matches!(self.lot.state, LotState::Consumed | LotState::Returned) {
            self.lot.state = LotState::Available;
        }
    }
}

fn bin_of(m: &Movement) -> DomainResult<BinId> {
    m.bin
        .ok_or_else(|| DomainError::validation(format!("movement {} has no bin", m.id)))
}

fn debit_bin(placements: &mut [Placement], bin: BinId, qty: i64) -> DomainResult<()> {
    let p = placements
        .iter_mut()
        .find(|p| p.bin == bin)
        .ok_or_else(|| DomainError::not_found(format!("placement at bin {bin}")))?;
    if p.qty - qty < p.reserved_qty {
        return Err(Invariant::BelowReserved {
            requested: p.qty - qty,
            reserved: p.reserved_qty,
        }
        .into());
    }
    if p.qty < qty {
        return Err(Invariant::InsufficientStock {
            requested: qty,
            available: p.qty,
        }
        .into());
    }
    p.qty -= qty;
    Ok(())
}
