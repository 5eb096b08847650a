//! Reservation protocol: soft holds on placement quantity.
//!
//! A reservation moves quantity from free to reserved on one placement (and
//! the lot mirror). It is either released back to free or consumed into an
//! `outbound-order` movement. Nothing expires on its own.

use serde::{Deserialize, Serialize};

use medstock_core::{BinId, DomainError, DomainResult, Invariant, LotId, MovementId, PlacementId};
use medstock_ledger::{MovementKind, MovementStamp};

use crate::{LotRecord, LotState};

/// A hold taken on a placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub lot_id: LotId,
    pub placement: PlacementId,
    pub bin: BinId,
    pub qty: i64,
}

/// Result of consuming a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Consumption {
    /// `None` when nothing was picked.
    pub movement: Option<MovementId>,
    pub picked: i64,
    pub released: i64,
}

impl LotRecord {
    /// Hold `qty` of the placement's free quantity.
    ///
    /// Fails with `not-enough-free` when `qty` exceeds `qty - reserved_qty`.
    pub fn reserve(&mut self, placement: PlacementId, qty: i64) -> DomainResult<Reservation> {
        if qty <= 0 {
            return Err(DomainError::validation(format!(
                "reservation qty must be positive, got {qty}"
            )));
        }
        if self.lot.state != LotState::Available {
            return Err(DomainError::state(format!(
                "lot {} is {}",
                self.lot.number, self.lot.state
            )));
        }
        let lot_id = self.lot.id;
        let p = self.placement_mut(placement)?;
        let free = p.free_qty();
        if qty > free {
            return Err(Invariant::NotEnoughFree { requested: qty, free }.into());
        }
        p.reserved_qty += qty;
        let bin = p.bin;
        self.lot.reserved_qty += qty;

        Ok(Reservation {
            lot_id,
            placement,
            bin,
            qty,
        })
    }

    /// Give back `qty` of a placement's reservation.
    pub fn release(&mut self, placement: PlacementId, qty: i64) -> DomainResult<()> {
        if qty < 0 {
            return Err(DomainError::validation(format!(
                "release qty cannot be negative, got {qty}"
            )));
        }
        let p = self.placement_mut(placement)?;
        if qty > p.reserved_qty {
            return Err(DomainError::state(format!(
                "cannot release {qty}; placement {} holds {} reserved",
                p.id, p.reserved_qty
            )));
        }
        p.reserved_qty -= qty;
        self.lot.reserved_qty -= qty;
        Ok(())
    }

    /// Turn a reservation of `reserved` units into an outbound movement of
    /// `picked` units. The unpicked remainder is released; picking nothing
    /// writes no movement.
    pub fn consume(
        &mut self,
        placement: PlacementId,
        reserved: i64,
        picked: i64,
        reference: impl Into<String>,
        stamp: MovementStamp,
    ) -> DomainResult<Consumption> {
        if picked < 0 || picked > reserved {
            return Err(DomainError::validation(format!(
                "picked qty {picked} must be within 0..={reserved}"
            )));
        }
        if picked > 0 && self.lot.state != LotState::Available {
            return Err(DomainError::state(format!(
                "lot {} is {}; release the reservation instead",
                self.lot.number, self.lot.state
            )));
        }

        self.release(placement, reserved)?;
        let movement = if picked > 0 {
            Some(self.withdraw(
                placement,
                picked,
                MovementKind::OutboundOrder,
                "order picking",
                Some(reference.into()),
                stamp,
            )?)
        } else {
            None
        };

        Ok(Consumption {
            movement,
            picked,
            released: reserved - picked,
        })
    }
}
