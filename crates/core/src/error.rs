//! Domain error model.

use thiserror::Error;

use crate::id::MovementId;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Semantic error kind, used by outer layers to map failures (e.g. to HTTP status).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    State,
    Authorisation,
    Invariant,
    External,
}

/// A consistency rule that an operation would have broken.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Invariant {
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    #[error("placement overflow: placed {placed} + {adding} exceeds available {available}")]
    PlacementOverflow {
        placed: i64,
        adding: i64,
        available: i64,
    },

    /// A placement quantity would drop under what is reserved on it.
    #[error("quantity {requested} is below reserved {reserved}")]
    BelowReserved { requested: i64, reserved: i64 },

    #[error("count {counted} is below reserved {reserved}; release reservations first")]
    CountBelowReserved { counted: i64, reserved: i64 },

    #[error("movement {0} is not reversible; issue an adjustment instead")]
    NotReversible(MovementId),

    #[error("not enough free quantity: requested {requested}, free {free}")]
    NotEnoughFree { requested: i64, free: i64 },

    #[error("placement mismatch for item {item}: received {expected}, placed {placed}")]
    PlacementMismatch {
        item: String,
        expected: i64,
        placed: i64,
    },

    /// Lot totals disagree with the sum over its placements.
    #[error("aggregation mismatch: {0}")]
    Aggregation(String),

    /// Ledger replay or movement chaining is broken.
    #[error("ledger continuity broken: {0}")]
    Continuity(String),
}

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts, state). Collaborator failures surface as `External`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced entity is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrent modification; callers retry at the outer boundary.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Operation not permitted in the current state.
    #[error("invalid state: {0}")]
    State(String),

    /// The movement was already compensated by a reversal.
    #[error("movement {0} is already voided")]
    AlreadyVoided(MovementId),

    /// Actor lacks the role, or the same actor tried to sign two stages.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// A consistency invariant would be violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(Invariant),

    /// Blob store / notification sink failure.
    #[error("external collaborator failed: {0}")]
    External(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn state(msg: impl Into<String>) -> Self {
        Self::State(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn invariant(invariant: Invariant) -> Self {
        Self::InvariantViolation(invariant)
    }

    pub fn external(msg: impl Into<String>) -> Self {
        Self::External(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::Validation(_) | DomainError::InvalidId(_) => ErrorKind::Validation,
            DomainError::NotFound(_) => ErrorKind::NotFound,
            DomainError::Conflict(_) => ErrorKind::Conflict,
            DomainError::State(_) | DomainError::AlreadyVoided(_) => ErrorKind::State,
            DomainError::Unauthorized(_) => ErrorKind::Authorisation,
            DomainError::InvariantViolation(_) => ErrorKind::Invariant,
            DomainError::External(_) => ErrorKind::External,
        }
    }

    /// The violated invariant, if this is an invariant failure.
    pub fn as_invariant(&self) -> Option<&Invariant> {
        match self {
            DomainError::InvariantViolation(inv) => Some(inv),
            _ => None,
        }
    }
}

impl From<Invariant> for DomainError {
    fn from(value: Invariant) -> Self {
        DomainError::InvariantViolation(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_taxonomy() {
        assert_eq!(DomainError::validation("x").kind(), ErrorKind::Validation);
        assert_eq!(DomainError::invalid_id("x").kind(), ErrorKind::Validation);
        assert_eq!(DomainError::not_found("lot").kind(), ErrorKind::NotFound);
        assert_eq!(DomainError::conflict("x").kind(), ErrorKind::Conflict);
        assert_eq!(DomainError::state("x").kind(), ErrorKind::State);
        assert_eq!(
            DomainError::AlreadyVoided(MovementId::new()).kind(),
            ErrorKind::State
        );
        assert_eq!(DomainError::unauthorized("x").kind(), ErrorKind::Authorisation);
        assert_eq!(
            DomainError::from(Invariant::NotEnoughFree { requested: 7, free: 3 }).kind(),
            ErrorKind::Invariant
        );
        assert_eq!(DomainError::external("blob").kind(), ErrorKind::External);
    }

    #[test]
    fn invariant_message_carries_quantities() {
        let err = DomainError::from(Invariant::InsufficientStock {
            requested: 10,
            available: 4,
        });
        assert_eq!(
            err.to_string(),
            "invariant violated: insufficient stock: requested 10, available 4"
        );
    }
}
