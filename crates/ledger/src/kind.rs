use serde::{Deserialize, Serialize};

/// Effect of a movement on the lot total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Credit,
    Debit,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementKind {
    #[serde(rename = "inbound-supplier")]
    InboundSupplier,
    #[serde(rename = "outbound-order")]
    OutboundOrder,
    #[serde(rename = "outbound-return")]
    OutboundReturn,
    /// Placement-level move between bins of the same warehouse.
    #[serde(rename = "transfer")]
    Transfer,
    #[serde(rename = "adjust+")]
    AdjustPositive,
    #[serde(rename = "adjust-")]
    AdjustNegative,
    /// Compensates the movement it reverses; its direction is the opposite of the target's.
    #[serde(rename = "reversal")]
    Reversal,
}

impl MovementKind {
    /// Direction of a primary movement. `Reversal` has no intrinsic direction
    /// and reports `Neutral`; use [`crate::Movement::delta`] instead.
    pub fn direction(self) -> Direction {
        match self {
            MovementKind::InboundSupplier | MovementKind::AdjustPositive => Direction::Credit,
            MovementKind::OutboundOrder
            | MovementKind::OutboundReturn
            | MovementKind::AdjustNegative => Direction::Debit,
            MovementKind::Transfer | MovementKind::Reversal => Direction::Neutral,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::InboundSupplier => "inbound-supplier",
            MovementKind::OutboundOrder => "outbound-order",
            MovementKind::OutboundReturn => "outbound-return",
            MovementKind::Transfer => "transfer",
            MovementKind::AdjustPositive => "adjust+",
            MovementKind::AdjustNegative => "adjust-",
            MovementKind::Reversal => "reversal",
        }
    }

    /// Adjustment kind for a signed delta; `None` for zero.
    pub fn adjustment_for(delta: i64) -> Option<Self> {
        match delta.signum() {
            1 => Some(MovementKind::AdjustPositive),
            -1 => Some(MovementKind::AdjustNegative),
            _ => None,
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
