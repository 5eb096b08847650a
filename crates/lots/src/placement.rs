use serde::{Deserialize, Serialize};

use medstock_core::{BinId, LotId, PlacementId};

/// A quantity of one lot held in one bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub id: PlacementId,
    pub lot_id: LotId,
    pub bin: BinId,
    pub qty: i64,
    pub reserved_qty: i64,
}

impl Placement {
    pub fn new(lot_id: LotId, bin: BinId, qty: i64) -> Self {
        Self {
            id: PlacementId::new(),
            lot_id,
            bin,
            qty,
            reserved_qty: 0,
        }
    }

    pub fn free_qty(&self) -> i64 {
        self.qty - self.reserved_qty
    }

    pub fn is_empty(&self) -> bool {
        self.qty == 0 && self.reserved_qty == 0
    }
}
