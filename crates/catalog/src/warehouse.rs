use serde::{Deserialize, Serialize};

use medstock_core::{BinId, WarehouseId};

use crate::InstitutionKey;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warehouse {
    pub id: WarehouseId,
    pub name: String,
    pub institution: InstitutionKey,
}

/// A physical slot inside a warehouse. Codes are unique within their warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bin {
    pub id: BinId,
    pub warehouse: WarehouseId,
    pub code: String,
    pub active: bool,
}
