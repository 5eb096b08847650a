use serde::{Deserialize, Serialize};

use crate::ProductCode;

/// Broad supply family; shown to invoicing as the tax-class hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplyKind {
    Medicine,
    HealingMaterial,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub code: ProductCode,
    pub description: String,
    pub unit: String,
    pub supply_kind: SupplyKind,
    /// Requires cold-chain handling.
    pub cold_chain: bool,
}

impl Product {
    pub fn new(
        code: ProductCode,
        description: impl Into<String>,
        unit: impl Into<String>,
        supply_kind: SupplyKind,
    ) -> Self {
        Self {
            code,
            description: description.into(),
            unit: unit.into(),
            supply_kind,
            cold_chain: false,
        }
    }
}
