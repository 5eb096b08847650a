use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use medstock_catalog::{InstitutionKey, ProductCode, SupplierTaxId};
use medstock_core::{ActorId, ArrivalItemId, LotId, WarehouseId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotState {
    Available,
    Expired,
    Quarantined,
    Returned,
    Consumed,
}

impl LotState {
    pub fn as_str(self) -> &'static str {
        match self {
            LotState::Available => "available",
            LotState::Expired => "expired",
            LotState::Quarantined => "quarantined",
            LotState::Returned => "returned",
            LotState::Consumed => "consumed",
        }
    }
}

impl core::fmt::Display for LotState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural identity of a lot: one per (product, number, institution).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LotIdentity {
    pub product: ProductCode,
    pub number: String,
    pub institution: InstitutionKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub id: LotId,
    pub number: String,
    pub product: ProductCode,
    pub institution: InstitutionKey,
    /// Lots are bound to the warehouse that received them.
    pub warehouse: WarehouseId,
    pub expiry: NaiveDate,
    pub initial_qty: i64,
    /// Mirrors the sum of placement quantities.
    pub available_qty: i64,
    /// Mirrors the sum of placement reservations.
    pub reserved_qty: i64,
    pub unit_price: Decimal,
    pub state: LotState,
    pub received_on: NaiveDate,
    pub supplier: Option<SupplierTaxId>,
    pub source_item: Option<ArrivalItemId>,
    pub state_reason: Option<String>,
    pub state_changed_by: Option<ActorId>,
    pub state_changed_at: Option<DateTime<Utc>>,
    pub created_by: ActorId,
    pub created_at: DateTime<Utc>,
}

impl Lot {
    pub fn identity(&self) -> LotIdentity {
        LotIdentity {
            product: self.product.clone(),
            number: self.number.clone(),
            institution: self.institution.clone(),
        }
    }

    pub fn free_qty(&self) -> i64 {
        self.available_qty - self.reserved_qty
    }

    /// Value of the lot as received.
    pub fn total_value(&self) -> Decimal {
        (Decimal::from(self.initial_qty) * self.unit_price).round_dp(2)
    }

    pub fn is_expired_on(&self, today: NaiveDate) -> bool {
        self.expiry <= today
    }
}

/// Input to [`crate::LotRecord::create`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLot {
    pub id: LotId,
    pub product: ProductCode,
    pub number: String,
    pub institution: InstitutionKey,
    pub warehouse: WarehouseId,
    pub expiry: NaiveDate,
    pub initial_qty: i64,
    pub unit_price: Decimal,
    pub received_on: NaiveDate,
    pub supplier: Option<SupplierTaxId>,
    pub source_item: Option<ArrivalItemId>,
}

impl NewLot {
    pub fn identity(&self) -> LotIdentity {
        LotIdentity {
            product: self.product.clone(),
            number: self.number.trim().to_string(),
            institution: self.institution.clone(),
        }
    }
}
