use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use medstock_catalog::ProductCode;
use medstock_core::{
    ActorId, ArrivalItemId, BinId, BlobId, DocumentId, DomainError, DomainResult, LotId, WarehouseId,
};

/// Money columns of an arrival line, rounded to cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineAmounts {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub unit_price_with_tax: Decimal,
}

impl LineAmounts {
    /// Fails with `validation` when a column leaves the decimal range.
    pub fn compute(unit_price: Decimal, qty: i64, tax_pct: Decimal) -> DomainResult<Self> {
        let overflow = || DomainError::validation(format!("line amount out of range: {qty} x {unit_price}"));
        let rate = tax_pct.checked_div(Decimal::ONE_HUNDRED).ok_or_else(overflow)?;
        let subtotal = unit_price
            .checked_mul(Decimal::from(qty))
            .ok_or_else(overflow)?
            .round_dp(2);
        let tax = subtotal.checked_mul(rate).ok_or_else(overflow)?.round_dp(2);
        let total = subtotal.checked_add(tax).ok_or_else(overflow)?;
        let unit_price_with_tax = Decimal::ONE
            .checked_add(rate)
            .and_then(|factor| unit_price.checked_mul(factor))
            .ok_or_else(overflow)?
            .round_dp(2);
        Ok(Self {
            subtotal,
            tax,
            total,
            unit_price_with_tax,
        })
    }
}

/// An item as captured at reception. Product copies and the tax % are
/// resolved from the catalog by the caller and frozen here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemInput {
    pub id: ArrivalItemId,
    pub product: ProductCode,
    pub description: String,
    pub unit: String,
    pub lot_number: String,
    pub expiry: NaiveDate,
    pub qty_shipped: i64,
    pub qty_received: i64,
    pub unit_price: Decimal,
    pub tax_pct: Decimal,
    pub manufacturer: Option<String>,
    pub brand: Option<String>,
}

/// One bin/qty pair of an item's placement plan. `warehouse` is the bin's
/// owning warehouse as recorded in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPlacement {
    pub bin: BinId,
    pub warehouse: WarehouseId,
    pub qty: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalItem {
    pub id: ArrivalItemId,
    pub product: ProductCode,
    pub description: String,
    pub unit: String,
    pub lot_number: String,
    pub expiry: NaiveDate,
    pub qty_shipped: i64,
    pub qty_received: i64,
    pub unit_price: Decimal,
    pub tax_pct: Decimal,
    pub amounts: LineAmounts,
    pub manufacturer: Option<String>,
    pub brand: Option<String>,
    pub placement_plan: Vec<PlannedPlacement>,
    pub produced_lot: Option<LotId>,
}

impl ArrivalItem {
    pub fn from_input(input: ItemInput) -> DomainResult<Self> {
        let unit_price = input.unit_price.round_dp(2);
        let amounts = LineAmounts::compute(unit_price, input.qty_received, input.tax_pct)?;
        Ok(Self {
            id: input.id,
            product: input.product,
            description: input.description,
            unit: input.unit,
            lot_number: input.lot_number.trim().to_string(),
            expiry: input.expiry,
            qty_shipped: input.qty_shipped,
            qty_received: input.qty_received,
            unit_price,
            tax_pct: input.tax_pct,
            amounts,
            manufacturer: input.manufacturer,
            brand: input.brand,
            placement_plan: Vec::new(),
            produced_lot: None,
        })
    }

    pub fn reprice(&mut self, unit_price: Decimal) -> DomainResult<()> {
        let unit_price = unit_price.round_dp(2);
        self.amounts = LineAmounts::compute(unit_price, self.qty_received, self.tax_pct)?;
        self.unit_price = unit_price;
        Ok(())
    }

    pub fn planned_qty(&self) -> i64 {
        self.placement_plan.iter().map(|p| p.qty).sum()
    }

    /// Items received with zero quantity produce no lot.
    pub fn produces_lot(&self) -> bool {
        self.qty_received > 0
    }
}

/// Lot produced for an item on approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProducedLot {
    pub item: ArrivalItemId,
    pub lot: LotId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    Remission,
    Invoice,
    QualityCertificate,
    Other,
}

/// An attached document; the content lives in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrivalDocument {
    pub id: DocumentId,
    pub kind: DocumentKind,
    pub blob: BlobId,
    pub description: String,
    pub attached_by: ActorId,
    pub attached_at: DateTime<Utc>,
}
