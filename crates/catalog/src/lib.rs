//! Catalog reference data: products, suppliers, institutions, warehouses and bins.
//!
//! Read-mostly. Entities are identified by their institutional keys (product
//! code, supplier tax id, institution key) except warehouses and bins, which
//! carry surrogate ids.

pub mod catalog;
pub mod keys;
pub mod party;
pub mod product;
pub mod tax;
pub mod warehouse;

pub use catalog::Catalog;
pub use keys::{InstitutionKey, ProductCode, SupplierTaxId};
pub use party::{Institution, Supplier};
pub use product::{Product, SupplyKind};
pub use tax::TaxClassifier;
pub use warehouse::{Bin, Warehouse};
