//! In-memory catalog registry.

use std::collections::{BTreeMap, HashMap};

use medstock_core::{BinId, DomainError, DomainResult, WarehouseId};

use crate::{
    Bin, Institution, InstitutionKey, Product, ProductCode, Supplier, SupplierTaxId, Warehouse,
};

/// Reference data consulted by every pipeline.
///
/// Registration enforces natural-key uniqueness; nothing is ever removed
/// (bins are deactivated instead).
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    products: BTreeMap<ProductCode, Product>,
    suppliers: BTreeMap<SupplierTaxId, Supplier>,
    institutions: BTreeMap<InstitutionKey, Institution>,
    warehouses: HashMap<WarehouseId, Warehouse>,
    bins: HashMap<BinId, Bin>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_product(&mut self, product: Product) -> DomainResult<()> {
        if product.description.trim().is_empty() {
            return Err(DomainError::validation("product description cannot be empty"));
        }
        if product.unit.trim().is_empty() {
            return Err(DomainError::validation("product unit cannot be empty"));
        }
        if self.products.contains_key(&product.code) {
            return Err(DomainError::conflict(format!(
                "product {} already registered",
                product.code
            )));
        }
        self.products.insert(product.code.clone(), product);
        Ok(())
    }

    pub fn product(&self, code: &ProductCode) -> DomainResult<&Product> {
        self.products
            .get(code)
            .ok_or_else(|| DomainError::not_found(format!("product {code}")))
    }

    pub fn products(&self) -> impl Iterator<Item = &Product> {
        self.products.values()
    }

    pub fn register_supplier(
        &mut self,
        tax_id: SupplierTaxId,
        name: impl Into<String>,
    ) -> DomainResult<()> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("supplier name cannot be empty"));
        }
        if self.suppliers.contains_key(&tax_id) {
            return Err(DomainError::conflict(format!(
                "supplier {tax_id} already registered"
            )));
        }
        self.suppliers
            .insert(tax_id.clone(), Supplier { tax_id, name });
        Ok(())
    }

    pub fn supplier(&self, tax_id: &SupplierTaxId) -> DomainResult<&Supplier> {
        self.suppliers
            .get(tax_id)
            .ok_or_else(|| DomainError::not_found(format!("supplier {tax_id}")))
    }

    pub fn register_institution(
        &mut self,
        key: InstitutionKey,
        name: impl Into<String>,
    ) -> DomainResult<()> {
        if self.institutions.contains_key(&key) {
            return Err(DomainError::conflict(format!(
                "institution {key} already registered"
            )));
        }
        self.institutions.insert(
            key.clone(),
            Institution {
                key,
                name: name.into(),
            },
        );
        Ok(())
    }

    pub fn institution(&self, key: &InstitutionKey) -> DomainResult<&Institution> {
        self.institutions
            .get(key)
            .ok_or_else(|| DomainError::not_found(format!("institution {key}")))
    }

    /// Register a warehouse owned by an existing institution.
    pub fn add_warehouse(
        &mut self,
        name: impl Into<String>,
        institution: &InstitutionKey,
    ) -> DomainResult<WarehouseId> {
        self.institution(institution)?;
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation("warehouse name cannot be empty"));
        }
        let id = WarehouseId::new();
        self.warehouses.insert(
            id,
            Warehouse {
                id,
                name,
                institution: institution.clone(),
            },
        );
        Ok(id)
    }

    pub fn warehouse(&self, id: WarehouseId) -> DomainResult<&Warehouse> {
        self.warehouses
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("warehouse {id}")))
    }

    /// Add a bin; codes are unique within a warehouse.
    pub fn add_bin(&mut self, warehouse: WarehouseId, code: impl Into<String>) -> DomainResult<BinId> {
        self.warehouse(warehouse)?;
        let code = code.into().trim().to_string();
        if code.is_empty() {
            return Err(DomainError::validation("bin code cannot be empty"));
        }
        if self
            .bins
            .values()
            .any(|b| b.warehouse == warehouse && b.code == code)
        {
            return Err(DomainError::conflict(format!(
                "bin {code} already exists in warehouse {warehouse}"
            )));
        }
        let id = BinId::new();
        self.bins.insert(
            id,
            Bin {
                id,
                warehouse,
                code,
                active: true,
            },
        );
        Ok(id)
    }

    pub fn bin(&self, id: BinId) -> DomainResult<&Bin> {
        self.bins
            .get(&id)
            .ok_or_else(|| DomainError::not_found(format!("bin {id}")))
    }

    /// A bin that can receive stock.
    pub fn active_bin(&self, id: BinId) -> DomainResult<&Bin> {
        let bin = self.bin(id)?;
        if !bin.active {
            return Err(DomainError::validation(format!("bin {} is inactive", bin.code)));
        }
        Ok(bin)
    }

    pub fn set_bin_active(&mut self, id: BinId, active: bool) -> DomainResult<()> {
        let bin = self
            .bins
            .get_mut(&id)
            .ok_or_else(|| DomainError::not_found(format!("bin {id}")))?;
        bin.active = active;
        Ok(())
    }

    /// Bins of a warehouse ordered by code.
    pub fn bins_in(&self, warehouse: WarehouseId) -> Vec<&Bin> {
        let mut bins: Vec<&Bin> = self
            .bins
            .values()
            .filter(|b| b.warehouse == warehouse)
            .collect();
        bins.sort_by(|a, b| a.code.cmp(&b.code));
        bins
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SupplyKind;

    fn test_catalog() -> (Catalog, WarehouseId) {
        let mut catalog = Catalog::new();
        let key = InstitutionKey::parse("HGZ-01").unwrap();
        catalog.register_institution(key.clone(), "Hospital General").unwrap();
        let wh = catalog.add_warehouse("Central", &key).unwrap();
        (catalog, wh)
    }

    #[test]
    fn duplicate_product_code_conflicts() {
        let (mut catalog, _) = test_catalog();
        let code = ProductCode::parse("010.000.0104.00").unwrap();
        let product = Product::new(code, "Paracetamol 500mg", "caja", SupplyKind::Medicine);
        catalog.register_product(product.clone()).unwrap();

        let err = catalog.register_product(product).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn bin_codes_are_unique_per_warehouse_only() {
        let (mut catalog, wh) = test_catalog();
        let other = catalog
            .add_warehouse("Farmacia", &InstitutionKey::parse("HGZ-01").unwrap())
            .unwrap();

        catalog.add_bin(wh, "A-01").unwrap();
        assert!(catalog.add_bin(wh, "A-01").is_err());
        assert!(catalog.add_bin(other, "A-01").is_ok());
    }

    #[test]
    fn warehouse_requires_known_institution() {
        let mut catalog = Catalog::new();
        let err = catalog
            .add_warehouse("Central", &InstitutionKey::parse("NOPE").unwrap())
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn inactive_bins_cannot_receive_stock() {
        let (mut catalog, wh) = test_catalog();
        let bin = catalog.add_bin(wh, "B-02").unwrap();
        catalog.set_bin_active(bin, false).unwrap();
        assert!(matches!(
            catalog.active_bin(bin),
            Err(DomainError::Validation(_))
        ));
    }

    #[test]
    fn bins_in_orders_by_code() {
        let (mut catalog, wh) = test_catalog();
        catalog.add_bin(wh, "C-01").unwrap();
        catalog.add_bin(wh, "A-01").unwrap();
        let codes: Vec<_> = catalog.bins_in(wh).iter().map(|b| b.code.clone()).collect();
        assert_eq!(codes, vec!["A-01", "C-01"]);
    }
}
