use serde::{Deserialize, Serialize};

use crate::{InstitutionKey, SupplierTaxId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Supplier {
    pub tax_id: SupplierTaxId,
    pub name: String,
}

/// A hospital or health unit that owns warehouses and lots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Institution {
    pub key: InstitutionKey,
    pub name: String,
}
