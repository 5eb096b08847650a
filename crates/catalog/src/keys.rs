//! Natural keys of catalog entities.

use serde::{Deserialize, Serialize};

use medstock_core::{DomainError, DomainResult};

macro_rules! natural_key {
    ($(#[$meta:meta])* $t:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $t(String);

        impl $t {
            /// Parse a key, trimming surrounding whitespace. Empty keys are rejected.
            pub fn parse(raw: impl AsRef<str>) -> DomainResult<Self> {
                let trimmed = raw.as_ref().trim();
                if trimmed.is_empty() {
                    return Err(DomainError::validation(concat!($what, " cannot be empty")));
                }
                Ok(Self(trimmed.to_string()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

natural_key!(
    /// Institutional product code (e.g. `010.000.0104.00`).
    ProductCode,
    "product code"
);
natural_key!(
    /// Supplier tax id (RFC).
    SupplierTaxId,
    "supplier tax id"
);
natural_key!(InstitutionKey, "institution key");
