//! Product tax classification.
//!
//! Codes whose leading segment belongs to a configured zero-tax family resolve
//! to 0%; every other code resolves to the default rate. The resolved rate is
//! frozen on the arrival item, so changing the table never rewrites history.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ProductCode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxClassifier {
    zero_tax_families: Vec<String>,
    default_rate: Decimal,
}

impl TaxClassifier {
    pub fn new<I, S>(zero_tax_families: I, default_rate: Decimal) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            zero_tax_families: zero_tax_families
                .into_iter()
                .map(Into::into)
                .map(|f: String| f.trim().to_string())
                .filter(|f| !f.is_empty())
                .collect(),
            default_rate,
        }
    }

    pub fn default_rate(&self) -> Decimal {
        self.default_rate
    }

    pub fn zero_tax_families(&self) -> &[String] {
        &self.zero_tax_families
    }

    /// Tax percentage (e.g. `16`) for a product code.
    pub fn rate_for(&self, code: &ProductCode) -> Decimal {
        let segment = leading_segment(code.as_str());
        if self
            .zero_tax_families
            .iter()
            .any(|family| segment.starts_with(family.as_str()))
        {
            Decimal::ZERO
        } else {
            self.default_rate
        }
    }
}

impl Default for TaxClassifier {
    /// Medicine families (010-040) are zero-rated; healing materials and the rest pay 16%.
    fn default() -> Self {
        Self::new(["010", "020", "030", "040"], Decimal::new(16, 0))
    }
}

/// First segment of an institutional code (`010.000.0104.00` -> `010`).
pub fn leading_segment(code: &str) -> &str {
    let code = code.trim();
    code.split(['.', '-', ' '])
        .next()
        .unwrap_or(code)
}
