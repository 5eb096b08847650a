use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use medstock_catalog::ProductCode;
use medstock_core::LotId;

use crate::CountRecord;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CountFilter {
    pub product: Option<ProductCode>,
    pub lot: Option<LotId>,
    pub from: Option<DateTime<Utc>>,
    /// Exclusive.
    pub to: Option<DateTime<Utc>>,
}

impl CountFilter {
    pub fn matches(&self, count: &CountRecord) -> bool {
        self.product.as_ref().is_none_or(|p| &count.subject.product == p)
            && self.lot.is_none_or(|l| count.subject.lot_id == l)
            && self.from.is_none_or(|from| count.started_at >= from)
            && self.to.is_none_or(|to| count.started_at < to)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountStatistics {
    pub total: usize,
    pub completed: usize,
    pub with_difference: usize,
    pub surplus_units: i64,
    pub shortage_units: i64,
    pub valued_difference: Decimal,
}

pub fn count_statistics<'a>(
    counts: impl IntoIterator<Item = &'a CountRecord>,
    filter: &CountFilter,
) -> CountStatistics {
    let mut stats = CountStatistics::default();
    for count in counts.into_iter().filter(|c| filter.matches(c)) {
        stats.total += 1;
        if !count.is_completed() {
            continue;
        }
        stats.completed += 1;
        let diff = count.difference().unwrap_or_default();
        if diff != 0 {
            stats.with_difference += 1;
        }
        if diff > 0 {
            stats.surplus_units += diff;
        } else {
            stats.shortage_units -= diff;
        }
        stats.valued_difference += count.valued_difference();
    }
    stats
}
