//! Folio allocation: `<prefix>-<yyyymmdd>-<seq>`.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::NaiveDate;

use medstock_core::DomainResult;

use crate::store::table::lock_row;

/// Per-(prefix, date) counters behind a single serialisation point.
///
/// Sequences start at 1 and are never handed out twice, even when the
/// command that requested the folio later fails.
#[derive(Debug, Default)]
pub struct FolioCounter {
    counters: Mutex<HashMap<(String, NaiveDate), u32>>,
}

impl FolioCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, prefix: &str, date: NaiveDate) -> DomainResult<String> {
        let mut counters = lock_row(&self.counters, "folio counter")?;
        let seq = counters.entry((prefix.to_string(), date)).or_insert(0);
        *seq += 1;
        Ok(format!("{prefix}-{}-{:04}", date.format("%Y%m%d"), *seq))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, d).unwrap()
    }

    #[test]
    fn sequences_are_per_prefix_and_date() {
        let folios = FolioCounter::new();
        assert_eq!(folios.next("ENT", day(1)).unwrap(), "ENT-20251001-0001");
        assert_eq!(folios.next("ENT", day(1)).unwrap(), "ENT-20251001-0002");
        assert_eq!(folios.next("PED", day(1)).unwrap(), "PED-20251001-0001");
        assert_eq!(folios.next("ENT", day(2)).unwrap(), "ENT-20251002-0001");
    }

    #[test]
    fn concurrent_allocation_never_repeats() {
        let folios = Arc::new(FolioCounter::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let folios = Arc::clone(&folios);
                std::thread::spawn(move || {
                    (0..50)
                        .map(|_| folios.next("PED", day(3)).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for h in handles {
            for folio in h.join().unwrap() {
                assert!(seen.insert(folio));
            }
        }
        assert_eq!(seen.len(), 400);
    }
}
