//! First-expiring-first-out pick planner.
//!
//! Pure and deterministic over candidate snapshots: the same inputs always
//! produce the same picks, in the same order.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use medstock_catalog::{InstitutionKey, ProductCode};
use medstock_core::{BinId, LotId, PlacementId};

/// A placement of a candidate lot, with its free (unreserved) quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidatePlacement {
    pub placement: PlacementId,
    pub bin: BinId,
    pub bin_code: String,
    pub free: i64,
}

/// Snapshot of a lot considered by the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FefoCandidate {
    pub lot_id: LotId,
    pub lot_number: String,
    pub product: ProductCode,
    pub institution: InstitutionKey,
    /// Lot state is `available`.
    pub pickable: bool,
    pub expiry: NaiveDate,
    pub received_on: NaiveDate,
    pub placements: Vec<CandidatePlacement>,
}

impl FefoCandidate {
    pub fn free_qty(&self) -> i64 {
        self.placements.iter().map(|p| p.free.max(0)).sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FefoPolicy {
    pub today: NaiveDate,
    /// Picks from lots expiring within this many days are flagged `near_expiry`.
    pub near_expiry_days: u32,
}

impl FefoPolicy {
    pub fn eligible(&self, c: &FefoCandidate, product: &ProductCode, institution: &InstitutionKey) -> bool {
        c.pickable
            && &c.product == product
            && &c.institution == institution
            && c.expiry > self.today
            && c.free_qty() > 0
    }

    /// A window that runs past the calendar range counts as not near.
    pub fn is_near_expiry(&self, expiry: NaiveDate) -> bool {
        self.today
            .checked_add_signed(Duration::days(i64::from(self.near_expiry_days)))
            .is_some_and(|limit| expiry <= limit)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedPick {
    pub lot_id: LotId,
    pub lot_number: String,
    pub expiry: NaiveDate,
    pub placement: PlacementId,
    pub bin: BinId,
    pub bin_code: String,
    pub qty: i64,
    pub near_expiry: bool,
}

/// Allocation for one request line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinePlan {
    pub product: ProductCode,
    pub requested: i64,
    /// Free quantity across all eligible candidates at planning time.
    pub free_total: i64,
    pub picks: Vec<PlannedPick>,
    pub shortfall: i64,
    pub shortfall_reason: Option<String>,
}

impl LinePlan {
    pub fn allocated(&self) -> i64 {
        self.picks.iter().map(|p| p.qty).sum()
    }
}

/// Eligible candidates in pick order: expiry, then received-on, then lot number.
pub fn ordered_candidates<'a>(
    candidates: &'a [FefoCandidate],
    product: &ProductCode,
    institution: &InstitutionKey,
    policy: &FefoPolicy,
) -> Vec<&'a FefoCandidate> {
    let mut eligible: Vec<&FefoCandidate> = candidates
        .iter()
        .filter(|c| policy.eligible(c, product, institution))
        .collect();
    eligible.sort_by(|a, b| {
        a.expiry
            .cmp(&b.expiry)
            .then(a.received_on.cmp(&b.received_on))
            .then_with(|| a.lot_number.cmp(&b.lot_number))
            .then(a.lot_id.cmp(&b.lot_id))
    });
    eligible
}

/// Greedily allocate `qty` of `product` over the candidates.
///
/// Placements are visited by bin code; each contributes
/// `min(remaining, free)`. Stops when the line is covered or the candidates
/// run out, recording the shortfall.
pub fn plan_line(
    product: &ProductCode,
    institution: &InstitutionKey,
    qty: i64,
    candidates: &[FefoCandidate],
    policy: &FefoPolicy,
) -> LinePlan {
    let ordered = ordered_candidates(candidates, product, institution, policy);
    let free_total = ordered.iter().map(|c| c.free_qty()).sum();

    let mut remaining = qty.max(0);
    let mut picks = Vec::new();
    for lot in ordered {
        if remaining == 0 {
            break;
        }
        let mut placements: Vec<&CandidatePlacement> =
            lot.placements.iter().filter(|p| p.free > 0).collect();
        placements.sort_by(|a, b| a.bin_code.cmp(&b.bin_code).then(a.placement.cmp(&b.placement)));

        for p in placements {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(p.free);
            picks.push(PlannedPick {
                lot_id: lot.lot_id,
                lot_number: lot.lot_number.clone(),
                expiry: lot.expiry,
                placement: p.placement,
                bin: p.bin,
                bin_code: p.bin_code.clone(),
                qty: take,
                near_expiry: policy.is_near_expiry(lot.expiry),
            });
            remaining -= take;
        }
    }

    let allocated = qty.max(0) - remaining;
    let shortfall_reason = if remaining == 0 {
        None
    } else if allocated == 0 {
        Some("no lots with free stock meet the expiry rules".to_string())
    } else {
        Some(format!("only {allocated} of {qty} units available"))
    };

    LinePlan {
        product: product.clone(),
        requested: qty,
        free_total,
        picks,
        shortfall: remaining,
        shortfall_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn product() -> ProductCode {
        ProductCode::parse("010.000.0104.00").unwrap()
    }

    fn institution() -> InstitutionKey {
        InstitutionKey::parse("HGZ-01").unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn policy() -> FefoPolicy {
        FefoPolicy {
            today: date(2025, 10, 1),
            near_expiry_days: 90,
        }
    }

    fn candidate(number: &str, expiry: NaiveDate, bins: &[(&str, i64)]) -> FefoCandidate {
        let lot_id = LotId::new();
        FefoCandidate {
            lot_id,
            lot_number: number.into(),
            product: product(),
            institution: institution(),
            pickable: true,
            expiry,
            received_on: date(2025, 9, 1),
            placements: bins
                .iter()
                .map(|(code, free)| CandidatePlacement {
                    placement: PlacementId::new(),
                    bin: BinId::new(),
                    bin_code: (*code).into(),
                    free: *free,
                })
                .collect(),
        }
    }

    #[test]
    fn out_of_range_window_is_not_near_expiry() {
        let huge = FefoPolicy {
            near_expiry_days: u32::MAX,
            ..policy()
        };
        assert!(policy().is_near_expiry(date(2025, 11, 1)));
        assert!(!huge.is_near_expiry(date(2025, 11, 1)));

        let a = candidate("A", date(2025, 11, 1), &[("A-01", 30)]);
        let plan = plan_line(&product(), &institution(), 10, &[a], &huge);
        assert_eq!(plan.allocated(), 10);
        assert!(!plan.picks[0].near_expiry);
    }

    #[test]
    fn earliest_expiry_is_picked_first() {
        let a = candidate("A", date(2026, 1, 15), &[("A-01", 30)]);
        let b = candidate("B", date(2026, 3, 1), &[("B-01", 40)]);
        let plan = plan_line(&product(), &institution(), 50, &[b.clone(), a.clone()], &policy());

        let got: Vec<_> = plan.picks.iter().map(|p| (p.lot_id, p.qty)).collect();
        assert_eq!(got, vec![(a.lot_id, 30), (b.lot_id, 20)]);
        assert_eq!(plan.shortfall, 0);
        assert_eq!(plan.free_total, 70);
    }

    #[test]
    fn exact_match_has_no_shortfall_and_one_over_has_one() {
        let a = candidate("A", date(2026, 1, 15), &[("A-01", 30)]);
        let exact = plan_line(&product(), &institution(), 30, &[a.clone()], &policy());
        assert_eq!((exact.allocated(), exact.shortfall), (30, 0));

        let over = plan_line(&product(), &institution(), 31, &[a], &policy());
        assert_eq!((over.allocated(), over.shortfall), (30, 1));
        assert!(over.shortfall_reason.is_some());
    }

    #[test]
    fn placements_are_visited_by_bin_code() {
        let a = candidate("A", date(2026, 1, 15), &[("C-03", 5), ("A-01", 5), ("B-02", 5)]);
        let plan = plan_line(&product(), &institution(), 12, &[a], &policy());
        let bins: Vec<_> = plan.picks.iter().map(|p| (p.bin_code.as_str(), p.qty)).collect();
        assert_eq!(bins, vec![("A-01", 5), ("B-02", 5), ("C-03", 2)]);
    }

    #[test]
    fn ineligible_lots_are_skipped() {
        let expired = candidate("X", date(2025, 10, 1), &[("A-01", 10)]);
        let mut quarantined = candidate("Q", date(2026, 1, 1), &[("A-01", 10)]);
        quarantined.pickable = false;
        let reserved = candidate("R", date(2026, 1, 1), &[("A-01", 0)]);
        let mut foreign = candidate("F", date(2026, 1, 1), &[("A-01", 10)]);
        foreign.institution = InstitutionKey::parse("OTHER").unwrap();

        let plan = plan_line(
            &product(),
            &institution(),
            5,
            &[expired, quarantined, reserved, foreign],
            &policy(),
        );
        assert!(plan.picks.is_empty());
        assert_eq!(plan.shortfall, 5);
    }

    #[test]
    fn ties_break_on_received_on_then_lot_number() {
        let mut late = candidate("A", date(2026, 1, 15), &[("A-01", 5)]);
        late.received_on = date(2025, 9, 20);
        let b = candidate("B", date(2026, 1, 15), &[("A-02", 5)]);
        let c = candidate("C", date(2026, 1, 15), &[("A-03", 5)]);

        let plan = plan_line(&product(), &institution(), 15, &[late.clone(), c.clone(), b.clone()], &policy());
        let order: Vec<_> = plan.picks.iter().map(|p| p.lot_id).collect();
        assert_eq!(order, vec![b.lot_id, c.lot_id, late.lot_id]);
    }

    #[test]
    fn near_expiry_lots_are_flagged() {
        let soon = candidate("S", date(2025, 12, 1), &[("A-01", 5)]);
        let later = candidate("L", date(2026, 6, 1), &[("A-02", 5)]);
        let plan = plan_line(&product(), &institution(), 10, &[soon, later], &policy());
        let flags: Vec<_> = plan.picks.iter().map(|p| p.near_expiry).collect();
        assert_eq!(flags, vec![true, false]);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: picks never exceed free stock per placement nor the
        /// requested qty, and allocated + shortfall = requested.
        #[test]
        fn allocation_is_bounded(
            qty in 0i64..500,
            lots in prop::collection::vec((0i64..400, prop::collection::vec(0i64..60, 1..4)), 0..6)
        ) {
            let candidates: Vec<FefoCandidate> = lots
                .iter()
                .enumerate()
                .map(|(i, (days, frees))| {
                    let bins: Vec<(String, i64)> = frees
                        .iter()
                        .enumerate()
                        .map(|(j, f)| (format!("B-{j:02}"), *f))
                        .collect();
                    let refs: Vec<(&str, i64)> = bins.iter().map(|(c, f)| (c.as_str(), *f)).collect();
                    candidate(&format!("L{i}"), policy().today + Duration::days(*days), &refs)
                })
                .collect();

            let plan = plan_line(&product(), &institution(), qty, &candidates, &policy());
            prop_assert_eq!(plan.allocated() + plan.shortfall, qty);
            prop_assert!(plan.allocated() <= plan.free_total);
            for pick in &plan.picks {
                let free = candidates
                    .iter()
                    .flat_map(|c| c.placements.iter())
                    .find(|p| p.placement == pick.placement)
                    .map(|p| p.free)
                    .unwrap();
                prop_assert!(pick.qty > 0 && pick.qty <= free);
            }

            let again = plan_line(&product(), &institution(), qty, &candidates, &policy());
            prop_assert_eq!(plan, again);
        }
    }
}
