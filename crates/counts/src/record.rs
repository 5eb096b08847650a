use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use medstock_catalog::ProductCode;
use medstock_core::{
    ActorId, BinId, CountId, DomainError, DomainResult, Invariant, LotId, MovementId, PlacementId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pass {
    First,
    Second,
    Third,
}

impl Pass {
    fn index(self) -> usize {
        match self {
            Pass::First => 0,
            Pass::Second => 1,
            Pass::Third => 2,
        }
    }
}

impl TryFrom<u8> for Pass {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Pass::First),
            2 => Ok(Pass::Second),
            3 => Ok(Pass::Third),
            other => Err(DomainError::validation(format!("count pass must be 1, 2 or 3, got {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassEntry {
    pub value: i64,
    pub actor: ActorId,
    pub at: DateTime<Utc>,
}

/// Placement snapshot taken when a count starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountSubject {
    pub placement: PlacementId,
    pub lot_id: LotId,
    pub lot_number: String,
    pub bin: BinId,
    pub product: ProductCode,
    pub unit_price: Decimal,
    pub system_qty: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRecord {
    pub id: CountId,
    pub subject: CountSubject,
    passes: [Option<PassEntry>; 3],
    completed: bool,
    /// `pass_3 - placement.qty` at commit time.
    difference: Option<i64>,
    adjustment: Option<MovementId>,
    pub started_by: ActorId,
    pub started_at: DateTime<Utc>,
}

impl CountRecord {
    pub fn start(id: CountId, subject: CountSubject, actor: ActorId, at: DateTime<Utc>) -> Self {
        Self {
            id,
            subject,
            passes: [None; 3],
            completed: false,
            difference: None,
            adjustment: None,
            started_by: actor,
            started_at: at,
        }
    }

    pub fn pass(&self, pass: Pass) -> Option<&PassEntry> {
        self.passes[pass.index()].as_ref()
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn difference(&self) -> Option<i64> {
        self.difference
    }

    pub fn adjustment(&self) -> Option<MovementId> {
        self.adjustment
    }

    /// When the third pass was committed.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        if self.completed {
            self.pass(Pass::Third).map(|p| p.at)
        } else {
            None
        }
    }

    /// Record a pass. Passes are write-once; pass 2 and pass 3 both require pass 1.
    pub fn record_pass(&mut self, pass: Pass, value: i64, actor: ActorId, at: DateTime<Utc>) -> DomainResult<()> {
        if self.completed {
            return Err(DomainError::state(format!("count {} is completed", self.id)));
        }
        if value < 0 {
            return Err(DomainError::validation(format!("counted qty cannot be negative, got {value}")));
        }
        if self.pass(pass).is_some() {
            return Err(DomainError::state(format!("pass {pass:?} of count {} is already recorded", self.id)));
        }
        if pass != Pass::First && self.pass(Pass::First).is_none() {
            return Err(DomainError::state(format!("count {} has no first pass yet", self.id)));
        }
        self.passes[pass.index()] = Some(PassEntry { value, actor, at });
        Ok(())
    }

    /// Delta the commit would write against the placement's current state.
    ///
    /// Fails with `count-below-reserved` when pass 3 is under the reservation.
    pub fn commit_delta(&self, current_qty: i64, reserved_qty: i64) -> DomainResult<i64> {
        if self.completed {
            return Err(DomainError::state(format!("count {} is completed", self.id)));
        }
        let third = self
            .pass(Pass::Third)
            .ok_or_else(|| DomainError::state(format!("count {} has no third pass", self.id)))?;
        if third.value < reserved_qty {
            return Err(Invariant::CountBelowReserved {
                counted: third.value,
                reserved: reserved_qty,
            }
            .into());
        }
        Ok(third.value - current_qty)
    }

    pub fn mark_completed(&mut self, difference: i64, adjustment: Option<MovementId>) {
        self.completed = true;
        self.difference = Some(difference);
        self.adjustment = adjustment;
    }

    /// `difference × unit price`, rounded to cents.
    pub fn valued_difference(&self) -> Decimal {
        let diff = Decimal::from(self.difference.unwrap_or_default());
        (diff * self.subject.unit_price).round_dp(2)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveDate;
    use medstock_core::ErrorKind;
    use rust_decimal_macros::dec;

    pub(crate) fn test_time() -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2025, 10, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
            .and_utc()
    }

    pub(crate) fn test_count(system_qty: i64) -> CountRecord {
        CountRecord::start(
            CountId::new(),
            CountSubject {
                placement: PlacementId::new(),
                lot_id: LotId::new(),
                lot_number: "L-100".into(),
                bin: BinId::new(),
                product: ProductCode::parse("010.000.0104.00").unwrap(),
                unit_price: dec!(12.50),
                system_qty,
            },
            ActorId::new(),
            test_time(),
        )
    }

    #[test]
    fn passes_are_write_once_and_ordered() {
        let mut count = test_count(100);
        let who = ActorId::new();
        let err = count.record_pass(Pass::Third, 97, who, test_time()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);

        count.record_pass(Pass::First, 98, who, test_time()).unwrap();
        let err = count.record_pass(Pass::First, 99, who, test_time()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::State);
        assert_eq!(count.pass(Pass::First).unwrap().value, 98);
    }

    #[test]
    fn third_pass_may_skip_the_second() {
        let mut count = test_count(10);
        let who = ActorId::new();
        count.record_pass(Pass::First, 10, who, test_time()).unwrap();
        count.record_pass(Pass::Third, 10, who, test_time()).unwrap();
        assert_eq!(count.commit_delta(10, 0).unwrap(), 0);
    }

    #[test]
    fn below_reserved_is_refused() {
        let mut count = test_count(10);
        let who = ActorId::new();
        count.record_pass(Pass::First, 4, who, test_time()).unwrap();
        count.record_pass(Pass::Third, 4, who, test_time()).unwrap();
        let err = count.commit_delta(10, 5).unwrap_err();
        assert_eq!(
            err.as_invariant(),
            Some(&Invariant::CountBelowReserved { counted: 4, reserved: 5 })
        );
    }

    #[test]
    fn completed_counts_are_immutable() {
        let mut count = test_count(100);
        let who = ActorId::new();
        count.record_pass(Pass::First, 98, who, test_time()).unwrap();
        count.record_pass(Pass::Third, 97, who, test_time()).unwrap();
        let delta = count.commit_delta(100, 0).unwrap();
        count.mark_completed(delta, Some(MovementId::new()));

        assert_eq!(count.difference(), Some(-3));
        assert_eq!(count.valued_difference(), dec!(-37.50));
        assert!(count.record_pass(Pass::Second, 100, who, test_time()).is_err());
        assert!(count.commit_delta(100, 0).is_err());
    }

    #[test]
    fn pass_numbers_outside_range_are_rejected() {
        assert_eq!(Pass::try_from(2).unwrap(), Pass::Second);
        assert_eq!(Pass::try_from(4).unwrap_err().kind(), ErrorKind::Validation);
    }
}
