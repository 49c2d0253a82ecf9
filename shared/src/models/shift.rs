//! Shift reconciliation models and derivations

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};

/// Lifecycle of a counting shift: open → counting → closed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShiftStatus {
    Open,
    Counting,
    Closed,
}

impl ShiftStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShiftStatus::Open => "open",
            ShiftStatus::Counting => "counting",
            ShiftStatus::Closed => "closed",
        }
    }

    /// Only single forward steps are allowed; `Closed` is terminal
    pub fn can_transition_to(&self, next: ShiftStatus) -> bool {
        matches!(
            (self, next),
            (ShiftStatus::Open, ShiftStatus::Counting) | (ShiftStatus::Counting, ShiftStatus::Closed)
        )
    }

    pub fn transition(self, next: ShiftStatus) -> LedgerResult<ShiftStatus> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(LedgerError::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }
}

impl std::str::FromStr for ShiftStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ShiftStatus::Open),
            "counting" => Ok(ShiftStatus::Counting),
            "closed" => Ok(ShiftStatus::Closed),
            other => Err(format!("unknown shift status: {}", other)),
        }
    }
}

impl std::fmt::Display for ShiftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A counting session for one bar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Shift {
    pub id: i64,
    pub bar_id: Uuid,
    pub status: ShiftStatus,
    pub start_time: DateTime<Utc>,
    /// Instant of the ledger snapshot taken by `begin_counting`
    pub counting_started_at: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub opened_by: Uuid,
    pub closed_by: Option<Uuid>,
}

/// One counted stock entry within a shift
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShiftCount {
    pub id: i64,
    pub shift_id: i64,
    pub stock_id: Uuid,
    pub format_id: Uuid,
    pub initial_count: i32,
    pub final_count: Option<i32>,
    pub consumed: Option<i32>,
    pub to_restock: Option<i32>,
    pub counted_at: Option<DateTime<Utc>>,
}

impl ShiftCount {
    pub fn is_recorded(&self) -> bool {
        self.final_count.is_some()
    }
}

/// Values derived from an operator's final count
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountDerivation {
    pub consumed: i32,
    pub to_restock: i32,
}

/// `consumed = initial - final`, `to_restock = max(0, max_threshold - final)`
pub fn derive_count(initial_count: i32, final_count: i32, max_threshold: i32) -> LedgerResult<CountDerivation> {
    if final_count < 0 {
        return Err(LedgerError::NegativeCount(final_count));
    }

    Ok(CountDerivation {
        consumed: initial_count - final_count,
        to_restock: (max_threshold - final_count).max(0),
    })
}

/// Ids of counts that still lack a final value
pub fn missing_counts(counts: &[ShiftCount]) -> Vec<i64> {
    counts
        .iter()
        .filter(|c| !c.is_recorded())
        .map(|c| c.id)
        .collect()
}

/// A count whose stock entry changed after the shift snapshot, or whose
/// consumption came out negative. Reported at close; never blocks it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CountAnomaly {
    pub count_id: i64,
    pub stock_id: Uuid,
    pub format_id: Uuid,
    pub initial_count: i32,
    pub final_count: i32,
    pub consumed: i32,
    pub transferred_in_since_snapshot: i64,
    /// Consumption once mid-shift transfers are taken into account
    pub adjusted_consumed: i64,
}

/// Inspect a recorded count for mid-shift ledger movement.
///
/// Returns `None` for unrecorded counts and for clean ones.
pub fn detect_anomaly(count: &ShiftCount, transferred_in_since_snapshot: i64) -> Option<CountAnomaly> {
    let final_count = count.final_count?;
    let consumed = count.initial_count - final_count;

    if transferred_in_since_snapshot == 0 && consumed >= 0 {
        return None;
    }

    Some(CountAnomaly {
        count_id: count.id,
        stock_id: count.stock_id,
        format_id: count.format_id,
        initial_count: count.initial_count,
        final_count,
        consumed,
        transferred_in_since_snapshot,
        adjusted_consumed: i64::from(count.initial_count) + transferred_in_since_snapshot
            - i64::from(final_count),
    })
}

/// Absolute ledger value written for one counted stock entry at close
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileSet {
    pub count_id: i64,
    pub stock_id: Uuid,
    pub final_count: i32,
}

/// Everything a shift close writes and reports, computed before any write
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClosePlan {
    pub sets: Vec<ReconcileSet>,
    pub anomalies: Vec<CountAnomaly>,
}

/// Plan the close of `shift_id` from its counts.
///
/// `transferred_in` holds, per stock entry, the units transferred in since the
/// counting snapshot. Fails with `IncompleteCounts` while any count is
/// unrecorded; otherwise every stock entry is set to its final count.
pub fn plan_close(
    shift_id: i64,
    counts: &[ShiftCount],
    transferred_in: &HashMap<Uuid, i64>,
) -> LedgerResult<ClosePlan> {
    let missing = missing_counts(counts);
    if !missing.is_empty() {
        return Err(LedgerError::IncompleteCounts { shift_id, missing });
    }

    let mut plan = ClosePlan {
        sets: Vec::with_capacity(counts.len()),
        anomalies: Vec::new(),
    };
    for count in counts {
        let Some(final_count) = count.final_count else {
            continue;
        };
        let moved = transferred_in.get(&count.stock_id).copied().unwrap_or(0);
        if let Some(anomaly) = detect_anomaly(count, moved) {
            plan.anomalies.push(anomaly);
        }
        plan.sets.push(ReconcileSet {
            count_id: count.id,
            stock_id: count.stock_id,
            final_count,
        });
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(id: i64, initial: i32, final_count: Option<i32>) -> ShiftCount {
        ShiftCount {
            id,
            shift_id: 1,
            stock_id: Uuid::new_v4(),
            format_id: Uuid::new_v4(),
            initial_count: initial,
            final_count,
            consumed: None,
            to_restock: None,
            counted_at: None,
        }
    }

    #[test]
    fn test_forward_transitions_only() {
        assert_eq!(ShiftStatus::Open.transition(ShiftStatus::Counting), Ok(ShiftStatus::Counting));
        assert_eq!(ShiftStatus::Counting.transition(ShiftStatus::Closed), Ok(ShiftStatus::Closed));

        assert!(ShiftStatus::Open.transition(ShiftStatus::Closed).is_err());
        assert!(ShiftStatus::Counting.transition(ShiftStatus::Open).is_err());
        assert!(ShiftStatus::Closed.transition(ShiftStatus::Open).is_err());
        assert!(ShiftStatus::Closed.transition(ShiftStatus::Counting).is_err());
        assert!(ShiftStatus::Counting.transition(ShiftStatus::Counting).is_err());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [ShiftStatus::Open, ShiftStatus::Counting, ShiftStatus::Closed] {
            assert_eq!(status.as_str().parse::<ShiftStatus>(), Ok(status));
        }
        assert!("paused".parse::<ShiftStatus>().is_err());
    }

    #[test]
    fn test_derive_count() {
        assert_eq!(
            derive_count(10, 8, 50),
            Ok(CountDerivation { consumed: 2, to_restock: 42 })
        );
        assert_eq!(
            derive_count(0, 5, 4),
            Ok(CountDerivation { consumed: -5, to_restock: 0 })
        );
        assert_eq!(derive_count(3, -1, 10), Err(LedgerError::NegativeCount(-1)));
    }

    #[test]
    fn test_missing_counts() {
        let counts = vec![count(1, 10, Some(8)), count(2, 20, None), count(3, 0, None)];
        assert_eq!(missing_counts(&counts), vec![2, 3]);
    }

    #[test]
    fn test_detect_anomaly_clean_count() {
        assert_eq!(detect_anomaly(&count(1, 10, Some(8)), 0), None);
        assert_eq!(detect_anomaly(&count(1, 10, None), 5), None);
    }

    #[test]
    fn test_detect_anomaly_mid_shift_transfer() {
        let anomaly = detect_anomaly(&count(7, 10, Some(25)), 20).unwrap();
        assert_eq!(anomaly.consumed, -15);
        assert_eq!(anomaly.transferred_in_since_snapshot, 20);
        assert_eq!(anomaly.adjusted_consumed, 5);
    }

    #[test]
    fn test_detect_anomaly_negative_consumption_without_transfer() {
        let anomaly = detect_anomaly(&count(4, 0, Some(5)), 0).unwrap();
        assert_eq!(anomaly.consumed, -5);
        assert_eq!(anomaly.adjusted_consumed, -5);
    }

    #[test]
    fn test_plan_close_requires_every_count() {
        let counts = vec![count(1, 10, Some(8)), count(2, 20, None)];
        assert_eq!(
            plan_close(5, &counts, &HashMap::new()),
            Err(LedgerError::IncompleteCounts { shift_id: 5, missing: vec![2] })
        );
    }

    #[test]
    fn test_plan_close_folds_transfers_into_anomalies() {
        let counts = vec![count(1, 10, Some(8)), count(2, 10, Some(25))];
        let transferred_in = HashMap::from([(counts[1].stock_id, 20)]);

        let plan = plan_close(5, &counts, &transferred_in).unwrap();
        assert_eq!(plan.sets.len(), 2);
        assert_eq!(plan.sets[1].final_count, 25);
        assert_eq!(plan.anomalies.len(), 1);
        assert_eq!(plan.anomalies[0].count_id, 2);
        assert_eq!(plan.anomalies[0].adjusted_consumed, 5);
    }
}
