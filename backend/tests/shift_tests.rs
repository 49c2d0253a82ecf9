//! Tests for shift reconciliation rules
//! Verifies the state machine, count derivations and closure totals

use std::collections::HashMap;

use proptest::prelude::*;
use shared::{
    derive_count, detect_anomaly, missing_counts, plan_close, LedgerError, ShiftCount, ShiftStatus,
};
use uuid::Uuid;

fn snapshot(id: i64, initial: i32) -> ShiftCount {
    ShiftCount {
        id,
        shift_id: 1,
        stock_id: Uuid::new_v4(),
        format_id: Uuid::new_v4(),
        initial_count: initial,
        final_count: None,
        consumed: None,
        to_restock: None,
        counted_at: None,
    }
}

/// Apply a recorded final count the way the service stores it
fn record(count: &mut ShiftCount, final_count: i32, max_threshold: i32) {
    let derived = derive_count(count.initial_count, final_count, max_threshold).unwrap();
    count.final_count = Some(final_count);
    count.consumed = Some(derived.consumed);
    count.to_restock = Some(derived.to_restock);
}

// =============================================================================
// State machine
// =============================================================================

mod state_machine {
    use super::*;

    #[test]
    fn forward_transitions_only() {
        assert!(ShiftStatus::Open.can_transition_to(ShiftStatus::Counting));
        assert!(ShiftStatus::Counting.can_transition_to(ShiftStatus::Closed));

        assert!(!ShiftStatus::Open.can_transition_to(ShiftStatus::Closed));
        assert!(!ShiftStatus::Counting.can_transition_to(ShiftStatus::Open));
        assert!(!ShiftStatus::Closed.can_transition_to(ShiftStatus::Open));
        assert!(!ShiftStatus::Closed.can_transition_to(ShiftStatus::Counting));
    }

    #[test]
    fn closed_is_terminal() {
        for next in [ShiftStatus::Open, ShiftStatus::Counting, ShiftStatus::Closed] {
            assert!(matches!(
                ShiftStatus::Closed.transition(next),
                Err(LedgerError::InvalidTransition { .. })
            ));
        }
    }

    #[test]
    fn status_strings_roundtrip_through_storage() {
        for status in [ShiftStatus::Open, ShiftStatus::Counting, ShiftStatus::Closed] {
            assert_eq!(status.as_str().parse::<ShiftStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ShiftStatus>().is_err());
    }
}

// =============================================================================
// Closure totals
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// consumed = initial - final, to_restock = max(0, max - final)
    #[test]
    fn count_derivation_formulas(
        initial in 0i32..1_000,
        final_count in 0i32..1_000,
        max_threshold in 0i32..1_000,
    ) {
        let derived = derive_count(initial, final_count, max_threshold).unwrap();
        prop_assert_eq!(derived.consumed, initial - final_count);
        prop_assert_eq!(derived.to_restock, (max_threshold - final_count).max(0));
        prop_assert!(derived.to_restock >= 0);
    }

    /// Negative final counts are always rejected
    #[test]
    fn negative_final_count_rejected(final_count in -1_000i32..0) {
        prop_assert_eq!(
            derive_count(10, final_count, 20),
            Err(LedgerError::NegativeCount(final_count))
        );
    }

    /// Close is refused while any count is unrecorded; once all are recorded
    /// every counted stock entry is set to its final count
    #[test]
    fn closure_totals(
        initials in prop::collection::vec(0i32..500, 1..20),
        finals in prop::collection::vec(0i32..500, 20),
        recorded in 0usize..=20,
        moved in 0i64..50,
    ) {
        let mut counts: Vec<ShiftCount> = initials
            .iter()
            .enumerate()
            .map(|(i, q)| snapshot(i as i64 + 1, *q))
            .collect();

        let recorded = recorded.min(counts.len());
        for (count, final_count) in counts.iter_mut().zip(&finals).take(recorded) {
            record(count, *final_count, 100);
        }

        // Transfers landed in the first entry after the snapshot
        let transferred_in = HashMap::from([(counts[0].stock_id, moved)]);

        match plan_close(1, &counts, &transferred_in) {
            Ok(plan) => {
                prop_assert_eq!(recorded, counts.len());
                prop_assert_eq!(plan.sets.len(), counts.len());
                for (set, count) in plan.sets.iter().zip(&counts) {
                    prop_assert_eq!(set.count_id, count.id);
                    prop_assert_eq!(set.stock_id, count.stock_id);
                    prop_assert_eq!(set.final_count, finals[(count.id - 1) as usize]);
                }
                for anomaly in &plan.anomalies {
                    prop_assert!(anomaly.consumed < 0 || anomaly.transferred_in_since_snapshot > 0);
                }
                if moved > 0 {
                    prop_assert!(plan.anomalies.iter().any(|a| a.stock_id == counts[0].stock_id));
                }
            }
            Err(LedgerError::IncompleteCounts { shift_id, missing }) => {
                prop_assert!(recorded < counts.len());
                prop_assert_eq!(shift_id, 1);
                let expected: Vec<i64> = (recorded as i64 + 1..=counts.len() as i64).collect();
                prop_assert_eq!(missing, expected);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
    }
}

// =============================================================================
// Scenarios
// =============================================================================

mod scenarios {
    use super::*;

    #[test]
    fn three_entries_ten_twenty_zero() {
        let mut counts = vec![snapshot(1, 10), snapshot(2, 20), snapshot(3, 0)];
        assert_eq!(
            counts.iter().map(|c| c.initial_count).collect::<Vec<_>>(),
            vec![10, 20, 0]
        );

        record(&mut counts[0], 8, 30);
        record(&mut counts[1], 20, 30);
        assert_eq!(missing_counts(&counts), vec![3]);
        assert_eq!(
            plan_close(1, &counts, &HashMap::new()),
            Err(LedgerError::IncompleteCounts { shift_id: 1, missing: vec![3] })
        );

        record(&mut counts[2], 5, 30);
        let plan = plan_close(1, &counts, &HashMap::new()).unwrap();

        let ledger: Vec<(Uuid, i32)> = plan.sets.iter().map(|s| (s.stock_id, s.final_count)).collect();
        assert_eq!(
            ledger,
            vec![
                (counts[0].stock_id, 8),
                (counts[1].stock_id, 20),
                (counts[2].stock_id, 5),
            ]
        );

        let consumed: Vec<i32> = counts.iter().map(|c| c.consumed.unwrap()).collect();
        assert_eq!(consumed, vec![2, 0, -5]);

        // 0 -> 5 without a transfer is reported, not refused
        assert_eq!(plan.anomalies.len(), 1);
        assert_eq!(plan.anomalies[0].count_id, 3);
        assert_eq!(plan.anomalies[0].consumed, -5);
    }

    #[test]
    fn close_plan_reports_mid_shift_transfer() {
        let mut counts = vec![snapshot(1, 10), snapshot(2, 12)];
        record(&mut counts[0], 25, 30);
        record(&mut counts[1], 9, 30);
        let transferred_in = HashMap::from([(counts[0].stock_id, 20)]);

        let plan = plan_close(1, &counts, &transferred_in).unwrap();

        assert_eq!(plan.sets[0].final_count, 25);
        assert_eq!(plan.sets[1].final_count, 9);
        assert_eq!(plan.anomalies.len(), 1);
        assert_eq!(plan.anomalies[0].stock_id, counts[0].stock_id);
        assert_eq!(plan.anomalies[0].transferred_in_since_snapshot, 20);
        assert_eq!(plan.anomalies[0].adjusted_consumed, 5);
    }

    #[test]
    fn negative_consumption_is_flagged() {
        let mut count = snapshot(3, 0);
        record(&mut count, 5, 30);

        let anomaly = detect_anomaly(&count, 0).unwrap();
        assert_eq!(anomaly.consumed, -5);
        assert_eq!(anomaly.adjusted_consumed, -5);
    }

    #[test]
    fn mid_shift_transfer_is_flagged_with_adjusted_consumption() {
        let mut count = snapshot(1, 10);
        record(&mut count, 25, 30);

        let anomaly = detect_anomaly(&count, 20).unwrap();
        assert_eq!(anomaly.consumed, -15);
        assert_eq!(anomaly.transferred_in_since_snapshot, 20);
        assert_eq!(anomaly.adjusted_consumed, 5);
    }

    #[test]
    fn clean_count_is_not_flagged() {
        let mut count = snapshot(1, 10);
        record(&mut count, 8, 30);

        assert!(detect_anomaly(&count, 0).is_none());
    }

    #[test]
    fn unrecorded_count_is_not_inspected() {
        assert!(detect_anomaly(&snapshot(1, 10), 5).is_none());
    }
}
