//! Restock advisory
//!
//! Pure read-side ranking of which formats a bar should replenish. Holds
//! no state and takes no locks, so it may run at any time.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::StockEntry;

/// How urgently a stock entry needs replenishment
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Danger,
    Warning,
    Ok,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Danger => write!(f, "danger"),
            Severity::Warning => write!(f, "warning"),
            Severity::Ok => write!(f, "ok"),
        }
    }
}

/// Classify a quantity against its thresholds.
///
/// `danger` at or below the minimum; `warning` within the lowest 30% of the
/// min..max band; `ok` above that.
pub fn classify(current_quantity: i32, min_threshold: i32, max_threshold: i32) -> Severity {
    if current_quantity <= min_threshold {
        return Severity::Danger;
    }

    // current <= min + 0.3 * (max - min), kept in integers
    let above_min = i64::from(current_quantity) - i64::from(min_threshold);
    let band = i64::from(max_threshold) - i64::from(min_threshold);
    if above_min * 10 <= band * 3 {
        Severity::Warning
    } else {
        Severity::Ok
    }
}

/// Units needed to bring an entry back to its ideal (maximum) quantity
pub fn quantity_to_order(current_quantity: i32, ideal_quantity: i32) -> i32 {
    if current_quantity == 0 {
        ideal_quantity
    } else {
        (ideal_quantity - current_quantity).max(0)
    }
}

/// One ranked advisory line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestockLine {
    pub stock_id: Uuid,
    pub format_id: Uuid,
    pub current_quantity: i32,
    pub min_threshold: i32,
    pub max_threshold: i32,
    pub ideal_quantity: i32,
    pub to_order: i32,
    pub severity: Severity,
}

impl RestockLine {
    pub fn from_entry(entry: &StockEntry) -> Self {
        let ideal_quantity = entry.max_threshold;
        Self {
            stock_id: entry.id,
            format_id: entry.format_id,
            current_quantity: entry.current_quantity,
            min_threshold: entry.min_threshold,
            max_threshold: entry.max_threshold,
            ideal_quantity,
            to_order: quantity_to_order(entry.current_quantity, ideal_quantity),
            severity: classify(entry.current_quantity, entry.min_threshold, entry.max_threshold),
        }
    }
}

/// Rank a bar's entries by descending `to_order`.
///
/// Ties break on severity (danger first) and then stock id, so the output
/// depends only on the input rows.
pub fn advise(entries: &[StockEntry]) -> Vec<RestockLine> {
    let mut lines: Vec<RestockLine> = entries.iter().map(RestockLine::from_entry).collect();
    lines.sort_by(|a, b| {
        b.to_order
            .cmp(&a.to_order)
            .then(a.severity.cmp(&b.severity))
            .then(a.stock_id.cmp(&b.stock_id))
    });
    lines
}

/// Totals over an advisory
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestockSummary {
    pub danger_count: usize,
    pub warning_count: usize,
    pub ok_count: usize,
    pub total_to_order: i64,
}

pub fn summarize(lines: &[RestockLine]) -> RestockSummary {
    lines.iter().fold(RestockSummary::default(), |mut acc, line| {
        match line.severity {
            Severity::Danger => acc.danger_count += 1,
            Severity::Warning => acc.warning_count += 1,
            Severity::Ok => acc.ok_count += 1,
        }
        acc.total_to_order += i64::from(line.to_order);
        acc
    })
}
