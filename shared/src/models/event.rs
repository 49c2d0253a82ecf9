//! Ledger change notifications pushed to connected viewers
//!
//! Every snapshot carries the row `version` written under its row lock.
//! Events are published after commit, so two writers to the same row can
//! reach the bus in either order. Consumers keep the highest version seen
//! per row and ignore anything older, including events still in flight
//! after a re-fetch.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Row shape carried by `ledger-changed` events
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StockSnapshot {
    pub stock_id: Uuid,
    pub bar_id: Uuid,
    pub format_id: Uuid,
    pub current_quantity: i32,
    pub min_threshold: i32,
    pub max_threshold: i32,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReserveSnapshot {
    pub reserve_entry_id: Uuid,
    pub reserve_id: Uuid,
    pub format_id: Uuid,
    pub quantity: i32,
    pub min_quantity: i32,
    pub max_quantity: i32,
    pub version: i64,
}

/// What caused a ledger mutation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChangeCause {
    Transfer { transfer_id: i64 },
    ShiftClose { shift_id: i64 },
    Adjustment { reason: Option<String> },
    Upsert,
}

/// Bus topic: one per bar, one per reserve
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum Topic {
    Bar(Uuid),
    Reserve(Uuid),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Bar(id) => write!(f, "bar:{}", id),
            Topic::Reserve(id) => write!(f, "reserve:{}", id),
        }
    }
}

/// Event published after a ledger transaction commits
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LedgerEvent {
    LedgerChanged {
        bar_id: Uuid,
        cause: ChangeCause,
        entries: Vec<StockSnapshot>,
    },
    ReserveChanged {
        reserve_id: Uuid,
        cause: ChangeCause,
        entries: Vec<ReserveSnapshot>,
    },
}

impl LedgerEvent {
    /// SSE event name, matching the serialized `type` tag
    pub fn event_name(&self) -> &'static str {
        match self {
            LedgerEvent::LedgerChanged { .. } => "ledger-changed",
            LedgerEvent::ReserveChanged { .. } => "reserve-changed",
        }
    }

    pub fn topic(&self) -> Topic {
        match self {
            LedgerEvent::LedgerChanged { bar_id, .. } => Topic::Bar(*bar_id),
            LedgerEvent::ReserveChanged { reserve_id, .. } => Topic::Reserve(*reserve_id),
        }
    }

    /// Drop snapshots whose row already reached an equal or higher version in
    /// `seen`, then record the survivors. Returns `false` when nothing is left.
    pub fn retain_newer(&mut self, seen: &mut HashMap<Uuid, i64>) -> bool {
        match self {
            LedgerEvent::LedgerChanged { entries, .. } => {
                entries.retain(|s| advance_version(seen, s.stock_id, s.version));
                !entries.is_empty()
            }
            LedgerEvent::ReserveChanged { entries, .. } => {
                entries.retain(|s| advance_version(seen, s.reserve_entry_id, s.version));
                !entries.is_empty()
            }
        }
    }
}

fn advance_version(seen: &mut HashMap<Uuid, i64>, row_id: Uuid, version: i64) -> bool {
    match seen.get(&row_id) {
        Some(&latest) if latest >= version => false,
        _ => {
            seen.insert(row_id, version);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_changed_wire_shape() {
        let bar_id = Uuid::new_v4();
        let event = LedgerEvent::LedgerChanged {
            bar_id,
            cause: ChangeCause::Transfer { transfer_id: 42 },
            entries: vec![StockSnapshot {
                stock_id: Uuid::new_v4(),
                bar_id,
                format_id: Uuid::new_v4(),
                current_quantity: 25,
                min_threshold: 10,
                max_threshold: 50,
                version: 3,
            }],
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ledger-changed");
        assert_eq!(json["cause"]["kind"], "transfer");
        assert_eq!(json["cause"]["transfer_id"], 42);
        assert_eq!(json["entries"][0]["current_quantity"], 25);
        assert_eq!(json["entries"][0]["version"], 3);
        assert_eq!(event.event_name(), "ledger-changed");
        assert_eq!(event.topic(), Topic::Bar(bar_id));
    }

    fn stock_at(stock_id: Uuid, bar_id: Uuid, quantity: i32, version: i64) -> StockSnapshot {
        StockSnapshot {
            stock_id,
            bar_id,
            format_id: Uuid::nil(),
            current_quantity: quantity,
            min_threshold: 0,
            max_threshold: 50,
            version,
        }
    }

    #[test]
    fn test_late_publish_of_older_write_is_dropped() {
        let bar_id = Uuid::new_v4();
        let stock_id = Uuid::new_v4();
        let mut seen = HashMap::new();

        // Second commit (45, v3) reaches the bus before the first (25, v2)
        let mut newer = LedgerEvent::LedgerChanged {
            bar_id,
            cause: ChangeCause::Transfer { transfer_id: 2 },
            entries: vec![stock_at(stock_id, bar_id, 45, 3)],
        };
        let mut older = LedgerEvent::LedgerChanged {
            bar_id,
            cause: ChangeCause::Transfer { transfer_id: 1 },
            entries: vec![stock_at(stock_id, bar_id, 25, 2)],
        };

        assert!(newer.retain_newer(&mut seen));
        assert!(!older.retain_newer(&mut seen));
        assert_eq!(seen[&stock_id], 3);
    }

    #[test]
    fn test_retain_newer_keeps_fresh_rows_of_a_batch() {
        let bar_id = Uuid::new_v4();
        let stale = Uuid::new_v4();
        let fresh = Uuid::new_v4();
        let mut seen = HashMap::from([(stale, 7)]);

        let mut event = LedgerEvent::LedgerChanged {
            bar_id,
            cause: ChangeCause::ShiftClose { shift_id: 9 },
            entries: vec![stock_at(stale, bar_id, 8, 6), stock_at(fresh, bar_id, 20, 1)],
        };

        assert!(event.retain_newer(&mut seen));
        let LedgerEvent::LedgerChanged { entries, .. } = &event else {
            panic!("expected ledger-changed");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].stock_id, fresh);
        assert_eq!(seen[&stale], 7);
    }

    #[test]
    fn test_retain_newer_tracks_reserve_rows() {
        let entry_id = Uuid::new_v4();
        let snapshot = |version| ReserveSnapshot {
            reserve_entry_id: entry_id,
            reserve_id: Uuid::nil(),
            format_id: Uuid::nil(),
            quantity: 10,
            min_quantity: 0,
            max_quantity: 20,
            version,
        };
        let event = |version| LedgerEvent::ReserveChanged {
            reserve_id: Uuid::nil(),
            cause: ChangeCause::Upsert,
            entries: vec![snapshot(version)],
        };
        let mut seen = HashMap::new();

        assert!(event(1).retain_newer(&mut seen));
        assert!(!event(1).retain_newer(&mut seen));
        assert!(event(2).retain_newer(&mut seen));
    }

    #[test]
    fn test_topic_display() {
        let id = Uuid::nil();
        assert_eq!(Topic::Bar(id).to_string(), format!("bar:{}", id));
        assert_eq!(Topic::Reserve(id).to_string(), format!("reserve:{}", id));
    }
}
