//! Common types used across the platform

use serde::{Deserialize, Serialize};

/// Which ledger a row belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Stock,
    Reserve,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Stock => "stock",
            EntityKind::Reserve => "reserve",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Stock => write!(f, "Stock entry"),
            EntityKind::Reserve => write!(f, "Reserve entry"),
        }
    }
}

/// Page size for history listings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryLimit(u32);

impl HistoryLimit {
    pub const DEFAULT: u32 = 50;
    pub const MAX: u32 = 500;

    /// Clamp a requested page size into `1..=MAX`, defaulting when absent
    pub fn new(requested: Option<u32>) -> Self {
        let value = requested.unwrap_or(Self::DEFAULT).clamp(1, Self::MAX);
        Self(value)
    }

    pub fn get(&self) -> i64 {
        i64::from(self.0)
    }
}

impl Default for HistoryLimit {
    fn default() -> Self {
        Self::new(None)
    }
}
