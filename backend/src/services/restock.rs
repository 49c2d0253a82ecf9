//! Restock advisory over a bar's current ledger
//!
//! A pure read: no locks are taken and nothing is written, so two calls with
//! no intervening mutation return the same report.

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::{advise, summarize, Format, RestockLine, RestockSummary};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::catalog::fetch_formats;
use crate::services::ledger::fetch_bar_stocks;
use crate::services::scope::ensure_bar_access;

/// One ranked advisory line with its format
#[derive(Debug, Serialize)]
pub struct RestockItem {
    pub format: Format,
    #[serde(flatten)]
    pub line: RestockLine,
}

/// Ranked restock advisory for a bar
#[derive(Debug, Serialize)]
pub struct RestockReport {
    pub bar_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub summary: RestockSummary,
    pub items: Vec<RestockItem>,
}

/// Restock advisory service
#[derive(Clone)]
pub struct RestockService {
    db: PgPool,
}

impl RestockService {
    /// Create a new RestockService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Rank the bar's formats by quantity to order
    pub async fn advise(&self, actor: &AuthUser, bar_id: Uuid) -> AppResult<RestockReport> {
        ensure_bar_access(&self.db, actor, bar_id).await?;

        let entries = fetch_bar_stocks(&self.db, bar_id).await?;
        let lines = advise(&entries);

        let format_ids: Vec<Uuid> = lines.iter().map(|l| l.format_id).collect();
        let mut formats = fetch_formats(&self.db, &format_ids, actor.company_id).await?;

        let summary = summarize(&lines);
        let items = lines
            .into_iter()
            .map(|line| {
                let format = formats
                    .remove(&line.format_id)
                    .ok_or_else(|| AppError::NotFound("Format".to_string()))?;
                Ok(RestockItem { format, line })
            })
            .collect::<AppResult<Vec<_>>>()?;

        Ok(RestockReport {
            bar_id,
            generated_at: Utc::now(),
            summary,
            items,
        })
    }
}
