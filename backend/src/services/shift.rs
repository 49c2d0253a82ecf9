//! Shift reconciliation: open → counting → closed
//!
//! `begin_counting` snapshots the bar's ledger into shift counts, operators
//! record final counts, and `close` writes the counted quantities back to the
//! ledger as absolute values. Transfers committed into a counted entry after
//! the snapshot are reported as anomalies; they never block the close.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    derive_count, plan_close, validate_final_count, ChangeCause, ClosePlan, CountAnomaly,
    HistoryLimit, LedgerEvent, Shift, ShiftCount, ShiftStatus, StockEntry,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::bus::NotificationBus;
use crate::services::ledger::{begin_ledger_tx, reconcile_stock};
use crate::services::scope::ensure_bar_access;

/// Partial unique index allowing one non-closed shift per bar
const ACTIVE_SHIFT_INDEX: &str = "shifts_one_active_per_bar";

/// Database row for a shift
#[derive(Debug, FromRow)]
struct ShiftRow {
    id: i64,
    bar_id: Uuid,
    status: String,
    start_time: DateTime<Utc>,
    counting_started_at: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    opened_by: Uuid,
    closed_by: Option<Uuid>,
}

impl TryFrom<ShiftRow> for Shift {
    type Error = AppError;

    fn try_from(row: ShiftRow) -> Result<Self, Self::Error> {
        Ok(Shift {
            id: row.id,
            bar_id: row.bar_id,
            status: row.status.parse().map_err(AppError::Internal)?,
            start_time: row.start_time,
            counting_started_at: row.counting_started_at,
            end_time: row.end_time,
            opened_by: row.opened_by,
            closed_by: row.closed_by,
        })
    }
}

/// Database row for a shift count
#[derive(Debug, FromRow)]
struct ShiftCountRow {
    id: i64,
    shift_id: i64,
    stock_id: Uuid,
    format_id: Uuid,
    initial_count: i32,
    final_count: Option<i32>,
    consumed: Option<i32>,
    to_restock: Option<i32>,
    counted_at: Option<DateTime<Utc>>,
}

impl From<ShiftCountRow> for ShiftCount {
    fn from(row: ShiftCountRow) -> Self {
        ShiftCount {
            id: row.id,
            shift_id: row.shift_id,
            stock_id: row.stock_id,
            format_id: row.format_id,
            initial_count: row.initial_count,
            final_count: row.final_count,
            consumed: row.consumed,
            to_restock: row.to_restock,
            counted_at: row.counted_at,
        }
    }
}

/// Input for recording a physical count
#[derive(Debug, Deserialize)]
pub struct RecordCountInput {
    pub final_count: i32,
}

/// A shift and its counts
#[derive(Debug, Serialize)]
pub struct ShiftDetail {
    pub shift: Shift,
    pub counts: Vec<ShiftCount>,
}

/// Result of closing a shift
#[derive(Debug, Serialize)]
pub struct CloseOutcome {
    pub shift: Shift,
    pub counts: Vec<ShiftCount>,
    pub updated_stocks: Vec<StockEntry>,
    pub anomalies: Vec<CountAnomaly>,
}

/// Shift reconciliation service
#[derive(Clone)]
pub struct ShiftService {
    db: PgPool,
    bus: NotificationBus,
    lock_timeout_ms: u64,
}

impl ShiftService {
    /// Create a new ShiftService instance
    pub fn new(db: PgPool, bus: NotificationBus, lock_timeout_ms: u64) -> Self {
        Self {
            db,
            bus,
            lock_timeout_ms,
        }
    }

    /// Open a shift for a bar
    pub async fn open(&self, actor: &AuthUser, bar_id: Uuid) -> AppResult<Shift> {
        let mut tx = begin_ledger_tx(&self.db, self.lock_timeout_ms).await?;
        ensure_bar_access(&mut *tx, actor, bar_id).await?;

        if let Some(active) = active_shift_id(&mut tx, bar_id).await? {
            return Err(AppError::ShiftAlreadyOpen {
                bar_id,
                shift_id: Some(active),
            });
        }

        // The partial unique index settles two concurrent opens
        let row = sqlx::query_as::<_, ShiftRow>(
            r#"
            INSERT INTO shifts (bar_id, status, opened_by)
            VALUES ($1, 'open', $2)
            RETURNING id, bar_id, status, start_time, counting_started_at, end_time,
                      opened_by, closed_by
            "#,
        )
        .bind(bar_id)
        .bind(actor.actor_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| active_shift_conflict(e, bar_id))?;

        tx.commit().await?;

        let shift = Shift::try_from(row)?;
        tracing::info!(shift_id = shift.id, %bar_id, "shift opened");
        Ok(shift)
    }

    /// Snapshot every stock entry of the bar into shift counts
    pub async fn begin_counting(&self, actor: &AuthUser, shift_id: i64) -> AppResult<ShiftDetail> {
        let mut tx = begin_ledger_tx(&self.db, self.lock_timeout_ms).await?;
        let shift = lock_shift(&mut tx, actor, shift_id).await?;
        shift.status.transition(ShiftStatus::Counting)?;

        // Wait out in-flight transfers so the snapshot and the timestamp agree
        sqlx::query("SELECT id FROM stock_entries WHERE bar_id = $1 ORDER BY id FOR SHARE")
            .bind(shift.bar_id)
            .execute(&mut *tx)
            .await?;

        let counts = sqlx::query_as::<_, ShiftCountRow>(
            r#"
            INSERT INTO shift_counts (shift_id, stock_id, format_id, initial_count)
            SELECT $1, id, format_id, current_quantity
            FROM stock_entries
            WHERE bar_id = $2
            ORDER BY id
            RETURNING id, shift_id, stock_id, format_id, initial_count, final_count,
                      consumed, to_restock, counted_at
            "#,
        )
        .bind(shift_id)
        .bind(shift.bar_id)
        .fetch_all(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, ShiftRow>(
            r#"
            UPDATE shifts
            SET status = 'counting', counting_started_at = clock_timestamp()
            WHERE id = $1
            RETURNING id, bar_id, status, start_time, counting_started_at, end_time,
                      opened_by, closed_by
            "#,
        )
        .bind(shift_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut counts: Vec<ShiftCount> = counts.into_iter().map(Into::into).collect();
        counts.sort_by_key(|c| c.id);
        tracing::info!(shift_id, bar_id = %shift.bar_id, entries = counts.len(), "counting started");

        Ok(ShiftDetail {
            shift: Shift::try_from(row)?,
            counts,
        })
    }

    /// Record the physical count for one entry. May be re-recorded until close.
    pub async fn record_count(
        &self,
        actor: &AuthUser,
        shift_id: i64,
        count_id: i64,
        input: RecordCountInput,
    ) -> AppResult<ShiftCount> {
        validate_final_count(input.final_count)?;

        let mut tx = begin_ledger_tx(&self.db, self.lock_timeout_ms).await?;
        let shift = lock_shift(&mut tx, actor, shift_id).await?;
        if shift.status != ShiftStatus::Counting {
            return Err(AppError::InvalidStateTransition(format!(
                "counts can only be recorded while counting, shift {} is {}",
                shift_id, shift.status
            )));
        }

        let (initial_count, max_threshold) = sqlx::query_as::<_, (i32, i32)>(
            r#"
            SELECT c.initial_count, s.max_threshold
            FROM shift_counts c
            JOIN stock_entries s ON s.id = c.stock_id
            WHERE c.id = $1 AND c.shift_id = $2
            FOR UPDATE OF c
            "#,
        )
        .bind(count_id)
        .bind(shift_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound("Shift count".to_string()))?;

        let derived = derive_count(initial_count, input.final_count, max_threshold)?;

        let row = sqlx::query_as::<_, ShiftCountRow>(
            r#"
            UPDATE shift_counts
            SET final_count = $2, consumed = $3, to_restock = $4, counted_at = NOW()
            WHERE id = $1
            RETURNING id, shift_id, stock_id, format_id, initial_count, final_count,
                      consumed, to_restock, counted_at
            "#,
        )
        .bind(count_id)
        .bind(input.final_count)
        .bind(derived.consumed)
        .bind(derived.to_restock)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(shift_id, count_id, final_count = input.final_count, "count recorded");
        Ok(row.into())
    }

    /// Write every counted quantity to the ledger and close the shift
    pub async fn close(&self, actor: &AuthUser, shift_id: i64) -> AppResult<CloseOutcome> {
        let mut tx = begin_ledger_tx(&self.db, self.lock_timeout_ms).await?;
        let shift = lock_shift(&mut tx, actor, shift_id).await?;
        shift.status.transition(ShiftStatus::Closed)?;

        let counts = fetch_counts(&mut tx, shift_id).await?;

        // Serialize against transfers into these entries until commit
        let stock_ids: Vec<Uuid> = counts.iter().map(|c| c.stock_id).collect();
        sqlx::query("SELECT id FROM stock_entries WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(&stock_ids)
            .execute(&mut *tx)
            .await?;

        let transferred_in = transfers_since(&mut tx, &stock_ids, shift.counting_started_at).await?;
        let ClosePlan { sets, anomalies } = plan_close(shift_id, &counts, &transferred_in)?;

        let mut updated_stocks = Vec::with_capacity(sets.len());
        for set in &sets {
            updated_stocks.push(reconcile_stock(&mut tx, set.stock_id, set.final_count).await?);
        }

        let row = sqlx::query_as::<_, ShiftRow>(
            r#"
            UPDATE shifts
            SET status = 'closed', end_time = NOW(), closed_by = $2
            WHERE id = $1
            RETURNING id, bar_id, status, start_time, counting_started_at, end_time,
                      opened_by, closed_by
            "#,
        )
        .bind(shift_id)
        .bind(actor.actor_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let shift = Shift::try_from(row)?;
        for anomaly in &anomalies {
            tracing::warn!(
                shift_id,
                count_id = anomaly.count_id,
                stock_id = %anomaly.stock_id,
                consumed = anomaly.consumed,
                transferred_in = anomaly.transferred_in_since_snapshot,
                adjusted_consumed = anomaly.adjusted_consumed,
                "anomalous count at shift close"
            );
        }
        tracing::info!(
            shift_id,
            bar_id = %shift.bar_id,
            entries = updated_stocks.len(),
            anomalies = anomalies.len(),
            "shift closed"
        );

        if !updated_stocks.is_empty() {
            self.bus
                .publish(LedgerEvent::LedgerChanged {
                    bar_id: shift.bar_id,
                    cause: ChangeCause::ShiftClose { shift_id },
                    entries: updated_stocks.iter().map(StockEntry::snapshot).collect(),
                })
                .await;
        }

        Ok(CloseOutcome {
            shift,
            counts,
            updated_stocks,
            anomalies,
        })
    }

    /// A shift with its counts
    pub async fn get(&self, actor: &AuthUser, shift_id: i64) -> AppResult<ShiftDetail> {
        let row = sqlx::query_as::<_, ShiftRow>(
            r#"
            SELECT s.id, s.bar_id, s.status, s.start_time, s.counting_started_at, s.end_time,
                   s.opened_by, s.closed_by
            FROM shifts s
            JOIN bars b ON b.id = s.bar_id
            WHERE s.id = $1 AND b.company_id = $2
            "#,
        )
        .bind(shift_id)
        .bind(actor.company_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Shift".to_string()))?;

        let shift = Shift::try_from(row)?;
        ensure_bar_access(&self.db, actor, shift.bar_id).await?;

        let mut conn = self.db.acquire().await?;
        let counts = fetch_counts(&mut conn, shift_id).await?;
        Ok(ShiftDetail { shift, counts })
    }

    /// The bar's non-closed shift
    pub async fn current(&self, actor: &AuthUser, bar_id: Uuid) -> AppResult<ShiftDetail> {
        ensure_bar_access(&self.db, actor, bar_id).await?;

        let mut conn = self.db.acquire().await?;
        let shift_id = active_shift_id(&mut conn, bar_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Active shift".to_string()))?;
        drop(conn);

        self.get(actor, shift_id).await
    }

    /// Shift history of a bar, newest first
    pub async fn list_for_bar(
        &self,
        actor: &AuthUser,
        bar_id: Uuid,
        limit: HistoryLimit,
    ) -> AppResult<Vec<Shift>> {
        ensure_bar_access(&self.db, actor, bar_id).await?;

        let rows = sqlx::query_as::<_, ShiftRow>(
            r#"
            SELECT id, bar_id, status, start_time, counting_started_at, end_time,
                   opened_by, closed_by
            FROM shifts
            WHERE bar_id = $1
            ORDER BY start_time DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(bar_id)
        .bind(limit.get())
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(Shift::try_from).collect()
    }
}

async fn lock_shift(conn: &mut PgConnection, actor: &AuthUser, shift_id: i64) -> AppResult<Shift> {
    let row = sqlx::query_as::<_, ShiftRow>(
        r#"
        SELECT s.id, s.bar_id, s.status, s.start_time, s.counting_started_at, s.end_time,
               s.opened_by, s.closed_by
        FROM shifts s
        JOIN bars b ON b.id = s.bar_id
        WHERE s.id = $1 AND b.company_id = $2
        FOR UPDATE OF s
        "#,
    )
    .bind(shift_id)
    .bind(actor.company_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Shift".to_string()))?;

    let shift = Shift::try_from(row)?;
    if !actor.can_access_bar(shift.bar_id) {
        return Err(AppError::InsufficientPermissions(format!(
            "bar {} is outside your scope",
            shift.bar_id
        )));
    }
    Ok(shift)
}

async fn active_shift_id(conn: &mut PgConnection, bar_id: Uuid) -> AppResult<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM shifts WHERE bar_id = $1 AND status <> 'closed'",
    )
    .bind(bar_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(id)
}

async fn fetch_counts(conn: &mut PgConnection, shift_id: i64) -> AppResult<Vec<ShiftCount>> {
    let rows = sqlx::query_as::<_, ShiftCountRow>(
        r#"
        SELECT id, shift_id, stock_id, format_id, initial_count, final_count,
               consumed, to_restock, counted_at
        FROM shift_counts
        WHERE shift_id = $1
        ORDER BY id
        "#,
    )
    .bind(shift_id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Units transferred into each stock entry after `since`
async fn transfers_since(
    conn: &mut PgConnection,
    stock_ids: &[Uuid],
    since: Option<DateTime<Utc>>,
) -> AppResult<HashMap<Uuid, i64>> {
    let Some(since) = since else {
        return Ok(HashMap::new());
    };

    let rows = sqlx::query_as::<_, (Uuid, i64)>(
        r#"
        SELECT stock_id, SUM(quantity)::BIGINT
        FROM transfers
        WHERE stock_id = ANY($1) AND created_at > $2
        GROUP BY stock_id
        "#,
    )
    .bind(stock_ids)
    .bind(since)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().collect())
}

fn active_shift_conflict(err: sqlx::Error, bar_id: Uuid) -> AppError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.constraint() == Some(ACTIVE_SHIFT_INDEX) {
            return AppError::ShiftAlreadyOpen {
                bar_id,
                shift_id: None,
            };
        }
    }
    err.into()
}
