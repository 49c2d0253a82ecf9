//! Stock and reserve ledgers
//!
//! The row-level primitives (`lock_*`, `adjust_*`, `reconcile_stock`) run on
//! a caller-supplied connection so the transfer engine and shift
//! reconciliation can compose them inside one transaction. `LedgerService`
//! wraps them for standalone maintenance calls and publishes after commit.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    checked_adjust, validate_initial_quantity, validate_thresholds, ChangeCause, EntityKind,
    LedgerEvent, ReserveEntry, StockEntry,
};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Transaction};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::bus::NotificationBus;
use crate::services::scope::{ensure_bar_access, ensure_reserve_access};

/// Database row for a stock entry
#[derive(Debug, FromRow)]
pub(crate) struct StockRow {
    id: Uuid,
    bar_id: Uuid,
    format_id: Uuid,
    current_quantity: i32,
    min_threshold: i32,
    max_threshold: i32,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl From<StockRow> for StockEntry {
    fn from(row: StockRow) -> Self {
        StockEntry {
            id: row.id,
            bar_id: row.bar_id,
            format_id: row.format_id,
            current_quantity: row.current_quantity,
            min_threshold: row.min_threshold,
            max_threshold: row.max_threshold,
            version: row.version,
            updated_at: row.updated_at,
        }
    }
}

/// Database row for a reserve entry
#[derive(Debug, FromRow)]
pub(crate) struct ReserveRow {
    id: Uuid,
    reserve_id: Uuid,
    format_id: Uuid,
    quantity: i32,
    min_quantity: i32,
    max_quantity: i32,
    lot_number: Option<String>,
    expiration_date: Option<NaiveDate>,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl From<ReserveRow> for ReserveEntry {
    fn from(row: ReserveRow) -> Self {
        ReserveEntry {
            id: row.id,
            reserve_id: row.reserve_id,
            format_id: row.format_id,
            quantity: row.quantity,
            min_quantity: row.min_quantity,
            max_quantity: row.max_quantity,
            lot_number: row.lot_number,
            expiration_date: row.expiration_date,
            version: row.version,
            updated_at: row.updated_at,
        }
    }
}

/// Row plus whether the upsert created it
#[derive(Debug, Serialize)]
pub struct UpsertOutcome<T> {
    pub entry: T,
    pub created: bool,
}

/// Input for stocking a format in a bar or changing its thresholds
#[derive(Debug, Deserialize, Validate)]
pub struct UpsertStockInput {
    pub format_id: Uuid,
    /// Used only when the row is created
    #[validate(range(min = 0))]
    pub quantity: i32,
    #[validate(range(min = 0))]
    pub min_threshold: i32,
    #[validate(range(min = 0))]
    pub max_threshold: i32,
}

/// Input for stocking a format in a reserve or changing its metadata
#[derive(Debug, Deserialize, Validate)]
pub struct UpsertReserveInput {
    pub format_id: Uuid,
    /// Used only when the row is created
    #[validate(range(min = 0))]
    pub quantity: i32,
    #[validate(range(min = 0))]
    pub min_quantity: i32,
    #[validate(range(min = 0))]
    pub max_quantity: i32,
    #[validate(length(min = 1, max = 64))]
    pub lot_number: Option<String>,
    pub expiration_date: Option<NaiveDate>,
}

/// Manual correction (breakage, delivery, spillage)
#[derive(Debug, Deserialize, Validate)]
pub struct AdjustInput {
    pub delta: i32,
    #[validate(length(max = 500))]
    pub reason: Option<String>,
}

/// Open a ledger transaction whose row-lock waits are bounded.
///
/// A lock wait past the bound fails with SQLSTATE 55P03, which surfaces as
/// `AppError::LockTimeout`.
pub async fn begin_ledger_tx(
    db: &PgPool,
    lock_timeout_ms: u64,
) -> AppResult<Transaction<'static, Postgres>> {
    let mut tx = db.begin().await?;
    // SET does not take bind parameters; the value is an integer
    sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", lock_timeout_ms))
        .execute(&mut *tx)
        .await?;
    Ok(tx)
}

/// Lock a stock entry of the actor's company for the rest of the transaction
pub async fn lock_stock(
    conn: &mut PgConnection,
    stock_id: Uuid,
    company_id: Uuid,
) -> AppResult<StockEntry> {
    let row = sqlx::query_as::<_, StockRow>(
        r#"
        SELECT s.id, s.bar_id, s.format_id, s.current_quantity, s.min_threshold,
               s.max_threshold, s.version, s.updated_at
        FROM stock_entries s
        JOIN bars b ON b.id = s.bar_id
        WHERE s.id = $1 AND b.company_id = $2
        FOR UPDATE OF s
        "#,
    )
    .bind(stock_id)
    .bind(company_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Stock entry".to_string()))?;

    Ok(row.into())
}

/// Lock a reserve entry of the actor's company for the rest of the transaction
pub async fn lock_reserve_entry(
    conn: &mut PgConnection,
    reserve_entry_id: Uuid,
    company_id: Uuid,
) -> AppResult<ReserveEntry> {
    let row = sqlx::query_as::<_, ReserveRow>(
        r#"
        SELECT e.id, e.reserve_id, e.format_id, e.quantity, e.min_quantity, e.max_quantity,
               e.lot_number, e.expiration_date, e.version, e.updated_at
        FROM reserve_entries e
        JOIN reserves r ON r.id = e.reserve_id
        WHERE e.id = $1 AND r.company_id = $2
        FOR UPDATE OF e
        "#,
    )
    .bind(reserve_entry_id)
    .bind(company_id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Reserve entry".to_string()))?;

    Ok(row.into())
}

/// Add `delta` to a stock entry; fails with `InsufficientQuantity` rather
/// than going negative.
pub async fn adjust_stock(conn: &mut PgConnection, stock_id: Uuid, delta: i32) -> AppResult<StockEntry> {
    let row = sqlx::query_as::<_, StockRow>(
        r#"
        UPDATE stock_entries
        SET current_quantity = current_quantity + $2, version = version + 1, updated_at = NOW()
        WHERE id = $1 AND current_quantity + $2 >= 0
        RETURNING id, bar_id, format_id, current_quantity, min_threshold, max_threshold, version, updated_at
        "#,
    )
    .bind(stock_id)
    .bind(delta)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(row.into()),
        None => {
            let current = sqlx::query_scalar::<_, i32>(
                "SELECT current_quantity FROM stock_entries WHERE id = $1",
            )
            .bind(stock_id)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| AppError::NotFound("Stock entry".to_string()))?;

            Err(checked_adjust(EntityKind::Stock, stock_id, current, delta)
                .err()
                .map(AppError::from)
                .unwrap_or_else(|| AppError::Internal("stock adjust matched no row".to_string())))
        }
    }
}

/// Add `delta` to a reserve entry; fails with `InsufficientQuantity` rather
/// than going negative.
pub async fn adjust_reserve(
    conn: &mut PgConnection,
    reserve_entry_id: Uuid,
    delta: i32,
) -> AppResult<ReserveEntry> {
    let row = sqlx::query_as::<_, ReserveRow>(
        r#"
        UPDATE reserve_entries
        SET quantity = quantity + $2, version = version + 1, updated_at = NOW()
        WHERE id = $1 AND quantity + $2 >= 0
        RETURNING id, reserve_id, format_id, quantity, min_quantity, max_quantity,
                  lot_number, expiration_date, version, updated_at
        "#,
    )
    .bind(reserve_entry_id)
    .bind(delta)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(row) => Ok(row.into()),
        None => {
            let current =
                sqlx::query_scalar::<_, i32>("SELECT quantity FROM reserve_entries WHERE id = $1")
                    .bind(reserve_entry_id)
                    .fetch_optional(&mut *conn)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Reserve entry".to_string()))?;

            Err(checked_adjust(EntityKind::Reserve, reserve_entry_id, current, delta)
                .err()
                .map(AppError::from)
                .unwrap_or_else(|| AppError::Internal("reserve adjust matched no row".to_string())))
        }
    }
}

/// Set a stock entry to a physically counted quantity.
///
/// The only absolute write to the stock ledger; used by shift close.
pub async fn reconcile_stock(
    conn: &mut PgConnection,
    stock_id: Uuid,
    counted_quantity: i32,
) -> AppResult<StockEntry> {
    shared::validate_final_count(counted_quantity)?;

    let row = sqlx::query_as::<_, StockRow>(
        r#"
        UPDATE stock_entries
        SET current_quantity = $2, version = version + 1, updated_at = NOW()
        WHERE id = $1
        RETURNING id, bar_id, format_id, current_quantity, min_threshold, max_threshold, version, updated_at
        "#,
    )
    .bind(stock_id)
    .bind(counted_quantity)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| AppError::NotFound("Stock entry".to_string()))?;

    Ok(row.into())
}

/// Ledger maintenance service
#[derive(Clone)]
pub struct LedgerService {
    db: PgPool,
    bus: NotificationBus,
    lock_timeout_ms: u64,
}

impl LedgerService {
    /// Create a new LedgerService instance
    pub fn new(db: PgPool, bus: NotificationBus, lock_timeout_ms: u64) -> Self {
        Self {
            db,
            bus,
            lock_timeout_ms,
        }
    }

    /// Current stock entry of a format in a bar, if stocked
    pub async fn get_stock(
        &self,
        actor: &AuthUser,
        bar_id: Uuid,
        format_id: Uuid,
    ) -> AppResult<Option<StockEntry>> {
        ensure_bar_access(&self.db, actor, bar_id).await?;

        let row = sqlx::query_as::<_, StockRow>(
            r#"
            SELECT id, bar_id, format_id, current_quantity, min_threshold, max_threshold, version, updated_at
            FROM stock_entries
            WHERE bar_id = $1 AND format_id = $2
            "#,
        )
        .bind(bar_id)
        .bind(format_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    /// Full ledger of a bar; the recovery path for viewers that missed events
    pub async fn list_bar_stocks(&self, actor: &AuthUser, bar_id: Uuid) -> AppResult<Vec<StockEntry>> {
        ensure_bar_access(&self.db, actor, bar_id).await?;
        fetch_bar_stocks(&self.db, bar_id).await
    }

    /// Create a stock entry, or update the thresholds of an existing one.
    ///
    /// Quantity is taken only on creation; later changes go through
    /// `adjust`, a transfer or a shift close.
    pub async fn upsert_stock(
        &self,
        actor: &AuthUser,
        bar_id: Uuid,
        input: UpsertStockInput,
    ) -> AppResult<UpsertOutcome<StockEntry>> {
        actor.require_manager()?;
        input.validate()?;
        validate_thresholds(input.min_threshold, input.max_threshold)?;
        validate_initial_quantity(input.quantity).map_err(|m| AppError::validation("quantity", m))?;

        let mut tx = begin_ledger_tx(&self.db, self.lock_timeout_ms).await?;
        ensure_bar_access(&mut *tx, actor, bar_id).await?;
        ensure_format_exists(&mut tx, input.format_id, actor.company_id).await?;

        let (row, created) = sqlx::query_as::<_, (Uuid, bool)>(
            r#"
            INSERT INTO stock_entries (bar_id, format_id, current_quantity, min_threshold, max_threshold)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (bar_id, format_id) DO UPDATE
            SET min_threshold = EXCLUDED.min_threshold,
                max_threshold = EXCLUDED.max_threshold,
                version = stock_entries.version + 1,
                updated_at = NOW()
            RETURNING id, (xmax = 0) AS created
            "#,
        )
        .bind(bar_id)
        .bind(input.format_id)
        .bind(input.quantity)
        .bind(input.min_threshold)
        .bind(input.max_threshold)
        .fetch_one(&mut *tx)
        .await?;

        let entry = lock_stock(&mut tx, row, actor.company_id).await?;
        tx.commit().await?;

        tracing::info!(stock_id = %entry.id, %bar_id, created, "stock entry upserted");
        self.bus
            .publish(LedgerEvent::LedgerChanged {
                bar_id,
                cause: ChangeCause::Upsert,
                entries: vec![entry.snapshot()],
            })
            .await;

        Ok(UpsertOutcome { entry, created })
    }

    /// Apply a signed correction to a stock entry
    pub async fn adjust_stock_entry(
        &self,
        actor: &AuthUser,
        stock_id: Uuid,
        input: AdjustInput,
    ) -> AppResult<StockEntry> {
        actor.require_manager()?;
        input.validate()?;
        if input.delta == 0 {
            return Err(AppError::validation("delta", "Adjustment must be non-zero"));
        }

        let mut tx = begin_ledger_tx(&self.db, self.lock_timeout_ms).await?;
        lock_stock(&mut tx, stock_id, actor.company_id).await?;
        let entry = adjust_stock(&mut tx, stock_id, input.delta).await?;
        tx.commit().await?;

        tracing::info!(%stock_id, delta = input.delta, quantity = entry.current_quantity, "stock adjusted");
        self.bus
            .publish(LedgerEvent::LedgerChanged {
                bar_id: entry.bar_id,
                cause: ChangeCause::Adjustment {
                    reason: input.reason,
                },
                entries: vec![entry.snapshot()],
            })
            .await;

        Ok(entry)
    }

    /// Reserve entry of a format in a reserve, if stocked
    pub async fn get_reserve_entry(
        &self,
        actor: &AuthUser,
        reserve_id: Uuid,
        format_id: Uuid,
    ) -> AppResult<Option<ReserveEntry>> {
        ensure_reserve_access(&self.db, actor, reserve_id).await?;

        let row = sqlx::query_as::<_, ReserveRow>(
            r#"
            SELECT id, reserve_id, format_id, quantity, min_quantity, max_quantity,
                   lot_number, expiration_date, version, updated_at
            FROM reserve_entries
            WHERE reserve_id = $1 AND format_id = $2
            "#,
        )
        .bind(reserve_id)
        .bind(format_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Into::into))
    }

    /// All entries of a reserve
    pub async fn list_reserve_entries(
        &self,
        actor: &AuthUser,
        reserve_id: Uuid,
    ) -> AppResult<Vec<ReserveEntry>> {
        ensure_reserve_access(&self.db, actor, reserve_id).await?;

        let rows = sqlx::query_as::<_, ReserveRow>(
            r#"
            SELECT id, reserve_id, format_id, quantity, min_quantity, max_quantity,
                   lot_number, expiration_date, version, updated_at
            FROM reserve_entries
            WHERE reserve_id = $1
            ORDER BY format_id
            "#,
        )
        .bind(reserve_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Create a reserve entry, or update thresholds and lot metadata of an
    /// existing one. Quantity is taken only on creation.
    pub async fn upsert_reserve_entry(
        &self,
        actor: &AuthUser,
        reserve_id: Uuid,
        input: UpsertReserveInput,
    ) -> AppResult<UpsertOutcome<ReserveEntry>> {
        actor.require_manager()?;
        input.validate()?;
        validate_thresholds(input.min_quantity, input.max_quantity)?;
        validate_initial_quantity(input.quantity).map_err(|m| AppError::validation("quantity", m))?;

        let mut tx = begin_ledger_tx(&self.db, self.lock_timeout_ms).await?;
        ensure_reserve_access(&mut *tx, actor, reserve_id).await?;
        ensure_format_exists(&mut tx, input.format_id, actor.company_id).await?;

        let (row, created) = sqlx::query_as::<_, (Uuid, bool)>(
            r#"
            INSERT INTO reserve_entries
                (reserve_id, format_id, quantity, min_quantity, max_quantity, lot_number, expiration_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (reserve_id, format_id) DO UPDATE
            SET min_quantity = EXCLUDED.min_quantity,
                max_quantity = EXCLUDED.max_quantity,
                lot_number = EXCLUDED.lot_number,
                expiration_date = EXCLUDED.expiration_date,
                version = reserve_entries.version + 1,
                updated_at = NOW()
            RETURNING id, (xmax = 0) AS created
            "#,
        )
        .bind(reserve_id)
        .bind(input.format_id)
        .bind(input.quantity)
        .bind(input.min_quantity)
        .bind(input.max_quantity)
        .bind(&input.lot_number)
        .bind(input.expiration_date)
        .fetch_one(&mut *tx)
        .await?;

        let entry = lock_reserve_entry(&mut tx, row, actor.company_id).await?;
        tx.commit().await?;

        tracing::info!(reserve_entry_id = %entry.id, %reserve_id, created, "reserve entry upserted");
        self.bus
            .publish(LedgerEvent::ReserveChanged {
                reserve_id,
                cause: ChangeCause::Upsert,
                entries: vec![entry.snapshot()],
            })
            .await;

        Ok(UpsertOutcome { entry, created })
    }

    /// Apply a signed correction to a reserve entry (e.g. a delivery)
    pub async fn adjust_reserve_entry(
        &self,
        actor: &AuthUser,
        reserve_entry_id: Uuid,
        input: AdjustInput,
    ) -> AppResult<ReserveEntry> {
        actor.require_manager()?;
        input.validate()?;
        if input.delta == 0 {
            return Err(AppError::validation("delta", "Adjustment must be non-zero"));
        }

        let mut tx = begin_ledger_tx(&self.db, self.lock_timeout_ms).await?;
        lock_reserve_entry(&mut tx, reserve_entry_id, actor.company_id).await?;
        let entry = adjust_reserve(&mut tx, reserve_entry_id, input.delta).await?;
        tx.commit().await?;

        tracing::info!(%reserve_entry_id, delta = input.delta, quantity = entry.quantity, "reserve adjusted");
        self.bus
            .publish(LedgerEvent::ReserveChanged {
                reserve_id: entry.reserve_id,
                cause: ChangeCause::Adjustment {
                    reason: input.reason,
                },
                entries: vec![entry.snapshot()],
            })
            .await;

        Ok(entry)
    }
}

/// All stock entries of a bar, ordered by format
pub(crate) async fn fetch_bar_stocks<'e, E: sqlx::PgExecutor<'e>>(
    executor: E,
    bar_id: Uuid,
) -> AppResult<Vec<StockEntry>> {
    let rows = sqlx::query_as::<_, StockRow>(
        r#"
        SELECT id, bar_id, format_id, current_quantity, min_threshold, max_threshold, version, updated_at
        FROM stock_entries
        WHERE bar_id = $1
        ORDER BY format_id
        "#,
    )
    .bind(bar_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(Into::into).collect())
}

/// Another company's format reads as missing
async fn ensure_format_exists(conn: &mut PgConnection, format_id: Uuid, company_id: Uuid) -> AppResult<()> {
    let exists = sqlx::query_scalar::<_, bool>(
        r#"
        SELECT EXISTS(
            SELECT 1
            FROM formats f
            JOIN products p ON p.id = f.product_id
            WHERE f.id = $1 AND p.company_id = $2
        )
        "#,
    )
    .bind(format_id)
    .bind(company_id)
    .fetch_one(&mut *conn)
    .await?;

    if !exists {
        return Err(AppError::NotFound("Format".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{test_pool, Tenant};
    use shared::Topic;

    fn stock_input(format_id: Uuid, quantity: i32) -> UpsertStockInput {
        UpsertStockInput {
            format_id,
            quantity,
            min_threshold: 10,
            max_threshold: 50,
        }
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_other_company_format_cannot_be_stocked() {
        let pool = test_pool().await;
        let ours = Tenant::seed(&pool).await;
        let theirs = Tenant::seed(&pool).await;
        let ledger = LedgerService::new(pool, NotificationBus::new(), 1_000);

        let result = ledger
            .upsert_stock(&ours.manager(), ours.bar_id, stock_input(theirs.format_id, 5))
            .await;
        assert!(matches!(result, Err(AppError::NotFound(ref what)) if what == "Format"));

        let reserve = ledger
            .upsert_reserve_entry(
                &ours.manager(),
                ours.reserve_id,
                UpsertReserveInput {
                    format_id: theirs.format_id,
                    quantity: 5,
                    min_quantity: 0,
                    max_quantity: 20,
                    lot_number: None,
                    expiration_date: None,
                },
            )
            .await;
        assert!(matches!(reserve, Err(AppError::NotFound(_))));
    }

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_every_write_bumps_row_version() {
        let pool = test_pool().await;
        let tenant = Tenant::seed(&pool).await;
        let bus = NotificationBus::new();
        let mut viewer = bus.subscribe(Topic::Bar(tenant.bar_id)).await;
        let ledger = LedgerService::new(pool.clone(), bus, 1_000);
        let actor = tenant.manager();

        let created = ledger
            .upsert_stock(&actor, tenant.bar_id, stock_input(tenant.format_id, 5))
            .await
            .unwrap();
        assert!(created.created);
        assert_eq!(created.entry.version, 1);

        let updated = ledger
            .upsert_stock(&actor, tenant.bar_id, stock_input(tenant.format_id, 99))
            .await
            .unwrap();
        assert!(!updated.created);
        assert_eq!(updated.entry.current_quantity, 5);
        assert_eq!(updated.entry.version, 2);

        let adjusted = ledger
            .adjust_stock_entry(
                &actor,
                created.entry.id,
                AdjustInput {
                    delta: 3,
                    reason: Some("delivery".to_string()),
                },
            )
            .await
            .unwrap();
        assert_eq!(adjusted.version, 3);

        let mut tx = begin_ledger_tx(&pool, 1_000).await.unwrap();
        let reconciled = reconcile_stock(&mut tx, created.entry.id, 4).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(reconciled.version, 4);

        let versions: Vec<i64> = [
            viewer.recv().await.unwrap(),
            viewer.recv().await.unwrap(),
            viewer.recv().await.unwrap(),
        ]
        .into_iter()
        .map(|event| match event {
            LedgerEvent::LedgerChanged { entries, .. } => entries[0].version,
            other => panic!("unexpected event {:?}", other),
        })
        .collect();
        assert_eq!(versions, vec![1, 2, 3]);
    }
}
