//! Transfer engine: moves units from a reserve entry to a bar's stock entry
//!
//! One transaction locks the reserve row then the stock row, applies both
//! adjustments, checks them against the plan and appends the transfer fact.
//! Nothing is published until the transaction has committed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{
    plan_transfer, validate_idempotency_key, ChangeCause, HistoryLimit, LedgerEvent, ReserveEntry,
    StockEntry, Transfer,
};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;
use validator::Validate;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;
use crate::services::bus::NotificationBus;
use crate::services::ledger::{adjust_reserve, adjust_stock, begin_ledger_tx, lock_reserve_entry, lock_stock};
use crate::services::scope::ensure_bar_access;

/// Database row for a transfer fact
#[derive(Debug, FromRow)]
struct TransferRow {
    id: i64,
    idempotency_key: Option<String>,
    reserve_entry_id: Uuid,
    reserve_id: Uuid,
    stock_id: Uuid,
    bar_id: Uuid,
    format_id: Uuid,
    quantity: i32,
    reserve_quantity_before: i32,
    reserve_quantity_after: i32,
    stock_quantity_before: i32,
    stock_quantity_after: i32,
    transferred_by: Uuid,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<TransferRow> for Transfer {
    fn from(row: TransferRow) -> Self {
        Transfer {
            id: row.id,
            idempotency_key: row.idempotency_key,
            reserve_entry_id: row.reserve_entry_id,
            reserve_id: row.reserve_id,
            stock_id: row.stock_id,
            bar_id: row.bar_id,
            format_id: row.format_id,
            quantity: row.quantity,
            reserve_quantity_before: row.reserve_quantity_before,
            reserve_quantity_after: row.reserve_quantity_after,
            stock_quantity_before: row.stock_quantity_before,
            stock_quantity_after: row.stock_quantity_after,
            transferred_by: row.transferred_by,
            notes: row.notes,
            created_at: row.created_at,
        }
    }
}

/// Input for a transfer
#[derive(Debug, Deserialize, Validate)]
pub struct TransferInput {
    pub reserve_entry_id: Uuid,
    pub stock_id: Uuid,
    pub quantity: i32,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    /// Retrying with the same key returns the original transfer
    pub idempotency_key: Option<String>,
}

/// Result of a transfer
#[derive(Debug, Serialize)]
pub struct TransferOutcome {
    pub transfer: Transfer,
    pub updated_reserve: ReserveEntry,
    pub updated_stock: StockEntry,
    /// True when an earlier transfer with the same idempotency key was returned
    pub replayed: bool,
}

/// Transfer engine service
#[derive(Clone)]
pub struct TransferService {
    db: PgPool,
    bus: NotificationBus,
    lock_timeout_ms: u64,
}

impl TransferService {
    /// Create a new TransferService instance
    pub fn new(db: PgPool, bus: NotificationBus, lock_timeout_ms: u64) -> Self {
        Self {
            db,
            bus,
            lock_timeout_ms,
        }
    }

    /// Move `quantity` units from a reserve entry into a stock entry
    pub async fn transfer(&self, actor: &AuthUser, input: TransferInput) -> AppResult<TransferOutcome> {
        actor.require_manager()?;
        input.validate()?;
        if let Some(key) = input.idempotency_key.as_deref() {
            validate_idempotency_key(key).map_err(|m| AppError::validation("idempotency_key", m))?;
        }

        let mut tx = begin_ledger_tx(&self.db, self.lock_timeout_ms).await?;

        if let Some(key) = input.idempotency_key.as_deref() {
            if let Some(existing) = find_by_key(&mut tx, key, actor.company_id).await? {
                if !existing.matches_request(input.reserve_entry_id, input.stock_id, input.quantity) {
                    return Err(AppError::Conflict(format!(
                        "idempotency key {} was used for a different transfer",
                        key
                    )));
                }
                let updated_reserve =
                    lock_reserve_entry(&mut tx, existing.reserve_entry_id, actor.company_id).await?;
                let updated_stock = lock_stock(&mut tx, existing.stock_id, actor.company_id).await?;
                tx.commit().await?;

                tracing::info!(transfer_id = existing.id, idempotency_key = key, "transfer replayed");
                return Ok(TransferOutcome {
                    transfer: existing,
                    updated_reserve,
                    updated_stock,
                    replayed: true,
                });
            }
        }

        // Reserve before stock, always, so concurrent transfers cannot deadlock
        let reserve = lock_reserve_entry(&mut tx, input.reserve_entry_id, actor.company_id).await?;
        let stock = lock_stock(&mut tx, input.stock_id, actor.company_id).await?;
        if !actor.can_access_bar(stock.bar_id) {
            return Err(AppError::InsufficientPermissions(format!(
                "bar {} is outside your scope",
                stock.bar_id
            )));
        }

        let plan = plan_transfer(&reserve, &stock, input.quantity)?;

        let updated_reserve = adjust_reserve(&mut tx, reserve.id, -plan.quantity).await?;
        let updated_stock = adjust_stock(&mut tx, stock.id, plan.quantity).await?;
        plan.verify(updated_reserve.quantity, updated_stock.current_quantity)?;

        let transfer: Transfer = sqlx::query_as::<_, TransferRow>(
            r#"
            INSERT INTO transfers (
                idempotency_key, reserve_entry_id, reserve_id, stock_id, bar_id, format_id,
                quantity, reserve_quantity_before, reserve_quantity_after,
                stock_quantity_before, stock_quantity_after, transferred_by, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id, idempotency_key, reserve_entry_id, reserve_id, stock_id, bar_id,
                      format_id, quantity, reserve_quantity_before, reserve_quantity_after,
                      stock_quantity_before, stock_quantity_after, transferred_by, notes, created_at
            "#,
        )
        .bind(&input.idempotency_key)
        .bind(plan.reserve_entry_id)
        .bind(reserve.reserve_id)
        .bind(plan.stock_id)
        .bind(stock.bar_id)
        .bind(plan.format_id)
        .bind(plan.quantity)
        .bind(plan.reserve_quantity_before)
        .bind(plan.reserve_quantity_after)
        .bind(plan.stock_quantity_before)
        .bind(plan.stock_quantity_after)
        .bind(actor.actor_id)
        .bind(&input.notes)
        .fetch_one(&mut *tx)
        .await?
        .into();

        tx.commit().await?;

        tracing::info!(
            transfer_id = transfer.id,
            reserve_entry_id = %transfer.reserve_entry_id,
            stock_id = %transfer.stock_id,
            bar_id = %transfer.bar_id,
            quantity = transfer.quantity,
            reserve_after = transfer.reserve_quantity_after,
            stock_after = transfer.stock_quantity_after,
            "transfer committed"
        );

        let cause = ChangeCause::Transfer {
            transfer_id: transfer.id,
        };
        self.bus
            .publish(LedgerEvent::LedgerChanged {
                bar_id: transfer.bar_id,
                cause: cause.clone(),
                entries: vec![updated_stock.snapshot()],
            })
            .await;
        self.bus
            .publish(LedgerEvent::ReserveChanged {
                reserve_id: transfer.reserve_id,
                cause,
                entries: vec![updated_reserve.snapshot()],
            })
            .await;

        Ok(TransferOutcome {
            transfer,
            updated_reserve,
            updated_stock,
            replayed: false,
        })
    }

    /// Most recent transfers into a bar, newest first
    pub async fn list_for_bar(
        &self,
        actor: &AuthUser,
        bar_id: Uuid,
        limit: HistoryLimit,
    ) -> AppResult<Vec<Transfer>> {
        ensure_bar_access(&self.db, actor, bar_id).await?;

        let rows = sqlx::query_as::<_, TransferRow>(
            r#"
            SELECT id, idempotency_key, reserve_entry_id, reserve_id, stock_id, bar_id,
                   format_id, quantity, reserve_quantity_before, reserve_quantity_after,
                   stock_quantity_before, stock_quantity_after, transferred_by, notes, created_at
            FROM transfers
            WHERE bar_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(bar_id)
        .bind(limit.get())
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

async fn find_by_key(
    conn: &mut PgConnection,
    key: &str,
    company_id: Uuid,
) -> AppResult<Option<Transfer>> {
    let row = sqlx::query_as::<_, TransferRow>(
        r#"
        SELECT t.id, t.idempotency_key, t.reserve_entry_id, t.reserve_id, t.stock_id, t.bar_id,
               t.format_id, t.quantity, t.reserve_quantity_before, t.reserve_quantity_after,
               t.stock_quantity_before, t.stock_quantity_after, t.transferred_by, t.notes,
               t.created_at
        FROM transfers t
        JOIN bars b ON b.id = t.bar_id
        WHERE t.idempotency_key = $1 AND b.company_id = $2
        "#,
    )
    .bind(key)
    .bind(company_id)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(Into::into))
}
