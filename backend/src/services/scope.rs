//! Tenant scoping for bars and reserves
//!
//! The ledger trusts the scope it is handed; these checks translate the
//! actor's company/bar claims into access decisions. Entities of another
//! company are reported as missing.

use sqlx::PgExecutor;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;

/// Ensure the actor may address `bar_id`
pub async fn ensure_bar_access<'e, E: PgExecutor<'e>>(
    executor: E,
    actor: &AuthUser,
    bar_id: Uuid,
) -> AppResult<()> {
    let company_id = sqlx::query_scalar::<_, Uuid>("SELECT company_id FROM bars WHERE id = $1")
        .bind(bar_id)
        .fetch_optional(executor)
        .await?;

    match company_id {
        Some(company_id) if company_id == actor.company_id => {
            if actor.can_access_bar(bar_id) {
                Ok(())
            } else {
                Err(AppError::InsufficientPermissions(format!(
                    "bar {} is outside your scope",
                    bar_id
                )))
            }
        }
        _ => Err(AppError::NotFound("Bar".to_string())),
    }
}

/// Ensure the reserve belongs to the actor's company
pub async fn ensure_reserve_access<'e, E: PgExecutor<'e>>(
    executor: E,
    actor: &AuthUser,
    reserve_id: Uuid,
) -> AppResult<()> {
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM reserves WHERE id = $1 AND company_id = $2)",
    )
    .bind(reserve_id)
    .bind(actor.company_id)
    .fetch_one(executor)
    .await?;

    if !exists {
        return Err(AppError::NotFound("Reserve".to_string()));
    }
    Ok(())
}
