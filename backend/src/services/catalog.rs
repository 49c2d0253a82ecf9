//! Read-only catalog access (products and their formats)

use std::collections::HashMap;

use rust_decimal::Decimal;
use shared::Format;
use sqlx::{FromRow, PgExecutor, PgPool};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::middleware::AuthUser;

/// Database row for a format joined with its product
#[derive(Debug, FromRow)]
struct FormatRow {
    id: Uuid,
    product_id: Uuid,
    product_name: String,
    size: String,
    volume: Decimal,
    unit: String,
    packaging: String,
}

impl From<FormatRow> for Format {
    fn from(row: FormatRow) -> Self {
        Format {
            id: row.id,
            product_id: row.product_id,
            product_name: row.product_name,
            size: row.size,
            volume: row.volume,
            unit: row.unit,
            packaging: row.packaging,
        }
    }
}

/// Catalog service
#[derive(Clone)]
pub struct CatalogService {
    db: PgPool,
}

impl CatalogService {
    /// Create a new CatalogService instance
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Look up one format of the actor's company
    pub async fn get_format(&self, actor: &AuthUser, format_id: Uuid) -> AppResult<Format> {
        let row = sqlx::query_as::<_, FormatRow>(
            r#"
            SELECT f.id, f.product_id, p.name AS product_name, f.size, f.volume, f.unit, f.packaging
            FROM formats f
            JOIN products p ON p.id = f.product_id
            WHERE f.id = $1 AND p.company_id = $2
            "#,
        )
        .bind(format_id)
        .bind(actor.company_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Format".to_string()))?;

        Ok(row.into())
    }
}

/// Formats by id within one company, for decorating ledger rows.
/// Ids of other companies are simply absent from the map.
pub(crate) async fn fetch_formats<'e, E: PgExecutor<'e>>(
    executor: E,
    format_ids: &[Uuid],
    company_id: Uuid,
) -> AppResult<HashMap<Uuid, Format>> {
    let rows = sqlx::query_as::<_, FormatRow>(
        r#"
        SELECT f.id, f.product_id, p.name AS product_name, f.size, f.volume, f.unit, f.packaging
        FROM formats f
        JOIN products p ON p.id = f.product_id
        WHERE f.id = ANY($1) AND p.company_id = $2
        "#,
    )
    .bind(format_ids)
    .bind(company_id)
    .fetch_all(executor)
    .await?;

    Ok(rows.into_iter().map(|r| (r.id, Format::from(r))).collect())
}
