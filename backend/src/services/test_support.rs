//! Postgres fixtures for service tests
//!
//! Tests using these are `#[ignore]`d and run against `DATABASE_URL`:
//! `DATABASE_URL=postgres://... cargo test -- --ignored`

use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, PgPool};
use uuid::Uuid;

use crate::middleware::{AuthUser, Role};

/// Migrated pool on `DATABASE_URL`
pub(crate) async fn test_pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let pool = PgPoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .expect("connect to test database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("run migrations");
    pool
}

/// One company with a bar, a reserve and a single format
pub(crate) struct Tenant {
    pub company_id: Uuid,
    pub bar_id: Uuid,
    pub reserve_id: Uuid,
    pub format_id: Uuid,
}

impl Tenant {
    pub async fn seed(pool: &PgPool) -> Self {
        let company_id: Uuid =
            sqlx::query_scalar("INSERT INTO companies (name) VALUES ('Le Comptoir') RETURNING id")
                .fetch_one(pool)
                .await
                .expect("insert company");
        let bar_id: Uuid = sqlx::query_scalar(
            "INSERT INTO bars (company_id, name) VALUES ($1, 'Terrasse') RETURNING id",
        )
        .bind(company_id)
        .fetch_one(pool)
        .await
        .expect("insert bar");
        let reserve_id: Uuid = sqlx::query_scalar(
            "INSERT INTO reserves (company_id, name) VALUES ($1, 'Cave') RETURNING id",
        )
        .bind(company_id)
        .fetch_one(pool)
        .await
        .expect("insert reserve");
        let product_id: Uuid = sqlx::query_scalar(
            "INSERT INTO products (company_id, name) VALUES ($1, 'Blonde pression') RETURNING id",
        )
        .bind(company_id)
        .fetch_one(pool)
        .await
        .expect("insert product");
        let format_id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO formats (product_id, size, volume, unit, packaging)
            VALUES ($1, '33cl', $2, 'cl', 'bottle')
            RETURNING id
            "#,
        )
        .bind(product_id)
        .bind(Decimal::new(33, 0))
        .fetch_one(pool)
        .await
        .expect("insert format");

        Self {
            company_id,
            bar_id,
            reserve_id,
            format_id,
        }
    }

    pub fn manager(&self) -> AuthUser {
        AuthUser {
            actor_id: Uuid::new_v4(),
            company_id: self.company_id,
            role: Role::Manager,
            bar_id: None,
        }
    }
}
