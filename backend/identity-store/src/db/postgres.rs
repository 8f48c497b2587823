//! PostgreSQL backend

use super::{Transactional, UserRepository};
use crate::error::Result;
use crate::models::User;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

/// Label the pool metrics are recorded under
pub const SERVICE_NAME: &str = "identity-store";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        debug!("Running identity store migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await
    }
}

#[async_trait]
impl Transactional for PgStore {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx> {
        let start = Instant::now();
        let result = self.pool.begin().await;
        db_pool::record_acquire(SERVICE_NAME, start, &result);
        db_pool::update_pool_metrics(&self.pool, SERVICE_NAME);
        Ok(result?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        tx.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl UserRepository for PgStore {
    async fn find_user(&self, tx: &mut Self::Tx, user_id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, inactive, created_at FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(user)
    }
}
