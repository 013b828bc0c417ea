//! CRUD seam for typed database rows.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;

/// Standard persistence operations for a row type. Models with richer
/// query needs (items, deliveries) add their own methods on top.
#[async_trait]
pub trait Record: Sized + Send + Sync {
    /// Backing table name.
    const TABLE: &'static str;

    type Id;

    async fn find_by_id(id: Self::Id, db: &PgPool) -> Result<Self>;

    async fn insert(&self, db: &PgPool) -> Result<Self>;

    async fn update(&self, db: &PgPool) -> Result<Self>;

    async fn delete(&self, db: &PgPool) -> Result<()>;
}
