//! Subscription model - links a consumer to an origin source.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::common::id::db_id;
use crate::kernel::record::Record;

#[derive(sqlx::FromRow, Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Subscription {
    #[builder(default = db_id())]
    pub id: Uuid,
    pub consumer_id: Uuid,
    pub source_id: String,
    #[builder(default)]
    pub source_name: String,
    #[builder(default = true)]
    pub active: bool,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// Every source at least one active subscription points at; the scanner
    /// fetches each of these once per cycle.
    pub async fn distinct_active_source_ids(pool: &PgPool) -> Result<Vec<String>> {
        sqlx::query_scalar::<_, String>(
            "SELECT DISTINCT source_id FROM subscriptions WHERE active ORDER BY source_id",
        )
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Consumers actively subscribed to one source.
    pub async fn active_subscriber_ids(source_id: &str, pool: &PgPool) -> Result<Vec<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT consumer_id FROM subscriptions WHERE source_id = $1 AND active",
        )
        .bind(source_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}

#[async_trait]
impl Record for Subscription {
    const TABLE: &'static str = "subscriptions";
    type Id = Uuid;

    async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM subscriptions WHERE id = $1")
            .bind(id)
            .fetch_one(db)
            .await
            .map_err(Into::into)
    }

    async fn insert(&self, db: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO subscriptions (id, consumer_id, source_id, source_name, active, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(self.id)
        .bind(self.consumer_id)
        .bind(&self.source_id)
        .bind(&self.source_name)
        .bind(self.active)
        .bind(self.created_at)
        .fetch_one(db)
        .await
        .map_err(Into::into)
    }

    async fn update(&self, db: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "UPDATE subscriptions SET source_name = $2, active = $3 WHERE id = $1 RETURNING *",
        )
        .bind(self.id)
        .bind(&self.source_name)
        .bind(self.active)
        .fetch_one(db)
        .await
        .map_err(Into::into)
    }

    async fn delete(&self, db: &PgPool) -> Result<()> {
        sqlx::query("DELETE FROM subscriptions WHERE id = $1")
            .bind(self.id)
            .execute(db)
            .await?;
        Ok(())
    }
}
