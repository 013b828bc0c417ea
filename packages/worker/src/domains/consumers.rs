//! Consumer model - a person briefs are delivered to.

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
pub struct Consumer {
    #[builder(default = db_id())]
    pub id: Uuid,
    #[builder(default, setter(strip_option))]
    pub chat_id: Option<String>,
    #[builder(default = false)]
    pub channel_connected: bool,
    #[builder(default = "fr".to_string())]
    pub target_language: String,
    #[builder(default, setter(strip_option))]
    pub voice: Option<String>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
}

impl Consumer {
    /// A consumer is reachable iff the channel is connected and has an
    /// address to send to.
    pub fn has_channel(&self) -> bool {
        self.channel_connected && self.chat_id.is_some()
    }
}

#[async_trait]
impl Record for Consumer {
    const TABLE: &'static str = "consumers";
    type Id = Uuid;

    async fn find_by_id(id: Uuid, db: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>("SELECT * FROM consumers WHERE id = $1")
            .bind(id)
            .fetch_one(db)
            .await
            .map_err(Into::into)
    }

    async fn insert(&self, db: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "INSERT INTO consumers (id, chat_id, channel_connected, target_language, voice, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING *",
        )
        .bind(self.id)
        .bind(&self.chat_id)
        .bind(self.channel_connected)
        .bind(&self.target_language)
        .bind(&self.voice)
        .bind(self.created_at)
        .fetch_one(db)
        .await
        .map_err(Into::into)
    }

    async fn update(&self, db: &PgPool) -> Result<Self> {
        sqlx::query_as::<_, Self>(
            "UPDATE consumers
             SET chat_id = $2, channel_connected = $3, target_language = $4, voice = $5
             WHERE id = $1
             RETURNING *",
        )
        .bind(self.id)
        .bind(&self.chat_id)
        .bind(self.channel_connected)
        .bind(&self.target_language)
        .bind(&self.voice)
        .fetch_one(db)
        .await
        .map_err(Into::into)
    }

    async fn delete(&self, db: &PgPool) -> Result<()> {
        sqlx::query("DELETE FROM consumers WHERE id = $1")
            .bind(self.id)
            .execute(db)
            .await?;
        Ok(())
    }
}
