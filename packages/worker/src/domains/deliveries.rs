//! Delivery model - one row per (consumer, item) pair that should receive
//! a brief. The unique key makes re-requests upserts, never duplicates.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::common::id::db_id;

/// Send attempts after which a pending delivery is abandoned.
pub const MAX_SEND_ATTEMPTS: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "delivery_status", rename_all = "snake_case")]
pub enum DeliveryStatus {
    #[default]
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "delivery_origin", rename_all = "snake_case")]
pub enum DeliveryOrigin {
    #[default]
    Subscription,
    OnDemand,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct Delivery {
    pub id: Uuid,
    pub consumer_id: Uuid,
    pub item_id: String,
    pub status: DeliveryStatus,
    pub origin: DeliveryOrigin,
    pub send_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// One row of the dispatch candidate query: a pending delivery whose item
/// is completed and whose consumer is reachable.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct DispatchCandidate {
    pub delivery_id: Uuid,
    pub chat_id: String,
    pub item_id: String,
    pub title: String,
    pub result_url: Option<String>,
    pub summary: Option<String>,
    pub voice: Option<String>,
}

impl Delivery {
    pub async fn find(consumer_id: Uuid, item_id: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>(
            "SELECT * FROM deliveries WHERE consumer_id = $1 AND item_id = $2",
        )
        .bind(consumer_id)
        .bind(item_id)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// Ensure a pending delivery exists for (consumer, item). An existing
    /// row, whatever its status, is left untouched: a consumer who already
    /// got the brief never gets it twice. Returns whether a row was created.
    pub async fn upsert_pending(
        consumer_id: Uuid,
        item_id: &str,
        origin: DeliveryOrigin,
        pool: &PgPool,
    ) -> Result<bool> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO deliveries (id, consumer_id, item_id, status, origin)
             VALUES ($1, $2, $3, 'pending', $4)
             ON CONFLICT (consumer_id, item_id) DO NOTHING
             RETURNING id",
        )
        .bind(db_id())
        .bind(consumer_id)
        .bind(item_id)
        .bind(origin)
        .fetch_optional(pool)
        .await?;
        Ok(inserted.is_some())
    }

    /// On-demand variant of [`Self::upsert_pending`]: an explicit re-request
    /// revives an existing failed or sent row back to pending with
    /// `send_attempts` reset, so a consumer who reconnects after a sweep can
    /// ask again. An already-pending row is left alone. Returns whether a
    /// row was created or revived.
    pub async fn revive_pending(
        consumer_id: Uuid,
        item_id: &str,
        origin: DeliveryOrigin,
        pool: &PgPool,
    ) -> Result<bool> {
        let changed = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO deliveries (id, consumer_id, item_id, status, origin)
             VALUES ($1, $2, $3, 'pending', $4)
             ON CONFLICT (consumer_id, item_id) DO UPDATE
             SET status = 'pending',
                 origin = EXCLUDED.origin,
                 send_attempts = 0,
                 sent_at = NULL
             WHERE deliveries.status <> 'pending'
             RETURNING id",
        )
        .bind(db_id())
        .bind(consumer_id)
        .bind(item_id)
        .bind(origin)
        .fetch_optional(pool)
        .await?;
        Ok(changed.is_some())
    }

    pub async fn mark_sent(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE deliveries SET status = 'sent', sent_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(id: Uuid, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE deliveries SET status = 'failed' WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Count a failed send. The delivery stays pending until the attempt
    /// cap, then flips to failed. Returns the status after the bump.
    pub async fn record_send_failure(id: Uuid, pool: &PgPool) -> Result<DeliveryStatus> {
        let status = sqlx::query_scalar::<_, DeliveryStatus>(
            "UPDATE deliveries
             SET send_attempts = send_attempts + 1,
                 status = CASE WHEN send_attempts + 1 >= $2
                               THEN 'failed'::delivery_status
                               ELSE 'pending'::delivery_status END
             WHERE id = $1
             RETURNING status",
        )
        .bind(id)
        .bind(MAX_SEND_ATTEMPTS)
        .fetch_one(pool)
        .await?;
        Ok(status)
    }

    /// Pending deliveries whose item terminally failed will never have an
    /// artifact to send; fail them in one sweep. Idempotent.
    pub async fn sweep_failed_items(pool: &PgPool) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE deliveries d
             SET status = 'failed'
             FROM items i
             WHERE d.item_id = i.item_id
               AND d.status = 'pending'
               AND i.status = 'failed'",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Pending deliveries whose consumer has no usable channel cannot be
    /// sent; fail them in one sweep. Idempotent.
    pub async fn sweep_unreachable(pool: &PgPool) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE deliveries d
             SET status = 'failed'
             FROM consumers c
             WHERE d.consumer_id = c.id
               AND d.status = 'pending'
               AND (NOT c.channel_connected OR c.chat_id IS NULL)",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Dispatch candidates: start from completed items so pending deliveries
    /// for unfinished items are never touched. Ordered oldest delivery
    /// first, grouped by item so the dispatcher can reuse one downloaded
    /// artifact across consumers.
    pub async fn dispatch_candidates(limit: i64, pool: &PgPool) -> Result<Vec<DispatchCandidate>> {
        sqlx::query_as::<_, DispatchCandidate>(
            "SELECT d.id AS delivery_id,
                    c.chat_id,
                    i.item_id,
                    i.title,
                    i.result_url,
                    i.summary,
                    c.voice
             FROM items i
             JOIN deliveries d ON d.item_id = i.item_id AND d.status = 'pending'
             JOIN consumers c ON c.id = d.consumer_id
                             AND c.channel_connected
                             AND c.chat_id IS NOT NULL
             WHERE i.status = 'completed'
             ORDER BY min(d.created_at) OVER (PARTITION BY i.item_id), i.item_id, d.created_at
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }
}
