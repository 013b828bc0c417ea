//! Item model - one row per origin item, status records the enrichment
//! outcome for the rest of the item's life.

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use typed_builder::TypedBuilder;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "item_status", rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
    /// Known but deliberately never enriched (pre-subscription history,
    /// short-form clips).
    Skipped,
}

#[derive(sqlx::FromRow, Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Item {
    pub item_id: String,
    #[builder(default, setter(strip_option))]
    pub source_id: Option<String>,
    pub title: String,
    pub origin_url: String,
    #[builder(default)]
    pub status: ItemStatus,
    #[builder(default = 0)]
    pub failure_count: i32,
    #[builder(default)]
    pub result_url: Option<String>,
    #[builder(default)]
    pub summary: Option<String>,
    #[builder(default)]
    pub metadata: Option<serde_json::Value>,
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default)]
    pub processed_at: Option<DateTime<Utc>>,
}

impl Item {
    pub async fn find_by_id(item_id: &str, pool: &PgPool) -> Result<Option<Self>> {
        sqlx::query_as::<_, Self>("SELECT * FROM items WHERE item_id = $1")
            .bind(item_id)
            .fetch_optional(pool)
            .await
            .map_err(Into::into)
    }

    /// Insert-or-ignore: a row that already exists is left untouched, so a
    /// re-observing scan never downgrades a completed, failed or skipped
    /// item back to pending. Returns whether a row was created.
    pub async fn insert_if_absent(&self, pool: &PgPool) -> Result<bool> {
        let inserted = sqlx::query_scalar::<_, String>(
            "INSERT INTO items (item_id, source_id, title, origin_url, status,
                                failure_count, result_url, summary, metadata,
                                created_at, processed_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
             ON CONFLICT (item_id) DO NOTHING
             RETURNING item_id",
        )
        .bind(&self.item_id)
        .bind(&self.source_id)
        .bind(&self.title)
        .bind(&self.origin_url)
        .bind(self.status)
        .bind(self.failure_count)
        .bind(&self.result_url)
        .bind(&self.summary)
        .bind(&self.metadata)
        .bind(self.created_at)
        .bind(self.processed_at)
        .fetch_optional(pool)
        .await?;
        Ok(inserted.is_some())
    }

    pub async fn mark_processing(item_id: &str, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE items SET status = 'processing' WHERE item_id = $1")
            .bind(item_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Record a finished enrichment: artifact URL, summary text and the
    /// run's metadata in one update.
    pub async fn mark_completed(
        item_id: &str,
        result_url: &str,
        summary: &str,
        metadata: serde_json::Value,
        pool: &PgPool,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE items
             SET status = 'completed',
                 result_url = $2,
                 summary = $3,
                 metadata = $4,
                 processed_at = NOW()
             WHERE item_id = $1",
        )
        .bind(item_id)
        .bind(result_url)
        .bind(summary)
        .bind(metadata)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Revive a skipped row: an explicit request flips it back to pending
    /// so the queue will pick it up. Any other status is left alone.
    pub async fn reopen_for_enrichment(item_id: &str, pool: &PgPool) -> Result<()> {
        sqlx::query("UPDATE items SET status = 'pending' WHERE item_id = $1 AND status = 'skipped'")
            .bind(item_id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Every known item id, loaded in pages of 1000 so the scanner makes a
    /// fixed small number of round trips regardless of history size.
    pub async fn all_known_ids(pool: &PgPool) -> Result<HashSet<String>> {
        const PAGE: i64 = 1000;
        let mut ids = HashSet::new();
        let mut after = String::new();
        loop {
            let page = sqlx::query_scalar::<_, String>(
                "SELECT item_id FROM items WHERE item_id > $1 ORDER BY item_id LIMIT $2",
            )
            .bind(&after)
            .bind(PAGE)
            .fetch_all(pool)
            .await?;
            let Some(last) = page.last().cloned() else {
                break;
            };
            let full_page = page.len() as i64 == PAGE;
            ids.extend(page);
            if !full_page {
                break;
            }
            after = last;
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_item_starts_pending() {
        let item = Item::builder()
            .item_id("abc")
            .title("t")
            .origin_url("https://youtu.be/abc")
            .build();
        assert_eq!(item.status, ItemStatus::Pending);
        assert_eq!(item.failure_count, 0);
        assert!(item.result_url.is_none());
    }
}
