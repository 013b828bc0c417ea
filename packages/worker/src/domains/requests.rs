//! On-demand requests: a consumer asks for one specific item outside any
//! subscription. The chat command itself lives elsewhere; this is the
//! engine-side operation it calls.

use anyhow::Result;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domains::deliveries::{Delivery, DeliveryOrigin};
use crate::domains::items::{Item, ItemStatus};
use crate::kernel::jobs::{Job, JobQueue};
use crate::kernel::WorkerKernel;

/// What the request ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The item is already enriched; only a delivery was queued.
    DeliveryQueued,
    /// Enrichment is underway or was just started; the delivery will go out
    /// once it completes.
    EnrichmentQueued,
    /// This consumer already has a delivery for this item.
    AlreadyRequested,
    /// The item terminally failed enrichment and is not re-tried.
    Unavailable,
}

/// Handle one on-demand request.
///
/// A request never re-triggers enrichment for an item that already has an
/// outcome: completed items get a delivery straight away, in-flight items
/// just attach a delivery, failed items are refused. Skipped items (scan
/// backfill history) are the one revival path: an explicit request is
/// exactly how history gets enriched.
pub async fn request_item(
    kernel: &WorkerKernel,
    consumer_id: Uuid,
    item_id: &str,
) -> Result<RequestOutcome> {
    let pool = &kernel.db_pool;

    let existing = Item::find_by_id(item_id, pool).await?;
    match existing.as_ref().map(|i| i.status) {
        Some(ItemStatus::Completed) => {
            let queued =
                Delivery::revive_pending(consumer_id, item_id, DeliveryOrigin::OnDemand, pool)
                    .await?;
            info!(item_id, %consumer_id, queued, "on-demand request for completed item");
            return Ok(if queued {
                RequestOutcome::DeliveryQueued
            } else {
                RequestOutcome::AlreadyRequested
            });
        }
        Some(ItemStatus::Failed) => {
            // TODO: surface a user-visible reason once the bot command
            // carries error details; today the request is just refused.
            warn!(item_id, %consumer_id, "on-demand request for failed item refused");
            return Ok(RequestOutcome::Unavailable);
        }
        Some(ItemStatus::Pending) | Some(ItemStatus::Processing) => {
            let queued =
                Delivery::revive_pending(consumer_id, item_id, DeliveryOrigin::OnDemand, pool)
                    .await?;
            return Ok(if queued {
                RequestOutcome::EnrichmentQueued
            } else {
                RequestOutcome::AlreadyRequested
            });
        }
        Some(ItemStatus::Skipped) => {
            Item::reopen_for_enrichment(item_id, pool).await?;
        }
        None => {}
    }

    // A revived skipped item keeps its stored origin URL and title; only a
    // genuinely unknown item gets a synthesized URL and a title lookup.
    let (origin_url, title) = match existing {
        Some(item) => (item.origin_url, item.title),
        None => {
            let origin_url = format!("https://www.youtube.com/watch?v={item_id}");
            let title = kernel
                .feed_source
                .resolve_title(item_id)
                .await
                .unwrap_or_else(|| item_id.to_string());
            let item = Item::builder()
                .item_id(item_id)
                .title(title.clone())
                .origin_url(origin_url.clone())
                .build();
            item.insert_if_absent(pool).await?;
            (origin_url, title)
        }
    };

    let queue = JobQueue::new(pool.clone(), kernel.stale_claim_secs);
    let job = Job::builder()
        .item_id(item_id)
        .origin_url(origin_url)
        .title(title)
        .build();
    queue.enqueue(job).await?;
    Delivery::revive_pending(consumer_id, item_id, DeliveryOrigin::OnDemand, pool).await?;
    info!(item_id, %consumer_id, "on-demand enrichment queued");
    Ok(RequestOutcome::EnrichmentQueued)
}

/// On-demand deliveries created by a consumer this calendar month.
pub async fn monthly_on_demand_count(consumer_id: Uuid, pool: &PgPool) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*)
         FROM deliveries
         WHERE consumer_id = $1
           AND origin = 'on_demand'
           AND created_at >= date_trunc('month', NOW())",
    )
    .bind(consumer_id)
    .fetch_one(pool)
    .await
    .map_err(Into::into)
}
