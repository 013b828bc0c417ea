//! Feed change detector: one pass over every subscribed source, turning
//! newly published entries into pending items, queued jobs and pending
//! deliveries.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domains::deliveries::{Delivery, DeliveryOrigin};
use crate::domains::items::{Item, ItemStatus};
use crate::domains::subscriptions::Subscription;
use crate::kernel::feeds::{is_short_form, FeedEntry};
use crate::kernel::jobs::{Job, JobQueue};
use crate::kernel::WorkerKernel;

/// Entries published up to this far in the future are still taken, to
/// absorb clock skew between us and the origin.
const PUBLISH_GRACE_SECS: i64 = 60;

/// An entry stamped further in the future than the grace window is a
/// scheduled publish; leave it for a later scan.
fn is_future_publish(published_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match published_at {
        Some(at) => (at - now).num_seconds() > PUBLISH_GRACE_SECS,
        None => false,
    }
}

/// Scan every source with at least one active subscription. Returns how
/// many new items were queued. A failing source is logged and skipped;
/// one broken feed never stalls the others.
pub async fn scan_all(kernel: &WorkerKernel) -> Result<u32> {
    let pool = &kernel.db_pool;
    let known = Item::all_known_ids(pool).await?;
    let sources = Subscription::distinct_active_source_ids(pool).await?;
    let queue = JobQueue::new(pool.clone(), kernel.stale_claim_secs);

    let mut new_items = 0u32;
    for source_id in &sources {
        let entries = match kernel.feed_source.list_recent(source_id).await {
            Ok(entries) => entries,
            Err(e) => {
                error!(source_id, error = %e, "feed fetch failed, skipping source");
                continue;
            }
        };

        let subscribers = Subscription::active_subscriber_ids(source_id, pool).await?;
        let now = Utc::now();
        for entry in entries {
            if known.contains(&entry.item_id) {
                continue;
            }
            if is_future_publish(entry.published_at, now) {
                continue;
            }
            if is_short_form(&entry.url) {
                // Remember short-form clips as skipped so the known-id set
                // filters them out of every later scan.
                insert_entry(&entry, source_id, ItemStatus::Skipped, pool).await?;
                continue;
            }

            if !insert_entry(&entry, source_id, ItemStatus::Pending, pool).await? {
                // Raced with another insert since the bulk load; treat as known.
                continue;
            }

            let job = Job::builder()
                .item_id(entry.item_id.clone())
                .origin_url(entry.url.clone())
                .title(entry.title.clone())
                .source_id(source_id.clone())
                .build();
            queue.enqueue(job).await?;

            for consumer_id in &subscribers {
                Delivery::upsert_pending(
                    *consumer_id,
                    &entry.item_id,
                    DeliveryOrigin::Subscription,
                    pool,
                )
                .await?;
            }

            info!(
                item_id = %entry.item_id,
                source_id,
                subscribers = subscribers.len(),
                "new item queued"
            );
            new_items += 1;
        }
    }

    kernel.stats.record_scan(new_items as u64);
    Ok(new_items)
}

/// Bulk-register a source's current feed as `skipped`. Run when a
/// subscription to a new source begins, so pre-subscription history is
/// known but never queued. Returns how many rows were inserted.
pub async fn backfill_skipped(kernel: &WorkerKernel, source_id: &str) -> Result<u32> {
    let entries = kernel.feed_source.list_recent(source_id).await?;
    let mut inserted = 0u32;
    for entry in entries {
        if insert_entry(&entry, source_id, ItemStatus::Skipped, &kernel.db_pool).await? {
            inserted += 1;
        }
    }
    info!(source_id, inserted, "backfilled source history as skipped");
    Ok(inserted)
}

async fn insert_entry(
    entry: &FeedEntry,
    source_id: &str,
    status: ItemStatus,
    pool: &sqlx::PgPool,
) -> Result<bool> {
    Item::builder()
        .item_id(entry.item_id.clone())
        .source_id(source_id)
        .title(entry.title.clone())
        .origin_url(entry.url.clone())
        .status(status)
        .build()
        .insert_if_absent(pool)
        .await
}

/// Scanner service loop: one scan per interval until cancelled.
pub async fn run(kernel: Arc<WorkerKernel>, interval: Duration, cancel: CancellationToken) {
    info!(interval_secs = interval.as_secs(), "scanner loop started");
    loop {
        match scan_all(&kernel).await {
            Ok(new_items) if new_items > 0 => info!(new_items, "scan cycle finished"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "scan cycle failed"),
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }
    info!("scanner loop stopped");
}
