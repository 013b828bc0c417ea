//! Test fixtures built on the model methods.

use anyhow::Result;
use chrono::{TimeDelta, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use worker_core::domains::items::{Item, ItemStatus};
use worker_core::domains::{Consumer, Subscription};
use worker_core::kernel::feeds::FeedEntry;
use worker_core::kernel::jobs::{EnqueueOutcome, Job, JobQueue};
use worker_core::kernel::record::Record;

/// Consumer with a connected channel and a chat id.
pub async fn create_reachable_consumer(pool: &PgPool) -> Result<Consumer> {
    Consumer::builder()
        .chat_id(format!("{}", rand_chat_id()))
        .channel_connected(true)
        .build()
        .insert(pool)
        .await
}

/// Consumer with no usable channel.
pub async fn create_disconnected_consumer(pool: &PgPool) -> Result<Consumer> {
    Consumer::builder().channel_connected(false).build().insert(pool).await
}

pub async fn create_subscription(
    pool: &PgPool,
    consumer_id: Uuid,
    source_id: &str,
) -> Result<Subscription> {
    Subscription::builder()
        .consumer_id(consumer_id)
        .source_id(source_id)
        .source_name("Test Source")
        .build()
        .insert(pool)
        .await
}

pub async fn create_item(pool: &PgPool, item_id: &str, status: ItemStatus) -> Result<Item> {
    let item = Item::builder()
        .item_id(item_id)
        .title(format!("Item {item_id}"))
        .origin_url(format!("https://youtu.be/{item_id}"))
        .status(status)
        .build();
    item.insert_if_absent(pool).await?;
    Ok(item)
}

pub async fn create_completed_item(pool: &PgPool, item_id: &str) -> Result<Item> {
    let item = create_item(pool, item_id, ItemStatus::Pending).await?;
    Item::mark_completed(
        item_id,
        &format!("https://store.example/brief_{item_id}.mp3"),
        "A short summary.",
        serde_json::json!({}),
        pool,
    )
    .await?;
    Ok(item)
}

/// Pending item plus its queued job; returns the job id.
pub async fn create_queued_job(pool: &PgPool, queue: &JobQueue, item_id: &str) -> Result<Uuid> {
    create_item(pool, item_id, ItemStatus::Pending).await?;
    let job = Job::builder()
        .item_id(item_id)
        .origin_url(format!("https://youtu.be/{item_id}"))
        .title(format!("Item {item_id}"))
        .build();
    match queue.enqueue(job).await? {
        EnqueueOutcome::Created(id) => Ok(id),
        EnqueueOutcome::Duplicate => anyhow::bail!("job already existed for {item_id}"),
    }
}

pub fn feed_entry(item_id: &str) -> FeedEntry {
    FeedEntry {
        item_id: item_id.to_string(),
        title: format!("Item {item_id}"),
        url: format!("https://www.youtube.com/watch?v={item_id}"),
        published_at: Some(Utc::now() - TimeDelta::minutes(10)),
    }
}

pub fn unique_id(prefix: &str) -> String {
    format!("{prefix}_{}", &Uuid::new_v4().simple().to_string()[..8])
}

fn rand_chat_id() -> i64 {
    (Uuid::new_v4().as_u128() % 1_000_000_000) as i64
}
