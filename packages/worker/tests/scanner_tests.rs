//! Feed change detection: scan scenarios, skips, and error isolation.

mod common;

use chrono::{TimeDelta, Utc};
use common::{
    create_reachable_consumer, create_subscription, feed_entry, unique_id, TestHarness,
};
use test_context::test_context;
use worker_core::domains::deliveries::{Delivery, DeliveryStatus};
use worker_core::domains::items::{Item, ItemStatus};
use worker_core::kernel::feeds::FeedEntry;
use worker_core::kernel::jobs::{JobQueue, QueueCounts};
use worker_core::kernel::test_dependencies::{MockFeedSource, TestKernelBuilder};
use worker_core::scanner;

async fn queue_counts(pool: &sqlx::PgPool) -> QueueCounts {
    JobQueue::new(pool.clone(), 3600).counts().await.unwrap()
}

#[test_context(TestHarness)]
#[tokio::test]
async fn scan_turns_new_entries_into_items_jobs_and_deliveries(ctx: &TestHarness) {
    let source_id = unique_id("src");
    let consumer_a = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    let consumer_b = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    create_subscription(&ctx.db_pool, consumer_a.id, &source_id).await.unwrap();
    create_subscription(&ctx.db_pool, consumer_b.id, &source_id).await.unwrap();

    let ids: Vec<String> = (0..3).map(|i| unique_id(&format!("v{i}"))).collect();
    let entries: Vec<FeedEntry> = ids.iter().map(|id| feed_entry(id)).collect();
    let audio = tempfile::tempdir().unwrap();
    let builder = TestKernelBuilder::new(audio.path()).mock_feed_source(
        MockFeedSource::new().with_entries(&source_id, entries),
    );
    let kernel = builder.into_kernel(ctx.db_pool.clone());

    let new_items = scanner::scan_all(&kernel).await.unwrap();
    assert_eq!(new_items, 3);

    for id in &ids {
        let item = Item::find_by_id(id, &ctx.db_pool).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Pending);
        for consumer in [&consumer_a, &consumer_b] {
            let delivery = Delivery::find(consumer.id, id, &ctx.db_pool).await.unwrap().unwrap();
            assert_eq!(delivery.status, DeliveryStatus::Pending);
        }
    }
    assert_eq!(queue_counts(&ctx.db_pool).await.queued, 3);
    assert_eq!(kernel.stats.snapshot().new_items_found, 3);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn rescan_of_known_items_queues_nothing(ctx: &TestHarness) {
    let source_id = unique_id("src");
    let consumer = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    create_subscription(&ctx.db_pool, consumer.id, &source_id).await.unwrap();

    let item_id = unique_id("seen");
    let audio = tempfile::tempdir().unwrap();
    let kernel = TestKernelBuilder::new(audio.path())
        .mock_feed_source(
            MockFeedSource::new().with_entries(&source_id, vec![feed_entry(&item_id)]),
        )
        .into_kernel(ctx.db_pool.clone());

    assert_eq!(scanner::scan_all(&kernel).await.unwrap(), 1);
    assert_eq!(scanner::scan_all(&kernel).await.unwrap(), 0);
    assert_eq!(queue_counts(&ctx.db_pool).await.queued, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn rescan_never_downgrades_a_completed_item(ctx: &TestHarness) {
    let source_id = unique_id("src");
    let consumer = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    create_subscription(&ctx.db_pool, consumer.id, &source_id).await.unwrap();

    let item_id = unique_id("done");
    let audio = tempfile::tempdir().unwrap();
    let kernel = TestKernelBuilder::new(audio.path())
        .mock_feed_source(
            MockFeedSource::new().with_entries(&source_id, vec![feed_entry(&item_id)]),
        )
        .into_kernel(ctx.db_pool.clone());

    scanner::scan_all(&kernel).await.unwrap();
    Item::mark_completed(&item_id, "https://x/brief.mp3", "s", serde_json::json!({}), &ctx.db_pool)
        .await
        .unwrap();

    scanner::scan_all(&kernel).await.unwrap();
    let item = Item::find_by_id(&item_id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Completed);
    assert_eq!(item.result_url.as_deref(), Some("https://x/brief.mp3"));
}

#[test_context(TestHarness)]
#[tokio::test]
async fn future_published_entries_wait_for_a_later_scan(ctx: &TestHarness) {
    let source_id = unique_id("src");
    let consumer = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    create_subscription(&ctx.db_pool, consumer.id, &source_id).await.unwrap();

    let item_id = unique_id("fut");
    let mut entry = feed_entry(&item_id);
    entry.published_at = Some(Utc::now() + TimeDelta::minutes(10));

    let audio = tempfile::tempdir().unwrap();
    let kernel = TestKernelBuilder::new(audio.path())
        .mock_feed_source(MockFeedSource::new().with_entries(&source_id, vec![entry]))
        .into_kernel(ctx.db_pool.clone());

    assert_eq!(scanner::scan_all(&kernel).await.unwrap(), 0);
    // Not even inserted: the next scan after publish picks it up fresh.
    assert!(Item::find_by_id(&item_id, &ctx.db_pool).await.unwrap().is_none());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn short_form_entries_are_remembered_as_skipped(ctx: &TestHarness) {
    let source_id = unique_id("src");
    let consumer = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    create_subscription(&ctx.db_pool, consumer.id, &source_id).await.unwrap();

    let item_id = unique_id("clip");
    let mut entry = feed_entry(&item_id);
    entry.url = format!("https://www.youtube.com/shorts/{item_id}");

    let audio = tempfile::tempdir().unwrap();
    let kernel = TestKernelBuilder::new(audio.path())
        .mock_feed_source(MockFeedSource::new().with_entries(&source_id, vec![entry]))
        .into_kernel(ctx.db_pool.clone());

    assert_eq!(scanner::scan_all(&kernel).await.unwrap(), 0);
    let item = Item::find_by_id(&item_id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Skipped);
    assert_eq!(queue_counts(&ctx.db_pool).await.queued, 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn one_broken_feed_does_not_stall_the_others(ctx: &TestHarness) {
    let bad_source = unique_id("bad");
    let good_source = unique_id("good");
    let consumer = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    create_subscription(&ctx.db_pool, consumer.id, &bad_source).await.unwrap();
    create_subscription(&ctx.db_pool, consumer.id, &good_source).await.unwrap();

    let item_id = unique_id("ok");
    let audio = tempfile::tempdir().unwrap();
    let kernel = TestKernelBuilder::new(audio.path())
        .mock_feed_source(
            MockFeedSource::new()
                .with_failing_source(&bad_source)
                .with_entries(&good_source, vec![feed_entry(&item_id)]),
        )
        .into_kernel(ctx.db_pool.clone());

    assert_eq!(scanner::scan_all(&kernel).await.unwrap(), 1);
    assert!(Item::find_by_id(&item_id, &ctx.db_pool).await.unwrap().is_some());
}

#[test_context(TestHarness)]
#[tokio::test]
async fn backfill_registers_history_without_queueing(ctx: &TestHarness) {
    let source_id = unique_id("src");
    let consumer = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    create_subscription(&ctx.db_pool, consumer.id, &source_id).await.unwrap();

    let ids: Vec<String> = (0..4).map(|i| unique_id(&format!("h{i}"))).collect();
    let entries: Vec<FeedEntry> = ids.iter().map(|id| feed_entry(id)).collect();
    let audio = tempfile::tempdir().unwrap();
    let kernel = TestKernelBuilder::new(audio.path())
        .mock_feed_source(MockFeedSource::new().with_entries(&source_id, entries))
        .into_kernel(ctx.db_pool.clone());

    assert_eq!(scanner::backfill_skipped(&kernel, &source_id).await.unwrap(), 4);
    for id in &ids {
        let item = Item::find_by_id(id, &ctx.db_pool).await.unwrap().unwrap();
        assert_eq!(item.status, ItemStatus::Skipped);
    }
    assert_eq!(queue_counts(&ctx.db_pool).await.queued, 0);

    // The following scan sees them as known.
    assert_eq!(scanner::scan_all(&kernel).await.unwrap(), 0);
}
