//! Dispatcher: candidate selection, send retries, cleanup sweeps.

mod common;

use common::{
    create_completed_item, create_disconnected_consumer, create_item,
    create_reachable_consumer, unique_id, TestHarness,
};
use test_context::test_context;
use worker_core::delivery;
use worker_core::domains::deliveries::{Delivery, DeliveryOrigin, DeliveryStatus};
use worker_core::domains::items::ItemStatus;
use worker_core::kernel::channel::SendOutcome;
use worker_core::kernel::test_dependencies::{MockChannel, TestKernelBuilder};

#[test_context(TestHarness)]
#[tokio::test]
async fn only_completed_items_are_dispatched(ctx: &TestHarness) {
    let consumer = create_reachable_consumer(&ctx.db_pool).await.unwrap();

    let mut completed_ids = Vec::new();
    for i in 0..5 {
        let item_id = unique_id(&format!("c{i}"));
        create_completed_item(&ctx.db_pool, &item_id).await.unwrap();
        Delivery::upsert_pending(consumer.id, &item_id, DeliveryOrigin::Subscription, &ctx.db_pool)
            .await
            .unwrap();
        completed_ids.push(item_id);
    }
    let mut waiting_ids = Vec::new();
    for i in 0..100 {
        let item_id = unique_id(&format!("w{i}"));
        create_item(&ctx.db_pool, &item_id, ItemStatus::Pending).await.unwrap();
        Delivery::upsert_pending(consumer.id, &item_id, DeliveryOrigin::Subscription, &ctx.db_pool)
            .await
            .unwrap();
        waiting_ids.push(item_id);
    }

    let audio = tempfile::tempdir().unwrap();
    let builder = TestKernelBuilder::new(audio.path());
    let (_, _, _, _, _, channel) = builder.handles();
    let kernel = builder.into_kernel(ctx.db_pool.clone());

    let sent = delivery::dispatch(&kernel, 200).await.unwrap();
    assert_eq!(sent, 5, "exactly the completed items go out");
    assert_eq!(channel.send_count(), 5);

    for item_id in &completed_ids {
        let d = Delivery::find(consumer.id, item_id, &ctx.db_pool).await.unwrap().unwrap();
        assert_eq!(d.status, DeliveryStatus::Sent);
        assert!(d.sent_at.is_some());
    }
    for item_id in &waiting_ids {
        let d = Delivery::find(consumer.id, item_id, &ctx.db_pool).await.unwrap().unwrap();
        assert_eq!(d.status, DeliveryStatus::Pending, "unfinished items stay pending");
    }
}

#[test_context(TestHarness)]
#[tokio::test]
async fn upsert_never_duplicates_a_delivery(ctx: &TestHarness) {
    let consumer = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    let item_id = unique_id("once");
    create_completed_item(&ctx.db_pool, &item_id).await.unwrap();

    let first = Delivery::upsert_pending(
        consumer.id, &item_id, DeliveryOrigin::Subscription, &ctx.db_pool,
    )
    .await
    .unwrap();
    let second = Delivery::upsert_pending(
        consumer.id, &item_id, DeliveryOrigin::OnDemand, &ctx.db_pool,
    )
    .await
    .unwrap();
    assert!(first);
    assert!(!second);

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM deliveries WHERE consumer_id = $1 AND item_id = $2",
    )
    .bind(consumer.id)
    .bind(&item_id)
    .fetch_one(&ctx.db_pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn sent_deliveries_are_never_dispatched_again(ctx: &TestHarness) {
    let consumer = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    let item_id = unique_id("resend");
    create_completed_item(&ctx.db_pool, &item_id).await.unwrap();
    Delivery::upsert_pending(consumer.id, &item_id, DeliveryOrigin::Subscription, &ctx.db_pool)
        .await
        .unwrap();

    let audio = tempfile::tempdir().unwrap();
    let builder = TestKernelBuilder::new(audio.path());
    let (_, _, _, _, _, channel) = builder.handles();
    let kernel = builder.into_kernel(ctx.db_pool.clone());

    assert_eq!(delivery::dispatch(&kernel, 10).await.unwrap(), 1);
    assert_eq!(delivery::dispatch(&kernel, 10).await.unwrap(), 0);
    assert_eq!(channel.send_count(), 1);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn cleanup_sweeps_deliveries_for_failed_items(ctx: &TestHarness) {
    let consumer = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    let item_id = unique_id("deaditem");
    create_item(&ctx.db_pool, &item_id, ItemStatus::Failed).await.unwrap();
    Delivery::upsert_pending(consumer.id, &item_id, DeliveryOrigin::Subscription, &ctx.db_pool)
        .await
        .unwrap();

    assert_eq!(Delivery::sweep_failed_items(&ctx.db_pool).await.unwrap(), 1);
    let d = Delivery::find(consumer.id, &item_id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(d.status, DeliveryStatus::Failed);

    // Idempotent: a second sweep touches nothing.
    assert_eq!(Delivery::sweep_failed_items(&ctx.db_pool).await.unwrap(), 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn cleanup_sweeps_deliveries_for_unreachable_consumers(ctx: &TestHarness) {
    let consumer = create_disconnected_consumer(&ctx.db_pool).await.unwrap();
    let item_id = unique_id("noone");
    create_completed_item(&ctx.db_pool, &item_id).await.unwrap();
    Delivery::upsert_pending(consumer.id, &item_id, DeliveryOrigin::Subscription, &ctx.db_pool)
        .await
        .unwrap();

    assert_eq!(Delivery::sweep_unreachable(&ctx.db_pool).await.unwrap(), 1);
    let d = Delivery::find(consumer.id, &item_id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(d.status, DeliveryStatus::Failed);
    assert_eq!(Delivery::sweep_unreachable(&ctx.db_pool).await.unwrap(), 0);

    // And dispatch never picks it up either way.
    let audio = tempfile::tempdir().unwrap();
    let kernel = TestKernelBuilder::new(audio.path()).into_kernel(ctx.db_pool.clone());
    assert_eq!(delivery::dispatch(&kernel, 10).await.unwrap(), 0);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn transient_send_failures_retry_then_count_against_the_delivery(ctx: &TestHarness) {
    let consumer = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    let item_id = unique_id("flaky");
    create_completed_item(&ctx.db_pool, &item_id).await.unwrap();
    Delivery::upsert_pending(consumer.id, &item_id, DeliveryOrigin::Subscription, &ctx.db_pool)
        .await
        .unwrap();

    let audio = tempfile::tempdir().unwrap();
    let builder = TestKernelBuilder::new(audio.path()).mock_channel(
        MockChannel::new()
            .with_outcome(SendOutcome::Failed { transient: true })
            .with_outcome(SendOutcome::Failed { transient: true })
            .with_outcome(SendOutcome::Failed { transient: true }),
    );
    let (_, _, _, _, _, channel) = builder.handles();
    let kernel = builder.into_kernel(ctx.db_pool.clone());

    assert_eq!(delivery::dispatch(&kernel, 10).await.unwrap(), 0);
    assert_eq!(channel.send_count(), 3, "initial attempt plus two retries");

    let d = Delivery::find(consumer.id, &item_id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(d.status, DeliveryStatus::Pending, "still pending after one failed cycle");
    assert_eq!(d.send_attempts, 1);

    // The outcome queue is exhausted, so the next cycle delivers.
    assert_eq!(delivery::dispatch(&kernel, 10).await.unwrap(), 1);
    let d = Delivery::find(consumer.id, &item_id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(d.status, DeliveryStatus::Sent);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn permanent_send_failure_fails_the_delivery_at_once(ctx: &TestHarness) {
    let consumer = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    let item_id = unique_id("blocked");
    create_completed_item(&ctx.db_pool, &item_id).await.unwrap();
    Delivery::upsert_pending(consumer.id, &item_id, DeliveryOrigin::Subscription, &ctx.db_pool)
        .await
        .unwrap();

    let audio = tempfile::tempdir().unwrap();
    let builder = TestKernelBuilder::new(audio.path()).mock_channel(
        MockChannel::new().with_outcome(SendOutcome::Failed { transient: false }),
    );
    let (_, _, _, _, _, channel) = builder.handles();
    let kernel = builder.into_kernel(ctx.db_pool.clone());

    assert_eq!(delivery::dispatch(&kernel, 10).await.unwrap(), 0);
    assert_eq!(channel.send_count(), 1, "no retries on a permanent failure");
    let d = Delivery::find(consumer.id, &item_id, &ctx.db_pool).await.unwrap().unwrap();
    assert_eq!(d.status, DeliveryStatus::Failed);
}

#[test_context(TestHarness)]
#[tokio::test]
async fn one_artifact_serves_every_subscriber_of_an_item(ctx: &TestHarness) {
    let consumer_a = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    let consumer_b = create_reachable_consumer(&ctx.db_pool).await.unwrap();
    let item_id = unique_id("shared");
    create_completed_item(&ctx.db_pool, &item_id).await.unwrap();
    for consumer in [&consumer_a, &consumer_b] {
        Delivery::upsert_pending(
            consumer.id, &item_id, DeliveryOrigin::Subscription, &ctx.db_pool,
        )
        .await
        .unwrap();
    }

    let audio = tempfile::tempdir().unwrap();
    let builder = TestKernelBuilder::new(audio.path());
    let (_, _, _, speech, _, channel) = builder.handles();
    let kernel = builder.into_kernel(ctx.db_pool.clone());

    assert_eq!(delivery::dispatch(&kernel, 10).await.unwrap(), 2);
    assert_eq!(channel.send_count(), 2);
    // The stored result_url is unreachable in tests, so the audio came from
    // one regeneration shared through the in-cycle cache.
    assert_eq!(speech.calls().len(), 1);
}
