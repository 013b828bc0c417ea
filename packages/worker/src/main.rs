use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use telegram::BotClient;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use worker_core::common::stats::WorkerStats;
use worker_core::kernel::artifacts::{ArtifactStore, BucketStore, LocalStore};
use worker_core::kernel::channel::TelegramChannel;
use worker_core::kernel::extract::{CaptionClient, TieredExtractor, TranscriptionGateway};
use worker_core::kernel::feeds::YouTubeFeedClient;
use worker_core::kernel::speech::SpeechGateway;
use worker_core::kernel::summarize::GeminiClient;
use worker_core::kernel::WorkerKernel;
use worker_core::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,worker_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    tracing::info!("Starting Feedcast worker");

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;

    let transcription_fallback = config
        .transcription_api_key
        .as_ref()
        .map(|key| TranscriptionGateway::new("https://api.groq.com/openai", key));
    let extractor = TieredExtractor::new(CaptionClient::new(), transcription_fallback);

    let artifacts: Arc<dyn ArtifactStore> =
        match (&config.storage_url, &config.storage_service_key) {
            (Some(url), Some(key)) => Arc::new(BucketStore::new(url, key, "briefs")),
            _ => {
                tracing::info!("no bucket configured, artifacts stay on local disk");
                Arc::new(LocalStore::new(&config.audio_dir))
            }
        };

    let kernel = Arc::new(WorkerKernel::new(
        pool,
        Arc::new(YouTubeFeedClient::new()),
        Arc::new(extractor),
        Arc::new(GeminiClient::new(&config.gemini_api_key)),
        Arc::new(SpeechGateway::new(&config.tts_service_url, &config.audio_dir)),
        artifacts,
        Arc::new(TelegramChannel::new(BotClient::new(
            &config.telegram_bot_token,
        ))),
        Arc::new(WorkerStats::new()),
        config.audio_dir.clone(),
        config.default_voice.clone(),
        config.stale_claim_secs,
    ));

    let cancel = CancellationToken::new();
    let scanner = tokio::spawn(worker_core::scanner::run(
        kernel.clone(),
        Duration::from_secs(config.scan_interval_secs),
        cancel.clone(),
    ));
    let pool_loop = tokio::spawn(worker_core::pipeline::run(
        kernel.clone(),
        config.max_concurrent_items,
        Duration::from_secs(config.pipeline_timeout_secs),
        cancel.clone(),
    ));
    let dispatcher = tokio::spawn(worker_core::delivery::run(
        kernel.clone(),
        config.delivery_batch_size as usize,
        cancel.clone(),
    ));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received, stopping loops");
    cancel.cancel();

    let _ = tokio::join!(scanner, pool_loop, dispatcher);

    let snapshot = kernel.stats.snapshot();
    tracing::info!(
        uptime_secs = snapshot.uptime_secs,
        items_processed = snapshot.items_processed,
        items_failed = snapshot.items_failed,
        scans_run = snapshot.scans_run,
        new_items_found = snapshot.new_items_found,
        deliveries_sent = snapshot.deliveries_sent,
        deliveries_failed = snapshot.deliveries_failed,
        "Feedcast worker stopped"
    );
    Ok(())
}
