use std::path::PathBuf;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub telegram_bot_token: String,
    pub gemini_api_key: String,
    /// Paid transcription fallback; extraction runs captions-only when unset.
    pub transcription_api_key: Option<String>,
    pub tts_service_url: String,
    pub storage_url: Option<String>,
    pub storage_service_key: Option<String>,
    /// Seconds between feed scans.
    pub scan_interval_secs: u64,
    /// Concurrency cap for the pipeline worker pool.
    pub max_concurrent_items: usize,
    /// Per-job wall-clock budget for the whole pipeline.
    pub pipeline_timeout_secs: u64,
    /// Deliveries attempted per dispatch cycle.
    pub delivery_batch_size: i64,
    /// Age after which a `processing` claim is considered orphaned.
    pub stale_claim_secs: i64,
    pub default_voice: String,
    pub audio_dir: PathBuf,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN")
                .context("TELEGRAM_BOT_TOKEN must be set")?,
            gemini_api_key: env::var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?,
            transcription_api_key: env::var("GROQ_API_KEY").ok(),
            tts_service_url: env::var("TTS_SERVICE_URL").context("TTS_SERVICE_URL must be set")?,
            storage_url: env::var("STORAGE_URL").ok(),
            storage_service_key: env::var("STORAGE_SERVICE_KEY").ok(),
            scan_interval_secs: env::var("SCAN_INTERVAL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .context("SCAN_INTERVAL_SECS must be a valid number")?,
            max_concurrent_items: env::var("MAX_CONCURRENT_ITEMS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("MAX_CONCURRENT_ITEMS must be a valid number")?,
            pipeline_timeout_secs: env::var("PIPELINE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .context("PIPELINE_TIMEOUT_SECS must be a valid number")?,
            delivery_batch_size: env::var("DELIVERY_BATCH_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .context("DELIVERY_BATCH_SIZE must be a valid number")?,
            stale_claim_secs: env::var("STALE_CLAIM_SECS")
                .unwrap_or_else(|_| "1800".to_string())
                .parse()
                .context("STALE_CLAIM_SECS must be a valid number")?,
            default_voice: env::var("TTS_VOICE").unwrap_or_else(|_| "fr-FR-DeniseNeural".to_string()),
            audio_dir: env::var("AUDIO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("audio")),
        })
    }
}
