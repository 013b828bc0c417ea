//! Kernel: the explicit dependency container shared by every service loop.

pub mod artifacts;
pub mod channel;
pub mod extract;
pub mod feeds;
pub mod jobs;
pub mod record;
pub mod speech;
pub mod summarize;
pub mod test_dependencies;

use std::path::PathBuf;
use std::sync::Arc;

use sqlx::PgPool;

use crate::common::stats::WorkerStats;
use artifacts::ArtifactStore;
use channel::OutboundChannel;
use extract::ContentExtractor;
use feeds::FeedSource;
use speech::SpeechSynthesizer;
use summarize::Summarizer;

/// Shared dependencies for the scanner, pipeline and dispatcher loops.
///
/// The database pool is the single source of truth for all cross-loop
/// coordination; everything else here is a stateless-enough client that
/// tolerates concurrent use.
pub struct WorkerKernel {
    pub db_pool: PgPool,
    pub feed_source: Arc<dyn FeedSource>,
    pub extractor: Arc<dyn ContentExtractor>,
    pub summarizer: Arc<dyn Summarizer>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub channel: Arc<dyn OutboundChannel>,
    pub stats: Arc<WorkerStats>,
    /// Local cache directory for synthesized audio.
    pub audio_dir: PathBuf,
    pub default_voice: String,
    /// Age in seconds after which a `processing` claim is treated as orphaned.
    pub stale_claim_secs: i64,
}

impl WorkerKernel {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: PgPool,
        feed_source: Arc<dyn FeedSource>,
        extractor: Arc<dyn ContentExtractor>,
        summarizer: Arc<dyn Summarizer>,
        speech: Arc<dyn SpeechSynthesizer>,
        artifacts: Arc<dyn ArtifactStore>,
        channel: Arc<dyn OutboundChannel>,
        stats: Arc<WorkerStats>,
        audio_dir: PathBuf,
        default_voice: String,
        stale_claim_secs: i64,
    ) -> Self {
        Self {
            db_pool,
            feed_source,
            extractor,
            summarizer,
            speech,
            artifacts,
            channel,
            stats,
            audio_dir,
            default_voice,
            stale_claim_secs,
        }
    }
}
