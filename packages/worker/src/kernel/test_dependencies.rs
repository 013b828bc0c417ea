// Mock collaborators that can be injected into WorkerKernel for tests.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use super::artifacts::ArtifactStore;
use super::channel::{Brief, OutboundChannel, SendOutcome};
use super::extract::{ContentExtractor, ExtractError, Extraction};
use super::feeds::{FeedEntry, FeedSource};
use super::speech::SpeechSynthesizer;
use super::summarize::Summarizer;
use super::WorkerKernel;
use crate::common::stats::WorkerStats;

// =============================================================================
// Mock feed source
// =============================================================================

pub struct MockFeedSource {
    entries: Mutex<std::collections::HashMap<String, Vec<FeedEntry>>>,
    titles: Mutex<std::collections::HashMap<String, String>>,
    failing_sources: Mutex<Vec<String>>,
    list_calls: Mutex<Vec<String>>,
}

impl MockFeedSource {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Default::default()),
            titles: Mutex::new(Default::default()),
            failing_sources: Mutex::new(Vec::new()),
            list_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_entries(self, source_id: &str, entries: Vec<FeedEntry>) -> Self {
        self.entries
            .lock()
            .unwrap()
            .insert(source_id.to_string(), entries);
        self
    }

    pub fn with_title(self, item_id: &str, title: &str) -> Self {
        self.titles
            .lock()
            .unwrap()
            .insert(item_id.to_string(), title.to_string());
        self
    }

    /// Make `list_recent` fail for one source, to exercise error isolation.
    pub fn with_failing_source(self, source_id: &str) -> Self {
        self.failing_sources.lock().unwrap().push(source_id.to_string());
        self
    }

    pub fn list_calls(&self) -> Vec<String> {
        self.list_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedSource for MockFeedSource {
    async fn list_recent(&self, source_id: &str) -> Result<Vec<FeedEntry>> {
        self.list_calls.lock().unwrap().push(source_id.to_string());
        if self
            .failing_sources
            .lock()
            .unwrap()
            .iter()
            .any(|s| s == source_id)
        {
            return Err(anyhow!("mock feed failure for {source_id}"));
        }
        Ok(self
            .entries
            .lock()
            .unwrap()
            .get(source_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn resolve_title(&self, item_id: &str) -> Option<String> {
        self.titles.lock().unwrap().get(item_id).cloned()
    }
}

// =============================================================================
// Mock extractor
// =============================================================================

type ExtractResult = std::result::Result<Extraction, ExtractError>;

pub struct MockExtractor {
    responses: Mutex<Vec<ExtractResult>>,
    calls: Mutex<Vec<String>>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_text(self, text: &str) -> Self {
        self.responses.lock().unwrap().push(Ok(Extraction {
            text: text.to_string(),
            language: "en".to_string(),
            cost_usd: 0.0,
        }));
        self
    }

    /// Queue a failure; responses are consumed in order, so alternating
    /// failures and successes models retries.
    pub fn with_error(self, error: ExtractError) -> Self {
        self.responses.lock().unwrap().push(Err(error));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ContentExtractor for MockExtractor {
    async fn extract(&self, origin_url: &str, _preferred_languages: &[String]) -> ExtractResult {
        self.calls.lock().unwrap().push(origin_url.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(Extraction {
                text: "mock transcript".to_string(),
                language: "en".to_string(),
                cost_usd: 0.0,
            })
        } else {
            responses.remove(0)
        }
    }
}

// =============================================================================
// Mock summarizer
// =============================================================================

pub struct MockSummarizer {
    responses: Mutex<Vec<Result<String>>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockSummarizer {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_summary(self, summary: &str) -> Self {
        self.responses.lock().unwrap().push(Ok(summary.to_string()));
        self
    }

    pub fn failing(self) -> Self {
        self.responses
            .lock()
            .unwrap()
            .push(Err(anyhow!("mock summarization failure")));
        self
    }

    /// (source_language, target_language) pairs seen so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Summarizer for MockSummarizer {
    async fn summarize(
        &self,
        _text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((source_language.to_string(), target_language.to_string()));
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok("mock summary".to_string())
        } else {
            responses.remove(0)
        }
    }
}

// =============================================================================
// Mock speech synthesizer
// =============================================================================

pub struct MockSpeech {
    dir: PathBuf,
    fail: Mutex<bool>,
    calls: Mutex<Vec<(String, String)>>,
}

impl MockSpeech {
    /// Writes real files under `dir` so downstream code can read them back.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fail: Mutex::new(false),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(self) -> Self {
        *self.fail.lock().unwrap() = true;
        self
    }

    /// (voice, file_stem) pairs seen so far.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for MockSpeech {
    async fn synthesize(&self, _text: &str, voice: &str, file_stem: &str) -> Result<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .push((voice.to_string(), file_stem.to_string()));
        if *self.fail.lock().unwrap() {
            return Err(anyhow!("mock synthesis failure"));
        }
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!("{file_stem}.mp3"));
        tokio::fs::write(&path, b"mock-audio").await?;
        Ok(path)
    }
}

// =============================================================================
// Mock artifact store
// =============================================================================

pub struct MockArtifactStore {
    objects: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    fail_uploads: Mutex<bool>,
    upload_calls: Mutex<Vec<String>>,
}

impl MockArtifactStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(Default::default()),
            fail_uploads: Mutex::new(false),
            upload_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_uploads(self) -> Self {
        *self.fail_uploads.lock().unwrap() = true;
        self
    }

    pub fn upload_calls(&self) -> Vec<String> {
        self.upload_calls.lock().unwrap().clone()
    }

    pub fn stored(&self, url: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(url).cloned()
    }
}

#[async_trait]
impl ArtifactStore for MockArtifactStore {
    async fn upload(&self, object_name: &str, bytes: Vec<u8>) -> Result<String> {
        self.upload_calls.lock().unwrap().push(object_name.to_string());
        if *self.fail_uploads.lock().unwrap() {
            return Err(anyhow!("mock upload failure"));
        }
        let url = format!("https://mock.store/{object_name}");
        self.objects.lock().unwrap().insert(url.clone(), bytes);
        Ok(url)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("mock artifact not found: {url}"))
    }
}

// =============================================================================
// Mock outbound channel
// =============================================================================

pub struct MockChannel {
    outcomes: Mutex<Vec<SendOutcome>>,
    sent: Mutex<Vec<(String, String)>>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(Vec::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn with_outcome(self, outcome: SendOutcome) -> Self {
        self.outcomes.lock().unwrap().push(outcome);
        self
    }

    /// (chat_address, item_id) pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl OutboundChannel for MockChannel {
    async fn send_brief(&self, chat_address: &str, brief: &Brief) -> SendOutcome {
        self.sent
            .lock()
            .unwrap()
            .push((chat_address.to_string(), brief.item_id.clone()));
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            SendOutcome::Delivered
        } else {
            outcomes.remove(0)
        }
    }
}

// =============================================================================
// Test kernel builder
// =============================================================================

pub struct TestKernelBuilder {
    feed_source: Arc<MockFeedSource>,
    extractor: Arc<MockExtractor>,
    summarizer: Arc<MockSummarizer>,
    speech: Arc<MockSpeech>,
    artifacts: Arc<MockArtifactStore>,
    channel: Arc<MockChannel>,
    audio_dir: PathBuf,
}

impl TestKernelBuilder {
    pub fn new(audio_dir: impl Into<PathBuf>) -> Self {
        let audio_dir = audio_dir.into();
        Self {
            feed_source: Arc::new(MockFeedSource::new()),
            extractor: Arc::new(MockExtractor::new()),
            summarizer: Arc::new(MockSummarizer::new()),
            speech: Arc::new(MockSpeech::new(&audio_dir)),
            artifacts: Arc::new(MockArtifactStore::new()),
            channel: Arc::new(MockChannel::new()),
            audio_dir,
        }
    }

    pub fn mock_feed_source(mut self, feed_source: MockFeedSource) -> Self {
        self.feed_source = Arc::new(feed_source);
        self
    }

    pub fn mock_extractor(mut self, extractor: MockExtractor) -> Self {
        self.extractor = Arc::new(extractor);
        self
    }

    pub fn mock_summarizer(mut self, summarizer: MockSummarizer) -> Self {
        self.summarizer = Arc::new(summarizer);
        self
    }

    pub fn mock_speech(mut self, speech: MockSpeech) -> Self {
        self.speech = Arc::new(speech);
        self
    }

    pub fn mock_artifacts(mut self, artifacts: MockArtifactStore) -> Self {
        self.artifacts = Arc::new(artifacts);
        self
    }

    pub fn mock_channel(mut self, channel: MockChannel) -> Self {
        self.channel = Arc::new(channel);
        self
    }

    /// Handles back to the mocks, for assertions after the kernel is built.
    pub fn handles(
        &self,
    ) -> (
        Arc<MockFeedSource>,
        Arc<MockExtractor>,
        Arc<MockSummarizer>,
        Arc<MockSpeech>,
        Arc<MockArtifactStore>,
        Arc<MockChannel>,
    ) {
        (
            self.feed_source.clone(),
            self.extractor.clone(),
            self.summarizer.clone(),
            self.speech.clone(),
            self.artifacts.clone(),
            self.channel.clone(),
        )
    }

    pub fn into_kernel(self, db_pool: PgPool) -> Arc<WorkerKernel> {
        Arc::new(WorkerKernel::new(
            db_pool,
            self.feed_source,
            self.extractor,
            self.summarizer,
            self.speech,
            self.artifacts,
            self.channel,
            Arc::new(WorkerStats::new()),
            self.audio_dir,
            "fr-FR-DeniseNeural".to_string(),
            1800,
        ))
    }
}
