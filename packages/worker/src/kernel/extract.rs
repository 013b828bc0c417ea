//! Tiered content extraction - tries free captions first, falls back to a
//! paid transcription gateway when no caption track exists.
//!
//! The worker pool does not pick the order; it only classifies the returned
//! failure as retryable or terminal via [`ExtractError::is_retryable`].

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use tracing::{info, warn};

use super::feeds::extract_item_id;

/// Result of a successful extraction.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub text: String,
    /// Language code of the retrieved text ("auto" when the source picked).
    pub language: String,
    /// 0.0 for the free caption tier, > 0 for the paid fallback.
    pub cost_usd: f64,
}

/// Extraction failure, classified for the retry state machine.
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    /// No transcript yet - fresh items often grow captions minutes later.
    #[error("no transcript available")]
    NotYetAvailable,

    /// The caption source is throttling us.
    #[error("rate limited by caption source")]
    RateLimited,

    /// Captions are permanently disabled for this item.
    #[error("captions disabled")]
    CaptionsDisabled,

    /// The item was deleted or made private at the origin.
    #[error("item unavailable")]
    ItemUnavailable,

    #[error("could not parse an item id from url: {0}")]
    InvalidUrl(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ExtractError {
    /// Static classification table: which failures are worth a requeue.
    /// Unexpected errors count as retryable - the attempt cap bounds them.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ExtractError::CaptionsDisabled
                | ExtractError::ItemUnavailable
                | ExtractError::InvalidUrl(_)
        )
    }

    /// Whether the paid fallback tier could still produce a transcript.
    fn fallback_can_help(&self) -> bool {
        matches!(
            self,
            ExtractError::NotYetAvailable
                | ExtractError::RateLimited
                | ExtractError::CaptionsDisabled
                | ExtractError::Other(_)
        )
    }
}

/// Narrow contract for the extraction stage.
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    async fn extract(
        &self,
        origin_url: &str,
        preferred_languages: &[String],
    ) -> std::result::Result<Extraction, ExtractError>;
}

/// Extractor that tries the free caption track first and falls back to the
/// transcription gateway when one is configured.
pub struct TieredExtractor {
    captions: CaptionClient,
    fallback: Option<TranscriptionGateway>,
}

impl TieredExtractor {
    pub fn new(captions: CaptionClient, fallback: Option<TranscriptionGateway>) -> Self {
        if fallback.is_some() {
            info!("paid transcription fallback enabled");
        } else {
            info!("paid transcription fallback disabled (no api key)");
        }
        Self { captions, fallback }
    }
}

#[async_trait]
impl ContentExtractor for TieredExtractor {
    async fn extract(
        &self,
        origin_url: &str,
        preferred_languages: &[String],
    ) -> std::result::Result<Extraction, ExtractError> {
        let item_id = extract_item_id(origin_url)
            .ok_or_else(|| ExtractError::InvalidUrl(origin_url.to_string()))?;

        match self.captions.fetch(&item_id, preferred_languages).await {
            Ok(extraction) => Ok(extraction),
            Err(e) if e.fallback_can_help() => {
                let Some(ref gateway) = self.fallback else {
                    return Err(e);
                };
                warn!(
                    item_id = %item_id,
                    error = %e,
                    "caption extraction failed, falling back to paid transcription"
                );
                gateway
                    .transcribe(origin_url, preferred_languages.first().map(String::as_str))
                    .await
            }
            Err(e) => Err(e),
        }
    }
}

// ============================================================================
// Free tier: origin caption tracks
// ============================================================================

const TIMEDTEXT_BASE: &str = "https://www.youtube.com/api/timedtext";

pub struct CaptionClient {
    http: reqwest::Client,
    base_url: String,
}

impl CaptionClient {
    pub fn new() -> Self {
        Self::with_base_url(TIMEDTEXT_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch the caption text for one item, preferring the given languages.
    async fn fetch(
        &self,
        item_id: &str,
        preferred_languages: &[String],
    ) -> std::result::Result<Extraction, ExtractError> {
        let tracks = self.list_tracks(item_id).await?;
        if tracks.is_empty() {
            return Err(ExtractError::NotYetAvailable);
        }

        // Preferred language first, otherwise whatever track exists.
        let chosen = preferred_languages
            .iter()
            .find_map(|lang| tracks.iter().find(|t| t == &lang))
            .cloned()
            .unwrap_or_else(|| tracks[0].clone());

        let text = self.fetch_track(item_id, &chosen).await?;
        if text.trim().is_empty() {
            return Err(ExtractError::NotYetAvailable);
        }

        let language = if preferred_languages.contains(&chosen) {
            chosen
        } else {
            "auto".to_string()
        };
        info!(item_id, %language, chars = text.len(), "caption track extracted");
        Ok(Extraction {
            text,
            language,
            cost_usd: 0.0,
        })
    }

    /// List available caption language codes for an item.
    async fn list_tracks(&self, item_id: &str) -> std::result::Result<Vec<String>, ExtractError> {
        let url = format!("{}?type=list&v={}", self.base_url, item_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("caption track list request failed")?;

        match response.status().as_u16() {
            429 => return Err(ExtractError::RateLimited),
            404 | 410 => return Err(ExtractError::ItemUnavailable),
            status if status >= 400 => {
                return Err(anyhow!("caption track list returned http {status}").into())
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .context("caption track list body read failed")?;
        Ok(parse_track_languages(&body))
    }

    async fn fetch_track(
        &self,
        item_id: &str,
        lang: &str,
    ) -> std::result::Result<String, ExtractError> {
        let url = format!("{}?v={}&lang={}&fmt=json3", self.base_url, item_id, lang);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .context("caption track request failed")?;
        if response.status().as_u16() == 429 {
            return Err(ExtractError::RateLimited);
        }
        if !response.status().is_success() {
            return Err(anyhow!("caption track returned http {}", response.status()).into());
        }
        let body: TimedTextBody = response
            .json()
            .await
            .context("caption track body parse failed")?;
        Ok(body.joined_text())
    }
}

impl Default for CaptionClient {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    static ref LANG_CODE_REGEX: Regex = Regex::new(r#"lang_code="([^"]+)""#).unwrap();
}

/// Pull `lang_code="xx"` attributes out of the track-list document.
fn parse_track_languages(body: &str) -> Vec<String> {
    LANG_CODE_REGEX
        .captures_iter(body)
        .map(|c| c[1].to_string())
        .collect()
}

#[derive(Debug, Deserialize)]
struct TimedTextBody {
    #[serde(default)]
    events: Vec<TimedTextEvent>,
}

#[derive(Debug, Deserialize)]
struct TimedTextEvent {
    #[serde(default)]
    segs: Vec<TimedTextSeg>,
}

#[derive(Debug, Deserialize)]
struct TimedTextSeg {
    #[serde(default)]
    utf8: String,
}

impl TimedTextBody {
    fn joined_text(&self) -> String {
        let mut out = String::new();
        for event in &self.events {
            for seg in &event.segs {
                let piece = seg.utf8.trim();
                if piece.is_empty() || piece == "\n" {
                    continue;
                }
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(piece);
            }
        }
        out
    }
}

// ============================================================================
// Paid tier: transcription gateway
// ============================================================================

/// Client for a Whisper-style transcription service that accepts an origin
/// URL and returns the transcript plus its metered cost.
pub struct TranscriptionGateway {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    cost_usd: f64,
}

impl TranscriptionGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn transcribe(
        &self,
        origin_url: &str,
        language: Option<&str>,
    ) -> std::result::Result<Extraction, ExtractError> {
        let response = self
            .http
            .post(format!("{}/v1/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "url": origin_url,
                "language": language,
            }))
            .send()
            .await
            .context("transcription gateway request failed")?;

        match response.status().as_u16() {
            429 => return Err(ExtractError::RateLimited),
            404 | 410 => return Err(ExtractError::ItemUnavailable),
            status if status >= 400 => {
                return Err(anyhow!("transcription gateway returned http {status}").into())
            }
            _ => {}
        }

        let body: TranscriptionResponse = response
            .json()
            .await
            .context("transcription gateway body parse failed")?;
        if body.text.trim().is_empty() {
            return Err(ExtractError::NotYetAvailable);
        }
        info!(cost_usd = body.cost_usd, "paid transcription succeeded");
        Ok(Extraction {
            text: body.text,
            language: body.language.unwrap_or_else(|| "auto".to_string()),
            cost_usd: body.cost_usd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_yet_available_is_retryable() {
        assert!(ExtractError::NotYetAvailable.is_retryable());
    }

    #[test]
    fn rate_limited_is_retryable() {
        assert!(ExtractError::RateLimited.is_retryable());
    }

    #[test]
    fn captions_disabled_is_terminal() {
        assert!(!ExtractError::CaptionsDisabled.is_retryable());
    }

    #[test]
    fn item_unavailable_is_terminal() {
        assert!(!ExtractError::ItemUnavailable.is_retryable());
    }

    #[test]
    fn unexpected_errors_are_retryable() {
        let err = ExtractError::Other(anyhow!("connection reset"));
        assert!(err.is_retryable());
    }

    #[test]
    fn fallback_skipped_for_unavailable_items() {
        assert!(!ExtractError::ItemUnavailable.fallback_can_help());
        assert!(!ExtractError::InvalidUrl("x".into()).fallback_can_help());
        assert!(ExtractError::CaptionsDisabled.fallback_can_help());
    }

    #[test]
    fn track_languages_parsed_from_list_body() {
        let body = r#"<transcript_list><track lang_code="fr" name=""/><track lang_code="en" name=""/></transcript_list>"#;
        assert_eq!(parse_track_languages(body), vec!["fr", "en"]);
    }

    #[test]
    fn timedtext_segments_are_joined_with_spaces() {
        let body: TimedTextBody = serde_json::from_str(
            r#"{"events":[{"segs":[{"utf8":"hello"},{"utf8":"\n"}]},{"segs":[{"utf8":"world"}]}]}"#,
        )
        .unwrap();
        assert_eq!(body.joined_text(), "hello world");
    }
}
