//! Feed source client - lists recently published items for a source.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

/// One entry from a source's feed, as published at the origin.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub item_id: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// Narrow contract over the origin feed.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the current item list for one source.
    async fn list_recent(&self, source_id: &str) -> Result<Vec<FeedEntry>>;

    /// Best-effort title lookup for a single item (on-demand requests).
    async fn resolve_title(&self, item_id: &str) -> Option<String>;
}

lazy_static! {
    static ref WATCH_URL_REGEX: Regex = Regex::new(
        r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/)([^&\n?#]+)"
    ).unwrap();
}

/// Extract the stable item id from an origin watch URL.
pub fn extract_item_id(url: &str) -> Option<String> {
    WATCH_URL_REGEX.captures(url).map(|c| c[1].to_string())
}

/// Short-form clips are a non-deliverable content subtype, detected by URL shape.
pub fn is_short_form(url: &str) -> bool {
    url.contains("/shorts/")
}

/// Atom feed client for YouTube channel feeds.
pub struct YouTubeFeedClient {
    http: reqwest::Client,
    feed_base: String,
    oembed_base: String,
}

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: String,
}

impl YouTubeFeedClient {
    pub fn new() -> Self {
        Self::with_base_urls(
            "https://www.youtube.com/feeds/videos.xml",
            "https://www.youtube.com/oembed",
        )
    }

    pub fn with_base_urls(feed_base: impl Into<String>, oembed_base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            feed_base: feed_base.into(),
            oembed_base: oembed_base.into(),
        }
    }

    fn feed_url(&self, source_id: &str) -> String {
        format!("{}?channel_id={}", self.feed_base, source_id)
    }
}

impl Default for YouTubeFeedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FeedSource for YouTubeFeedClient {
    async fn list_recent(&self, source_id: &str) -> Result<Vec<FeedEntry>> {
        let response = self
            .http
            .get(self.feed_url(source_id))
            .send()
            .await
            .with_context(|| format!("feed fetch failed for source {source_id}"))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "feed fetch for source {source_id} returned http {}",
                response.status()
            ));
        }
        let body = response.bytes().await.context("feed body read failed")?;
        let feed = feed_rs::parser::parse(body.as_ref())
            .with_context(|| format!("feed parse failed for source {source_id}"))?;

        let mut entries = Vec::with_capacity(feed.entries.len());
        for entry in feed.entries {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            // Atom entry ids look like "yt:video:<item_id>"; fall back to
            // parsing the link when the id has another shape.
            let item_id = entry
                .id
                .rsplit(':')
                .next()
                .filter(|id| !id.is_empty() && !id.contains('/'))
                .map(str::to_string)
                .or_else(|| extract_item_id(&link));
            let Some(item_id) = item_id else { continue };

            entries.push(FeedEntry {
                item_id,
                title: entry.title.map(|t| t.content).unwrap_or_default(),
                url: link,
                published_at: entry.published,
            });
        }
        Ok(entries)
    }

    async fn resolve_title(&self, item_id: &str) -> Option<String> {
        let watch_url = format!("https://www.youtube.com/watch?v={item_id}");
        let url = format!("{}?url={}&format=json", self.oembed_base, watch_url);
        let response = self.http.get(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        let body: OEmbedResponse = response.json().await.ok()?;
        Some(body.title)
    }
}
