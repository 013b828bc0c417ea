//! Summarization client (Gemini REST API).
//!
//! Minimal typed client - one request shape, one response shape, no
//! streaming or tool calling.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Narrow contract for the summarization stage.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize `text`, translating into `target_language` when it differs
    /// from the detected source language.
    async fn summarize(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String>;
}

const GEMINI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const MODEL: &str = "gemini-2.0-flash";

pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_base_url(api_key, GEMINI_BASE)
    }

    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    fn prompt(text: &str, source_language: &str, target_language: &str) -> String {
        format!(
            "Summarize the following transcript as a spoken brief of a few \
             minutes, keeping the key points and concrete facts. The \
             transcript language is '{source_language}'. Write the summary \
             in '{target_language}'. Do not mention that this is a summary \
             or a transcript.\n\n{text}"
        )
    }
}

#[async_trait]
impl Summarizer for GeminiClient {
    async fn summarize(
        &self,
        text: &str,
        source_language: &str,
        target_language: &str,
    ) -> Result<String> {
        debug!(chars = text.len(), source_language, target_language, "requesting summary");
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, MODEL, self.api_key
        );
        let response = self
            .http
            .post(url)
            .json(&json!({
                "contents": [{
                    "parts": [{ "text": Self::prompt(text, source_language, target_language) }]
                }]
            }))
            .send()
            .await
            .context("summarization request failed")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "summarization service returned http {}",
                response.status()
            ));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .context("summarization response parse failed")?;
        let summary: String = body
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if summary.trim().is_empty() {
            return Err(anyhow!("summarization service returned an empty summary"));
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_names_both_languages() {
        let prompt = GeminiClient::prompt("transcript body", "en", "fr");
        assert!(prompt.contains("'en'"));
        assert!(prompt.contains("'fr'"));
        assert!(prompt.ends_with("transcript body"));
    }

    #[test]
    fn response_parts_are_concatenated() {
        let body: GenerateResponse = serde_json::from_str(
            r#"{"candidates":[{"content":{"parts":[{"text":"part one "},{"text":"part two"}]}}]}"#,
        )
        .unwrap();
        let joined: String = body.candidates[0]
            .content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .collect();
        assert_eq!(joined, "part one part two");
    }
}
