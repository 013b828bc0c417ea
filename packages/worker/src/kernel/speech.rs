//! Speech synthesis gateway and the text cleanup that precedes it.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::json;
use tracing::{info, warn};

/// Narrow contract for the synthesis stage.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `voice` into an MP3 named after `file_stem`,
    /// returning the local path.
    async fn synthesize(&self, text: &str, voice: &str, file_stem: &str) -> Result<PathBuf>;
}

/// HTTP client for the TTS service.
pub struct SpeechGateway {
    http: reqwest::Client,
    base_url: String,
    output_dir: PathBuf,
}

impl SpeechGateway {
    pub fn new(base_url: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechGateway {
    async fn synthesize(&self, text: &str, voice: &str, file_stem: &str) -> Result<PathBuf> {
        let response = self
            .http
            .post(format!("{}/synthesize", self.base_url))
            .json(&json!({ "text": text, "voice": voice, "format": "mp3" }))
            .send()
            .await
            .context("speech synthesis request failed")?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "speech synthesis service returned http {}",
                response.status()
            ));
        }
        let audio = response
            .bytes()
            .await
            .context("speech synthesis body read failed")?;
        if audio.is_empty() {
            return Err(anyhow!("speech synthesis returned no audio"));
        }

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .context("audio dir create failed")?;
        let path = self.output_dir.join(format!("{file_stem}.mp3"));
        tokio::fs::write(&path, &audio)
            .await
            .with_context(|| format!("audio write failed: {}", path.display()))?;
        info!(path = %path.display(), voice, bytes = audio.len(), "audio generated");
        Ok(path)
    }
}

/// Strip markdown decoration so the synthesizer reads plain prose.
pub fn clean_for_speech(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());
    for line in text.lines() {
        let line = line.trim_start_matches('#').trim_start();
        let line = line
            .strip_prefix("- ")
            .or_else(|| line.strip_prefix("* "))
            .unwrap_or(line);
        let line = line.replace("**", "").replace('`', "").replace('*', "");
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if !cleaned.is_empty() {
            cleaned.push(' ');
        }
        cleaned.push_str(line);
    }
    cleaned
}

/// Delete cached audio files older than `max_age`. Returns how many went.
/// The directory scan is blocking I/O, so it runs off the runtime threads.
pub async fn prune_stale_audio(dir: &Path, max_age: Duration) -> u32 {
    let dir = dir.to_path_buf();
    match tokio::task::spawn_blocking(move || prune_dir(&dir, max_age)).await {
        Ok(removed) => removed,
        Err(e) => {
            warn!(error = %e, "audio prune task failed");
            0
        }
    }
}

fn prune_dir(dir: &Path, max_age: Duration) -> u32 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().is_none_or(|ext| ext != "mp3") {
            continue;
        }
        let stale = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age >= max_age);
        if stale {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(path = %path.display(), error = %e, "could not delete stale audio file");
            } else {
                removed += 1;
            }
        }
    }
    removed
}
