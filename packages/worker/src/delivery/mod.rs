//! Delivery dispatcher: turns completed items with pending deliveries into
//! outbound sends, and sweeps out deliveries that can never succeed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domains::deliveries::{Delivery, DispatchCandidate};
use crate::kernel::channel::{Brief, SendOutcome};
use crate::kernel::speech::{clean_for_speech, prune_stale_audio};
use crate::kernel::WorkerKernel;

const IDLE_SLEEP: Duration = Duration::from_secs(15);
const SEND_PACING: Duration = Duration::from_secs(1);
const CLEANUP_EVERY_N_CYCLES: u64 = 10;
const AUDIO_MAX_AGE: Duration = Duration::from_secs(3600);
/// In-cycle retries after the first transient send failure.
const SEND_RETRIES: u32 = 2;
const MARK_SENT_RETRIES: u32 = 3;

/// Fail every pending delivery that can never be sent: the item terminally
/// failed, or the consumer has no usable channel. Both sweeps are batched
/// updates and idempotent.
pub async fn cleanup(kernel: &WorkerKernel) -> Result<()> {
    let dead_items = Delivery::sweep_failed_items(&kernel.db_pool).await?;
    let unreachable = Delivery::sweep_unreachable(&kernel.db_pool).await?;
    if dead_items > 0 || unreachable > 0 {
        info!(dead_items, unreachable, "swept undeliverable deliveries");
    }
    Ok(())
}

/// One dispatch cycle: send up to `batch_size` pending deliveries whose
/// items are completed. Over-fetches candidates so rows that fail to
/// resolve an artifact do not shrink the batch.
pub async fn dispatch(kernel: &WorkerKernel, batch_size: usize) -> Result<u32> {
    let candidates =
        Delivery::dispatch_candidates(batch_size as i64 * 5, &kernel.db_pool).await?;
    if candidates.is_empty() {
        return Ok(0);
    }
    debug!(candidates = candidates.len(), batch_size, "dispatch cycle starting");

    // Candidates arrive grouped by item; one download serves every
    // subscriber of that item.
    let mut audio_cache: HashMap<String, Arc<Vec<u8>>> = HashMap::new();
    let mut sent = 0u32;
    let mut attempted = 0usize;

    for candidate in candidates {
        if attempted >= batch_size {
            break;
        }

        let audio = match cached_audio(kernel, &candidate, &mut audio_cache).await {
            Ok(audio) => audio,
            Err(e) => {
                warn!(
                    item_id = %candidate.item_id,
                    error = %e,
                    "no artifact available for delivery"
                );
                if let Err(e) =
                    Delivery::record_send_failure(candidate.delivery_id, &kernel.db_pool).await
                {
                    error!(delivery_id = %candidate.delivery_id, error = %e, "could not record delivery failure");
                }
                kernel.stats.record_delivery_failed();
                continue;
            }
        };

        attempted += 1;
        if send_with_retries(kernel, &candidate, &audio).await {
            finalize_sent(kernel, candidate.delivery_id).await;
            kernel.stats.record_delivery_sent();
            sent += 1;
        } else {
            kernel.stats.record_delivery_failed();
        }
        tokio::time::sleep(SEND_PACING).await;
    }

    Ok(sent)
}

/// Resolve the audio for one candidate: local cache file, then the stored
/// artifact, then regeneration from the stored summary.
async fn cached_audio(
    kernel: &WorkerKernel,
    candidate: &DispatchCandidate,
    cache: &mut HashMap<String, Arc<Vec<u8>>>,
) -> Result<Arc<Vec<u8>>> {
    if let Some(audio) = cache.get(&candidate.item_id) {
        return Ok(audio.clone());
    }
    let audio = Arc::new(resolve_audio(kernel, candidate).await?);
    cache.insert(candidate.item_id.clone(), audio.clone());
    Ok(audio)
}

async fn resolve_audio(kernel: &WorkerKernel, candidate: &DispatchCandidate) -> Result<Vec<u8>> {
    let file_stem = format!("brief_{}", candidate.item_id);
    let local = kernel.audio_dir.join(format!("{file_stem}.mp3"));
    if let Ok(bytes) = tokio::fs::read(&local).await {
        return Ok(bytes);
    }

    if let Some(ref url) = candidate.result_url {
        if url.starts_with("http") {
            match kernel.artifacts.fetch(url).await {
                Ok(bytes) => return Ok(bytes),
                Err(e) => warn!(item_id = %candidate.item_id, error = %e, "artifact fetch failed"),
            }
        } else if let Ok(bytes) = tokio::fs::read(url).await {
            return Ok(bytes);
        }
    }

    // Last resort: re-synthesize from the stored summary.
    let summary = candidate
        .summary
        .as_deref()
        .ok_or_else(|| anyhow!("no summary stored for regeneration"))?;
    let voice = candidate
        .voice
        .clone()
        .unwrap_or_else(|| kernel.default_voice.clone());
    let path = kernel
        .speech
        .synthesize(&clean_for_speech(summary), &voice, &file_stem)
        .await
        .context("audio regeneration failed")?;
    tokio::fs::read(&path)
        .await
        .with_context(|| format!("regenerated audio read failed: {}", path.display()))
}

/// Send with in-cycle retries on transient failure. Returns whether the
/// brief was delivered.
async fn send_with_retries(
    kernel: &WorkerKernel,
    candidate: &DispatchCandidate,
    audio: &[u8],
) -> bool {
    let brief = Brief {
        item_id: candidate.item_id.clone(),
        title: candidate.title.clone(),
        audio: audio.to_vec(),
    };

    for attempt in 0..=SEND_RETRIES {
        match kernel.channel.send_brief(&candidate.chat_id, &brief).await {
            SendOutcome::Delivered => return true,
            SendOutcome::Failed { transient: false } => {
                warn!(
                    delivery_id = %candidate.delivery_id,
                    item_id = %candidate.item_id,
                    "permanent send failure"
                );
                if let Err(e) = Delivery::mark_failed(candidate.delivery_id, &kernel.db_pool).await
                {
                    error!(delivery_id = %candidate.delivery_id, error = %e, "could not mark delivery failed");
                }
                return false;
            }
            SendOutcome::Failed { transient: true } if attempt < SEND_RETRIES => {
                warn!(
                    delivery_id = %candidate.delivery_id,
                    attempt = attempt + 1,
                    "transient send failure, retrying"
                );
                tokio::time::sleep(SEND_PACING).await;
            }
            SendOutcome::Failed { transient: true } => {
                if let Err(e) =
                    Delivery::record_send_failure(candidate.delivery_id, &kernel.db_pool).await
                {
                    error!(delivery_id = %candidate.delivery_id, error = %e, "could not record delivery failure");
                }
                return false;
            }
        }
    }
    false
}

/// Persist a successful send. The brief already reached the consumer, so
/// on persist exhaustion the delivery stays pending and is logged loudly,
/// never marked failed.
async fn finalize_sent(kernel: &WorkerKernel, delivery_id: Uuid) {
    for attempt in 1..=MARK_SENT_RETRIES {
        match Delivery::mark_sent(delivery_id, &kernel.db_pool).await {
            Ok(()) => return,
            Err(e) if attempt < MARK_SENT_RETRIES => {
                warn!(%delivery_id, attempt, error = %e, "mark_sent failed, retrying");
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Err(e) => {
                error!(
                    %delivery_id,
                    error = %e,
                    "mark_sent exhausted retries; delivery was sent but stays pending"
                );
            }
        }
    }
}

/// Dispatcher service loop.
pub async fn run(kernel: Arc<WorkerKernel>, batch_size: usize, cancel: CancellationToken) {
    info!(batch_size, "dispatcher loop started");
    let mut cycle = 0u64;
    loop {
        if cycle % CLEANUP_EVERY_N_CYCLES == 0 {
            if let Err(e) = cleanup(&kernel).await {
                warn!(error = %e, "cleanup sweep failed");
            }
        }
        cycle += 1;

        match dispatch(&kernel, batch_size).await {
            Ok(sent) if sent > 0 => info!(sent, "dispatch cycle finished"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "dispatch cycle failed"),
        }

        prune_stale_audio(&kernel.audio_dir, AUDIO_MAX_AGE).await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(IDLE_SLEEP) => {}
        }
    }
    info!("dispatcher loop stopped");
}
