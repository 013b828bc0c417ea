//! Bounded worker pool running the enrichment pipeline.
//!
//! Concurrency discipline: a semaphore of size C caps in-flight jobs, and
//! the claim itself is serialized behind a mutex held only across
//! `claim_next`. A permit is acquired before the claim and moves into the
//! spawned task, so it is released on every completion path, panics
//! included.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domains::items::Item;
use crate::kernel::jobs::{Job, JobQueue};
use crate::kernel::speech::clean_for_speech;
use crate::kernel::WorkerKernel;

const IDLE_SLEEP: Duration = Duration::from_secs(10);
const CLAIM_PACING: Duration = Duration::from_secs(5);

/// One pipeline failure, classified for the retry state machine.
struct StageFailure {
    message: String,
    terminal: bool,
}

impl StageFailure {
    fn retryable(err: anyhow::Error) -> Self {
        Self {
            message: format!("{err:#}"),
            terminal: false,
        }
    }
}

/// Worker pool loop: claim, spawn, repeat until cancelled.
pub async fn run(
    kernel: Arc<WorkerKernel>,
    max_concurrent: usize,
    job_timeout: Duration,
    cancel: CancellationToken,
) {
    info!(max_concurrent, timeout_secs = job_timeout.as_secs(), "worker pool started");
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let claim_lock = Mutex::new(());
    let queue = Arc::new(JobQueue::new(
        kernel.db_pool.clone(),
        kernel.stale_claim_secs,
    ));
    let mut worker_seq = 0u64;

    loop {
        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = semaphore.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        worker_seq += 1;
        let tag = format!("worker-{worker_seq}");
        let claimed = {
            let _guard = claim_lock.lock().await;
            queue.claim_next(&tag).await
        };

        match claimed {
            Ok(Some(job)) => {
                let kernel = kernel.clone();
                let queue = queue.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    process_job(&kernel, &queue, job, job_timeout).await;
                });
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(CLAIM_PACING) => {}
                }
            }
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_SLEEP) => {}
                }
            }
            Err(e) => {
                drop(permit);
                warn!(error = %e, "job claim failed");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_SLEEP) => {}
                }
            }
        }
    }

    // In-flight jobs finish on their own permits; stale-claim recovery
    // covers anything cut off mid-run.
    info!("worker pool stopped");
}

/// Run one job end to end. Errors never escape: every outcome lands in the
/// queue and the stats aggregator.
pub async fn process_job(
    kernel: &WorkerKernel,
    queue: &JobQueue,
    job: Job,
    job_timeout: Duration,
) {
    info!(job_id = %job.id, item_id = %job.item_id, attempt = job.attempts + 1, "processing item");

    if let Err(e) = Item::mark_processing(&job.item_id, &kernel.db_pool).await {
        warn!(item_id = %job.item_id, error = %e, "could not mark item processing");
    }

    let outcome = match tokio::time::timeout(job_timeout, enrich(kernel, &job)).await {
        Ok(outcome) => outcome,
        Err(_) => Err(StageFailure::retryable(anyhow::anyhow!(
            "pipeline timed out after {}s",
            job_timeout.as_secs()
        ))),
    };

    match outcome {
        Ok(()) => {
            if let Err(e) = queue.complete(job.id).await {
                error!(job_id = %job.id, error = %e, "could not mark job completed");
            }
            kernel.stats.record_item_processed();
            info!(job_id = %job.id, item_id = %job.item_id, "item enriched");
        }
        Err(failure) => {
            let result = if failure.terminal {
                queue.fail_terminal(job.id, &failure.message).await
            } else {
                queue.fail(job.id, &failure.message).await
            };
            if let Err(e) = result {
                error!(job_id = %job.id, error = %e, "could not record job failure");
            }
            kernel.stats.record_item_failed();
            warn!(
                job_id = %job.id,
                item_id = %job.item_id,
                terminal = failure.terminal,
                error = %failure.message,
                "item enrichment failed"
            );
        }
    }
}

/// The enrichment stages: extract, summarize, clean, synthesize, upload,
/// persist.
async fn enrich(kernel: &WorkerKernel, job: &Job) -> std::result::Result<(), StageFailure> {
    let preferred = vec![job.target_language.clone()];
    let extraction = kernel
        .extractor
        .extract(&job.origin_url, &preferred)
        .await
        .map_err(|e| StageFailure {
            terminal: !e.is_retryable(),
            message: format!("extraction failed: {e}"),
        })?;

    let summary = kernel
        .summarizer
        .summarize(&extraction.text, &extraction.language, &job.target_language)
        .await
        .map_err(StageFailure::retryable)?;

    let spoken_text = clean_for_speech(&summary);
    let voice = job.voice.clone().unwrap_or_else(|| kernel.default_voice.clone());
    let file_stem = format!("brief_{}", job.item_id);
    let audio_path = kernel
        .speech
        .synthesize(&spoken_text, &voice, &file_stem)
        .await
        .map_err(StageFailure::retryable)?;

    let result_url = upload_or_local(kernel, &audio_path, &file_stem)
        .await
        .map_err(StageFailure::retryable)?;

    let metadata = json!({
        "source_language": extraction.language,
        "extraction_cost_usd": extraction.cost_usd,
        "transcript_chars": extraction.text.len(),
        "summary_chars": summary.len(),
        "voice": voice,
    });
    Item::mark_completed(&job.item_id, &result_url, &summary, metadata, &kernel.db_pool)
        .await
        .map_err(StageFailure::retryable)?;
    Ok(())
}

/// Upload the artifact, degrading to the local path when the store is down.
/// The dispatcher can still serve the brief from the audio cache.
async fn upload_or_local(
    kernel: &WorkerKernel,
    audio_path: &std::path::Path,
    file_stem: &str,
) -> Result<String> {
    let bytes = tokio::fs::read(audio_path)
        .await
        .with_context(|| format!("audio read failed: {}", audio_path.display()))?;
    match kernel
        .artifacts
        .upload(&format!("{file_stem}.mp3"), bytes)
        .await
    {
        Ok(url) => Ok(url),
        Err(e) => {
            warn!(error = %e, "artifact upload failed, keeping local path");
            Ok(audio_path.display().to_string())
        }
    }
}
