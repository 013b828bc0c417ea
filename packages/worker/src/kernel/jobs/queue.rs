//! Queue operations: enqueue, atomic claim, complete, fail.
//!
//! `claim_next` is the correctness core of the whole system: the claim is a
//! single statement (`FOR UPDATE SKIP LOCKED` inside a CTE) so two workers
//! can never observe and take the same row. `fail` keeps job and item state
//! in one transaction so a terminally failed job always leaves a terminally
//! failed item behind it.

use anyhow::Result;
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::job::{Job, JobStatus, JOB_COLUMNS};

/// Attempts after which a job (and its item) is terminally failed.
pub const MAX_ATTEMPTS: i32 = 3;

/// Result of an enqueue, distinguishing idempotency hits.
#[derive(Debug, Clone)]
pub enum EnqueueOutcome {
    /// A new job row was created.
    Created(Uuid),
    /// A job for this item already exists; nothing was changed.
    Duplicate,
}

impl EnqueueOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, EnqueueOutcome::Created(_))
    }
}

/// Per-status queue depths, for logging and ops.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueCounts {
    pub queued: i64,
    pub processing: i64,
    pub completed: i64,
    pub failed: i64,
}

pub struct JobQueue {
    db: PgPool,
    /// Age in seconds after which a `processing` claim is recovered.
    stale_claim_secs: i64,
}

impl JobQueue {
    pub fn new(db: PgPool, stale_claim_secs: i64) -> Self {
        Self {
            db,
            stale_claim_secs,
        }
    }

    /// Enqueue a job for an item. Keyed on `item_id`: if any job already
    /// exists for the item (whatever its status), the row is left untouched
    /// so a re-request never re-triggers enrichment.
    pub async fn enqueue(&self, job: Job) -> Result<EnqueueOutcome> {
        let inserted = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO jobs (id, item_id, origin_url, title, source_id,
                              target_language, voice, status, attempts,
                              created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (item_id) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(job.id)
        .bind(&job.item_id)
        .bind(&job.origin_url)
        .bind(&job.title)
        .bind(&job.source_id)
        .bind(&job.target_language)
        .bind(&job.voice)
        .bind(job.status)
        .bind(job.attempts)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_optional(&self.db)
        .await?;

        Ok(match inserted {
            Some(id) => EnqueueOutcome::Created(id),
            None => EnqueueOutcome::Duplicate,
        })
    }

    /// Atomically claim the oldest queued job, if any.
    ///
    /// Also recovers orphaned claims: a `processing` row untouched for
    /// longer than the stale window was abandoned by a dead worker and is
    /// claimable again. Requeued jobs keep their original `created_at`, so
    /// a retry re-enters at its original queue position.
    pub async fn claim_next(&self, worker_tag: &str) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(&format!(
            r#"
            WITH next_job AS (
                SELECT id
                FROM jobs
                WHERE status = 'queued'
                   OR (status = 'processing'
                       AND updated_at < NOW() - ($1 || ' seconds')::INTERVAL)
                ORDER BY created_at
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'processing',
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_job)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(self.stale_claim_secs.to_string())
        .fetch_optional(&self.db)
        .await?;

        if let Some(ref job) = job {
            debug!(worker = worker_tag, job_id = %job.id, item_id = %job.item_id, "claimed job");
        }
        Ok(job)
    }

    /// Mark a job completed. A missing row is a no-op.
    pub async fn complete(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed', updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    /// Record a retryable failure: bump `attempts` and either requeue the
    /// job or, at the attempt cap, terminally fail it together with its
    /// item - one transaction, so job and item state can never diverge. A
    /// missing row (job deleted between claim and report) is a no-op, not
    /// an error.
    pub async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        self.fail_with_cap(job_id, error, MAX_ATTEMPTS).await
    }

    /// Record a terminal failure: the job goes straight to failed no matter
    /// how many attempts remain, with `attempts` raised to the cap so the
    /// failed-implies-exhausted invariant holds.
    pub async fn fail_terminal(&self, job_id: Uuid, error: &str) -> Result<()> {
        self.fail_with_cap(job_id, error, 1).await
    }

    async fn fail_with_cap(&self, job_id: Uuid, error: &str, cap: i32) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let failed = sqlx::query_as::<_, (String, JobStatus, i32)>(
            r#"
            UPDATE jobs
            SET attempts = CASE WHEN attempts + 1 >= $2
                               THEN GREATEST(attempts + 1, $4)
                               ELSE attempts + 1 END,
                status = CASE WHEN attempts + 1 >= $2
                              THEN 'failed'::job_status
                              ELSE 'queued'::job_status END,
                error_message = $3,
                updated_at = NOW()
            WHERE id = $1
            RETURNING item_id, status, attempts
            "#,
        )
        .bind(job_id)
        .bind(cap)
        .bind(error)
        .bind(MAX_ATTEMPTS)
        .fetch_optional(&mut *tx)
        .await?;

        let Some((item_id, status, attempts)) = failed else {
            warn!(job_id = %job_id, "failure reported for a missing job, ignoring");
            tx.rollback().await?;
            return Ok(());
        };

        if status == JobStatus::Failed {
            sqlx::query(
                r#"
                UPDATE items
                SET status = 'failed',
                    failure_count = GREATEST(failure_count + 1, $2)
                WHERE item_id = $1
                "#,
            )
            .bind(&item_id)
            .bind(MAX_ATTEMPTS)
            .execute(&mut *tx)
            .await?;
            info!(job_id = %job_id, item_id = %item_id, attempts, "job terminally failed");
        } else {
            sqlx::query(
                r#"
                UPDATE items
                SET failure_count = failure_count + 1,
                    status = 'pending'
                WHERE item_id = $1
                  AND status IN ('pending', 'processing')
                "#,
            )
            .bind(&item_id)
            .execute(&mut *tx)
            .await?;
            info!(job_id = %job_id, item_id = %item_id, attempts, "job requeued for retry");
        }

        tx.commit().await?;
        Ok(())
    }

    /// Queue depth per status.
    pub async fn counts(&self) -> Result<QueueCounts> {
        let rows = sqlx::query_as::<_, (JobStatus, i64)>(
            "SELECT status, COUNT(*) FROM jobs GROUP BY status",
        )
        .fetch_all(&self.db)
        .await?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match status {
                JobStatus::Queued => counts.queued = count,
                JobStatus::Processing => counts.processing = count,
                JobStatus::Completed => counts.completed = count,
                JobStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }
}
