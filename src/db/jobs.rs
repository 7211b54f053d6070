use crate::domain::{Job, JobStatus};
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Creates a new job for a client, or returns the client's existing active
/// job if one is already pending/processing (the `submit` idempotency
/// contract). Relies on a partial unique index over `(client_id) WHERE
/// status IN ('pending', 'processing')` to make the "at most one active job
/// per client" invariant race-safe under concurrent submissions.
///
/// New jobs start at `attempt_count = 1, status = processing` — the
/// canonical initial value (legacy retry-queue code paths that insert with
/// `attempt_count = 0` are not reproduced here). Returns `(job, true)` when
/// this call created the row, `(job, false)` when it found an existing one.
pub async fn create_or_get_active(
    pool: &PgPool,
    client_id: Uuid,
) -> Result<(Job, bool), PipelineError> {
    let id = Uuid::new_v4();
    let inserted = sqlx::query_as::<_, Job>(
        "INSERT INTO jobs (id, client_id, status, attempt_count, last_attempt) \
         VALUES ($1, $2, 'processing', 1, now()) \
         RETURNING id, client_id, status, attempt_count, last_attempt, next_attempt, \
                   error_message, created_at, updated_at",
    )
    .bind(id)
    .bind(client_id)
    .fetch_one(pool)
    .await;

    match inserted {
        Ok(job) => Ok((job, true)),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            let job = get_active_for_client(pool, client_id).await?.ok_or_else(|| {
                PipelineError::ConstraintViolation(format!(
                    "active-job unique violation but no active job found for client {client_id}"
                ))
            })?;
            Ok((job, false))
        }
        Err(e) => Err(e.into()),
    }
}

/// Bumps a retry-queue job to its next attempt number and marks it
/// `processing` in one statement, so the attempt count a `run_job` call
/// sees is already the number of the attempt it's about to make — the
/// drain, not `run_job`, owns incrementing it.
pub async fn bump_attempt_and_mark_processing(
    pool: &PgPool,
    job_id: Uuid,
) -> Result<Job, PipelineError> {
    let row = sqlx::query_as::<_, Job>(
        "UPDATE jobs SET attempt_count = attempt_count + 1, status = 'processing', \
                last_attempt = now(), updated_at = now() \
         WHERE id = $1 \
         RETURNING id, client_id, status, attempt_count, last_attempt, next_attempt, \
                   error_message, created_at, updated_at",
    )
    .bind(job_id)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_active_for_client(
    pool: &PgPool,
    client_id: Uuid,
) -> Result<Option<Job>, PipelineError> {
    let row = sqlx::query_as::<_, Job>(
        "SELECT id, client_id, status, attempt_count, last_attempt, next_attempt, \
                error_message, created_at, updated_at \
         FROM jobs WHERE client_id = $1 AND status IN ('pending', 'processing')",
    )
    .bind(client_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn get(pool: &PgPool, job_id: Uuid) -> Result<Option<Job>, PipelineError> {
    let row = sqlx::query_as::<_, Job>(
        "SELECT id, client_id, status, attempt_count, last_attempt, next_attempt, \
                error_message, created_at, updated_at \
         FROM jobs WHERE id = $1",
    )
    .bind(job_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn mark_processing(pool: &PgPool, job_id: Uuid) -> Result<(), PipelineError> {
    sqlx::query(
        "UPDATE jobs SET status = 'processing', last_attempt = now(), updated_at = now() \
         WHERE id = $1",
    )
    .bind(job_id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_completed(pool: &PgPool, job_id: Uuid) -> Result<(), PipelineError> {
    sqlx::query("UPDATE jobs SET status = 'completed', updated_at = now() WHERE id = $1")
        .bind(job_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Records a retryable failure: bumps the attempt count and schedules the
/// next attempt via the job's exponential backoff.
pub async fn mark_failed_retryable(
    pool: &PgPool,
    job_id: Uuid,
    attempt_count: i32,
    error_message: &str,
) -> Result<(), PipelineError> {
    let next_attempt: DateTime<Utc> = Utc::now() + crate::domain::Job::backoff_duration(attempt_count);
    sqlx::query(
        "UPDATE jobs SET status = 'pending', attempt_count = $2, next_attempt = $3, \
                error_message = $4, updated_at = now() \
         WHERE id = $1",
    )
    .bind(job_id)
    .bind(attempt_count)
    .bind(next_attempt)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn mark_failed_permanent(
    pool: &PgPool,
    job_id: Uuid,
    error_message: &str,
) -> Result<(), PipelineError> {
    sqlx::query(
        "UPDATE jobs SET status = 'failed_permanent', error_message = $2, updated_at = now() \
         WHERE id = $1",
    )
    .bind(job_id)
    .bind(error_message)
    .execute(pool)
    .await?;
    Ok(())
}

/// Jobs in `pending` (awaiting backoff) whose `next_attempt` has elapsed,
/// oldest first — the retry-queue state named in the job state machine.
pub async fn due_for_retry(pool: &PgPool) -> Result<Vec<Job>, PipelineError> {
    let rows = sqlx::query_as::<_, Job>(
        "SELECT id, client_id, status, attempt_count, last_attempt, next_attempt, \
                error_message, created_at, updated_at \
         FROM jobs WHERE status = 'pending' AND next_attempt <= now() \
         ORDER BY next_attempt ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_is_active_matches_pending_and_processing_only() {
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Processing.is_active());
        assert!(!JobStatus::Failed.is_active());
    }
}
