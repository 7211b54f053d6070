use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "job_status_enum", rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    FailedPermanent,
}

impl JobStatus {
    /// At most one job per client may be in one of these two states.
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Processing)
    }
}

/// A processing unit owned by a `Client` but living on its own timeline.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub client_id: Uuid,
    pub status: JobStatus,
    pub attempt_count: i32,
    pub last_attempt: Option<DateTime<Utc>>,
    pub next_attempt: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// `next_attempt = now + 2^attempt hours`.
    pub fn backoff_duration(attempt: i32) -> chrono::Duration {
        let hours = 2i64.saturating_pow(attempt.max(0) as u32);
        chrono::Duration::hours(hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_attempt() {
        assert_eq!(Job::backoff_duration(1), chrono::Duration::hours(2));
        assert_eq!(Job::backoff_duration(2), chrono::Duration::hours(4));
        assert_eq!(Job::backoff_duration(3), chrono::Duration::hours(8));
    }

    #[test]
    fn active_statuses() {
        assert!(JobStatus::Pending.is_active());
        assert!(JobStatus::Processing.is_active());
        assert!(!JobStatus::Completed.is_active());
        assert!(!JobStatus::FailedPermanent.is_active());
    }
}
