use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per scrape+enrich run of a city within a job. Purely
/// observational — written by the enrichment machine, read by nothing
/// in-process today (future admin surface).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct IngestionRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub city_id: Uuid,
    pub stage_reached: i16,
    pub rows_in: i32,
    pub rows_out: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}
