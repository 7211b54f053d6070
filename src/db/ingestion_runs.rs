use crate::domain::IngestionRun;
use crate::error::PipelineError;
use sqlx::PgPool;
use uuid::Uuid;

pub struct NewIngestionRun {
    pub job_id: Uuid,
    pub city_id: Uuid,
    pub stage_reached: i16,
    pub rows_in: i32,
    pub rows_out: i32,
    pub error_message: Option<String>,
}

/// Records one stage-machine run for a city within a job. Purely
/// observational: nothing downstream reads this today, it exists so a
/// future admin surface can show per-city ingestion history without
/// re-deriving it from logs.
pub async fn insert(pool: &PgPool, run: NewIngestionRun) -> Result<IngestionRun, PipelineError> {
    let row = sqlx::query_as::<_, IngestionRun>(
        "INSERT INTO ingestion_runs \
            (id, job_id, city_id, stage_reached, rows_in, rows_out, started_at, completed_at, error_message) \
         VALUES ($1, $2, $3, $4, $5, $6, now(), now(), $7) \
         RETURNING id, job_id, city_id, stage_reached, rows_in, rows_out, started_at, completed_at, error_message",
    )
    .bind(Uuid::new_v4())
    .bind(run.job_id)
    .bind(run.city_id)
    .bind(run.stage_reached)
    .bind(run.rows_in)
    .bind(run.rows_out)
    .bind(&run.error_message)
    .fetch_one(pool)
    .await?;
    Ok(row)
}
