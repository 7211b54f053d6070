use crate::domain::Client;
use crate::error::PipelineError;
use sqlx::PgPool;
use uuid::Uuid;

pub async fn get(pool: &PgPool, client_id: Uuid) -> Result<Option<Client>, PipelineError> {
    let row = sqlx::query_as::<_, Client>(
        "SELECT id, first_name, last_name, email, status, chosen_cities, \
                property_type_preferences, addresses_per_report, send_day \
         FROM clients WHERE id = $1",
    )
    .bind(client_id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Clients due a report today: active, and `send_day` matches either the
/// day-of-month or, for the last day of a shorter month, the month-end
/// special case handled by the caller.
pub async fn active_with_send_day(
    pool: &PgPool,
    send_day: i16,
) -> Result<Vec<Client>, PipelineError> {
    let rows = sqlx::query_as::<_, Client>(
        "SELECT id, first_name, last_name, email, status, chosen_cities, \
                property_type_preferences, addresses_per_report, send_day \
         FROM clients WHERE status = 'active' AND send_day = $1",
    )
    .bind(send_day)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn all_active(pool: &PgPool) -> Result<Vec<Client>, PipelineError> {
    let rows = sqlx::query_as::<_, Client>(
        "SELECT id, first_name, last_name, email, status, chosen_cities, \
                property_type_preferences, addresses_per_report, send_day \
         FROM clients WHERE status = 'active'",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
