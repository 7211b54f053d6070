use crate::domain::ClientAddress;
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

/// Inserts the assignment join row. `(client_id, address_id)` is unique,
/// so a property can never be assigned to the same client twice.
pub async fn assign(
    pool: &PgPool,
    client_id: Uuid,
    address_id: Uuid,
    send_date: DateTime<Utc>,
) -> Result<(), PipelineError> {
    sqlx::query(
        "INSERT INTO client_addresses (client_id, address_id, send_date, status) \
         VALUES ($1, $2, $3, 'new') \
         ON CONFLICT (client_id, address_id) DO NOTHING",
    )
    .bind(client_id)
    .bind(address_id)
    .bind(send_date)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn for_client(pool: &PgPool, client_id: Uuid) -> Result<Vec<ClientAddress>, PipelineError> {
    let rows = sqlx::query_as::<_, ClientAddress>(
        "SELECT client_id, address_id, send_date, status \
         FROM client_addresses WHERE client_id = $1",
    )
    .bind(client_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
