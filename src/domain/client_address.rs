use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The CRM lifecycle a `ClientAddress` row moves through after assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "client_address_status_enum", rename_all = "snake_case")]
pub enum ClientAddressStatus {
    New,
    Contacted,
    Meeting,
    Negotiation,
    Sold,
    Mandate,
}

/// The assignment join row. `(client_id, address_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ClientAddress {
    pub client_id: Uuid,
    pub address_id: Uuid,
    pub send_date: DateTime<Utc>,
    pub status: ClientAddressStatus,
}
