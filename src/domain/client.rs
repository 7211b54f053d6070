use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "client_status_enum", rename_all = "snake_case")]
pub enum ClientStatus {
    Active,
    Inactive,
    Test,
    Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "property_type_enum", rename_all = "snake_case")]
pub enum PropertyType {
    House,
    Apartment,
    Land,
    Commercial,
    Other,
}

impl PropertyType {
    /// Listings-site URL schema codes: house=1, apartment=2, land=4,
    /// commercial=0, other=5.
    pub fn url_code(&self) -> &'static str {
        match self {
            PropertyType::Commercial => "0",
            PropertyType::House => "1",
            PropertyType::Apartment => "2",
            PropertyType::Land => "4",
            PropertyType::Other => "5",
        }
    }

    /// Maps a raw scraped/French label through the bilingual dictionary
    /// used by Stage 1. Unknown codes map to `Other`, never dropped.
    pub fn from_label(label: &str) -> Self {
        let lower = label.trim().to_lowercase();
        match lower.as_str() {
            "house" | "maison" | "maisons" => PropertyType::House,
            "apartment" | "appartement" | "appartements" | "flat" => PropertyType::Apartment,
            "land" | "terrain" | "terrains" => PropertyType::Land,
            "commercial" | "local commercial" | "local_commercial" | "commerce" => {
                PropertyType::Commercial
            }
            "other" | "autre" | "autres" => PropertyType::Other,
            _ => PropertyType::Other,
        }
    }
}

/// Consumer of assignments.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Client {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub status: ClientStatus,
    pub chosen_cities: Vec<Uuid>,
    pub property_type_preferences: Vec<PropertyType>,
    pub addresses_per_report: i32,
    pub send_day: i16,
}

impl Client {
    pub fn is_active(&self) -> bool {
        self.status == ClientStatus::Active
    }

    /// Validates the preconditions the orchestrator requires before
    /// `submit` creates a job — these three checks are exactly the
    /// permanent-business errors the orchestrator classifies as fatal.
    pub fn validate_for_processing(&self) -> Result<(), String> {
        if !self.is_active() {
            return Err(format!("client {} not found or inactive", self.id));
        }
        if self.chosen_cities.is_empty() {
            return Err("no chosen cities for client".to_string());
        }
        if self.property_type_preferences.is_empty() {
            return Err("no property types for client".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_label_maps_to_other_not_drop() {
        assert_eq!(PropertyType::from_label("garage"), PropertyType::Other);
        assert_eq!(PropertyType::from_label(""), PropertyType::Other);
    }

    #[test]
    fn validate_rejects_inactive_client() {
        let client = Client {
            id: Uuid::nil(),
            first_name: "A".into(),
            last_name: "B".into(),
            email: "a@b.com".into(),
            status: ClientStatus::Inactive,
            chosen_cities: vec![Uuid::nil()],
            property_type_preferences: vec![PropertyType::House],
            addresses_per_report: 5,
            send_day: 1,
        };
        let err = client.validate_for_processing().unwrap_err();
        assert!(err.to_lowercase().contains("not found or inactive"));
    }

    #[test]
    fn validate_rejects_empty_cities_and_types() {
        let mut client = Client {
            id: Uuid::nil(),
            first_name: "A".into(),
            last_name: "B".into(),
            email: "a@b.com".into(),
            status: ClientStatus::Active,
            chosen_cities: vec![],
            property_type_preferences: vec![PropertyType::House],
            addresses_per_report: 5,
            send_day: 1,
        };
        assert!(client
            .validate_for_processing()
            .unwrap_err()
            .contains("no chosen cities"));

        client.chosen_cities = vec![Uuid::nil()];
        client.property_type_preferences = vec![];
        assert!(client
            .validate_for_processing()
            .unwrap_err()
            .contains("no property types"));
    }
}
