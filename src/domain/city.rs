use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One row per municipality. The INSEE code is the immutable, unique
/// natural key; `id` is the opaque surrogate key used everywhere else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct City {
    pub id: Uuid,
    pub name: String,
    pub postal_code: String,
    pub insee_code: String,
    pub department: String,
    pub region: Option<String>,
    pub house_price_avg: Option<i64>,
    pub apartment_price_avg: Option<i64>,
    pub last_scraped: Option<DateTime<Utc>>,
}

impl City {
    /// Refreshed if `last_scraped` is older than one year.
    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.last_scraped {
            None => true,
            Some(t) => now.signed_duration_since(t) > chrono::Duration::days(365),
        }
    }

    /// Derives the department from an INSEE code: first 2 digits, except
    /// Corsica (`2A`/`2B`) and the overseas departments (`971`-`976`),
    /// which keep 3 characters.
    pub fn department_from_insee(insee_code: &str) -> String {
        let is_corsican = insee_code.len() >= 2
            && (insee_code[..2].eq_ignore_ascii_case("2a") || insee_code[..2].eq_ignore_ascii_case("2b"));
        let is_overseas = insee_code.len() >= 3 && matches!(&insee_code[..3], "971" | "972" | "973" | "974" | "975" | "976");

        if is_corsican || is_overseas {
            insee_code.chars().take(3).collect()
        } else {
            insee_code.chars().take(2).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn department_corsica_keeps_three_chars() {
        assert_eq!(City::department_from_insee("2A004"), "2A0");
        assert_eq!(City::department_from_insee("2B033"), "2B0");
    }

    #[test]
    fn department_mainland_keeps_two_digits() {
        assert_eq!(City::department_from_insee("75056"), "75");
        assert_eq!(City::department_from_insee("13055"), "13");
    }

    #[test]
    fn department_overseas_keeps_three_digits() {
        assert_eq!(City::department_from_insee("97209"), "972");
        assert_eq!(City::department_from_insee("97411"), "974");
    }

    #[test]
    fn staleness_with_no_prior_scrape() {
        let city = City {
            id: Uuid::nil(),
            name: "Paris".into(),
            postal_code: "75001".into(),
            insee_code: "75101".into(),
            department: "75".into(),
            region: None,
            house_price_avg: None,
            apartment_price_avg: None,
            last_scraped: None,
        };
        assert!(city.is_stale(Utc::now()));
    }
}
