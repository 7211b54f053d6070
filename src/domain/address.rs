use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::PropertyType;

/// One persisted property sale. `source_url` is globally unique and is the
/// dedup key the whole pipeline is built around.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Address {
    pub id: Uuid,
    pub city_id: Uuid,
    pub department: String,
    pub raw_address: String,
    pub sale_date: NaiveDate,
    pub property_type: PropertyType,
    pub surface: i32,
    pub rooms: i32,
    pub price: i64,
    pub estimated_current_price: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub source_url: String,
}

impl Address {
    /// The assignment window bounds: `[today - 8y, today - 6y]`, counting a
    /// year as exactly 365 days (the original's own `timedelta(days=8*365)`
    /// / `timedelta(days=6*365)`, no leap-year adjustment). This is the
    /// single source of truth for the window — both the assignment query
    /// and `in_assignment_window` derive from it.
    pub fn assignment_window_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
        let lower = today - chrono::Duration::days(8 * 365);
        let upper = today - chrono::Duration::days(6 * 365);
        (lower, upper)
    }

    /// The assignment window: `[today - 8y, today - 6y]`.
    pub fn in_assignment_window(sale_date: NaiveDate, today: NaiveDate) -> bool {
        let (lower, upper) = Self::assignment_window_bounds(today);
        sale_date >= lower && sale_date <= upper
    }

    /// Serialises the geocoordinates as a GeoJSON Point, or `None` when
    /// coordinates are missing.
    pub fn geojson_point(&self) -> Option<geojson::Geometry> {
        match (self.longitude, self.latitude) {
            (Some(lon), Some(lat)) => Some(geojson::Geometry::new(geojson::Value::Point(vec![
                lon, lat,
            ]))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_window_boundaries() {
        let today = NaiveDate::from_ymd_opt(2026, 7, 28).unwrap();
        let seven_years_ago = today - chrono::Duration::days(7 * 365);
        assert!(Address::in_assignment_window(seven_years_ago, today));

        let too_recent = today - chrono::Duration::days(365);
        assert!(!Address::in_assignment_window(too_recent, today));

        let too_old = today - chrono::Duration::days(9 * 365);
        assert!(!Address::in_assignment_window(too_old, today));
    }

    #[test]
    fn geojson_point_requires_both_coordinates() {
        let addr = Address {
            id: Uuid::nil(),
            city_id: Uuid::nil(),
            department: "75".into(),
            raw_address: "1 RUE DE LA PAIX".into(),
            sale_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            property_type: PropertyType::House,
            surface: 80,
            rooms: 3,
            price: 300_000,
            estimated_current_price: None,
            latitude: None,
            longitude: Some(2.33),
            source_url: "https://example.com/1".into(),
        };
        assert!(addr.geojson_point().is_none());
    }
}
