//! Produces search URLs per (rectangle, month, property-type-group,
//! price-range).

use crate::domain::PropertyType;
use crate::geo::Rectangle;
use chrono::{Datelike, NaiveDate};

pub const LISTINGS_BASE_URL: &str = "https://www.immo-data.fr/explorateur/transaction/recherche";
pub const GLOBAL_PRICE_CAP: i64 = 25_000_000;

fn month_name_fr(month: u32) -> &'static str {
    match month {
        1 => "Janvier",
        2 => "Février",
        3 => "Mars",
        4 => "Avril",
        5 => "Mai",
        6 => "Juin",
        7 => "Juillet",
        8 => "Août",
        9 => "Septembre",
        10 => "Octobre",
        11 => "Novembre",
        12 => "Décembre",
        _ => unreachable!("chrono months are 1..=12"),
    }
}

/// `"Mars 2023"` style period label used both as the URL parameter value
/// and as part of the subdivision cache key.
pub fn period_label(date: NaiveDate) -> String {
    format!("{} {}", month_name_fr(date.month()), date.year())
}

/// All first-of-month dates in `[start, end]` inclusive.
pub fn months_in_range(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut months = Vec::new();
    let mut cursor = NaiveDate::from_ymd_opt(start.year(), start.month(), 1).unwrap();
    let end_first = NaiveDate::from_ymd_opt(end.year(), end.month(), 1).unwrap();
    while cursor <= end_first {
        months.push(cursor);
        cursor = if cursor.month() == 12 {
            NaiveDate::from_ymd_opt(cursor.year() + 1, 1, 1).unwrap()
        } else {
            NaiveDate::from_ymd_opt(cursor.year(), cursor.month() + 1, 1).unwrap()
        };
    }
    months
}

/// One generated search URL plus enough context for the adaptive
/// subdivider to decide what to do with its result and to re-derive a
/// child URL.
#[derive(Debug, Clone)]
pub struct SearchUrl {
    pub url: String,
    pub rectangle: Rectangle,
    pub period: String,
    pub property_types: Vec<PropertyType>,
    pub group_label: String,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub subdivision_level: u8,
    pub progressive_level: u8,
}

impl SearchUrl {
    pub fn build_url(
        rectangle: &Rectangle,
        period: &str,
        property_types: &[PropertyType],
        min_price: Option<i64>,
        max_price: Option<i64>,
    ) -> String {
        let types_csv = property_types
            .iter()
            .map(|t| t.url_code())
            .collect::<Vec<_>>()
            .join(",");

        let mut url = format!(
            "{base}?center={lon};{lat}&zoom={zoom}&propertytypes={types}&minmonthyear={period}&maxmonthyear={period}",
            base = LISTINGS_BASE_URL,
            lon = rectangle.center_lon,
            lat = rectangle.center_lat,
            zoom = rectangle.zoom,
            types = types_csv,
            period = urlencoding_space(period),
        );
        if let Some(min_p) = min_price {
            url.push_str(&format!("&minprice={min_p}"));
        }
        if let Some(max_p) = max_price {
            url.push_str(&format!("&maxprice={max_p}"));
        }
        url
    }
}

/// French month names contain accented letters and spaces; percent-encode
/// the space only, matching the upstream URL schema's observed shape.
fn urlencoding_space(period: &str) -> String {
    period.replace(' ', "%20")
}

/// Initial URL set: Cartesian product of (rectangles × months), all
/// requested property types combined in a single URL, level 0.
pub fn generate_initial_urls(
    rectangles: &[Rectangle],
    property_types: &[PropertyType],
    start_month: NaiveDate,
    end_month: NaiveDate,
) -> Vec<SearchUrl> {
    let months = months_in_range(start_month, end_month);
    let mut urls = Vec::with_capacity(rectangles.len() * months.len());

    for rect in rectangles {
        for month in &months {
            let period = period_label(*month);
            let url = SearchUrl::build_url(rect, &period, property_types, None, None);
            urls.push(SearchUrl {
                url,
                rectangle: *rect,
                period,
                property_types: property_types.to_vec(),
                group_label: "all".to_string(),
                min_price: None,
                max_price: None,
                subdivision_level: 0,
                progressive_level: 0,
            });
        }
    }
    urls
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect() -> Rectangle {
        Rectangle {
            center_lat: 48.85,
            center_lon: 2.35,
            min_lat: 48.8,
            min_lon: 2.3,
            max_lat: 48.9,
            max_lon: 2.4,
            zoom: 12,
        }
    }

    #[test]
    fn month_range_is_inclusive() {
        let start = NaiveDate::from_ymd_opt(2023, 11, 15).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
        let months = months_in_range(start, end);
        assert_eq!(months.len(), 3);
        assert_eq!(period_label(months[0]), "Novembre 2023");
        assert_eq!(period_label(months[2]), "Janvier 2024");
    }

    #[test]
    fn initial_urls_cover_cartesian_product() {
        let rectangles = vec![rect(), rect()];
        let types = vec![PropertyType::House, PropertyType::Apartment];
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2023, 2, 1).unwrap();
        let urls = generate_initial_urls(&rectangles, &types, start, end);
        assert_eq!(urls.len(), 4);
        assert!(urls[0].url.contains("propertytypes=1,2"));
        assert_eq!(urls[0].subdivision_level, 0);
    }

    #[test]
    fn price_bounds_are_appended_when_present() {
        let url = SearchUrl::build_url(
            &rect(),
            "Mars 2023",
            &[PropertyType::House],
            Some(100_000),
            Some(200_000),
        );
        assert!(url.contains("minprice=100000"));
        assert!(url.contains("maxprice=200000"));
    }
}
