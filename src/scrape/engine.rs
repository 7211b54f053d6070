//! Orchestrates one city's scrape: geo-divide, generate URLs, fetch with
//! adaptive subdivision, dedup, and write the raw CSV intermediate.

use crate::domain::PropertyType;
use crate::error::PipelineError;
use crate::geo::GeoDivider;
use crate::scrape::fetcher::{Fetcher, RawListingCard};
use crate::scrape::subdivide::{evaluate, SubdivisionCache, SubdivisionOutcome};
use crate::scrape::url_gen::{generate_initial_urls, SearchUrl};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

pub struct ScrapeRequest<'a> {
    pub city_name: &'a str,
    pub postal_code: &'a str,
    pub property_types: Vec<PropertyType>,
    pub start_month: NaiveDate,
    pub end_month: NaiveDate,
}

pub struct ScrapeOutcome {
    pub cards: Vec<RawListingCard>,
    pub urls_fetched: usize,
    pub urls_subdivided: usize,
}

pub async fn scrape_city(
    divider: &GeoDivider,
    fetcher: &dyn Fetcher,
    cache: &SubdivisionCache,
    request: &ScrapeRequest<'_>,
) -> Result<ScrapeOutcome, PipelineError> {
    let rectangles = divider
        .divide_city_area(request.city_name, request.postal_code)
        .await?;
    info!(
        city = request.city_name,
        rectangle_count = rectangles.len(),
        "geo division complete"
    );

    let mut queue: Vec<SearchUrl> = generate_initial_urls(
        &rectangles,
        &request.property_types,
        request.start_month,
        request.end_month,
    );

    let mut all_cards = Vec::new();
    let mut urls_fetched = 0usize;
    let mut urls_subdivided = 0usize;

    while let Some(url) = queue.pop() {
        let cards = match fetcher.fetch(&url.url).await {
            Ok(cards) => cards,
            Err(e) => {
                warn!(url = url.url, error = %e, "fetch failed, skipping URL");
                continue;
            }
        };
        urls_fetched += 1;

        let observed_prices: Vec<i64> = cards.iter().filter_map(|c| c.price).collect();
        match evaluate(cache, &url, cards.len(), &observed_prices).await {
            SubdivisionOutcome::Accept => all_cards.extend(cards),
            SubdivisionOutcome::Split(children) => {
                urls_subdivided += 1;
                queue.extend(children);
            }
        }
    }

    let deduped = dedup_cards(all_cards);
    info!(
        city = request.city_name,
        card_count = deduped.len(),
        urls_fetched,
        urls_subdivided,
        "scrape complete"
    );

    Ok(ScrapeOutcome {
        cards: deduped,
        urls_fetched,
        urls_subdivided,
    })
}

/// Cards overlap heavily because rectangle tiles overlap by design. First
/// pass dedups by exact source URL + address (two fetches of the same
/// overlapping tile yield byte-identical cards); second pass dedups by the
/// semantic key in case the same sale appears under a differently-worded
/// address from a neighbouring rectangle.
fn dedup_cards(cards: Vec<RawListingCard>) -> Vec<RawListingCard> {
    let mut seen_url_address = HashSet::new();
    let mut seen_semantic = HashSet::new();
    let mut result = Vec::with_capacity(cards.len());

    for card in cards {
        let url_key = (card.source_url.clone(), card.address_raw.clone());
        if !seen_url_address.insert(url_key) {
            continue;
        }
        let semantic_key = (
            card.address_raw.to_lowercase(),
            card.city.as_ref().map(|c| c.to_lowercase()),
            card.price,
            card.surface.map(|s| (s * 10.0).round() as i64),
            card.rooms,
            card.sale_date_raw.clone(),
        );
        if !seen_semantic.insert(semantic_key) {
            continue;
        }
        result.push(card);
    }
    result
}

const RAW_CSV_HEADER: &[&str] = &[
    "address_raw",
    "city_name",
    "price",
    "surface",
    "rooms",
    "sale_date",
    "property_type",
    "source_url",
];

/// Writes the raw scrape output as the CSV intermediate consumed by stage 1
/// of the enrichment pipeline. Always writes at least the header row, even
/// when zero cards were found, so downstream stages see a well-formed file.
/// Each row's city is the card's own scraped city when the fetcher found
/// one (a rectangle near an administrative border can return cards from a
/// neighbouring commune); `fallback_city_name` — the city this scrape was
/// requested for — is used only when a card's own city couldn't be parsed.
pub fn write_raw_csv(
    path: &Path,
    fallback_city_name: &str,
    cards: &[RawListingCard],
) -> Result<(), PipelineError> {
    let mut writer = csv::WriterBuilder::new().from_path(path)?;
    writer.write_record(RAW_CSV_HEADER)?;

    for card in cards {
        let city_name = card.city.as_deref().unwrap_or(fallback_city_name);
        writer.write_record([
            card.address_raw.as_str(),
            city_name,
            &card.price.map(|p| p.to_string()).unwrap_or_default(),
            &card.surface.map(|s| s.to_string()).unwrap_or_default(),
            &card.rooms.map(|r| r.to_string()).unwrap_or_default(),
            card.sale_date_raw.as_deref().unwrap_or(""),
            card.property_type_raw.as_deref().unwrap_or(""),
            card.source_url.as_str(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(url: &str, address: &str, price: i64) -> RawListingCard {
        card_in_city(url, address, price, None)
    }

    fn card_in_city(url: &str, address: &str, price: i64, city: Option<&str>) -> RawListingCard {
        RawListingCard {
            address_raw: address.to_string(),
            city: city.map(str::to_string),
            postal_code: None,
            price: Some(price),
            surface: Some(65.0),
            rooms: Some(3),
            sale_date_raw: Some("14/03/2022".to_string()),
            property_type_raw: Some("Maison".to_string()),
            source_url: url.to_string(),
        }
    }

    #[test]
    fn dedup_drops_exact_duplicates_across_overlapping_tiles() {
        let cards = vec![
            card("http://a", "12 Rue Foo", 300_000),
            card("http://b", "12 Rue Foo", 300_000),
            card("http://c", "14 Rue Bar", 400_000),
        ];
        let deduped = dedup_cards(cards);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn write_raw_csv_emits_header_with_zero_cards() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        write_raw_csv(&path, "Lyon", &[]).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.trim().contains("address_raw"));
        assert_eq!(contents.trim().lines().count(), 1);
    }

    #[test]
    fn write_raw_csv_round_trips_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let cards = vec![card("http://a", "12 Rue Foo", 300_000)];
        write_raw_csv(&path, "Lyon", &cards).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("12 Rue Foo"));
        assert!(contents.contains("300000"));
    }

    #[test]
    fn write_raw_csv_prefers_each_card_own_city_over_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.csv");
        let cards = vec![
            card_in_city("http://a", "12 Rue Foo", 300_000, Some("Villeurbanne")),
            card("http://b", "14 Rue Bar", 400_000),
        ];
        write_raw_csv(&path, "Lyon", &cards).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Villeurbanne"));
        assert!(contents.contains("Lyon"));
    }

    #[test]
    fn dedup_keeps_same_address_in_different_neighbouring_cities() {
        let cards = vec![
            card_in_city("http://a", "12 Rue Foo", 300_000, Some("Lyon")),
            card_in_city("http://b", "12 Rue Foo", 300_000, Some("Villeurbanne")),
        ];
        let deduped = dedup_cards(cards);
        assert_eq!(deduped.len(), 2);
    }
}
