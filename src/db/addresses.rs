use crate::domain::{Address, PropertyType};
use crate::error::PipelineError;
use chrono::NaiveDate;
use geojson::{Geometry, Value as GeoValue};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::PgPool;
use std::collections::HashSet;
use uuid::Uuid;

static DEPARTMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2,3}$").unwrap());

/// Source URLs are checked for existence in batches of this size before a
/// bulk insert, rather than one lookup per row.
const EXISTENCE_CHECK_BATCH_SIZE: usize = 100;

/// Pre-filters `urls` against the address table in batches, so a caller
/// persisting a large enrichment output can skip straight to `insert_address`
/// for the residual rather than doing a lookup per row. The unique-URL race
/// on the residual is still caught and recovered by `insert_address` itself.
pub async fn find_existing_source_urls(
    pool: &PgPool,
    urls: &[String],
) -> Result<HashSet<String>, PipelineError> {
    let mut existing = HashSet::new();
    for chunk in urls.chunks(EXISTENCE_CHECK_BATCH_SIZE) {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT source_url FROM addresses WHERE source_url = ANY($1)")
                .bind(chunk)
                .fetch_all(pool)
                .await?;
        existing.extend(rows.into_iter().map(|(url,)| url));
    }
    Ok(existing)
}

pub struct NewAddress {
    pub city_id: Uuid,
    pub department: String,
    pub address_raw: String,
    pub sale_date: NaiveDate,
    pub property_type: PropertyType,
    pub surface: i32,
    pub rooms: i32,
    pub price: i64,
    pub estimated_price: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub source_url: String,
}

fn clean_department(raw: &str) -> String {
    if DEPARTMENT_RE.is_match(raw) {
        return raw.to_string();
    }
    let truncated: String = raw.chars().take(3).collect();
    if truncated.len() < 2 {
        format!("{truncated:0>2}")
    } else {
        truncated
    }
}

#[cfg(test)]
mod department_tests {
    use super::clean_department;

    #[test]
    fn pads_short_department() {
        assert_eq!(clean_department("7"), "07");
    }

    #[test]
    fn truncates_long_department() {
        assert_eq!(clean_department("97501"), "975");
    }

    #[test]
    fn keeps_corsica_two_char_code() {
        assert_eq!(clean_department("2A"), "2A");
    }
}

/// Looks up an address by its `immodata_url` dedup key before inserting,
/// since re-scraping overlapping tiles constantly reproduces the same URL.
pub async fn find_by_source_url(pool: &PgPool, url: &str) -> Result<Option<Uuid>, PipelineError> {
    let row: Option<(Uuid,)> =
        sqlx::query_as("SELECT id FROM addresses WHERE source_url = $1")
            .bind(url)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|(id,)| id))
}

/// Inserts a new address, pre-checking for an existing row by URL and
/// falling back to a re-lookup if a concurrent insert wins the unique-
/// constraint race.
pub async fn insert_address(pool: &PgPool, new: NewAddress) -> Result<Uuid, PipelineError> {
    if let Some(existing) = find_by_source_url(pool, &new.source_url).await? {
        return Ok(existing);
    }

    let department = clean_department(&new.department);
    let geoposition = match (new.longitude, new.latitude) {
        (Some(lon), Some(lat)) => {
            let geometry = Geometry::new(GeoValue::Point(vec![lon, lat]));
            Some(serde_json::to_value(&geometry).map_err(|e| PipelineError::DataInvalid(e.to_string()))?)
        }
        _ => None,
    };

    let id = Uuid::new_v4();
    let result = sqlx::query(
        "INSERT INTO addresses \
            (id, city_id, department, raw_address, sale_date, property_type, \
             surface, rooms, price, estimated_current_price, latitude, longitude, \
             source_url, geoposition) \
         VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)",
    )
    .bind(id)
    .bind(new.city_id)
    .bind(&department)
    .bind(&new.address_raw)
    .bind(new.sale_date)
    .bind(new.property_type)
    .bind(new.surface)
    .bind(new.rooms)
    .bind(new.price)
    .bind(new.estimated_price)
    .bind(new.latitude)
    .bind(new.longitude)
    .bind(&new.source_url)
    .bind(geoposition)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(id),
        Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
            find_by_source_url(pool, &new.source_url)
                .await?
                .ok_or_else(|| {
                    PipelineError::ConstraintViolation(format!(
                        "unique_immodata_url violation but no row found for {}",
                        new.source_url
                    ))
                })
        }
        Err(e) => Err(e.into()),
    }
}

/// Year-over-year average price/m² growth for a (city, property type),
/// used to project a sale's estimated current price. Empty when there's
/// not enough history to compute a trend.
pub async fn city_growth_rate(
    pool: &PgPool,
    city_id: Uuid,
    property_type: PropertyType,
) -> Result<Option<f64>, PipelineError> {
    let rows: Vec<(i32, f64)> = sqlx::query_as(
        "SELECT extract(year from sale_date)::int AS year, \
                avg(price::float8 / NULLIF(surface, 0)) AS avg_price_m2 \
         FROM addresses \
         WHERE city_id = $1 AND property_type = $2 AND surface > 0 \
         GROUP BY year ORDER BY year",
    )
    .bind(city_id)
    .bind(property_type)
    .fetch_all(pool)
    .await?;

    if rows.len() < 2 {
        return Ok(None);
    }

    let mut rates = Vec::new();
    for pair in rows.windows(2) {
        let (_, prev) = pair[0];
        let (_, next) = pair[1];
        if prev > 0.0 {
            rates.push((next - prev) / prev);
        }
    }
    if rates.is_empty() {
        return Ok(None);
    }
    Ok(Some(rates.iter().sum::<f64>() / rates.len() as f64))
}

/// Candidates for `client_id`'s assignment window: an address is only
/// excluded if it is already assigned to *this* client — the same address
/// may legitimately be assigned to several different clients, since
/// `(client, address)` uniqueness is per-pair, not per-address.
pub async fn addresses_for_client_window(
    pool: &PgPool,
    client_id: Uuid,
    city_ids: &[Uuid],
    property_types: &[PropertyType],
    lower: NaiveDate,
    upper: NaiveDate,
) -> Result<Vec<Address>, PipelineError> {
    let rows = sqlx::query_as::<_, Address>(
        "SELECT a.id, a.city_id, a.department, a.raw_address, a.sale_date, \
                a.property_type, a.surface, a.rooms, a.price, \
                a.estimated_current_price, a.latitude, a.longitude, a.source_url \
         FROM addresses a \
         WHERE a.city_id = ANY($1) AND a.property_type = ANY($2) \
           AND a.sale_date BETWEEN $3 AND $4 \
           AND NOT EXISTS ( \
             SELECT 1 FROM client_addresses ca \
             WHERE ca.address_id = a.id AND ca.client_id = $5 \
           )",
    )
    .bind(city_ids)
    .bind(property_types)
    .bind(lower)
    .bind(upper)
    .bind(client_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
