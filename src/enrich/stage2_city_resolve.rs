//! Stage 2: resolves each record's free-text city name to a `cities` row,
//! geocoding and inserting any city not already known.

use crate::address_api::AddressApiClient;
use crate::db;
use crate::domain::City;
use crate::enrich::record::EnrichmentRecord;
use crate::error::PipelineError;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{info, warn};

pub struct CityResolveOutcome {
    pub records: Vec<EnrichmentRecord>,
    pub rows_in: usize,
    pub rows_out: usize,
}

pub async fn run(
    pool: &PgPool,
    address_api: &AddressApiClient,
    mut records: Vec<EnrichmentRecord>,
) -> Result<CityResolveOutcome, PipelineError> {
    let rows_in = records.len();

    let mut by_city: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, rec) in records.iter().enumerate() {
        by_city.entry(rec.city_name.to_uppercase()).or_default().push(idx);
    }
    let distinct_names: Vec<String> = by_city.keys().cloned().collect();

    let existing = db::get_by_names(pool, &distinct_names).await?;
    let mut resolved: HashMap<String, City> =
        existing.into_iter().map(|c| (c.name.to_uppercase(), c)).collect();

    let missing: Vec<String> = distinct_names
        .iter()
        .filter(|n| !resolved.contains_key(*n))
        .cloned()
        .collect();

    for city_name in &missing {
        let indices = &by_city[city_name];
        let queries: Vec<String> = indices
            .iter()
            .map(|&i| format!("{} {}", records[i].address_raw, records[i].city_name))
            .collect();

        let geocoded = match address_api.geocode_csv(&queries).await {
            Ok(g) => g,
            Err(e) => {
                warn!(city_name, error = %e, "stage 2: geocoding failed for missing city");
                continue;
            }
        };

        let mut postal_counts: HashMap<String, u32> = HashMap::new();
        let mut insee_counts: HashMap<String, u32> = HashMap::new();
        for g in &geocoded {
            if let Some(p) = &g.result_postcode {
                *postal_counts.entry(p.clone()).or_insert(0) += 1;
            }
            if let Some(c) = &g.result_citycode {
                *insee_counts.entry(c.clone()).or_insert(0) += 1;
            }
        }

        let Some(postal_code) = most_frequent(&postal_counts) else {
            warn!(city_name, "stage 2: could not resolve city, no geocoding matches");
            continue;
        };
        let Some(insee_code) = most_frequent(&insee_counts) else {
            warn!(city_name, "stage 2: could not resolve city, no geocoding matches");
            continue;
        };

        let postal_code = clean_postal_code(&postal_code);
        let Some(insee_code) = clean_insee_code(&insee_code) else {
            warn!(city_name, insee_code, "stage 2: invalid INSEE code, skipping city");
            continue;
        };
        let department = City::department_from_insee(&insee_code);

        let city = db::upsert(
            pool,
            db::NewCity {
                name: city_name.clone(),
                postal_code,
                insee_code,
                department,
            },
        )
        .await?;

        info!(city_name, city_id = %city.id, "stage 2: resolved new city");
        resolved.insert(city_name.clone(), city);
    }

    records.retain_mut(|rec| {
        let Some(city) = resolved.get(&rec.city_name.to_uppercase()) else {
            return false;
        };
        rec.city_id = Some(city.id);
        rec.postal_code = Some(city.postal_code.clone());
        rec.insee_code = Some(city.insee_code.clone());
        rec.department = Some(city.department.clone());
        true
    });

    let rows_out = records.len();
    let dropped = rows_in - rows_out;
    if dropped > 0 {
        warn!(dropped, "stage 2: dropped rows with unresolved city");
    }
    info!(rows_in, rows_out, "stage 2 city resolution complete");

    Ok(CityResolveOutcome {
        records,
        rows_in,
        rows_out,
    })
}

fn most_frequent(counts: &HashMap<String, u32>) -> Option<String> {
    counts.iter().max_by_key(|(_, &n)| n).map(|(k, _)| k.clone())
}

/// Truncates a postal code longer than 5 digits, zero-pads a shorter one.
fn clean_postal_code(raw: &str) -> String {
    let digits: String = raw.trim().chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() > 5 {
        digits[..5].to_string()
    } else {
        format!("{digits:0>5}")
    }
}

/// Validates and normalizes an INSEE code to exactly 5 characters,
/// allowing the Corsican `2A`/`2B` department prefixes. Returns `None` for
/// an empty or otherwise unsalvageable code.
fn clean_insee_code(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || matches!(trimmed.to_lowercase().as_str(), "nan" | "none" | "null") {
        return None;
    }
    let code = if trimmed.len() < 5 {
        format!("{trimmed:0>5}")
    } else if trimmed.len() > 5 {
        trimmed[..5].to_string()
    } else {
        trimmed.to_string()
    };

    let is_corsican = code.len() == 5 && (code.starts_with("2A") || code.starts_with("2B"));
    let rest_is_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if is_corsican {
        if rest_is_digits(&code[2..]) {
            Some(code)
        } else {
            None
        }
    } else if rest_is_digits(&code) {
        Some(code)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postal_code_truncates_and_pads() {
        assert_eq!(clean_postal_code("750560"), "75056");
        assert_eq!(clean_postal_code("750"), "00750");
    }

    #[test]
    fn insee_code_allows_corsican_prefix() {
        assert_eq!(clean_insee_code("2A004"), Some("2A004".to_string()));
        assert_eq!(clean_insee_code("75056"), Some("75056".to_string()));
        assert_eq!(clean_insee_code("nan"), None);
        assert_eq!(clean_insee_code(""), None);
    }

    #[test]
    fn insee_code_pads_short_codes() {
        assert_eq!(clean_insee_code("750"), Some("00750".to_string()));
    }
}
