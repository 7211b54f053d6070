//! Client for the ADEME energy-performance certificate ("DPE") open data
//! APIs. Five datasets cover buildings under different regulatory regimes
//! and two field-naming conventions (post/pre July 2021); this client
//! queries all five for a municipality and merges the results, caching
//! them to disk since a given INSEE code rarely changes.

use crate::error::PipelineError;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};

const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECS: u64 = 1;
const API_BATCH_SIZE: u32 = 9000;
const MIN_DPE_THRESHOLD: usize = 200;
const PAGINATION_HARD_CAP: u32 = 10_000;
const CACHE_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

struct DatasetConfig {
    name: &'static str,
    url: &'static str,
    insee_field: &'static str,
}

static DATASETS: Lazy<Vec<DatasetConfig>> = Lazy::new(|| {
    vec![
        DatasetConfig {
            name: "EXISTING_BUILDINGS_NEW",
            url: "https://data.ademe.fr/data-fair/api/v1/datasets/dpe03existant/lines",
            insee_field: "code_insee_ban",
        },
        DatasetConfig {
            name: "NEW_BUILDINGS_NEW",
            url: "https://data.ademe.fr/data-fair/api/v1/datasets/dpe02neuf/lines",
            insee_field: "code_insee_ban",
        },
        DatasetConfig {
            name: "TERTIARY_NEW",
            url: "https://data.ademe.fr/data-fair/api/v1/datasets/dpe01tertiaire/lines",
            insee_field: "code_insee_ban",
        },
        DatasetConfig {
            name: "EXISTING_BUILDINGS_OLD",
            url: "https://data.ademe.fr/data-fair/api/v1/datasets/dpe-france/lines",
            insee_field: "code_insee_commune_actualise",
        },
        DatasetConfig {
            name: "TERTIARY_OLD",
            url: "https://data.ademe.fr/data-fair/api/v1/datasets/dpe-tertiaire/lines",
            insee_field: "code_insee_commune",
        },
    ]
});

const DPE_NUMBER_FIELDS: &[&str] = &["N°DPE", "numero_dpe"];
const DPE_DATE_FIELDS: &[&str] = &[
    "Date_réception_DPE",
    "date_reception_dpe",
    "date_etablissement_dpe",
];
const ENERGY_CLASS_FIELDS: &[&str] = &["Etiquette_DPE", "etiquette_dpe", "classe_consommation_energie"];
const GES_CLASS_FIELDS: &[&str] = &["Etiquette_GES", "etiquette_ges", "classe_estimation_ges"];
const CONSTRUCTION_YEAR_FIELDS: &[&str] = &["Année_construction", "annee_construction"];
const ADDRESS_FIELDS: &[&str] = &["Adresse_brute", "adresse_brut", "adresse_ban", "geo_adresse"];
const GEOPOINT_FIELDS: &[&str] = &["_geopoint", "geo_point", "geopoint", "coordinates_ban", "coordonnees_ban"];

/// One certificate row, normalized across the five datasets' differing
/// column names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DpeCandidate {
    pub dpe_number: Option<String>,
    pub dpe_date: Option<NaiveDate>,
    pub energy_class: Option<String>,
    pub ges_class: Option<String>,
    pub construction_year: Option<i32>,
    pub address_raw: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

pub struct DpeApiClient {
    client: Client,
    cache_dir: PathBuf,
}

impl DpeApiClient {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("reqwest client"),
            cache_dir: cache_dir.into(),
        }
    }

    /// Fetches certificates for a municipality, serving from the on-disk
    /// cache when it's younger than 30 days.
    pub async fn candidates_for_insee(
        &self,
        insee_code: &str,
    ) -> Result<Vec<DpeCandidate>, PipelineError> {
        let cache_path = self.cache_dir.join(format!("{insee_code}.csv"));
        if let Some(cached) = read_cache_if_fresh(&cache_path)? {
            return Ok(cached);
        }

        let mut all = Vec::new();
        for dataset in DATASETS.iter() {
            if all.len() > MIN_DPE_THRESHOLD {
                break;
            }
            match self.query_dataset_paginated(dataset, insee_code).await {
                Ok(mut rows) => all.append(&mut rows),
                Err(e) => warn!(dataset = dataset.name, insee_code, error = %e, "dpe api: dataset query failed"),
            }
        }

        dedup_by_number(&mut all);
        if all.len() > PAGINATION_HARD_CAP as usize {
            all.truncate(PAGINATION_HARD_CAP as usize);
        }

        write_cache(&cache_path, &all)?;
        info!(insee_code, count = all.len(), "dpe api: fetched certificates");
        Ok(all)
    }

    async fn query_dataset_paginated(
        &self,
        dataset: &DatasetConfig,
        insee_code: &str,
    ) -> Result<Vec<DpeCandidate>, PipelineError> {
        let mut results = Vec::new();
        let mut page = 1u32;

        loop {
            if page * API_BATCH_SIZE > PAGINATION_HARD_CAP {
                break;
            }
            let page_rows = self
                .query_page_with_retry(dataset, insee_code, page, API_BATCH_SIZE)
                .await?;
            let got = page_rows.len();
            results.extend(page_rows);
            if got < API_BATCH_SIZE as usize {
                break;
            }
            page += 1;
        }
        Ok(results)
    }

    async fn query_page_with_retry(
        &self,
        dataset: &DatasetConfig,
        insee_code: &str,
        page: u32,
        size: u32,
    ) -> Result<Vec<DpeCandidate>, PipelineError> {
        let mut last_err = None;
        for attempt in 1..=MAX_RETRIES {
            let resp = self
                .client
                .get(dataset.url)
                .query(&[
                    ("size", size.to_string()),
                    ("page", page.to_string()),
                    ("q", insee_code.to_string()),
                    ("q_fields", dataset.insee_field.to_string()),
                ])
                .send()
                .await;

            match resp {
                Ok(r) if r.status().is_success() => {
                    let body: Value = r
                        .json()
                        .await
                        .map_err(|e| PipelineError::Transient(e.to_string()))?;
                    let rows = body
                        .get("results")
                        .and_then(|v| v.as_array())
                        .cloned()
                        .unwrap_or_default();
                    return Ok(rows.iter().map(parse_candidate).collect());
                }
                Ok(r) => {
                    last_err = Some(PipelineError::Transient(format!(
                        "dpe api {}: status {}",
                        dataset.name,
                        r.status()
                    )));
                }
                Err(e) => last_err = Some(e.into()),
            }
            if attempt < MAX_RETRIES {
                tokio::time::sleep(Duration::from_secs(RETRY_DELAY_SECS * attempt as u64)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| PipelineError::Transient("dpe api request failed".into())))
    }
}

fn field_str(row: &Value, candidates: &[&str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|f| row.get(*f).and_then(|v| v.as_str()).map(str::to_string))
}

fn parse_candidate(row: &Value) -> DpeCandidate {
    let address_raw = field_str(row, ADDRESS_FIELDS).unwrap_or_else(|| "Address not available".to_string());

    let (latitude, longitude) = GEOPOINT_FIELDS
        .iter()
        .find_map(|f| row.get(*f).and_then(|v| v.as_str()))
        .and_then(parse_geopoint)
        .unzip();

    let construction_year = field_str(row, CONSTRUCTION_YEAR_FIELDS)
        .and_then(|s| s.parse::<i32>().ok().or_else(|| extract_year(&s)));

    let dpe_date = field_str(row, DPE_DATE_FIELDS).and_then(|s| {
        NaiveDate::parse_from_str(&s, "%Y-%m-%d").ok()
    });

    DpeCandidate {
        dpe_number: field_str(row, DPE_NUMBER_FIELDS),
        dpe_date,
        energy_class: field_str(row, ENERGY_CLASS_FIELDS),
        ges_class: field_str(row, GES_CLASS_FIELDS),
        construction_year,
        address_raw,
        latitude,
        longitude,
    }
}

fn parse_geopoint(raw: &str) -> Option<(f64, f64)> {
    let parts: Vec<&str> = raw.split(',').collect();
    if parts.len() != 2 {
        return None;
    }
    let lat: f64 = parts[0].trim().parse().ok()?;
    let lon: f64 = parts[1].trim().parse().ok()?;
    Some((lat, lon))
}

fn extract_year(s: &str) -> Option<i32> {
    let digits: String = s.chars().filter(|c| c.is_ascii_digit()).take(4).collect();
    digits.parse().ok()
}

fn dedup_by_number(rows: &mut Vec<DpeCandidate>) {
    let mut seen = std::collections::HashSet::new();
    rows.retain(|r| match &r.dpe_number {
        Some(n) => seen.insert(n.clone()),
        None => true,
    });
}

fn read_cache_if_fresh(path: &Path) -> Result<Option<Vec<DpeCandidate>>, PipelineError> {
    let Ok(metadata) = std::fs::metadata(path) else {
        return Ok(None);
    };
    let Ok(modified) = metadata.modified() else {
        return Ok(None);
    };
    if SystemTime::now().duration_since(modified).unwrap_or(Duration::MAX) > CACHE_TTL {
        return Ok(None);
    }
    let mut reader = csv::ReaderBuilder::new().from_path(path)?;
    let rows: Result<Vec<DpeCandidate>, _> = reader.deserialize().collect();
    Ok(Some(rows?))
}

fn write_cache(path: &Path, rows: &[DpeCandidate]) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = csv::WriterBuilder::new().from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_geopoint_lat_lon_pair() {
        assert_eq!(parse_geopoint("48.85,2.35"), Some((48.85, 2.35)));
        assert_eq!(parse_geopoint("not-a-point"), None);
    }

    #[test]
    fn extracts_four_digit_year_from_period_string() {
        assert_eq!(extract_year("avant 1948"), Some(1948));
    }

    #[test]
    fn dedup_keeps_first_occurrence_per_dpe_number() {
        let mut rows = vec![
            DpeCandidate {
                dpe_number: Some("A1".into()),
                dpe_date: None,
                energy_class: None,
                ges_class: None,
                construction_year: None,
                address_raw: "1 RUE A".into(),
                latitude: None,
                longitude: None,
            },
            DpeCandidate {
                dpe_number: Some("A1".into()),
                dpe_date: None,
                energy_class: None,
                ges_class: None,
                construction_year: None,
                address_raw: "DUPLICATE".into(),
                latitude: None,
                longitude: None,
            },
        ];
        dedup_by_number(&mut rows);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].address_raw, "1 RUE A");
    }
}
