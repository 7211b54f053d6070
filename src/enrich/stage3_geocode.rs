//! Stage 3: batch geocodes each record's normalized address, then drops
//! anything the geocoder couldn't place confidently or that landed
//! outside the scraped area.

use crate::address_api::AddressApiClient;
use crate::enrich::record::EnrichmentRecord;
use crate::error::PipelineError;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

const CHUNK_SIZE: usize = 5000;
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_SECS: u64 = 2;
const MIN_SCORE: f64 = 0.5;
const KM_PER_DEGREE_LAT: f64 = 111.0;
const KM_PER_DEGREE_LON: f64 = 111.0 * 0.7;
const DEFAULT_DISTANCE_THRESHOLD_KM: f64 = 5.0;

/// The scrape rectangle a batch of records was pulled from, used to reject
/// geocoding results that drifted far outside the scraped area.
#[derive(Debug, Clone, Copy)]
pub struct OriginalBbox {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

pub struct GeocodeOutcome {
    pub records: Vec<EnrichmentRecord>,
    pub rows_in: usize,
    pub rows_out: usize,
}

pub async fn run(
    address_api: &AddressApiClient,
    mut records: Vec<EnrichmentRecord>,
    original_bbox: Option<OriginalBbox>,
    distance_threshold_km: Option<f64>,
) -> Result<GeocodeOutcome, PipelineError> {
    let rows_in = records.len();
    let distance_threshold_km = distance_threshold_km.unwrap_or(DEFAULT_DISTANCE_THRESHOLD_KM);

    for chunk_start in (0..records.len()).step_by(CHUNK_SIZE) {
        let chunk_end = (chunk_start + CHUNK_SIZE).min(records.len());
        let queries: Vec<String> = records[chunk_start..chunk_end]
            .iter()
            .map(|r| format!("{} {}", r.address_raw, r.city_name))
            .collect();

        let results = geocode_with_retry(address_api, &queries).await?;
        for (offset, result) in results.into_iter().enumerate() {
            let rec = &mut records[chunk_start + offset];
            rec.latitude = result.latitude;
            rec.longitude = result.longitude;
            rec.address_normalized = result.result_label;
            rec.geocoding_score = result.result_score;
        }
    }

    let before_validation = records.len();
    records.retain(|r| match (r.latitude, r.longitude, r.geocoding_score) {
        (Some(lat), Some(lon), Some(score)) => {
            score >= MIN_SCORE
                && original_bbox.map_or(true, |bbox| {
                    in_expanded_bbox(lat, lon, bbox, distance_threshold_km)
                })
        }
        _ => false,
    });
    let dropped = before_validation - records.len();
    if dropped > 0 {
        warn!(dropped, "stage 3: dropped unscored/out-of-bounds/unmatched addresses");
    }

    let rows_out = records.len();
    info!(rows_in, rows_out, "stage 3 geocoding complete");

    Ok(GeocodeOutcome {
        records,
        rows_in,
        rows_out,
    })
}

async fn geocode_with_retry(
    address_api: &AddressApiClient,
    queries: &[String],
) -> Result<Vec<crate::address_api::GeocodeResult>, PipelineError> {
    let mut last_err = None;
    for attempt in 1..=MAX_RETRIES {
        match address_api.geocode_csv(queries).await {
            Ok(results) => return Ok(results),
            Err(e) => {
                warn!(attempt, max = MAX_RETRIES, error = %e, "stage 3: geocoding batch failed");
                last_err = Some(e);
                if attempt < MAX_RETRIES {
                    sleep(Duration::from_secs(RETRY_DELAY_SECS * attempt as u64)).await;
                }
            }
        }
    }
    Err(last_err.unwrap_or_else(|| PipelineError::Transient("geocoding failed".to_string())))
}

fn in_expanded_bbox(lat: f64, lon: f64, bbox: OriginalBbox, distance_threshold_km: f64) -> bool {
    let lat_margin = distance_threshold_km / KM_PER_DEGREE_LAT;
    let lon_margin = distance_threshold_km / KM_PER_DEGREE_LON;
    lat >= bbox.min_lat - lat_margin
        && lat <= bbox.max_lat + lat_margin
        && lon >= bbox.min_lon - lon_margin
        && lon <= bbox.max_lon + lon_margin
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bbox_expands_by_distance_threshold() {
        let bbox = OriginalBbox {
            min_lat: 48.8,
            min_lon: 2.3,
            max_lat: 48.9,
            max_lon: 2.4,
        };
        assert!(in_expanded_bbox(48.85, 2.35, bbox, 5.0));
        assert!(!in_expanded_bbox(50.0, 2.35, bbox, 5.0));
        // Just inside the expanded margin.
        let lat_margin = 5.0 / KM_PER_DEGREE_LAT;
        assert!(in_expanded_bbox(bbox.max_lat + lat_margin * 0.5, 2.35, bbox, 5.0));
    }
}
