//! Stage 4: matches each geocoded record against energy-performance
//! certificates for its municipality. Unmatched records are kept — a
//! missing DPE is not a reason to drop a lead — just left with empty
//! certificate fields.

use crate::dpe_api::{DpeApiClient, DpeCandidate};
use crate::enrich::record::EnrichmentRecord;
use crate::enrich::text::{normalize_for_matching, parse_address, street_numbers_match, AddressComponents};
use crate::error::PipelineError;
use std::collections::HashMap;
use tracing::{info, warn};

const SIMILARITY_THRESHOLD: f64 = 0.7;
const HIGH_SIMILARITY_THRESHOLD: f64 = 0.85;
const PROXIMITY_THRESHOLD_KM: f64 = 0.02;
const EARTH_RADIUS_KM: f64 = 6371.0;

pub struct DpeOutcome {
    pub records: Vec<EnrichmentRecord>,
    pub matched: usize,
    pub considered: usize,
}

struct PreparedCandidate {
    candidate: DpeCandidate,
    normalized_address: String,
    components: AddressComponents,
}

pub async fn run(
    dpe_api: &DpeApiClient,
    mut records: Vec<EnrichmentRecord>,
) -> Result<DpeOutcome, PipelineError> {
    let mut by_insee: HashMap<String, Vec<usize>> = HashMap::new();
    for (idx, rec) in records.iter().enumerate() {
        if let Some(insee) = &rec.insee_code {
            by_insee.entry(insee.clone()).or_default().push(idx);
        }
    }

    let mut matched = 0usize;
    let mut considered = 0usize;

    for (insee_code, indices) in by_insee {
        let raw_candidates = match dpe_api.candidates_for_insee(&insee_code).await {
            Ok(c) if !c.is_empty() => c,
            Ok(_) => continue,
            Err(e) => {
                warn!(insee_code, error = %e, "stage 4: DPE lookup failed for municipality");
                continue;
            }
        };

        let prepared: Vec<PreparedCandidate> = raw_candidates
            .into_iter()
            .map(|c| {
                let normalized_address = normalize_for_matching(&c.address_raw);
                let components = parse_address(&c.address_raw);
                PreparedCandidate {
                    candidate: c,
                    normalized_address,
                    components,
                }
            })
            .collect();

        for idx in indices {
            let Some((lat, lon)) = coords(&records[idx]) else {
                continue;
            };
            considered += 1;

            let property_address = normalize_for_matching(&records[idx].address_raw);
            let property_components = parse_address(&records[idx].address_raw);

            let text_candidates =
                find_text_match_candidates(&property_address, &property_components, &prepared);
            if text_candidates.is_empty() {
                continue;
            }

            let Some((best, distance_km, similarity)) =
                find_best_geo_match(lat, lon, &text_candidates)
            else {
                continue;
            };

            let confidence = match_confidence(
                similarity,
                distance_km * 1000.0,
                &property_components,
                &best.components,
            );

            let rec = &mut records[idx];
            rec.dpe_number = best.candidate.dpe_number.clone();
            rec.dpe_date = best.candidate.dpe_date;
            rec.dpe_energy_class = best
                .candidate
                .energy_class
                .as_deref()
                .map(crate::domain::DpeClass::parse);
            rec.dpe_ges_class = best.candidate.ges_class.clone();
            rec.construction_year = best.candidate.construction_year;
            rec.dpe_match_confidence = Some(confidence);
            matched += 1;
        }
    }

    info!(matched, considered, "stage 4 DPE matching complete");
    Ok(DpeOutcome {
        records,
        matched,
        considered,
    })
}

fn coords(rec: &EnrichmentRecord) -> Option<(f64, f64)> {
    match (rec.latitude, rec.longitude) {
        (Some(lat), Some(lon)) => Some((lat, lon)),
        _ => None,
    }
}

fn find_text_match_candidates<'a>(
    property_address: &str,
    property_components: &AddressComponents,
    candidates: &'a [PreparedCandidate],
) -> Vec<(&'a PreparedCandidate, f64)> {
    if property_address.is_empty() {
        return Vec::new();
    }
    // Strict validation: without a street number on our side there is
    // nothing reliable to match against.
    let Some(property_number) = &property_components.number else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for candidate in candidates {
        if candidate.normalized_address.is_empty() {
            continue;
        }
        if !street_numbers_match(&Some(property_number.clone()), &candidate.components.number) {
            continue;
        }

        let similarity =
            strsim::normalized_levenshtein(property_address, &candidate.normalized_address);
        let threshold = if candidate.components.number.is_none() {
            HIGH_SIMILARITY_THRESHOLD
        } else {
            SIMILARITY_THRESHOLD
        };
        if similarity >= threshold {
            out.push((candidate, similarity));
        }
    }
    out
}

fn find_best_geo_match<'a>(
    lat: f64,
    lon: f64,
    candidates: &[(&'a PreparedCandidate, f64)],
) -> Option<(&'a PreparedCandidate, f64, f64)> {
    let mut best: Option<(&'a PreparedCandidate, f64, f64)> = None;
    for (candidate, similarity) in candidates {
        let (Some(clat), Some(clon)) = (candidate.candidate.latitude, candidate.candidate.longitude)
        else {
            continue;
        };
        let distance = haversine_km(lat, lon, clat, clon);
        if distance <= PROXIMITY_THRESHOLD_KM {
            if best.map_or(true, |(_, best_dist, _)| distance < best_dist) {
                best = Some((candidate, distance, *similarity));
            }
        }
    }
    best
}

fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Base 70 + up to 25 for text similarity + discrete distance bands (0-40)
/// + street-number agreement (0-25), capped at 100.
fn match_confidence(
    similarity: f64,
    distance_m: f64,
    property_components: &AddressComponents,
    dpe_components: &AddressComponents,
) -> i32 {
    let base = 70;
    let text_score = ((similarity * 25.0) as i32).min(25);
    let geo_score = if distance_m < 5.0 {
        40
    } else if distance_m < 10.0 {
        35
    } else if distance_m < 15.0 {
        25
    } else if distance_m < 20.0 {
        15
    } else {
        0
    };
    let number_score = match (&property_components.number, &dpe_components.number) {
        (Some(a), Some(b)) if a == b => 25,
        (Some(a), Some(b)) if street_numbers_match(&Some(a.clone()), &Some(b.clone())) => 15,
        _ => 0,
    };
    (base + text_score + geo_score + number_score).min(100)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn components(number: &str) -> AddressComponents {
        AddressComponents {
            number: Some(number.to_string()),
            street: "RUE FOO".into(),
            city: "LYON".into(),
        }
    }

    #[test]
    fn confidence_caps_at_100() {
        let c = match_confidence(1.0, 1.0, &components("12"), &components("12"));
        assert_eq!(c, 100);
    }

    #[test]
    fn confidence_uses_discrete_geo_bands_not_continuous_decay() {
        let c1 = match_confidence(0.8, 4.9, &components("12"), &components("99"));
        let c2 = match_confidence(0.8, 9.9, &components("12"), &components("99"));
        // Both just under their respective band edges, 5 points apart, not a smooth curve.
        assert_eq!(c1 - c2, 5);
    }

    #[test]
    fn haversine_zero_distance_for_identical_points() {
        assert!(haversine_km(48.85, 2.35, 48.85, 2.35) < 1e-9);
    }
}
