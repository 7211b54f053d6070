//! Stage 6: projects each sale's price forward to an estimated current
//! value, compounding a per-(city, property-type) annual growth rate over
//! the sale's age and nudging for the DPE energy class when one was found.

use crate::db;
use crate::enrich::record::EnrichmentRecord;
use crate::error::PipelineError;
use chrono::Utc;
use sqlx::PgPool;
use tracing::info;

const FALLBACK_ANNUAL_GROWTH: f64 = 0.03;
const GROWTH_CLAMP: f64 = 0.10;
const RECENT_SALE_YEARS: f64 = 0.5;
const CONFIDENCE_BASE: f64 = 0.8;
const CONFIDENCE_AGE_PENALTY_PER_YEAR: f64 = 0.05;
const CONFIDENCE_AGE_PENALTY_MAX: f64 = 0.6;
const CONFIDENCE_BONUS: f64 = 0.05;
const GEOCODING_SCORE_BONUS_THRESHOLD: f64 = 0.8;
const ROUND_TO: f64 = 1000.0;

pub struct PriceEstimateOutcome {
    pub records: Vec<EnrichmentRecord>,
}

pub async fn run(
    pool: &PgPool,
    mut records: Vec<EnrichmentRecord>,
) -> Result<PriceEstimateOutcome, PipelineError> {
    let today = Utc::now().date_naive();

    for rec in &mut records {
        let Some(sale_date) = rec.sale_date else {
            continue;
        };
        let age_years = (today - sale_date).num_days() as f64 / 365.25;

        if age_years < RECENT_SALE_YEARS {
            rec.estimated_price = Some(rec.price);
            rec.estimation_confidence = Some(1.0);
            continue;
        }

        let growth_rate = match (rec.city_id, rec.property_type) {
            (Some(city_id), Some(property_type)) => {
                db::city_growth_rate(pool, city_id, property_type)
                    .await?
                    .unwrap_or(FALLBACK_ANNUAL_GROWTH)
            }
            _ => FALLBACK_ANNUAL_GROWTH,
        }
        .clamp(-GROWTH_CLAMP, GROWTH_CLAMP);
        rec.price_evolution_rate = Some(growth_rate);

        let mut estimated = rec.price as f64 * (1.0 + growth_rate).powf(age_years);
        let dpe_applied = rec.dpe_energy_class.is_some();
        if let Some(class) = rec.dpe_energy_class {
            estimated *= 1.0 + class.price_adjustment();
        }
        rec.estimated_price = Some(((estimated / ROUND_TO).round() * ROUND_TO) as i64);

        let mut confidence =
            CONFIDENCE_BASE - (CONFIDENCE_AGE_PENALTY_PER_YEAR * age_years).min(CONFIDENCE_AGE_PENALTY_MAX);
        if dpe_applied {
            confidence += CONFIDENCE_BONUS;
        }
        if rec.geocoding_score.map_or(false, |s| s > GEOCODING_SCORE_BONUS_THRESHOLD) {
            confidence += CONFIDENCE_BONUS;
        }
        if rec.property_type.is_some() {
            confidence += CONFIDENCE_BONUS;
        }
        rec.estimation_confidence = Some(confidence.clamp(0.0, 1.0));
    }

    info!(rows = records.len(), "stage 6 price estimation complete");
    Ok(PriceEstimateOutcome { records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DpeClass, PropertyType};
    use chrono::{Duration, NaiveDate};

    fn base_record(sale_date: NaiveDate) -> EnrichmentRecord {
        EnrichmentRecord {
            address_raw: "12 RUE FOO".into(),
            city_name: "LYON".into(),
            price: 300_000,
            sale_date: Some(sale_date),
            property_type: Some(PropertyType::House),
            ..Default::default()
        }
    }

    #[test]
    fn recent_sale_uses_sale_price_as_estimate() {
        let today = Utc::now().date_naive();
        let rec = base_record(today - Duration::days(30));
        assert!((today - rec.sale_date.unwrap()).num_days() as f64 / 365.25 < RECENT_SALE_YEARS);
    }

    #[test]
    fn dpe_adjustment_direction_matches_class() {
        assert!(DpeClass::A.price_adjustment() > 0.0);
        assert!(DpeClass::G.price_adjustment() < 0.0);
    }

    #[test]
    fn confidence_clamped_and_bonuses_additive() {
        let mut confidence: f64 = CONFIDENCE_BASE - CONFIDENCE_AGE_PENALTY_MAX;
        confidence += CONFIDENCE_BONUS * 3.0;
        assert!((confidence - (0.8 - 0.6 + 0.15)).abs() < 1e-9);
        assert!(confidence.clamp(0.0, 1.0) <= 1.0);
    }
}
