//! Stage 5: refreshes market-price headlines for any city still referenced
//! by the batch that hasn't been scraped in the last 365 days. A pass-
//! through stage — it never drops or mutates a record, only updates the
//! `cities` table as a side effect.

use crate::city_price::CityDataScraper;
use crate::db;
use crate::enrich::record::EnrichmentRecord;
use crate::error::PipelineError;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

pub struct CityPriceOutcome {
    pub records: Vec<EnrichmentRecord>,
    pub refreshed: usize,
}

pub async fn run(
    pool: &PgPool,
    scraper: &CityDataScraper<'_>,
    records: Vec<EnrichmentRecord>,
) -> Result<CityPriceOutcome, PipelineError> {
    let city_ids: Vec<Uuid> = records
        .iter()
        .filter_map(|r| r.city_id)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    let stale = db::stale_among(pool, &city_ids).await?;
    let mut refreshed = 0usize;

    for city in &stale {
        let outcome = scraper.fetch(&city.name, &city.postal_code, Some(&city.insee_code)).await;
        if outcome.is_ok() {
            db::update_market_prices(
                pool,
                city.id,
                outcome.house_price_avg,
                outcome.apartment_price_avg,
            )
            .await?;
            refreshed += 1;
        } else {
            warn!(
                city = city.name,
                error = outcome.error_message.as_deref().unwrap_or(""),
                "stage 5: market price refresh failed"
            );
        }
    }

    info!(refreshed, considered = stale.len(), "stage 5 city-price refresh complete");
    Ok(CityPriceOutcome { records, refreshed })
}
