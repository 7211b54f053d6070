//! Component I: the job orchestrator. `submit` validates and enqueues;
//! `run_job` is the background body that drives one client through
//! scraping, enrichment, and assignment; `drain_retry_queue` re-runs
//! whatever backed off and is now due.

use crate::address_api::AddressApiClient;
use crate::assignment;
use crate::city_price::CityDataScraper;
use crate::config::Config;
use crate::db;
use crate::domain::{Client, Job};
use crate::dpe_api::DpeApiClient;
use crate::email::EmailSender;
use crate::enrich::machine::{self, Deps as MachineDeps};
use crate::enrich::stage3_geocode::OriginalBbox;
use crate::error::PipelineError;
use crate::geo::GeoDivider;
use crate::scrape::engine::{scrape_city, write_raw_csv, ScrapeRequest};
use crate::scrape::fetcher::Fetcher;
use crate::scrape::subdivide::SubdivisionCache;
use chrono::{Datelike, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::PgPool;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_ATTEMPTS_BEFORE_PERMANENT: i32 = 3;

/// Maps a city to a raw CSV already on disk, used when `skip_scraping` is
/// requested so a run can re-enrich without re-scraping.
pub type ScrapeManifest = HashMap<Uuid, PathBuf>;

#[derive(Clone)]
pub struct Orchestrator {
    pool: PgPool,
    address_api: Arc<AddressApiClient>,
    dpe_api: Arc<DpeApiClient>,
    market_fetcher: Arc<dyn crate::city_price::MarketFetcher>,
    scrape_fetcher: Arc<dyn Fetcher>,
    email: Arc<dyn EmailSender>,
    config: Arc<Config>,
}

impl Orchestrator {
    pub fn new(
        pool: PgPool,
        address_api: Arc<AddressApiClient>,
        dpe_api: Arc<DpeApiClient>,
        market_fetcher: Arc<dyn crate::city_price::MarketFetcher>,
        scrape_fetcher: Arc<dyn Fetcher>,
        email: Arc<dyn EmailSender>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            pool,
            address_api,
            dpe_api,
            market_fetcher,
            scrape_fetcher,
            email,
            config,
        }
    }

    /// Validates the client, returns the ID of an existing active job if
    /// one is already running, otherwise creates one and spawns its
    /// background execution.
    pub async fn submit(&self, client_id: Uuid) -> Result<Uuid, PipelineError> {
        let client = db::clients::get(&self.pool, client_id)
            .await?
            .ok_or_else(|| PipelineError::PermanentBusiness(format!("client {client_id} not found or inactive")))?;
        client
            .validate_for_processing()
            .map_err(PipelineError::PermanentBusiness)?;

        let (job, created) = db::create_or_get_active(&self.pool, client_id).await?;
        if created {
            let orchestrator = self.clone();
            let job_id = job.id;
            tokio::spawn(async move {
                orchestrator.run_job(job_id).await;
            });
        }
        Ok(job.id)
    }

    /// Jobs waiting on backoff whose `next_attempt` has elapsed; bumps each
    /// to its next attempt and runs it inline. Returns `(processed, failed)`.
    pub async fn drain_retry_queue(&self) -> Result<(usize, usize), PipelineError> {
        let due = db::due_for_retry(&self.pool).await?;
        let mut processed = 0usize;
        let mut failed = 0usize;

        for job in due {
            db::bump_attempt_and_mark_processing(&self.pool, job.id).await?;
            match self.run_job(job.id).await {
                true => processed += 1,
                false => failed += 1,
            }
        }
        Ok((processed, failed))
    }

    /// Runs one job to completion, updating its row with the outcome.
    /// Returns `true` if the job ended `completed`, `false` otherwise —
    /// never propagates the business-level error, since that error is
    /// recorded on the job itself.
    pub async fn run_job(&self, job_id: Uuid) -> bool {
        self.run_job_with_manifest(job_id, None).await
    }

    pub async fn run_job_with_manifest(&self, job_id: Uuid, manifest: Option<ScrapeManifest>) -> bool {
        let job = match db::jobs::get(&self.pool, job_id).await {
            Ok(Some(j)) => j,
            Ok(None) => {
                error!(%job_id, "run_job: job not found");
                return false;
            }
            Err(e) => {
                error!(%job_id, error = %e, "run_job: failed to load job");
                return false;
            }
        };

        if let Err(e) = db::mark_processing(&self.pool, job_id).await {
            error!(%job_id, error = %e, "run_job: failed to mark processing");
            return false;
        }

        match self.run_job_inner(&job, manifest).await {
            Ok(_) => {
                if let Err(e) = db::mark_completed(&self.pool, job_id).await {
                    error!(%job_id, error = %e, "run_job: failed to mark completed");
                    return false;
                }
                info!(%job_id, "run_job: completed");
                true
            }
            Err(e) => {
                self.handle_failure(&job, &e).await;
                false
            }
        }
    }

    async fn handle_failure(&self, job: &Job, error: &PipelineError) {
        let message = error.to_string();
        let permanent = PipelineError::is_permanent_message(&message)
            || job.attempt_count >= MAX_ATTEMPTS_BEFORE_PERMANENT;

        if permanent {
            if let Err(e) = db::mark_failed_permanent(&self.pool, job.id, &message).await {
                error!(job_id = %job.id, error = %e, "run_job: failed to mark failed_permanent");
                return;
            }
            warn!(job_id = %job.id, error = message, "run_job: failed permanently");
            if let Err(e) = self.email.send_cto_alert(job, &message).await {
                warn!(job_id = %job.id, error = %e, "run_job: failed to notify CTO");
            }
        } else if let Err(e) =
            db::mark_failed_retryable(&self.pool, job.id, job.attempt_count, &message).await
        {
            error!(job_id = %job.id, error = %e, "run_job: failed to mark retryable");
        } else {
            warn!(job_id = %job.id, attempt = job.attempt_count, error = message, "run_job: scheduled for retry");
        }
    }

    /// The actual business logic: refresh stale cities, scrape+enrich each
    /// chosen city, assign, and notify. Returns the number of addresses
    /// assigned on success.
    async fn run_job_inner(
        &self,
        job: &Job,
        manifest: Option<ScrapeManifest>,
    ) -> Result<usize, PipelineError> {
        let client = db::clients::get(&self.pool, job.client_id)
            .await?
            .ok_or_else(|| {
                PipelineError::PermanentBusiness(format!("client {} not found or inactive", job.client_id))
            })?;
        client
            .validate_for_processing()
            .map_err(PipelineError::PermanentBusiness)?;

        let cities = db::get_by_ids(&self.pool, &client.chosen_cities).await?;
        let work_dir = self.config.raw_csv_dir.join(job.id.to_string());
        std::fs::create_dir_all(&work_dir)?;

        let city_scraper = CityDataScraper::new(self.address_api.as_ref(), self.market_fetcher.as_ref());

        for city in &cities {
            let raw_csv = match manifest.as_ref().and_then(|m| m.get(&city.id)) {
                Some(path) => path.clone(),
                None => {
                    let outcome = self.scrape_one_city(city, &client).await?;
                    let path = work_dir.join(format!("{}_raw.csv", city.id));
                    write_raw_csv(&path, &city.name, &outcome.cards)?;
                    path
                }
            };

            let rows_in = count_csv_rows(&raw_csv).unwrap_or(0);
            let stage_result = self
                .enrich_one_city(job.id, city.id, &work_dir, &raw_csv, &city_scraper)
                .await;

            match stage_result {
                Ok(rows_out) => {
                    let _ = db::ingestion_runs::insert(
                        &self.pool,
                        db::ingestion_runs::NewIngestionRun {
                            job_id: job.id,
                            city_id: city.id,
                            stage_reached: 7,
                            rows_in: rows_in as i32,
                            rows_out: rows_out as i32,
                            error_message: None,
                        },
                    )
                    .await;
                }
                Err(e) => {
                    let _ = db::ingestion_runs::insert(
                        &self.pool,
                        db::ingestion_runs::NewIngestionRun {
                            job_id: job.id,
                            city_id: city.id,
                            stage_reached: 0,
                            rows_in: rows_in as i32,
                            rows_out: 0,
                            error_message: Some(e.to_string()),
                        },
                    )
                    .await;
                    return Err(e);
                }
            }
        }

        let mut rng = StdRng::from_entropy();
        let assignment_outcome =
            assignment::assign(&self.pool, &client, client.addresses_per_report, &mut rng).await?;

        if !assignment_outcome.assigned.is_empty() {
            if let Err(e) = self
                .email
                .send_assignment_notification(&client, &assignment_outcome.assigned)
                .await
            {
                warn!(client_id = %client.id, error = %e, "run_job: assignment email failed");
            }
        }

        Ok(assignment_outcome.assigned.len())
    }

    async fn scrape_one_city(
        &self,
        city: &crate::domain::City,
        client: &Client,
    ) -> Result<crate::scrape::engine::ScrapeOutcome, PipelineError> {
        let divider = GeoDivider::new((*self.address_api).clone());
        let cache = SubdivisionCache::default();

        let today = Utc::now().date_naive();
        let start_month = NaiveDate::from_ymd_opt(today.year() - 8, today.month(), 1).unwrap_or(today);
        let end_month = today;

        let request = ScrapeRequest {
            city_name: &city.name,
            postal_code: &city.postal_code,
            property_types: client.property_type_preferences.clone(),
            start_month,
            end_month,
        };

        scrape_city(&divider, self.scrape_fetcher.as_ref(), &cache, &request).await
    }

    async fn enrich_one_city(
        &self,
        _job_id: Uuid,
        city_id: Uuid,
        work_dir: &Path,
        raw_csv: &Path,
        city_scraper: &CityDataScraper<'_>,
    ) -> Result<usize, PipelineError> {
        let city_work_dir = work_dir.join(city_id.to_string());
        let deps = MachineDeps {
            pool: &self.pool,
            address_api: self.address_api.as_ref(),
            dpe_api: self.dpe_api.as_ref(),
            city_data_scraper: city_scraper,
            original_bbox: None::<OriginalBbox>,
            distance_threshold_km: None,
        };

        let outcome = machine::run(&deps, &city_work_dir, raw_csv, 1, 7, false).await?;
        Ok(outcome
            .persisted
            .map(|p| p.inserted + p.skipped_duplicate)
            .unwrap_or(0))
    }
}

fn count_csv_rows(path: &Path) -> Option<usize> {
    let mut reader = csv::ReaderBuilder::new().from_path(path).ok()?;
    Some(reader.records().count())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_threshold_matches_backoff_cap() {
        assert_eq!(MAX_ATTEMPTS_BEFORE_PERMANENT, 3);
    }
}
