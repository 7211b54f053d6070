//! `run-daily-updates` — the scheduler driver. Takes no arguments, reads
//! today's date, submits a job for every client due today (including the
//! month-end catch-up), sends tomorrow's notification-eve emails, then
//! drains the retry queue.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use trackimmo_backend::address_api::AddressApiClient;
use trackimmo_backend::city_price::FantocciniMarketFetcher;
use trackimmo_backend::config::Config;
use trackimmo_backend::dpe_api::DpeApiClient;
use trackimmo_backend::email::SmtpEmailSender;
use trackimmo_backend::orchestrator::Orchestrator;
use trackimmo_backend::scheduler;
use trackimmo_backend::scrape::fetcher::FantocciniFetcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(Config::from_env()?);
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;

    let address_api = Arc::new(AddressApiClient::default_client());
    let dpe_api = Arc::new(DpeApiClient::new(config.dpe_cache_dir.clone()));
    let market_fetcher = Arc::new(FantocciniMarketFetcher::new(config.webdriver_url.clone()));
    let scrape_fetcher = Arc::new(FantocciniFetcher::new(
        config.webdriver_url.clone(),
        10,
    ));
    let email: Arc<dyn trackimmo_backend::email::EmailSender> =
        Arc::new(SmtpEmailSender::from_config(&config)?);

    let orchestrator = Orchestrator::new(
        pool.clone(),
        address_api,
        dpe_api,
        market_fetcher,
        scrape_fetcher,
        email.clone(),
        config.clone(),
    );

    let today = chrono::Utc::now().date_naive();
    let report = scheduler::run_daily_tick(&pool, &orchestrator, &email, today).await?;

    tracing::info!(
        submitted = report.submitted.len(),
        eve_notified = report.eve_notified.len(),
        retry_processed = report.retry_processed,
        retry_failed = report.retry_failed,
        "run-daily-updates: tick complete"
    );

    Ok(())
}
