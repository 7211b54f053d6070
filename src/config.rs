//! Process configuration, loaded once from the environment at process init
//! and shared immutably (`Arc<Config>`) into every component.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub api_key: String,

    pub smtp_server: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: String,
    pub email_sender: String,
    pub cto_email: String,

    pub scraper_headless: bool,
    pub scraper_timeout_secs: u64,
    pub scraper_max_retries: u32,
    pub scraper_delay_secs: u64,

    pub geocoding_batch_size: usize,
    pub dpe_max_retries: u32,

    pub webdriver_url: String,

    pub raw_csv_dir: std::path::PathBuf,
    pub dpe_cache_dir: std::path::PathBuf,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Config {
            database_url: env::var("DATABASE_URL")
                .context("DATABASE_URL must be set")?,
            api_key: env::var("API_KEY").unwrap_or_else(|_| "dev-api-key".to_string()),

            smtp_server: env::var("SMTP_SERVER").unwrap_or_else(|_| "localhost".to_string()),
            smtp_port: env::var("SMTP_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(587),
            smtp_username: env::var("SMTP_USERNAME").unwrap_or_default(),
            smtp_password: env::var("SMTP_PASSWORD").unwrap_or_default(),
            email_sender: env::var("EMAIL_SENDER")
                .unwrap_or_else(|_| "no-reply@trackimmo.local".to_string()),
            cto_email: env::var("CTO_EMAIL").unwrap_or_else(|_| "cto@trackimmo.local".to_string()),

            scraper_headless: env::var("SCRAPER_HEADLESS")
                .ok()
                .map(|s| s == "true" || s == "1")
                .unwrap_or(true),
            scraper_timeout_secs: env::var("SCRAPER_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(60),
            scraper_max_retries: env::var("SCRAPER_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),
            scraper_delay_secs: env::var("SCRAPER_DELAY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(0),

            geocoding_batch_size: env::var("GEOCODING_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1000),
            dpe_max_retries: env::var("DPE_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(3),

            webdriver_url: env::var("WEBDRIVER_URL")
                .unwrap_or_else(|_| "http://localhost:4444".to_string()),

            raw_csv_dir: env::var("RAW_CSV_DIR")
                .unwrap_or_else(|_| "/tmp/trackimmo/raw".to_string())
                .into(),
            dpe_cache_dir: env::var("DPE_CACHE_DIR")
                .unwrap_or_else(|_| "/tmp/trackimmo/dpe_cache".to_string())
                .into(),
        })
    }

    pub fn scraper_timeout(&self) -> Duration {
        Duration::from_secs(self.scraper_timeout_secs)
    }
}
