//! Component F: city-data scraper. Resolves a municipality's INSEE code,
//! department, and region via the address API, then drives a browser to the
//! listings site's market page to read off its headline average prices.
//! Reused by both the enrichment stage machine (stage 5) and the job
//! orchestrator's pre-scrape staleness refresh.

use crate::address_api::AddressApiClient;
use crate::domain::City;
use crate::error::PipelineError;
use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator};
use std::time::Duration;
use tracing::warn;

const NAV_TIMEOUT: Duration = Duration::from_secs(60);
const MARKET_URL_BASE: &str = "https://www.immo-data.fr/explorateur/prix-immobilier";

/// The two headline figures the market page publishes.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarketPrices {
    pub house_price_avg: Option<i64>,
    pub apartment_price_avg: Option<i64>,
}

#[async_trait]
pub trait MarketFetcher: Send + Sync {
    async fn fetch_market_prices(
        &self,
        city_name: &str,
        postal_code: &str,
    ) -> Result<MarketPrices, PipelineError>;
}

/// Drives the market page the same way the listings fetcher drives the
/// search page: one browser session per call, no shared state to bleed
/// across cities.
pub struct FantocciniMarketFetcher {
    webdriver_url: String,
}

impl FantocciniMarketFetcher {
    pub fn new(webdriver_url: impl Into<String>) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
        }
    }

    async fn scrape_page(&self, client: &Client, url: &str) -> Result<MarketPrices, PipelineError> {
        tokio::time::timeout(NAV_TIMEOUT, client.goto(url))
            .await
            .map_err(|_| PipelineError::Transient(format!("navigation timed out: {url}")))?
            .map_err(|e| PipelineError::Transient(format!("navigation failed: {e}")))?;

        let house_price_avg = read_headline_price(client, "div[data-cy='price-houses']").await;
        let apartment_price_avg = read_headline_price(client, "div[data-cy='price-apartments']").await;

        Ok(MarketPrices {
            house_price_avg,
            apartment_price_avg,
        })
    }
}

async fn read_headline_price(client: &Client, selector: &str) -> Option<i64> {
    let element = client.find(Locator::Css(selector)).await.ok()?;
    let text = element.text().await.ok()?;
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

#[async_trait]
impl MarketFetcher for FantocciniMarketFetcher {
    async fn fetch_market_prices(
        &self,
        city_name: &str,
        postal_code: &str,
    ) -> Result<MarketPrices, PipelineError> {
        let client = ClientBuilder::native()
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| PipelineError::Transient(format!("webdriver connect failed: {e}")))?;

        let url = format!(
            "{MARKET_URL_BASE}/{}-{}",
            slugify(city_name),
            postal_code
        );
        let result = self.scrape_page(&client, &url).await;
        let _ = client.close().await;
        result
    }
}

fn slugify(name: &str) -> String {
    name.to_lowercase().replace(' ', "-")
}

/// Test double that returns a fixed response regardless of input.
pub struct FixedMarketFetcher(pub MarketPrices);

#[async_trait]
impl MarketFetcher for FixedMarketFetcher {
    async fn fetch_market_prices(
        &self,
        _city_name: &str,
        _postal_code: &str,
    ) -> Result<MarketPrices, PipelineError> {
        Ok(self.0)
    }
}

/// Outcome of resolving + scraping one city's market data.
pub struct CityDataOutcome {
    pub insee_code: Option<String>,
    pub department: Option<String>,
    pub region: Option<String>,
    pub house_price_avg: Option<i64>,
    pub apartment_price_avg: Option<i64>,
    pub error_message: Option<String>,
}

impl CityDataOutcome {
    pub fn is_ok(&self) -> bool {
        self.error_message.is_none()
    }
}

pub struct CityDataScraper<'a> {
    address_api: &'a AddressApiClient,
    market_fetcher: &'a dyn MarketFetcher,
}

impl<'a> CityDataScraper<'a> {
    pub fn new(address_api: &'a AddressApiClient, market_fetcher: &'a dyn MarketFetcher) -> Self {
        Self {
            address_api,
            market_fetcher,
        }
    }

    /// `(city_name, postal_code, optional insee_code)` in, a fully resolved
    /// city-data row out. Never returns `Err` — failures are carried in
    /// `error_message` so a batch refresh can skip one bad city without
    /// aborting the rest.
    pub async fn fetch(
        &self,
        city_name: &str,
        postal_code: &str,
        known_insee_code: Option<&str>,
    ) -> CityDataOutcome {
        let resolved = if known_insee_code.is_none() {
            match self.address_api.resolve_municipality(city_name, postal_code).await {
                Ok(Some(info)) => Some(info),
                Ok(None) => None,
                Err(e) => {
                    warn!(city_name, error = %e, "city data: municipality resolution failed");
                    None
                }
            }
        } else {
            None
        };

        let insee_code = known_insee_code
            .map(str::to_string)
            .or_else(|| resolved.as_ref().and_then(|r| r.citycode.clone()));
        let department = insee_code.as_deref().map(City::department_from_insee);
        let region = resolved.as_ref().and_then(|r| r.region.clone());

        match self.market_fetcher.fetch_market_prices(city_name, postal_code).await {
            Ok(prices) => CityDataOutcome {
                insee_code,
                department,
                region,
                house_price_avg: prices.house_price_avg,
                apartment_price_avg: prices.apartment_price_avg,
                error_message: None,
            },
            Err(e) => CityDataOutcome {
                insee_code,
                department,
                region,
                house_price_avg: None,
                apartment_price_avg: None,
                error_message: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_fetcher_returns_outcome_without_error() {
        let address_api = AddressApiClient::new("http://unused.invalid");
        let market = FixedMarketFetcher(MarketPrices {
            house_price_avg: Some(300_000),
            apartment_price_avg: Some(200_000),
        });
        let scraper = CityDataScraper::new(&address_api, &market);
        let outcome = scraper.fetch("Lyon", "69001", Some("69123")).await;
        assert!(outcome.is_ok());
        assert_eq!(outcome.house_price_avg, Some(300_000));
        assert_eq!(outcome.department, Some("69".to_string()));
    }

    #[test]
    fn slugify_replaces_spaces() {
        assert_eq!(slugify("Saint Etienne"), "saint-etienne");
    }
}
