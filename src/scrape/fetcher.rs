//! Headless-browser fetching of listing cards from a rendered search page.

use crate::error::PipelineError;
use async_trait::async_trait;
use fantoccini::{Client, ClientBuilder, Locator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

const NAV_TIMEOUT: Duration = Duration::from_secs(60);
const SELECTOR_WAIT: Duration = Duration::from_secs(10);
const SELECTOR_POLL: Duration = Duration::from_millis(250);
const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_secs(2);

const RESULT_CARD_SELECTOR: &str = "div[data-cy='result-card']";

/// A single scraped listing, before any text normalization.
#[derive(Debug, Clone)]
pub struct RawListingCard {
    pub address_raw: String,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub price: Option<i64>,
    pub surface: Option<f64>,
    pub rooms: Option<i32>,
    pub sale_date_raw: Option<String>,
    pub property_type_raw: Option<String>,
    pub source_url: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<RawListingCard>, PipelineError>;
}

/// Drives a pool of WebDriver sessions behind a semaphore, one page
/// navigation per fetch so that a slow or crashed tab doesn't wedge other
/// in-flight fetches.
pub struct FantocciniFetcher {
    webdriver_url: String,
    semaphore: Arc<Semaphore>,
}

impl FantocciniFetcher {
    pub fn new(webdriver_url: impl Into<String>, max_concurrency: usize) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
        }
    }

    async fn fetch_once(&self, url: &str) -> Result<Vec<RawListingCard>, PipelineError> {
        let client = ClientBuilder::native()
            .connect(&self.webdriver_url)
            .await
            .map_err(|e| PipelineError::Transient(format!("webdriver connect failed: {e}")))?;

        let result = self.scrape_page(&client, url).await;
        let _ = client.close().await;
        result
    }

    async fn scrape_page(
        &self,
        client: &Client,
        url: &str,
    ) -> Result<Vec<RawListingCard>, PipelineError> {
        tokio::time::timeout(NAV_TIMEOUT, client.goto(url))
            .await
            .map_err(|_| PipelineError::Transient(format!("navigation timed out: {url}")))?
            .map_err(|e| PipelineError::Transient(format!("navigation failed: {e}")))?;

        let deadline = tokio::time::Instant::now() + SELECTOR_WAIT;
        loop {
            match client.find_all(Locator::Css(RESULT_CARD_SELECTOR)).await {
                Ok(elements) if !elements.is_empty() => break,
                Ok(_) if tokio::time::Instant::now() >= deadline => break,
                Ok(_) => sleep(SELECTOR_POLL).await,
                Err(e) => {
                    return Err(PipelineError::Transient(format!(
                        "selector lookup failed: {e}"
                    )))
                }
            }
        }

        let elements = client
            .find_all(Locator::Css(RESULT_CARD_SELECTOR))
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?;

        let mut cards = Vec::with_capacity(elements.len());
        for element in elements {
            if let Some(card) = parse_card_element(&element, url).await? {
                cards.push(card);
            }
        }
        Ok(cards)
    }
}

#[async_trait]
impl Fetcher for FantocciniFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<RawListingCard>, PipelineError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?;

        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match self.fetch_once(url).await {
                Ok(cards) => return Ok(cards),
                Err(e) => {
                    warn!(attempt, url, error = %e, "fetch attempt failed");
                    last_err = Some(e);
                    sleep(RETRY_BACKOFF * (attempt + 1)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| PipelineError::Transient("fetch failed".to_string())))
    }
}

const DATETIME_SELECTOR: &str = "[datetime]";

/// The card's sale date lives in a `datetime` attribute as a millisecond
/// Unix epoch, not in the visible text; falls back to scanning the card's
/// text for a DD/MM/YYYY-shaped line if the attribute is missing or
/// unparseable.
async fn extract_sale_date(element: &fantoccini::elements::Element) -> Option<String> {
    let dt_element = element.find(Locator::Css(DATETIME_SELECTOR)).await.ok()?;
    let raw = dt_element.attr("datetime").await.ok()??;
    format_epoch_millis(&raw)
}

fn format_epoch_millis(raw: &str) -> Option<String> {
    let millis: i64 = raw.trim().parse().ok()?;
    chrono::DateTime::from_timestamp_millis(millis).map(|dt| dt.format("%d/%m/%Y").to_string())
}

async fn parse_card_element(
    element: &fantoccini::elements::Element,
    source_url: &str,
) -> Result<Option<RawListingCard>, PipelineError> {
    let text = element
        .text()
        .await
        .map_err(|e| PipelineError::Transient(e.to_string()))?;

    if text.trim().is_empty() {
        return Ok(None);
    }

    let mut address_raw = String::new();
    let mut city = None;
    let mut postal_code = None;
    let mut price = None;
    let mut surface = None;
    let mut rooms = None;
    let mut sale_date_raw = extract_sale_date(element).await;
    let mut property_type_raw = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let lower = line.to_lowercase();
        if price.is_none() && line.contains('€') {
            price = parse_price(line);
        } else if surface.is_none() && lower.contains("m²") {
            surface = parse_surface(line);
        } else if rooms.is_none() && lower.contains("pièce") {
            rooms = parse_rooms(line);
        } else if sale_date_raw.is_none() && looks_like_date(line) {
            sale_date_raw = Some(line.to_string());
        } else if property_type_raw.is_none() && is_property_type_line(&lower) {
            property_type_raw = Some(line.to_string());
        } else if postal_code.is_none() && city.is_none() {
            if let Some((pc, c)) = parse_postal_and_city(line) {
                postal_code = Some(pc);
                city = Some(c);
            } else if address_raw.is_empty() {
                address_raw = line.to_string();
            }
        } else if address_raw.is_empty() {
            address_raw = line.to_string();
        }
    }

    if address_raw.is_empty() {
        debug!(source_url, "card skipped: no address line found");
        return Ok(None);
    }

    Ok(Some(RawListingCard {
        address_raw,
        city,
        postal_code,
        price,
        surface,
        rooms,
        sale_date_raw,
        property_type_raw,
        source_url: source_url.to_string(),
    }))
}

/// A card's city/postal-code line reads like `"75001 Paris"` — a 5-digit
/// postal code followed by the commune name on the same line.
fn parse_postal_and_city(line: &str) -> Option<(String, String)> {
    let mut chars = line.chars();
    let digits: String = chars.by_ref().take(5).collect();
    if digits.len() != 5 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let rest = chars.as_str().trim();
    if rest.is_empty() || rest.chars().next()?.is_ascii_digit() {
        return None;
    }
    Some((digits, rest.to_string()))
}

fn is_property_type_line(lower_line: &str) -> bool {
    const KEYWORDS: &[&str] = &[
        "maison", "appartement", "terrain", "local", "commerce", "immeuble",
    ];
    KEYWORDS.iter().any(|k| lower_line.contains(k))
}

fn parse_price(line: &str) -> Option<i64> {
    let digits: String = line.chars().filter(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn parse_surface(line: &str) -> Option<f64> {
    let digits: String = line
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == ',' || *c == '.')
        .collect();
    digits.replace(',', ".").parse().ok()
}

fn parse_rooms(line: &str) -> Option<i32> {
    let digits: String = line.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn looks_like_date(line: &str) -> bool {
    line.split('/').count() == 3 && line.chars().filter(|c| c.is_ascii_digit()).count() >= 6
}

/// Test double that replays a fixed script of responses instead of driving
/// a real browser; keyed by call order, not by URL, so tests can assert on
/// exactly which URLs were requested.
pub struct RecordingFetcher {
    responses: tokio::sync::Mutex<std::collections::VecDeque<Vec<RawListingCard>>>,
    pub requested_urls: tokio::sync::Mutex<Vec<String>>,
}

impl RecordingFetcher {
    pub fn new(responses: Vec<Vec<RawListingCard>>) -> Self {
        Self {
            responses: tokio::sync::Mutex::new(responses.into()),
            requested_urls: tokio::sync::Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Fetcher for RecordingFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<RawListingCard>, PipelineError> {
        self.requested_urls.lock().await.push(url.to_string());
        let mut responses = self.responses.lock().await;
        Ok(responses.pop_front().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn price_parses_thousands_separators() {
        assert_eq!(parse_price("310 000 €"), Some(310000));
    }

    #[test]
    fn surface_parses_decimal_comma() {
        assert_eq!(parse_surface("65,5 m²"), Some(65.5));
    }

    #[test]
    fn date_like_line_is_detected() {
        assert!(looks_like_date("14/03/2022"));
        assert!(!looks_like_date("Paris 15e"));
    }

    #[test]
    fn postal_and_city_parses_standard_line() {
        assert_eq!(
            parse_postal_and_city("75001 Paris"),
            Some(("75001".to_string(), "Paris".to_string()))
        );
        assert_eq!(parse_postal_and_city("12 Rue Foo"), None);
    }

    #[tokio::test]
    async fn recording_fetcher_replays_in_order() {
        let fetcher = RecordingFetcher::new(vec![vec![], vec![]]);
        fetcher.fetch("http://a").await.unwrap();
        fetcher.fetch("http://b").await.unwrap();
        let urls = fetcher.requested_urls.lock().await;
        assert_eq!(*urls, vec!["http://a".to_string(), "http://b".to_string()]);
    }
}
