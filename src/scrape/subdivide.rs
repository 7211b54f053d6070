//! Adaptive subdivision: decides, from a fetched page's listing count and
//! observed prices, whether a search URL needs to be split into several
//! narrower ones to stay under the site's per-page result cap.

use crate::domain::PropertyType;
use crate::scrape::url_gen::{SearchUrl, GLOBAL_PRICE_CAP};
use std::collections::HashMap;
use tokio::sync::Mutex;

/// A listing count at or above this forces a split.
const SPLIT_THRESHOLD: usize = 99;
/// Target upper bound for a comfortably-sized result page.
const TARGET_MAX: usize = 99;
const TARGET_MIN: usize = 50;
const MAX_DIVISIONS: usize = 8;
const MIN_DIVISIONS: usize = 2;
const MIN_RANGE_FOR_SPLIT: f64 = 5000.0;
const FORCED_STEP_ON_TIGHT_RANGE: f64 = 1000.0;

/// Cache key: rectangle center rounded to 1e-3 degrees, the search period,
/// and the property-type-group label. Splits that already worked once for
/// one rectangle/period are very likely to work again for the neighbouring
/// tile in the same run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    lat_milli: i64,
    lon_milli: i64,
    period: String,
    group_label: String,
}

impl CacheKey {
    fn from_url(url: &SearchUrl) -> Self {
        Self {
            lat_milli: (url.rectangle.center_lat * 1000.0).round() as i64,
            lon_milli: (url.rectangle.center_lon * 1000.0).round() as i64,
            period: url.period.clone(),
            group_label: url.group_label.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    promoted_level: u8,
    success_count: u8,
}

/// Remembers which subdivision level worked for which (rectangle, period,
/// group) so that later URLs in the same area can jump straight to it
/// instead of re-discovering it one split at a time. Bounded LRU-ish: once
/// full, the oldest 100 entries are evicted to make room.
pub struct SubdivisionCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    order: Mutex<Vec<CacheKey>>,
    capacity: usize,
}

impl Default for SubdivisionCache {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl SubdivisionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            order: Mutex::new(Vec::new()),
            capacity,
        }
    }

    async fn record_success(&self, key: CacheKey, level: u8) {
        let mut entries = self.entries.lock().await;
        let mut order = self.order.lock().await;

        match entries.get_mut(&key) {
            Some(entry) if entry.promoted_level == level => {
                entry.success_count = entry.success_count.saturating_add(1);
            }
            _ => {
                entries.insert(
                    key.clone(),
                    CacheEntry {
                        promoted_level: level,
                        success_count: 1,
                    },
                );
                order.push(key);
                if order.len() > self.capacity {
                    let evict_count = 100.min(order.len());
                    for evicted in order.drain(0..evict_count) {
                        entries.remove(&evicted);
                    }
                }
            }
        }
    }

    async fn promoted_level(&self, key: &CacheKey) -> Option<u8> {
        let entries = self.entries.lock().await;
        entries
            .get(key)
            .filter(|e| e.success_count >= 2)
            .map(|e| e.promoted_level)
    }
}

/// Outcome of evaluating one fetched URL: either it's fine as-is, or it
/// must be replaced by the returned children.
pub enum SubdivisionOutcome {
    Accept,
    Split(Vec<SearchUrl>),
}

/// Decides what to do with a URL given the number of cards the fetch found
/// and (when available) the observed sale prices on that page.
pub async fn evaluate(
    cache: &SubdivisionCache,
    url: &SearchUrl,
    card_count: usize,
    observed_prices: &[i64],
) -> SubdivisionOutcome {
    let key = CacheKey::from_url(url);

    if card_count < SPLIT_THRESHOLD {
        cache.record_success(key, url.subdivision_level).await;
        return SubdivisionOutcome::Accept;
    }

    if let Some(promoted) = cache.promoted_level(&key).await {
        if promoted > url.subdivision_level {
            let children = split_for_level(url, promoted, observed_prices, card_count);
            cache.record_success(key, promoted).await;
            return SubdivisionOutcome::Split(children);
        }
    }

    let next_level = match url.subdivision_level {
        0 if url.property_types.len() > 1 => 1,
        _ => 2,
    };
    let children = split_for_level(url, next_level, observed_prices, card_count);
    cache.record_success(key, next_level).await;
    SubdivisionOutcome::Split(children)
}

fn split_for_level(
    url: &SearchUrl,
    target_level: u8,
    observed_prices: &[i64],
    card_count: usize,
) -> Vec<SearchUrl> {
    if target_level == 1 {
        split_by_type_group(url)
    } else {
        split_by_price(url, url.progressive_level + 1, observed_prices, card_count)
    }
}

/// Level 1: split a combined-type URL into a house bucket and a
/// land+commercial+other bucket, apartments kept separate since apartment
/// density tends to dominate dense urban rectangles.
fn split_by_type_group(url: &SearchUrl) -> Vec<SearchUrl> {
    let groups: Vec<(&str, Vec<PropertyType>)> = vec![
        ("house", vec![PropertyType::House]),
        ("apartment", vec![PropertyType::Apartment]),
        (
            "land_commercial_other",
            vec![
                PropertyType::Land,
                PropertyType::Commercial,
                PropertyType::Other,
            ],
        ),
    ];

    groups
        .into_iter()
        .filter(|(_, types)| types.iter().any(|t| url.property_types.contains(t)))
        .map(|(label, types)| {
            let kept: Vec<PropertyType> = types
                .into_iter()
                .filter(|t| url.property_types.contains(t))
                .collect();
            let new_url = SearchUrl::build_url(
                &url.rectangle,
                &url.period,
                &kept,
                url.min_price,
                url.max_price,
            );
            SearchUrl {
                url: new_url,
                rectangle: url.rectangle,
                period: url.period.clone(),
                property_types: kept,
                group_label: label.to_string(),
                min_price: url.min_price,
                max_price: url.max_price,
                subdivision_level: 1,
                progressive_level: 0,
            }
        })
        .collect()
}

fn split_by_price(
    url: &SearchUrl,
    progressive_level: u8,
    observed_prices: &[i64],
    card_count: usize,
) -> Vec<SearchUrl> {
    let range_min = url.min_price.unwrap_or(0) as f64;
    let range_max = url.max_price.map(|p| p as f64).unwrap_or(GLOBAL_PRICE_CAP as f64);

    let num_divisions = choose_num_divisions(progressive_level, card_count, range_max - range_min);
    let bounds = price_range_bounds(range_min, range_max, num_divisions, observed_prices);

    bounds
        .windows(2)
        .enumerate()
        .map(|(i, w)| {
            let min_p = w[0].round() as i64;
            let is_last = i == bounds.len() - 2;
            let max_p = if is_last {
                url.max_price.unwrap_or(GLOBAL_PRICE_CAP)
            } else {
                w[1].round() as i64
            };
            let new_url = SearchUrl::build_url(
                &url.rectangle,
                &url.period,
                &url.property_types,
                Some(min_p),
                Some(max_p),
            );
            SearchUrl {
                url: new_url,
                rectangle: url.rectangle,
                period: url.period.clone(),
                property_types: url.property_types.clone(),
                group_label: url.group_label.clone(),
                min_price: Some(min_p),
                max_price: Some(max_p),
                subdivision_level: 2,
                progressive_level,
            }
        })
        .collect()
}

fn choose_num_divisions(progressive_level: u8, card_count: usize, range_width: f64) -> usize {
    if range_width < MIN_RANGE_FOR_SPLIT {
        return MIN_DIVISIONS;
    }

    let base_divisions = 2usize.saturating_pow(progressive_level as u32).max(MIN_DIVISIONS);
    let estimated_per_division = card_count as f64 / base_divisions as f64;

    if estimated_per_division < TARGET_MIN as f64 {
        (card_count / TARGET_MIN).max(MIN_DIVISIONS)
    } else if estimated_per_division > TARGET_MAX as f64 {
        (card_count / TARGET_MIN + 1).min(MAX_DIVISIONS)
    } else {
        base_divisions.min(MAX_DIVISIONS)
    }
}

/// Returns `num_divisions + 1` boundary values. Percentile splits (median,
/// quartiles) are used when enough samples are available and the division
/// count is small; equal-width ranges otherwise.
fn price_range_bounds(
    range_min: f64,
    range_max: f64,
    num_divisions: usize,
    observed_prices: &[i64],
) -> Vec<f64> {
    if range_max - range_min < MIN_RANGE_FOR_SPLIT {
        let step = FORCED_STEP_ON_TIGHT_RANGE;
        return vec![range_min, range_min + step, range_max.max(range_min + step)];
    }

    let mut bounds = if observed_prices.len() >= 20 && num_divisions <= 4 {
        percentile_bounds(range_min, range_max, num_divisions, observed_prices)
    } else {
        equal_bounds(range_min, range_max, num_divisions)
    };

    // Guarantee strictly increasing boundaries even when percentile
    // clustering collapses two adjacent cut points.
    for i in 1..bounds.len() {
        if bounds[i] <= bounds[i - 1] {
            bounds[i] = bounds[i - 1] + 1.0;
        }
    }
    bounds
}

fn equal_bounds(range_min: f64, range_max: f64, num_divisions: usize) -> Vec<f64> {
    let step = (range_max - range_min) / num_divisions as f64;
    (0..=num_divisions)
        .map(|i| range_min + step * i as f64)
        .collect()
}

fn percentile_bounds(
    range_min: f64,
    range_max: f64,
    num_divisions: usize,
    observed_prices: &[i64],
) -> Vec<f64> {
    let mut sorted: Vec<f64> = observed_prices.iter().map(|&p| p as f64).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let percentile = |p: f64| -> f64 {
        let idx = ((sorted.len() - 1) as f64 * p).round() as usize;
        sorted[idx]
    };

    let mut bounds = vec![range_min];
    match num_divisions {
        2 => bounds.push(percentile(0.5)),
        4 => {
            bounds.push(percentile(0.25));
            bounds.push(percentile(0.5));
            bounds.push(percentile(0.75));
        }
        _ => {
            for i in 1..num_divisions {
                bounds.push(percentile(i as f64 / num_divisions as f64));
            }
        }
    }
    bounds.push(range_max);
    bounds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Rectangle;

    fn rect() -> Rectangle {
        Rectangle {
            center_lat: 48.85,
            center_lon: 2.35,
            min_lat: 48.8,
            min_lon: 2.3,
            max_lat: 48.9,
            max_lon: 2.4,
            zoom: 12,
        }
    }

    fn base_url(subdivision_level: u8, types: Vec<PropertyType>) -> SearchUrl {
        SearchUrl {
            url: "https://example.test".to_string(),
            rectangle: rect(),
            period: "Mars 2023".to_string(),
            property_types: types,
            group_label: "all".to_string(),
            min_price: None,
            max_price: None,
            subdivision_level,
            progressive_level: 0,
        }
    }

    #[tokio::test]
    async fn under_threshold_is_accepted() {
        let cache = SubdivisionCache::default();
        let url = base_url(0, vec![PropertyType::House]);
        let outcome = evaluate(&cache, &url, 10, &[]).await;
        assert!(matches!(outcome, SubdivisionOutcome::Accept));
    }

    #[tokio::test]
    async fn multi_type_at_level_zero_splits_by_type() {
        let cache = SubdivisionCache::default();
        let url = base_url(0, vec![PropertyType::House, PropertyType::Apartment]);
        match evaluate(&cache, &url, 150, &[]).await {
            SubdivisionOutcome::Split(children) => {
                assert_eq!(children.len(), 2);
                assert!(children.iter().all(|c| c.subdivision_level == 1));
            }
            _ => panic!("expected split"),
        }
    }

    #[tokio::test]
    async fn single_type_over_threshold_splits_by_price() {
        let cache = SubdivisionCache::default();
        let url = base_url(0, vec![PropertyType::House]);
        match evaluate(&cache, &url, 150, &[]).await {
            SubdivisionOutcome::Split(children) => {
                assert!(children.len() >= 2);
                assert!(children.iter().all(|c| c.subdivision_level == 2));
                // Last child's upper bound is always the global cap.
                assert_eq!(children.last().unwrap().max_price, Some(GLOBAL_PRICE_CAP));
            }
            _ => panic!("expected split"),
        }
    }

    #[tokio::test]
    async fn tight_price_range_forces_minimum_step() {
        let cache = SubdivisionCache::default();
        let mut url = base_url(2, vec![PropertyType::House]);
        url.min_price = Some(100_000);
        url.max_price = Some(102_000);
        match evaluate(&cache, &url, 150, &[]).await {
            SubdivisionOutcome::Split(children) => {
                assert_eq!(children.len(), 2);
                assert_eq!(children[0].min_price, Some(100_000));
                assert_eq!(children[0].max_price, Some(101_000));
            }
            _ => panic!("expected split"),
        }
    }

    #[tokio::test]
    async fn cache_promotes_after_two_successes() {
        let cache = SubdivisionCache::default();
        let url = base_url(0, vec![PropertyType::House]);
        // First two splits teach the cache that price-splitting works here.
        evaluate(&cache, &url, 150, &[]).await;
        evaluate(&cache, &url, 150, &[]).await;
        let key = CacheKey::from_url(&url);
        assert!(cache.promoted_level(&key).await.is_some());
    }
}
