//! Component H: assigns a bounded, weighted-random sample of eligible
//! properties to a client. Eligibility is a 6-to-8-year-old sale in one of
//! the client's chosen cities/property types that isn't already assigned
//! to them; the bias toward older sales is implemented as a linear weight
//! over the oldest-first ordering, sampled without replacement.

use crate::db;
use crate::domain::{Address, Client};
use crate::error::PipelineError;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::Rng;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

pub struct AssignmentOutcome {
    pub assigned: Vec<Address>,
}

/// Assigns up to `count` addresses to `client`, using `rng` for the
/// weighted draw. Callers that need reproducible output pass a
/// `StdRng::seed_from_u64`-constructed RNG; production code seeds from
/// entropy.
pub async fn assign(
    pool: &PgPool,
    client: &Client,
    count: i32,
    rng: &mut StdRng,
) -> Result<AssignmentOutcome, PipelineError> {
    let today = Utc::now().date_naive();
    let (lower, upper) = Address::assignment_window_bounds(today);

    let mut candidates = db::addresses_for_client_window(
        pool,
        client.id,
        &client.chosen_cities,
        &client.property_type_preferences,
        lower,
        upper,
    )
    .await?;

    // Belt-and-suspenders: re-check the window in Rust against the same
    // bounds the query used, so a future change to the SQL filter can't
    // silently widen who gets assigned.
    candidates.retain(|a| Address::in_assignment_window(a.sale_date, today));

    if candidates.is_empty() {
        return Ok(AssignmentOutcome { assigned: Vec::new() });
    }

    // Oldest first; (sale_date, address_id) keeps the sort stable across
    // reruns rather than depending on whatever order the query returned.
    candidates.sort_by(|a, b| (a.sale_date, a.id).cmp(&(b.sale_date, b.id)));

    let chosen = weighted_sample_without_replacement(candidates, count.max(0) as usize, rng);

    let send_date = Utc::now();
    for address in &chosen {
        db::assign(pool, client.id, address.id, send_date).await?;
    }

    info!(
        client_id = %client.id,
        assigned = chosen.len(),
        "assignment engine: addresses assigned"
    );
    Ok(AssignmentOutcome { assigned: chosen })
}

/// Assigns weight `N - i` to the `i`-th oldest candidate (so the oldest
/// sale has the highest weight), then repeatedly draws an index
/// proportional to its remaining weight and removes it, `min(count, N)`
/// times.
fn weighted_sample_without_replacement(
    mut pool: Vec<Address>,
    count: usize,
    rng: &mut StdRng,
) -> Vec<Address> {
    let n = pool.len();
    let mut weights: Vec<i64> = (0..n).map(|i| (n - i) as i64).collect();
    let take = count.min(n);
    let mut chosen = Vec::with_capacity(take);

    for _ in 0..take {
        let total: i64 = weights.iter().sum();
        if total <= 0 {
            break;
        }
        let mut draw = rng.gen_range(0..total);
        let mut pick = 0usize;
        for (i, &w) in weights.iter().enumerate() {
            if draw < w {
                pick = i;
                break;
            }
            draw -= w;
        }
        chosen.push(pool.remove(pick));
        weights.remove(pick);
    }

    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PropertyType;
    use chrono::NaiveDate;
    use rand::SeedableRng;

    fn address(id: Uuid, sale_date: NaiveDate) -> Address {
        Address {
            id,
            city_id: Uuid::nil(),
            department: "75".into(),
            raw_address: "1 RUE FOO".into(),
            sale_date,
            property_type: PropertyType::House,
            surface: 80,
            rooms: 3,
            price: 300_000,
            estimated_current_price: None,
            latitude: None,
            longitude: None,
            source_url: format!("https://example.com/{id}"),
        }
    }

    #[test]
    fn fewer_candidates_than_requested_returns_all_of_them_no_padding() {
        let mut rng = StdRng::seed_from_u64(42);
        let pool = vec![
            address(Uuid::new_v4(), NaiveDate::from_ymd_opt(2019, 1, 1).unwrap()),
            address(Uuid::new_v4(), NaiveDate::from_ymd_opt(2019, 2, 1).unwrap()),
        ];
        let chosen = weighted_sample_without_replacement(pool, 5, &mut rng);
        assert_eq!(chosen.len(), 2);
    }

    #[test]
    fn never_picks_the_same_address_twice() {
        let mut rng = StdRng::seed_from_u64(7);
        let pool: Vec<Address> = (0..20)
            .map(|i| address(Uuid::new_v4(), NaiveDate::from_ymd_opt(2018, 1, 1).unwrap() + chrono::Duration::days(i)))
            .collect();
        let chosen = weighted_sample_without_replacement(pool, 10, &mut rng);
        let mut ids: Vec<Uuid> = chosen.iter().map(|a| a.id).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }

    #[test]
    fn fixed_seed_is_deterministic() {
        let pool_a: Vec<Address> = (0..10)
            .map(|i| address(
                Uuid::from_u128(i as u128),
                NaiveDate::from_ymd_opt(2018, 1, 1).unwrap() + chrono::Duration::days(i as i64),
            ))
            .collect();
        let pool_b = pool_a.clone();

        let mut rng_a = StdRng::seed_from_u64(99);
        let mut rng_b = StdRng::seed_from_u64(99);
        let chosen_a = weighted_sample_without_replacement(pool_a, 4, &mut rng_a);
        let chosen_b = weighted_sample_without_replacement(pool_b, 4, &mut rng_b);

        let ids_a: Vec<Uuid> = chosen_a.iter().map(|a| a.id).collect();
        let ids_b: Vec<Uuid> = chosen_b.iter().map(|a| a.id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn zero_count_assigns_nothing() {
        let mut rng = StdRng::seed_from_u64(1);
        let pool = vec![address(Uuid::new_v4(), NaiveDate::from_ymd_opt(2018, 1, 1).unwrap())];
        let chosen = weighted_sample_without_replacement(pool, 0, &mut rng);
        assert!(chosen.is_empty());
    }
}
