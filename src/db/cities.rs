use crate::domain::City;
use crate::error::PipelineError;
use sqlx::PgPool;
use uuid::Uuid;

/// Case-insensitive lookup, since scraped city names and DB rows can drift
/// in casing/accents independently of normalization upstream.
pub async fn get_by_names(pool: &PgPool, names: &[String]) -> Result<Vec<City>, PipelineError> {
    if names.is_empty() {
        return Ok(Vec::new());
    }
    let upper: Vec<String> = names.iter().map(|n| n.to_uppercase()).collect();
    let rows = sqlx::query_as::<_, City>(
        "SELECT id, name, postal_code, insee_code, department, region, \
                house_price_avg, apartment_price_avg, last_scraped \
         FROM cities WHERE upper(name) = ANY($1)",
    )
    .bind(&upper)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub struct NewCity {
    pub name: String,
    pub postal_code: String,
    pub insee_code: String,
    pub department: String,
}

/// Upserts on the natural key (`insee_code`). A resolved city may already
/// exist if two concurrent jobs resolve the same town.
pub async fn upsert(pool: &PgPool, city: NewCity) -> Result<City, PipelineError> {
    let row = sqlx::query_as::<_, City>(
        "INSERT INTO cities (id, name, postal_code, insee_code, department) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT (insee_code) DO UPDATE SET name = EXCLUDED.name \
         RETURNING id, name, postal_code, insee_code, department, region, \
                   house_price_avg, apartment_price_avg, last_scraped",
    )
    .bind(Uuid::new_v4())
    .bind(&city.name)
    .bind(&city.postal_code)
    .bind(&city.insee_code)
    .bind(&city.department)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn get_by_ids(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<City>, PipelineError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = sqlx::query_as::<_, City>(
        "SELECT id, name, postal_code, insee_code, department, region, \
                house_price_avg, apartment_price_avg, last_scraped \
         FROM cities WHERE id = ANY($1)",
    )
    .bind(ids)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Cities due for a market-price refresh: either never scraped or last
/// scraped over a year ago.
pub async fn stale_among(pool: &PgPool, ids: &[Uuid]) -> Result<Vec<City>, PipelineError> {
    let all = get_by_ids(pool, ids).await?;
    let now = chrono::Utc::now();
    Ok(all.into_iter().filter(|c| c.is_stale(now)).collect())
}

pub async fn update_market_prices(
    pool: &PgPool,
    city_id: Uuid,
    house_price_avg: Option<i64>,
    apartment_price_avg: Option<i64>,
) -> Result<(), PipelineError> {
    sqlx::query(
        "UPDATE cities SET house_price_avg = $2, apartment_price_avg = $3, last_scraped = now() \
         WHERE id = $1",
    )
    .bind(city_id)
    .bind(house_price_avg)
    .bind(apartment_price_avg)
    .execute(pool)
    .await?;
    Ok(())
}
