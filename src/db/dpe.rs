use crate::domain::DpeClass;
use crate::error::PipelineError;
use chrono::{Datelike, NaiveDate};
use sqlx::PgPool;
use uuid::Uuid;

pub struct NewDpe {
    pub address_id: Uuid,
    pub construction_year: Option<i32>,
    pub dpe_date: Option<NaiveDate>,
    pub energy_class: Option<DpeClass>,
    pub ges_class: Option<DpeClass>,
    pub dpe_number: Option<String>,
}

/// Upserts on `address_id` (one certificate per address): construction
/// year is range-validated, missing classes fall back to `N`, and a
/// missing certificate number gets a synthetic `AUTO-<address prefix>`.
pub async fn upsert_dpe(pool: &PgPool, new: NewDpe) -> Result<Uuid, PipelineError> {
    let current_year = chrono::Utc::now().year_ce().1 as i32;
    let construction_year = new
        .construction_year
        .filter(|&y| (1800..=current_year).contains(&y));

    let dpe_date = new.dpe_date.unwrap_or_else(|| chrono::Utc::now().date_naive());
    let energy_class = new.energy_class.unwrap_or(DpeClass::N);
    let ges_class = new.ges_class.unwrap_or(DpeClass::N);
    let dpe_number = new.dpe_number.unwrap_or_else(|| {
        format!("AUTO-{}", &new.address_id.simple().to_string()[..8])
    });

    let id = Uuid::new_v4();
    let row: (Uuid,) = sqlx::query_as(
        "INSERT INTO dpe (id, address_id, construction_year, dpe_date, energy_class, \
                           ges_class, dpe_number) \
         VALUES ($1,$2,$3,$4,$5,$6,$7) \
         ON CONFLICT (address_id) DO UPDATE SET \
            construction_year = EXCLUDED.construction_year, \
            dpe_date = EXCLUDED.dpe_date, \
            energy_class = EXCLUDED.energy_class, \
            ges_class = EXCLUDED.ges_class, \
            dpe_number = EXCLUDED.dpe_number \
         RETURNING id",
    )
    .bind(id)
    .bind(new.address_id)
    .bind(construction_year)
    .bind(dpe_date)
    .bind(energy_class)
    .bind(ges_class)
    .bind(&dpe_number)
    .fetch_one(pool)
    .await?;
    Ok(row.0)
}
