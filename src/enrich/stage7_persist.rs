//! Stage 7: the persistence boundary. Every row that makes it this far gets
//! either inserted as a new address (plus a DPE row, if matched) or
//! resolved to an existing address when its `source_url` was already seen —
//! the duplicate-URL invariant the whole pipeline exists to protect.

use crate::db;
use crate::enrich::record::EnrichmentRecord;
use crate::error::PipelineError;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::{info, warn};
use uuid::Uuid;

const BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistStatus {
    Inserted,
    SkippedDuplicate,
    Dropped,
}

pub struct PersistRow {
    pub source_url: String,
    pub address_id: Option<Uuid>,
    pub status: PersistStatus,
}

pub struct PersistOutcome {
    pub rows: Vec<PersistRow>,
    pub inserted: usize,
    pub skipped_duplicate: usize,
    pub dropped: usize,
}

pub async fn run(
    pool: &PgPool,
    records: Vec<EnrichmentRecord>,
) -> Result<PersistOutcome, PipelineError> {
    let mut rows = Vec::with_capacity(records.len());
    let mut inserted = 0usize;
    let mut skipped_duplicate = 0usize;
    let mut dropped = 0usize;

    for chunk in records.chunks(BATCH_SIZE) {
        let urls: Vec<String> = chunk.iter().map(|rec| rec.source_url.clone()).collect();
        let existing_urls = db::find_existing_source_urls(pool, &urls).await?;

        for rec in chunk {
            match persist_one(pool, rec, &existing_urls).await {
                Ok(row) => {
                    match row.status {
                        PersistStatus::Inserted => inserted += 1,
                        PersistStatus::SkippedDuplicate => skipped_duplicate += 1,
                        PersistStatus::Dropped => dropped += 1,
                    }
                    rows.push(row);
                }
                Err(e) => return Err(e),
            }
        }
    }

    info!(inserted, skipped_duplicate, dropped, "stage 7 persistence complete");
    Ok(PersistOutcome {
        rows,
        inserted,
        skipped_duplicate,
        dropped,
    })
}

/// `existing_urls` is the batch's pre-fetched set of source URLs already in
/// the table; it only needs a follow-up lookup to resolve the existing row's
/// id. A URL absent from the set goes straight to `insert_address`, whose own
/// pre-check and unique-violation recovery still catch the residual race
/// against a concurrent writer.
async fn persist_one(
    pool: &PgPool,
    rec: &EnrichmentRecord,
    existing_urls: &HashSet<String>,
) -> Result<PersistRow, PipelineError> {
    let (Some(city_id), Some(department), Some(sale_date), Some(property_type)) =
        (rec.city_id, rec.department.clone(), rec.sale_date, rec.property_type)
    else {
        warn!(
            address = rec.address_raw,
            "stage 7: dropped row missing a required field (city_id/department/sale_date/property_type)"
        );
        return Ok(PersistRow {
            source_url: rec.source_url.clone(),
            address_id: None,
            status: PersistStatus::Dropped,
        });
    };
    if rec.address_raw.is_empty() {
        return Ok(PersistRow {
            source_url: rec.source_url.clone(),
            address_id: None,
            status: PersistStatus::Dropped,
        });
    }

    if existing_urls.contains(&rec.source_url) {
        let existing_id = db::find_by_source_url(pool, &rec.source_url).await?;
        return Ok(PersistRow {
            source_url: rec.source_url.clone(),
            address_id: existing_id,
            status: PersistStatus::SkippedDuplicate,
        });
    }

    let address_id = db::insert_address(
        pool,
        db::NewAddress {
            city_id,
            department,
            address_raw: rec.address_raw.clone(),
            sale_date,
            property_type,
            surface: rec.surface.unwrap_or(0.0).max(0.0) as i32,
            rooms: rec.rooms.unwrap_or(0).max(0),
            price: rec.price,
            estimated_price: rec.estimated_price,
            latitude: rec.latitude,
            longitude: rec.longitude,
            source_url: rec.source_url.clone(),
        },
    )
    .await?;

    if has_dpe_fields(rec) {
        db::upsert_dpe(
            pool,
            db::NewDpe {
                address_id,
                construction_year: rec.construction_year,
                dpe_date: rec.dpe_date,
                energy_class: rec.dpe_energy_class,
                ges_class: rec.dpe_ges_class.as_deref().map(crate::domain::DpeClass::parse),
                dpe_number: rec.dpe_number.clone(),
            },
        )
        .await?;
    }

    Ok(PersistRow {
        source_url: rec.source_url.clone(),
        address_id: Some(address_id),
        status: PersistStatus::Inserted,
    })
}

fn has_dpe_fields(rec: &EnrichmentRecord) -> bool {
    rec.dpe_number.is_some()
        || rec.dpe_energy_class.is_some()
        || rec.dpe_ges_class.is_some()
        || rec.construction_year.is_some()
}
