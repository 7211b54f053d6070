//! Orchestrates the seven enrichment stages end to end, snapshotting the
//! record set to `stageN.csv` after each one so a crashed run can resume
//! from `start_stage` instead of re-scraping and re-geocoding from scratch.

use crate::address_api::AddressApiClient;
use crate::city_price::CityDataScraper;
use crate::dpe_api::DpeApiClient;
use crate::enrich::record::EnrichmentRecord;
use crate::enrich::stage3_geocode::OriginalBbox;
use crate::enrich::{stage1_normalize, stage2_city_resolve, stage3_geocode, stage4_dpe,
                     stage5_city_price, stage6_price_estimate, stage7_persist};
use crate::error::PipelineError;
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct Deps<'a> {
    pub pool: &'a PgPool,
    pub address_api: &'a AddressApiClient,
    pub dpe_api: &'a DpeApiClient,
    pub city_data_scraper: &'a CityDataScraper<'a>,
    pub original_bbox: Option<OriginalBbox>,
    pub distance_threshold_km: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct StageReport {
    pub stage: u8,
    pub rows_in: usize,
    pub rows_out: usize,
}

pub struct MachineOutcome {
    pub stage_reports: Vec<StageReport>,
    pub final_records: Vec<EnrichmentRecord>,
    pub persisted: Option<stage7_persist::PersistOutcome>,
}

/// Runs stages `start_stage..=end_stage` (1-indexed) over `input_csv`,
/// writing `<work_dir>/stage<N>.csv` after every stage so a later call can
/// resume with `start_stage` set past whichever stage last completed.
/// Intermediate files are deleted once superseded unless `debug` is set.
pub async fn run(
    deps: &Deps<'_>,
    work_dir: &Path,
    input_csv: &Path,
    start_stage: u8,
    end_stage: u8,
    debug: bool,
) -> Result<MachineOutcome, PipelineError> {
    std::fs::create_dir_all(work_dir)?;

    let mut records: Vec<EnrichmentRecord> = if start_stage <= 1 {
        Vec::new()
    } else {
        read_snapshot(&snapshot_path(work_dir, start_stage - 1))?
    };
    let mut stage_reports = Vec::new();
    let mut persisted = None;
    let mut prior_snapshot: Option<PathBuf> = if start_stage > 1 {
        Some(snapshot_path(work_dir, start_stage - 1))
    } else {
        None
    };

    if start_stage <= 1 && end_stage >= 1 {
        let outcome = stage1_normalize::run(input_csv)
            .map_err(|e| PipelineError::stage(1, e))?;
        records = outcome.records;
        stage_reports.push(StageReport {
            stage: 1,
            rows_in: outcome.rows_in,
            rows_out: outcome.rows_out,
        });
        prior_snapshot = snapshot_stage(work_dir, 1, &records, debug, prior_snapshot)?;
    }

    if start_stage <= 2 && end_stage >= 2 {
        let outcome = stage2_city_resolve::run(deps.pool, deps.address_api, records)
            .await
            .map_err(|e| PipelineError::stage(2, e))?;
        records = outcome.records;
        stage_reports.push(StageReport {
            stage: 2,
            rows_in: outcome.rows_in,
            rows_out: outcome.rows_out,
        });
        prior_snapshot = snapshot_stage(work_dir, 2, &records, debug, prior_snapshot)?;
    }

    if start_stage <= 3 && end_stage >= 3 {
        let outcome = stage3_geocode::run(
            deps.address_api,
            records,
            deps.original_bbox,
            deps.distance_threshold_km,
        )
        .await
        .map_err(|e| PipelineError::stage(3, e))?;
        records = outcome.records;
        stage_reports.push(StageReport {
            stage: 3,
            rows_in: outcome.rows_in,
            rows_out: outcome.rows_out,
        });
        prior_snapshot = snapshot_stage(work_dir, 3, &records, debug, prior_snapshot)?;
    }

    if start_stage <= 4 && end_stage >= 4 {
        let rows_in = records.len();
        let outcome = stage4_dpe::run(deps.dpe_api, records)
            .await
            .map_err(|e| PipelineError::stage(4, e))?;
        records = outcome.records;
        stage_reports.push(StageReport {
            stage: 4,
            rows_in,
            rows_out: records.len(),
        });
        prior_snapshot = snapshot_stage(work_dir, 4, &records, debug, prior_snapshot)?;
    }

    if start_stage <= 5 && end_stage >= 5 {
        let rows_in = records.len();
        let outcome = stage5_city_price::run(deps.pool, deps.city_data_scraper, records)
            .await
            .map_err(|e| PipelineError::stage(5, e))?;
        records = outcome.records;
        stage_reports.push(StageReport {
            stage: 5,
            rows_in,
            rows_out: records.len(),
        });
        prior_snapshot = snapshot_stage(work_dir, 5, &records, debug, prior_snapshot)?;
    }

    if start_stage <= 6 && end_stage >= 6 {
        let rows_in = records.len();
        let outcome = stage6_price_estimate::run(deps.pool, records)
            .await
            .map_err(|e| PipelineError::stage(6, e))?;
        records = outcome.records;
        stage_reports.push(StageReport {
            stage: 6,
            rows_in,
            rows_out: records.len(),
        });
        prior_snapshot = snapshot_stage(work_dir, 6, &records, debug, prior_snapshot)?;
    }

    if start_stage <= 7 && end_stage >= 7 {
        let rows_in = records.len();
        let outcome = stage7_persist::run(deps.pool, records.clone())
            .await
            .map_err(|e| PipelineError::stage(7, e))?;
        stage_reports.push(StageReport {
            stage: 7,
            rows_in,
            rows_out: outcome.inserted + outcome.skipped_duplicate,
        });
        if !debug {
            if let Some(path) = prior_snapshot.take() {
                let _ = std::fs::remove_file(path);
            }
        }
        persisted = Some(outcome);
    }

    info!(stages = stage_reports.len(), "enrichment machine run complete");
    Ok(MachineOutcome {
        stage_reports,
        final_records: records,
        persisted,
    })
}

fn snapshot_path(work_dir: &Path, stage: u8) -> PathBuf {
    work_dir.join(format!("stage{stage}.csv"))
}

fn snapshot_stage(
    work_dir: &Path,
    stage: u8,
    records: &[EnrichmentRecord],
    debug: bool,
    prior: Option<PathBuf>,
) -> Result<Option<PathBuf>, PipelineError> {
    let path = snapshot_path(work_dir, stage);
    write_snapshot(&path, records)?;
    if !debug {
        if let Some(prior_path) = prior {
            if prior_path != path {
                let _ = std::fs::remove_file(prior_path);
            }
        }
    }
    Ok(Some(path))
}

fn write_snapshot(path: &Path, records: &[EnrichmentRecord]) -> Result<(), PipelineError> {
    let mut writer = csv::WriterBuilder::new().from_path(path)?;
    for rec in records {
        writer.serialize(rec)?;
    }
    writer.flush()?;
    Ok(())
}

fn read_snapshot(path: &Path) -> Result<Vec<EnrichmentRecord>, PipelineError> {
    let mut reader = csv::ReaderBuilder::new().from_path(path)?;
    let mut records = Vec::new();
    for row in reader.deserialize::<EnrichmentRecord>() {
        records.push(row?);
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_path_names_match_stage_number() {
        let dir = Path::new("/tmp/work");
        assert_eq!(
            snapshot_path(dir, 3),
            Path::new("/tmp/work/stage3.csv")
        );
    }
}
