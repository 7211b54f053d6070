//! Stage 1: normalizes raw scrape output into typed, validated records.

use crate::domain::PropertyType;
use crate::enrich::record::EnrichmentRecord;
use crate::enrich::text::strip_accents_upper;
use crate::error::PipelineError;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct RawRow {
    address_raw: String,
    city_name: String,
    #[serde(default)]
    price: String,
    #[serde(default)]
    surface: String,
    #[serde(default)]
    rooms: String,
    #[serde(default)]
    sale_date: String,
    #[serde(default)]
    property_type: String,
    #[serde(default)]
    source_url: String,
}

pub struct NormalizeOutcome {
    pub records: Vec<EnrichmentRecord>,
    pub rows_in: usize,
    pub rows_out: usize,
}

pub fn run(input_csv: &Path) -> Result<NormalizeOutcome, PipelineError> {
    let mut reader = csv::ReaderBuilder::new().from_path(input_csv)?;
    let mut rows_in = 0usize;
    let mut records = Vec::new();

    for row in reader.deserialize::<RawRow>() {
        let row = row?;
        rows_in += 1;

        let address_raw = strip_accents_upper(&row.address_raw);
        let city_name = strip_accents_upper(&row.city_name);
        let price: i64 = row.price.trim().parse().unwrap_or(0);
        let surface: Option<f64> = row.surface.trim().replace(',', ".").parse().ok();
        let rooms: Option<i32> = row.rooms.trim().parse().ok();
        let sale_date = parse_french_date(&row.sale_date);
        let property_type = Some(PropertyType::from_label(&row.property_type));

        if address_raw.is_empty() || city_name.is_empty() || price <= 0 || sale_date.is_none() {
            continue;
        }

        records.push(EnrichmentRecord {
            address_raw,
            city_name,
            price,
            surface,
            rooms,
            sale_date,
            property_type,
            source_url: row.source_url,
            ..Default::default()
        });
    }

    let rows_out = records.len();
    let rejected = rows_in - rows_out;
    if rejected > 0 {
        warn!(rejected, "stage 1: dropped rows with invalid address/city/price/date");
    }
    info!(rows_in, rows_out, "stage 1 normalize complete");

    Ok(NormalizeOutcome {
        records,
        rows_in,
        rows_out,
    })
}

/// Accepts `DD/MM/YYYY`, the format the scraping engine writes.
fn parse_french_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%d/%m/%Y").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn drops_rows_with_invalid_price_or_date() {
        let csv = "address_raw,city_name,price,surface,rooms,sale_date,property_type,source_url\n\
                    12 Rue Foo,Lyon,300000,65,3,14/03/2022,Maison,http://a\n\
                    ,Lyon,300000,65,3,14/03/2022,Maison,http://b\n\
                    12 Rue Foo,Lyon,0,65,3,14/03/2022,Maison,http://c\n\
                    12 Rue Foo,Lyon,300000,65,3,not-a-date,Maison,http://d\n";
        let file = write_csv(csv);
        let outcome = run(file.path()).unwrap();
        assert_eq!(outcome.rows_in, 4);
        assert_eq!(outcome.rows_out, 1);
        assert_eq!(outcome.records[0].property_type, Some(PropertyType::House));
    }

    #[test]
    fn normalizes_accents_and_case() {
        let csv = "address_raw,city_name,price,surface,rooms,sale_date,property_type,source_url\n\
                    12 rue de l'Église,Élancourt,300000,65,3,14/03/2022,Maison,http://a\n";
        let file = write_csv(csv);
        let outcome = run(file.path()).unwrap();
        assert_eq!(outcome.records[0].address_raw, "12 RUE DE L EGLISE");
        assert_eq!(outcome.records[0].city_name, "ELANCOURT");
    }
}
