//! The single record type threaded through all seven enrichment stages.
//! Each stage only looks at the fields it cares about and fills in the
//! ones it owns; fields not yet populated serialize as empty CSV cells.

use crate::domain::{DpeClass, PropertyType};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EnrichmentRecord {
    // Raw scrape fields (present from stage 0 onward).
    pub address_raw: String,
    pub city_name: String,
    pub price: i64,
    #[serde(default)]
    pub surface: Option<f64>,
    #[serde(default)]
    pub rooms: Option<i32>,
    #[serde(default)]
    pub sale_date: Option<NaiveDate>,
    #[serde(default)]
    pub property_type: Option<PropertyType>,
    #[serde(default)]
    pub source_url: String,

    // Stage 2: city resolution.
    #[serde(default)]
    pub city_id: Option<Uuid>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub insee_code: Option<String>,
    #[serde(default)]
    pub department: Option<String>,

    // Stage 3: geocoding.
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub address_normalized: Option<String>,
    #[serde(default)]
    pub geocoding_score: Option<f64>,

    // Stage 4: DPE enrichment.
    #[serde(default)]
    pub dpe_number: Option<String>,
    #[serde(default)]
    pub dpe_date: Option<NaiveDate>,
    #[serde(default)]
    pub dpe_energy_class: Option<DpeClass>,
    #[serde(default)]
    pub dpe_ges_class: Option<String>,
    #[serde(default)]
    pub construction_year: Option<i32>,
    #[serde(default)]
    pub dpe_match_confidence: Option<i32>,

    // Stage 6: price estimation.
    #[serde(default)]
    pub estimated_price: Option<i64>,
    #[serde(default)]
    pub price_evolution_rate: Option<f64>,
    #[serde(default)]
    pub estimation_confidence: Option<f64>,
}
