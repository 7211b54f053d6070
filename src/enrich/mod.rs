//! The seven-stage enrichment pipeline: raw scrape rows in, persisted
//! addresses out. Each stage reads and writes an `EnrichmentRecord` CSV
//! file at rest so a failed run can resume from its last completed stage.

pub mod machine;
pub mod record;
pub mod stage1_normalize;
pub mod stage2_city_resolve;
pub mod stage3_geocode;
pub mod stage4_dpe;
pub mod stage5_city_price;
pub mod stage6_price_estimate;
pub mod stage7_persist;
pub mod text;

pub use machine::*;
pub use record::EnrichmentRecord;
