//! Persistence adapter. Every query goes through `sqlx::query`/`query_as`
//! directly (no compile-time `query!` macros, since there is no database
//! available at build time); each function owns one statement and maps
//! `sqlx::Error` through `PipelineError`.

pub mod addresses;
pub mod cities;
pub mod client_addresses;
pub mod clients;
pub mod dpe;
pub mod ingestion_runs;
pub mod jobs;

pub use addresses::*;
pub use cities::*;
pub use client_addresses::*;
pub use clients::*;
pub use dpe::*;
pub use ingestion_runs::*;
pub use jobs::*;
