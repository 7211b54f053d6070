//! Core data types for the pipeline — pure data structures with no behavior.

pub mod address;
pub mod city;
pub mod client;
pub mod client_address;
pub mod dpe;
pub mod ingestion_run;
pub mod job;

pub use address::*;
pub use city::*;
pub use client::*;
pub use client_address::*;
pub use dpe::*;
pub use ingestion_run::*;
pub use job::*;
