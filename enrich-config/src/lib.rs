//! Configuration types for the record-enrichment change processor.

pub mod shared;
