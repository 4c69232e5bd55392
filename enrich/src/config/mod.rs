//! Configuration objects for the change processor.
//!
//! This module contains re-exported configurations that are needed by the
//! processor.

// Re-exports.
pub use enrich_config::shared::*;
