pub mod concurrency;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod feed;
mod macros;
pub mod metrics;
pub mod processor;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
