//! Shared configuration types for change processors.

mod processor;
mod retry;

pub use processor::{ProcessorConfig, StartPosition, ValidationError};
pub use retry::FeedRetryConfig;
