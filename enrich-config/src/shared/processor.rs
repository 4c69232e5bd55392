use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shared::FeedRetryConfig;

/// Errors reported when validating processor configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("max_workers must be greater than 0")]
    MaxWorkersZero,

    #[error("watched_namespace must not be empty")]
    WatchedNamespaceEmpty,

    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}

/// Position the dispatcher starts reading the change feed from.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StartPosition {
    /// Resume from the externally checkpointed cursor, falling back to the
    /// origin of the feed when no checkpoint exists.
    #[default]
    Resume,
    /// Start from the current tail of the feed, ignoring older events.
    Tail,
    /// Start from a fixed, known-good position.
    Fixed(u64),
}

/// Configuration for a change processor instance.
///
/// Contains all settings required to run a processor including the watched
/// record collection, worker limits, and feed retry behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Namespace of the record collection whose mutations are processed.
    ///
    /// Events referencing other namespaces are skipped, though their cursor
    /// positions still advance.
    pub watched_namespace: String,
    /// Maximum number of analyzer workers that can run at a time.
    ///
    /// Also sizes the completion queue, so handle pushes can only ever block
    /// momentarily.
    #[serde(default = "default_max_workers")]
    pub max_workers: u16,
    /// Where the dispatcher starts reading when the processor starts.
    #[serde(default)]
    pub start_position: StartPosition,
    /// Retry behavior applied to change feed read failures.
    #[serde(default)]
    pub feed_retry: FeedRetryConfig,
    /// Milliseconds granted to the dispatcher to exit cooperatively on stop
    /// before it is forcibly terminated.
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

impl ProcessorConfig {
    /// Default maximum number of concurrent analyzer workers.
    pub const DEFAULT_MAX_WORKERS: u16 = 10;

    /// Default grace period before the dispatcher is forcibly terminated.
    pub const DEFAULT_STOP_GRACE_MS: u64 = 5_000;

    /// Validates processor configuration settings.
    ///
    /// Ensures the watched namespace is set, the worker limit is non-zero,
    /// and the feed retry settings are consistent.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.watched_namespace.is_empty() {
            return Err(ValidationError::WatchedNamespaceEmpty);
        }

        if self.max_workers == 0 {
            return Err(ValidationError::MaxWorkersZero);
        }

        self.feed_retry.validate()?;

        Ok(())
    }
}

fn default_max_workers() -> u16 {
    ProcessorConfig::DEFAULT_MAX_WORKERS
}

fn default_stop_grace_ms() -> u64 {
    ProcessorConfig::DEFAULT_STOP_GRACE_MS
}
