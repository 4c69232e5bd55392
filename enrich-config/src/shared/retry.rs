use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Retry behavior for change feed read failures.
///
/// Read failures are retried indefinitely. The delay between attempts doubles
/// from the initial backoff up to the cap, and after `circuit_threshold`
/// consecutive failures the dispatcher reports a degraded status until a read
/// succeeds again.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FeedRetryConfig {
    /// Delay before the first retry, in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound on the retry delay, in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Number of consecutive failures after which the processor status turns
    /// degraded.
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,
}

impl FeedRetryConfig {
    /// Default delay before the first retry.
    pub const DEFAULT_INITIAL_BACKOFF_MS: u64 = 200;

    /// Default upper bound on the retry delay.
    pub const DEFAULT_MAX_BACKOFF_MS: u64 = 30_000;

    /// Default consecutive-failure threshold for degraded status.
    pub const DEFAULT_CIRCUIT_THRESHOLD: u32 = 5;

    /// Validates feed retry settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.initial_backoff_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "feed_retry.initial_backoff_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ValidationError::InvalidFieldValue {
                field: "feed_retry.max_backoff_ms".to_string(),
                constraint: "must be greater than or equal to initial_backoff_ms".to_string(),
            });
        }

        if self.circuit_threshold == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "feed_retry.circuit_threshold".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for FeedRetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            circuit_threshold: default_circuit_threshold(),
        }
    }
}

fn default_initial_backoff_ms() -> u64 {
    FeedRetryConfig::DEFAULT_INITIAL_BACKOFF_MS
}

fn default_max_backoff_ms() -> u64 {
    FeedRetryConfig::DEFAULT_MAX_BACKOFF_MS
}

fn default_circuit_threshold() -> u32 {
    FeedRetryConfig::DEFAULT_CIRCUIT_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_cap_below_initial_backoff() {
        let retry = FeedRetryConfig {
            initial_backoff_ms: 1_000,
            max_backoff_ms: 100,
            circuit_threshold: 5,
        };

        assert!(matches!(
            retry.validate(),
            Err(ValidationError::InvalidFieldValue { .. })
        ));
    }
}
