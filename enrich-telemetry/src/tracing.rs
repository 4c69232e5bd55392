//! Tracing initialization for services and tests.

use std::sync::Once;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

/// Fallback filter directives applied when `RUST_LOG` is not set.
const DEFAULT_DIRECTIVES: &str = "info";

static TEST_TRACING: Once = Once::new();

/// Initializes the global tracing subscriber for a service.
///
/// The filter is taken from `RUST_LOG` when present, otherwise it defaults to
/// `info`. Fails when a global subscriber was already installed.
pub fn init_tracing(service_name: &str) -> Result<(), TryInitError> {
    fmt()
        .with_env_filter(default_env_filter())
        .with_target(true)
        .finish()
        .try_init()?;

    tracing::info!(service = service_name, "tracing initialized");

    Ok(())
}

/// Initializes tracing for tests.
///
/// Safe to call at the start of every test; only the first call installs the
/// subscriber, and output is routed through the test writer so it interleaves
/// correctly with the test harness.
pub fn init_test_tracing() {
    TEST_TRACING.call_once(|| {
        let _ = fmt()
            .with_env_filter(default_env_filter())
            .with_test_writer()
            .finish()
            .try_init();
    });
}

fn default_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}
