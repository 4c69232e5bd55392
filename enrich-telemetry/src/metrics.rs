//! Prometheus metrics bootstrap.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::Mutex;
use std::time::Duration;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::trace;

/// Interval between Prometheus upkeep runs, bounding recorder memory growth.
const UPKEEP_INTERVAL: Duration = Duration::from_secs(5);

/// Port the standalone metrics endpoint listens on.
const METRICS_PORT: u16 = 9000;

// Global cache for the recorder handle. Installing a global recorder twice
// fails, and tests initialize metrics repeatedly, so the first successful
// installation is cached and handed back to later callers. A `Mutex` is used
// instead of `OnceLock` because the initialization is fallible.
static PROMETHEUS_HANDLE: Mutex<Option<PrometheusHandle>> = Mutex::new(None);

/// Installs the Prometheus recorder and returns a handle for rendering
/// metrics at a custom endpoint.
///
/// Use this when metrics should be served through an existing HTTP surface.
/// Subsequent calls return the cached handle.
pub fn init_metrics_handle() -> Result<PrometheusHandle, BuildError> {
    let mut cached = PROMETHEUS_HANDLE.lock().unwrap();

    if let Some(handle) = &*cached {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    *cached = Some(handle.clone());

    spawn_upkeep(handle.clone());

    Ok(handle)
}

/// Installs the Prometheus recorder together with a scrape endpoint on
/// `[::]:9000/metrics` for standalone deployments.
///
/// Must be called from within a tokio runtime.
pub fn init_metrics() -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(SocketAddr::new(
            IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            METRICS_PORT,
        ))
        .install()?;

    Ok(())
}

fn spawn_upkeep(handle: PrometheusHandle) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(UPKEEP_INTERVAL).await;
            trace!("running metrics upkeep");
            handle.run_upkeep();
        }
    });
}
