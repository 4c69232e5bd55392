//! Telemetry bootstrap for change processor services: tracing initialization
//! and Prometheus metrics exposure.

pub mod metrics;
pub mod tracing;
