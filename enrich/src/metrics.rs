//! Metric definitions for change processor monitoring.

/// Label carrying the terminal outcome of a reclaimed analyzer worker.
pub const OUTCOME_LABEL: &str = "outcome";

/// Counter for change events consumed from the feed.
pub const ENRICH_EVENTS_PROCESSED_TOTAL: &str = "enrich_events_processed_total";

/// Counter for change events skipped by the namespace/operation filter.
pub const ENRICH_EVENTS_SKIPPED_TOTAL: &str = "enrich_events_skipped_total";

/// Counter for analyzer workers spawned by the dispatcher.
pub const ENRICH_ANALYZERS_SPAWNED_TOTAL: &str = "enrich_analyzers_spawned_total";

/// Counter for analyzer workers reclaimed by the reaper.
pub const ENRICH_ANALYZERS_REAPED_TOTAL: &str = "enrich_analyzers_reaped_total";

/// Histogram of analyzer worker runtimes in seconds.
pub const ENRICH_ANALYZER_RUNTIME_SECONDS: &str = "enrich_analyzer_runtime_seconds";

/// Counter for change feed read failures.
pub const ENRICH_FEED_READ_FAILURES_TOTAL: &str = "enrich_feed_read_failures_total";
