use crate::config::{FeedRetryConfig, ProcessorConfig, StartPosition};
use crate::enrichment::memory::MemoryEnricher;
use crate::feed::memory::MemoryFeed;
use crate::processor::ChangeProcessor;
use crate::store::memory::MemoryRecordStore;
use crate::types::{AnalysisState, Record, RecordId};

/// Namespace watched by test processors.
pub const TEST_NAMESPACE: &str = "records";

/// Processor wired to in-memory collaborators.
pub type MemoryProcessor = ChangeProcessor<MemoryFeed, MemoryRecordStore, MemoryEnricher>;

/// Creates a processor configuration tuned for fast tests: short feed
/// backoff, a low circuit threshold, and a short stop grace period.
pub fn test_config(max_workers: u16) -> ProcessorConfig {
    ProcessorConfig {
        watched_namespace: TEST_NAMESPACE.to_string(),
        max_workers,
        start_position: StartPosition::Resume,
        feed_retry: FeedRetryConfig {
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            circuit_threshold: 3,
        },
        stop_grace_ms: 1_000,
    }
}

/// Creates a stopped processor together with its in-memory collaborators.
pub fn create_processor(
    max_workers: u16,
) -> (MemoryProcessor, MemoryFeed, MemoryRecordStore, MemoryEnricher) {
    create_processor_with(test_config(max_workers))
}

/// Creates a stopped processor with a custom configuration.
pub fn create_processor_with(
    config: ProcessorConfig,
) -> (MemoryProcessor, MemoryFeed, MemoryRecordStore, MemoryEnricher) {
    let feed = MemoryFeed::new();
    let store = MemoryRecordStore::new();
    let enricher = MemoryEnricher::new();
    let processor = ChangeProcessor::new(config, feed.clone(), store.clone(), enricher.clone());

    (processor, feed, store, enricher)
}

/// Seeds a record in the given analysis state and returns its id.
pub fn seed_record(store: &MemoryRecordStore, analysis_state: AnalysisState) -> RecordId {
    let record = Record::new(RecordId::random(), analysis_state);
    let id = record.id.clone();
    store.insert_record(record);

    id
}
