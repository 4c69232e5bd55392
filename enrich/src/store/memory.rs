use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::EnrichResult;
use crate::store::base::{CursorStore, RecordStore};
use crate::types::{AnalysisState, EventPosition, Record, RecordId};

/// Inner state of [`MemoryRecordStore`].
#[derive(Debug, Default)]
struct Inner {
    /// Records keyed by id.
    records: HashMap<RecordId, Record>,
    /// Last checkpointed dispatcher resume position.
    cursor: Option<EventPosition>,
}

/// In-memory record store.
///
/// [`MemoryRecordStore`] implements both [`RecordStore`] and [`CursorStore`],
/// keeping all data in memory. It is ideal for tests and development; all
/// state is lost on drop.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecordStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryRecordStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a record.
    pub fn insert_record(&self, record: Record) {
        let mut inner = self.inner.lock().unwrap();
        inner.records.insert(record.id.clone(), record);
    }

    /// Returns a snapshot of a record by id.
    pub fn get_record(&self, id: &RecordId) -> Option<Record> {
        self.inner.lock().unwrap().records.get(id).cloned()
    }

    /// Returns the number of records currently marked analyzed.
    pub fn analyzed_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .records
            .values()
            .filter(|record| record.analysis_state == AnalysisState::Analyzed)
            .count()
    }

    /// Returns the current cursor checkpoint without going through the trait.
    pub fn cursor(&self) -> Option<EventPosition> {
        self.inner.lock().unwrap().cursor
    }
}

impl RecordStore for MemoryRecordStore {
    async fn load_record(&self, id: &RecordId) -> EnrichResult<Option<Record>> {
        let inner = self.inner.lock().unwrap();

        Ok(inner.records.get(id).cloned())
    }

    async fn mark_analyzed(&self, id: &RecordId) -> EnrichResult<()> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(record) = inner.records.get_mut(id) {
            record.analysis_state = AnalysisState::Analyzed;
        }

        Ok(())
    }
}

impl CursorStore for MemoryRecordStore {
    async fn load_cursor(&self) -> EnrichResult<Option<EventPosition>> {
        let inner = self.inner.lock().unwrap();

        Ok(inner.cursor)
    }

    async fn store_cursor(&self, position: EventPosition) -> EnrichResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.cursor = Some(position);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_inserted_records() {
        let store = MemoryRecordStore::new();
        let record = Record::new(RecordId::random(), AnalysisState::Pending);
        store.insert_record(record.clone());

        let loaded = store.load_record(&record.id).await.unwrap();
        assert_eq!(loaded, Some(record));

        let missing = store.load_record(&RecordId::random()).await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn mark_analyzed_flips_the_marker() {
        let store = MemoryRecordStore::new();
        let record = Record::new(RecordId::random(), AnalysisState::Pending);
        store.insert_record(record.clone());

        store.mark_analyzed(&record.id).await.unwrap();

        let loaded = store.load_record(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.analysis_state, AnalysisState::Analyzed);
    }

    #[tokio::test]
    async fn mark_analyzed_ignores_missing_records() {
        let store = MemoryRecordStore::new();

        store.mark_analyzed(&RecordId::random()).await.unwrap();
        assert_eq!(store.analyzed_count(), 0);
    }

    #[tokio::test]
    async fn cursor_round_trips() {
        let store = MemoryRecordStore::new();
        assert_eq!(store.load_cursor().await.unwrap(), None);

        store.store_cursor(EventPosition::new(42)).await.unwrap();
        assert_eq!(
            store.load_cursor().await.unwrap(),
            Some(EventPosition::new(42))
        );
    }
}
