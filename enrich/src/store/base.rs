use std::future::Future;

use crate::error::EnrichResult;
use crate::types::{EventPosition, Record, RecordId};

/// Narrow interface to the shared record store.
///
/// The core only needs to load a record, inspect its analysis-state marker,
/// and flip the marker once enrichment completed. Implementations should
/// ensure thread-safety and handle concurrent access to the data: the core
/// applies no record-level locking.
pub trait RecordStore {
    /// Loads a record by id, returning `None` when it does not exist.
    fn load_record(
        &self,
        id: &RecordId,
    ) -> impl Future<Output = EnrichResult<Option<Record>>> + Send;

    /// Marks the record as analyzed.
    ///
    /// Missing records are a no-op: the record may have been deleted between
    /// the change event and the worker running.
    fn mark_analyzed(&self, id: &RecordId) -> impl Future<Output = EnrichResult<()>> + Send;
}

/// Durable checkpoint of the dispatcher's cursor position.
///
/// The checkpoint stores the position the dispatcher should resume reading
/// from, so a restarted processor does not reprocess already consumed events.
pub trait CursorStore {
    /// Returns the last checkpointed resume position, `None` before the
    /// first checkpoint.
    fn load_cursor(&self) -> impl Future<Output = EnrichResult<Option<EventPosition>>> + Send;

    /// Persists `position` as the new resume checkpoint.
    fn store_cursor(&self, position: EventPosition)
    -> impl Future<Output = EnrichResult<()>> + Send;
}
