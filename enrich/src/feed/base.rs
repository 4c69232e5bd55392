use std::future::Future;

use futures::Stream;

use crate::error::EnrichResult;
use crate::types::{ChangeEvent, EventPosition};

/// Continuous source of mutation notifications for the dispatcher.
///
/// Implementations must yield events in position order, starting at or after
/// the requested position, and must keep the stream open while waiting for
/// new events to arrive. Transient read faults are reported as stream items
/// so the dispatcher can resume from its cursor.
pub trait ChangeFeed {
    /// Stream of events produced by [`stream_events`](ChangeFeed::stream_events).
    type EventStream: Stream<Item = EnrichResult<ChangeEvent>> + Send + Unpin;

    /// Opens a stream of events at-or-after `from`.
    fn stream_events(
        &self,
        from: EventPosition,
    ) -> impl Future<Output = EnrichResult<Self::EventStream>> + Send;

    /// Returns the position one past the newest event currently in the feed,
    /// used to start processing "from now".
    fn tail_position(&self) -> impl Future<Output = EnrichResult<EventPosition>> + Send;
}
