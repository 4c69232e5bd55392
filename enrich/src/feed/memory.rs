use std::sync::{Arc, Mutex};

use futures::stream::BoxStream;
use tokio::sync::Notify;

use crate::enrich_error;
use crate::error::{EnrichResult, ErrorKind};
use crate::feed::base::ChangeFeed;
use crate::types::{ChangeEvent, EventPosition, OperationKind, RecordId};

/// Inner state of [`MemoryFeed`].
#[derive(Debug, Default)]
struct Inner {
    /// Append-only event log, ordered by position.
    events: Vec<ChangeEvent>,
    /// Token of the newest event; positions start at 1.
    newest_position: u64,
    /// Number of injected transient faults still to surface to readers.
    failures_remaining: u32,
}

/// In-memory change feed.
///
/// [`MemoryFeed`] keeps an append-only event log in memory and wakes blocked
/// streams whenever a new event is pushed. It is ideal for tests and
/// embedders that drive the processor programmatically; transient read faults
/// can be injected to exercise the dispatcher's retry path.
#[derive(Debug, Clone, Default)]
pub struct MemoryFeed {
    inner: Arc<Mutex<Inner>>,
    event_added: Arc<Notify>,
}

impl MemoryFeed {
    /// Creates a new empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event to the feed and wakes every blocked stream.
    ///
    /// Positions are assigned monotonically by the feed itself.
    pub fn push(
        &self,
        namespace: impl Into<String>,
        operation: OperationKind,
        target_id: RecordId,
    ) -> EventPosition {
        let mut inner = self.inner.lock().unwrap();

        inner.newest_position += 1;
        let position = EventPosition::new(inner.newest_position);
        inner.events.push(ChangeEvent {
            position,
            namespace: namespace.into(),
            operation,
            target_id,
        });
        drop(inner);

        self.event_added.notify_waiters();

        position
    }

    /// Makes the next `count` reads surface a transient fault before any
    /// event is yielded.
    pub fn fail_next_reads(&self, count: u32) {
        let mut inner = self.inner.lock().unwrap();
        inner.failures_remaining += count;
        drop(inner);

        // Wake blocked streams so a pending read observes the fault.
        self.event_added.notify_waiters();
    }

    /// Returns a snapshot of all events currently in the feed.
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.inner.lock().unwrap().events.clone()
    }
}

impl ChangeFeed for MemoryFeed {
    type EventStream = BoxStream<'static, EnrichResult<ChangeEvent>>;

    async fn stream_events(&self, from: EventPosition) -> EnrichResult<Self::EventStream> {
        let inner = self.inner.clone();
        let event_added = self.event_added.clone();

        let stream = futures::stream::unfold(from, move |cursor| {
            let inner = inner.clone();
            let event_added = event_added.clone();

            async move {
                loop {
                    // Register for a wakeup before inspecting state so a push
                    // between the check and the await is not lost.
                    let notified = event_added.notified();
                    tokio::pin!(notified);
                    notified.as_mut().enable();

                    {
                        let mut guard = inner.lock().unwrap();

                        if guard.failures_remaining > 0 {
                            guard.failures_remaining -= 1;

                            let err = enrich_error!(
                                ErrorKind::FeedReadFailed,
                                "Change feed read failed",
                                "injected transient fault"
                            );

                            // The cursor does not move: a resumed stream
                            // re-reads from the same position.
                            return Some((Err(err), cursor));
                        }

                        if let Some(event) =
                            guard.events.iter().find(|event| event.position >= cursor)
                        {
                            let resume_at = event.position.next();

                            return Some((Ok(event.clone()), resume_at));
                        }
                    }

                    notified.await;
                }
            }
        });

        Ok(Box::pin(stream))
    }

    async fn tail_position(&self) -> EnrichResult<EventPosition> {
        let inner = self.inner.lock().unwrap();

        Ok(EventPosition::new(inner.newest_position).next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn streams_events_at_or_after_the_requested_position() {
        let feed = MemoryFeed::new();
        let first = feed.push("records", OperationKind::Insert, RecordId::random());
        let second = feed.push("records", OperationKind::Update, RecordId::random());

        let mut stream = feed.stream_events(second).await.unwrap();
        let event = stream.next().await.unwrap().unwrap();

        assert_eq!(event.position, second);
        assert!(first < second);
    }

    #[tokio::test]
    async fn blocked_stream_wakes_on_push() {
        let feed = MemoryFeed::new();
        let mut stream = feed.stream_events(EventPosition::ORIGIN).await.unwrap();

        let reader = tokio::spawn(async move { stream.next().await.unwrap() });

        let target_id = RecordId::random();
        feed.push("records", OperationKind::Insert, target_id.clone());

        let event = reader.await.unwrap().unwrap();
        assert_eq!(event.target_id, target_id);
    }

    #[tokio::test]
    async fn injected_fault_surfaces_once_then_reads_recover() {
        let feed = MemoryFeed::new();
        feed.push("records", OperationKind::Insert, RecordId::random());
        feed.fail_next_reads(1);

        let mut stream = feed.stream_events(EventPosition::ORIGIN).await.unwrap();

        let first = stream.next().await.unwrap();
        assert_eq!(
            first.unwrap_err().kind(),
            crate::error::ErrorKind::FeedReadFailed
        );

        let second = stream.next().await.unwrap();
        assert!(second.is_ok());
    }

    #[tokio::test]
    async fn tail_position_skips_existing_events() {
        let feed = MemoryFeed::new();
        feed.push("records", OperationKind::Insert, RecordId::random());
        let newest = feed.push("records", OperationKind::Insert, RecordId::random());

        let tail = feed.tail_position().await.unwrap();
        assert_eq!(tail, newest.next());
    }
}
