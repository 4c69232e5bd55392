use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use metrics::counter;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info, warn};

use crate::concurrency::gate::CapacityGate;
use crate::concurrency::queue::CompletionTx;
use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};
use crate::config::{FeedRetryConfig, ProcessorConfig};
use crate::{bail, enrich_error};
use crate::enrichment::base::Enricher;
use crate::error::{EnrichError, EnrichResult, ErrorKind};
use crate::feed::base::ChangeFeed;
use crate::metrics::{
    ENRICH_ANALYZERS_SPAWNED_TOTAL, ENRICH_EVENTS_PROCESSED_TOTAL, ENRICH_EVENTS_SKIPPED_TOTAL,
    ENRICH_FEED_READ_FAILURES_TOTAL,
};
use crate::store::base::{CursorStore, RecordStore};
use crate::types::EventPosition;
use crate::workers::analyzer::{AnalyzerWorker, AnalyzerWorkerHandle};
use crate::workers::base::{Worker, WorkerHandle};

/// Health of the dispatcher's feed connection, surfaced to the lifecycle
/// controller's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedHealth {
    /// Reads are succeeding, or have not failed enough to trip the circuit.
    #[default]
    Healthy,
    /// Reads have failed `circuit_threshold` or more consecutive times.
    Degraded,
}

/// Transmitter side of the feed health channel, written by the dispatcher.
pub type FeedHealthTx = watch::Sender<FeedHealth>;

/// Receiver side of the feed health channel, read by the lifecycle
/// controller.
pub type FeedHealthRx = watch::Receiver<FeedHealth>;

/// Creates a feed health channel starting in the healthy state.
pub fn create_feed_health_channel() -> (FeedHealthTx, FeedHealthRx) {
    watch::channel(FeedHealth::Healthy)
}

/// Exponential backoff state for feed read failures.
///
/// Failures are retried indefinitely; the delay doubles from the configured
/// initial backoff up to the cap, and sustained failure trips a circuit that
/// surfaces as degraded status until a read succeeds.
struct FeedBackoff {
    retry: FeedRetryConfig,
    next_delay_ms: u64,
    consecutive_failures: u32,
}

impl FeedBackoff {
    fn new(retry: FeedRetryConfig) -> Self {
        Self {
            next_delay_ms: retry.initial_backoff_ms,
            consecutive_failures: 0,
            retry,
        }
    }

    /// Records a failure and sleeps for the current backoff delay.
    ///
    /// Returns `false` when shutdown was signalled during the wait.
    async fn wait(&mut self, shutdown_rx: &mut ShutdownRx, health_tx: &FeedHealthTx) -> bool {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.consecutive_failures >= self.retry.circuit_threshold {
            let _ = health_tx.send(FeedHealth::Degraded);
        }

        let delay = Duration::from_millis(self.next_delay_ms);
        self.next_delay_ms = self
            .next_delay_ms
            .saturating_mul(2)
            .min(self.retry.max_backoff_ms);

        tokio::select! {
            biased;

            _ = shutdown_rx.signaled() => false,

            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Resets the backoff after a successful read and clears a tripped
    /// circuit.
    fn record_success(&mut self, health_tx: &FeedHealthTx) {
        if self.consecutive_failures > 0 {
            info!(
                failures = self.consecutive_failures,
                "change feed recovered"
            );

            self.consecutive_failures = 0;
            self.next_delay_ms = self.retry.initial_backoff_ms;
            let _ = health_tx.send(FeedHealth::Healthy);
        }
    }
}

/// Handle for monitoring and controlling the dispatcher worker.
#[derive(Debug)]
pub struct DispatcherWorkerHandle {
    handle: Option<JoinHandle<EnrichResult<()>>>,
}

impl DispatcherWorkerHandle {
    /// Waits for the dispatcher to exit cooperatively, forcibly terminating
    /// it once the grace period elapses.
    ///
    /// A termination triggered here is reported as success: the caller asked
    /// for it.
    pub async fn wait_with_grace(mut self, grace: Duration) -> EnrichResult<()> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        match timeout(grace, &mut handle).await {
            Ok(result) => map_join_result(result),
            Err(_) => {
                warn!("dispatcher did not exit within the stop grace period, terminating it");
                handle.abort();

                match handle.await {
                    Err(err) if err.is_cancelled() => Ok(()),
                    other => map_join_result(other),
                }
            }
        }
    }
}

impl WorkerHandle for DispatcherWorkerHandle {
    type Output = ();

    async fn wait(mut self) -> EnrichResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        map_join_result(handle.await)
    }
}

fn map_join_result(result: Result<EnrichResult<()>, JoinError>) -> EnrichResult<()> {
    match result {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Err(enrich_error!(
            ErrorKind::DispatcherCancelled,
            "Dispatcher worker was cancelled",
            source: err
        )),
        Err(err) => Err(enrich_error!(
            ErrorKind::DispatcherPanic,
            "Dispatcher worker panicked",
            source: err
        )),
    }
}

/// Worker that turns the continuous change feed into bounded analyzer spawns.
///
/// The dispatcher tails the feed from its cursor, filters events down to
/// relevant mutations of the watched namespace, acquires capacity for each
/// one, and spawns an analyzer whose handle is pushed onto the completion
/// queue for the reaper. It is stateless about record content: eligibility is
/// checked by the analyzer itself.
#[derive(Debug)]
pub struct DispatcherWorker<F, S, E> {
    config: Arc<ProcessorConfig>,
    feed: F,
    store: S,
    enricher: E,
    gate: CapacityGate,
    completion_tx: CompletionTx<AnalyzerWorkerHandle>,
    shutdown_rx: ShutdownRx,
    feed_health_tx: FeedHealthTx,
    start_position: EventPosition,
}

impl<F, S, E> DispatcherWorker<F, S, E> {
    /// Creates a new dispatcher worker with the given collaborators.
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<ProcessorConfig>,
        feed: F,
        store: S,
        enricher: E,
        gate: CapacityGate,
        completion_tx: CompletionTx<AnalyzerWorkerHandle>,
        shutdown_rx: ShutdownRx,
        feed_health_tx: FeedHealthTx,
        start_position: EventPosition,
    ) -> Self {
        Self {
            config,
            feed,
            store,
            enricher,
            gate,
            completion_tx,
            shutdown_rx,
            feed_health_tx,
            start_position,
        }
    }
}

impl<F, S, E> Worker<DispatcherWorkerHandle> for DispatcherWorker<F, S, E>
where
    F: ChangeFeed + Send + Sync + 'static,
    S: RecordStore + CursorStore + Clone + Send + Sync + 'static,
    E: Enricher + Clone + Send + Sync + 'static,
{
    type Error = EnrichError;

    async fn start(self) -> Result<DispatcherWorkerHandle, Self::Error> {
        info!("starting dispatcher worker");

        let span = tracing::info_span!(
            "dispatcher_worker",
            namespace = %self.config.watched_namespace
        );

        let handle = tokio::spawn(self.run().instrument(span.or_current()));

        Ok(DispatcherWorkerHandle {
            handle: Some(handle),
        })
    }
}

impl<F, S, E> DispatcherWorker<F, S, E>
where
    F: ChangeFeed + Send + Sync + 'static,
    S: RecordStore + CursorStore + Clone + Send + Sync + 'static,
    E: Enricher + Clone + Send + Sync + 'static,
{
    async fn run(mut self) -> EnrichResult<()> {
        let mut cursor = self.start_position;
        let mut backoff = FeedBackoff::new(self.config.feed_retry.clone());
        let mut next_worker_id: u64 = 0;

        info!(position = %cursor, "dispatcher started");

        'feed: while !self.shutdown_rx.is_shutdown() {
            let mut stream = match self.feed.stream_events(cursor).await {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(
                        error = %err,
                        position = %cursor,
                        "failed to open the change feed, retrying"
                    );
                    counter!(ENRICH_FEED_READ_FAILURES_TOTAL).increment(1);

                    if !backoff
                        .wait(&mut self.shutdown_rx, &self.feed_health_tx)
                        .await
                    {
                        break 'feed;
                    }

                    continue 'feed;
                }
            };

            loop {
                let item = tokio::select! {
                    biased;

                    _ = self.shutdown_rx.signaled() => break 'feed,

                    item = stream.next() => item,
                };

                let event = match item {
                    Some(Ok(event)) => {
                        backoff.record_success(&self.feed_health_tx);
                        event
                    }
                    Some(Err(err)) => {
                        warn!(
                            error = %err,
                            position = %cursor,
                            "change feed read failed, resuming from last position"
                        );
                        counter!(ENRICH_FEED_READ_FAILURES_TOTAL).increment(1);

                        if !backoff
                            .wait(&mut self.shutdown_rx, &self.feed_health_tx)
                            .await
                        {
                            break 'feed;
                        }

                        continue 'feed;
                    }
                    None => {
                        // A continuous feed should never end; reopen from the
                        // cursor as for any transient fault.
                        warn!(position = %cursor, "change feed stream ended unexpectedly, reopening");

                        if !backoff
                            .wait(&mut self.shutdown_rx, &self.feed_health_tx)
                            .await
                        {
                            break 'feed;
                        }

                        continue 'feed;
                    }
                };

                counter!(ENRICH_EVENTS_PROCESSED_TOTAL).increment(1);

                if event.namespace != self.config.watched_namespace
                    || !event.operation.triggers_analysis()
                {
                    debug!(
                        position = %event.position,
                        namespace = %event.namespace,
                        operation = %event.operation,
                        "event outside watched scope, skipping"
                    );
                    counter!(ENRICH_EVENTS_SKIPPED_TOTAL).increment(1);

                    cursor = self.advance_cursor(event.position).await;
                    continue;
                }

                let permit = match self.gate.acquire(&mut self.shutdown_rx).await {
                    ShutdownResult::Ok(permit) => permit,
                    ShutdownResult::Shutdown(()) => {
                        debug!(
                            position = %event.position,
                            "shutdown while waiting for capacity, abandoning event"
                        );

                        break 'feed;
                    }
                };

                next_worker_id += 1;
                let worker = AnalyzerWorker::new(
                    next_worker_id,
                    event.target_id.clone(),
                    self.store.clone(),
                    self.enricher.clone(),
                    permit,
                );

                match worker.start().await {
                    Ok(handle) => {
                        if let Err(handle) = self.completion_tx.push(handle).await {
                            // The reaper is gone; without it no capacity can
                            // ever be reclaimed again.
                            handle.abort();

                            bail!(
                                ErrorKind::InvalidState,
                                "Completion queue closed while the dispatcher is running"
                            );
                        }

                        counter!(ENRICH_ANALYZERS_SPAWNED_TOTAL).increment(1);
                        cursor = self.advance_cursor(event.position).await;
                    }
                    Err(err) => {
                        // The capacity unit travelled with the failed worker
                        // and is already back in the gate. The event is
                        // dropped.
                        let err = enrich_error!(
                            ErrorKind::SpawnFailed,
                            "Failed to spawn analyzer worker",
                            source: err
                        );
                        error!(
                            error = %err,
                            target_id = %event.target_id,
                            "analyzer spawn failed, event dropped"
                        );
                    }
                }
            }
        }

        info!(position = %cursor, "dispatcher stopped");

        Ok(())
    }

    /// Advances the cursor past `consumed` and checkpoints the resume
    /// position.
    ///
    /// Checkpoint failures are logged and do not stop dispatch: the cost is
    /// reprocessing after a restart, not lost events.
    async fn advance_cursor(&self, consumed: EventPosition) -> EventPosition {
        let resume_at = consumed.next();

        if let Err(err) = self.store.store_cursor(resume_at).await {
            let err = enrich_error!(
                ErrorKind::CursorCheckpointFailed,
                "Failed to checkpoint cursor position",
                source: err
            );
            warn!(error = %err, position = %resume_at, "cursor checkpoint failed");
        }

        resume_at
    }
}
