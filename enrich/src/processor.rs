use std::fmt;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::concurrency::gate::CapacityGate;
use crate::concurrency::queue::create_completion_queue;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::config::{ProcessorConfig, StartPosition};
use crate::enrich_error;
use crate::enrichment::base::Enricher;
use crate::error::{EnrichError, EnrichResult, ErrorKind};
use crate::feed::base::ChangeFeed;
use crate::store::base::{CursorStore, RecordStore};
use crate::types::EventPosition;
use crate::workers::base::{Worker, WorkerHandle};
use crate::workers::dispatcher::{
    DispatcherWorker, DispatcherWorkerHandle, FeedHealth, FeedHealthRx, create_feed_health_channel,
};
use crate::workers::reaper::{ReaperWorker, ReaperWorkerHandle};

/// Externally visible processor status.
///
/// This is a liveness intent indicator based on whether an active
/// dispatcher/reaper pair exists, not a guarantee that the loops are making
/// progress. Degraded means the pair is active but the change feed has been
/// failing persistently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorStatus {
    Stopped,
    Running,
    Degraded,
}

impl fmt::Display for ProcessorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessorStatus::Stopped => f.write_str("stopped"),
            ProcessorStatus::Running => f.write_str("running"),
            ProcessorStatus::Degraded => f.write_str("running (degraded: change feed failing)"),
        }
    }
}

/// Reply returned by the control surface operations.
///
/// Repeated starts and stops are successes; `success` only turns false on an
/// unexpected internal failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    pub success: bool,
    pub status: String,
}

impl ControlReply {
    fn ok(status: impl Into<String>) -> Self {
        Self {
            success: true,
            status: status.into(),
        }
    }

    fn failed(status: impl Into<String>) -> Self {
        Self {
            success: false,
            status: status.into(),
        }
    }
}

/// State of the processor: either stopped, or owning the single active
/// dispatcher/reaper pair.
#[derive(Debug)]
enum ProcessorState {
    Stopped,
    Started {
        shutdown_tx: ShutdownTx,
        dispatcher: DispatcherWorkerHandle,
        reaper: ReaperWorkerHandle,
        feed_health_rx: FeedHealthRx,
    },
}

/// Lifecycle controller for the background change processor.
///
/// [`ChangeProcessor`] owns at most one running dispatcher/reaper pair and
/// exposes the start/stop/status control surface. It is a plain owned value:
/// multiple independent processors are constructible, each with its own
/// collaborators.
#[derive(Debug)]
pub struct ChangeProcessor<F, S, E> {
    config: Arc<ProcessorConfig>,
    feed: F,
    store: S,
    enricher: E,
    state: ProcessorState,
}

impl<F, S, E> ChangeProcessor<F, S, E>
where
    F: ChangeFeed + Clone + Send + Sync + 'static,
    S: RecordStore + CursorStore + Clone + Send + Sync + 'static,
    E: Enricher + Clone + Send + Sync + 'static,
{
    /// Creates a stopped processor with the given collaborators.
    pub fn new(config: ProcessorConfig, feed: F, store: S, enricher: E) -> Self {
        Self {
            config: Arc::new(config),
            feed,
            store,
            enricher,
            state: ProcessorState::Stopped,
        }
    }

    /// Starts the dispatcher/reaper pair.
    ///
    /// A no-op returning success when an instance is already active.
    pub async fn start(&mut self) -> ControlReply {
        if let ProcessorState::Started { .. } = self.state {
            info!("processor already running");

            return ControlReply::ok("already running");
        }

        match self.start_inner().await {
            Ok(()) => ControlReply::ok("running"),
            Err(err) => {
                error!(error = %err, "failed to start the processor");

                ControlReply::failed(format!("failed to start: {err}"))
            }
        }
    }

    async fn start_inner(&mut self) -> EnrichResult<()> {
        self.config.validate().map_err(|err| {
            enrich_error!(
                ErrorKind::ConfigError,
                "Invalid processor configuration",
                source: err
            )
        })?;

        let start_position = self.resolve_start_position().await?;

        info!(
            namespace = %self.config.watched_namespace,
            max_workers = self.config.max_workers,
            position = %start_position,
            "starting change processor"
        );

        // Every start gets fresh primitives: the previous shutdown signal is
        // already raised and must not leak into the new pair.
        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        let gate = CapacityGate::new(self.config.max_workers as usize);
        let (completion_tx, completion_rx) =
            create_completion_queue(self.config.max_workers as usize);
        let (feed_health_tx, feed_health_rx) = create_feed_health_channel();

        // The reaper starts first so the completion queue always has its
        // consumer before the first handle is pushed.
        let reaper = ReaperWorker::new(completion_rx, shutdown_tx.subscribe())
            .start()
            .await?;

        let dispatcher = DispatcherWorker::new(
            self.config.clone(),
            self.feed.clone(),
            self.store.clone(),
            self.enricher.clone(),
            gate,
            completion_tx,
            shutdown_rx,
            feed_health_tx,
            start_position,
        )
        .start()
        .await?;

        self.state = ProcessorState::Started {
            shutdown_tx,
            dispatcher,
            reaper,
            feed_health_rx,
        };

        Ok(())
    }

    async fn resolve_start_position(&self) -> EnrichResult<EventPosition> {
        match self.config.start_position {
            StartPosition::Fixed(position) => Ok(EventPosition::new(position)),
            StartPosition::Tail => self.feed.tail_position().await,
            StartPosition::Resume => Ok(self
                .store
                .load_cursor()
                .await?
                .unwrap_or(EventPosition::ORIGIN)),
        }
    }

    /// Stops the active dispatcher/reaper pair.
    ///
    /// Signals shutdown, grants the dispatcher the configured grace period
    /// before terminating it, then waits for the reaper to force-drain every
    /// remaining worker. A no-op returning success when already stopped.
    pub async fn stop(&mut self) -> ControlReply {
        let ProcessorState::Started {
            shutdown_tx,
            dispatcher,
            reaper,
            feed_health_rx: _,
        } = mem::replace(&mut self.state, ProcessorState::Stopped)
        else {
            info!("processor already stopped");

            return ControlReply::ok("already stopped");
        };

        info!("stopping change processor");

        shutdown_tx.shutdown();

        let mut errors: Vec<EnrichError> = Vec::new();

        let grace = Duration::from_millis(self.config.stop_grace_ms);
        if let Err(err) = dispatcher.wait_with_grace(grace).await {
            error!(error = %err, "dispatcher stopped with an error");
            errors.push(err);
        }

        // The reaper's drain only finishes once the dispatcher is gone and
        // every worker has been reclaimed.
        if let Err(err) = reaper.wait().await {
            error!(error = %err, "reaper stopped with an error");
            errors.push(err);
        }

        if errors.is_empty() {
            info!("change processor stopped");

            ControlReply::ok("stopped")
        } else {
            let err = EnrichError::from(errors);

            ControlReply::failed(format!("stopped with errors: {err}"))
        }
    }

    /// Returns the current processor status.
    pub fn status(&self) -> ProcessorStatus {
        match &self.state {
            ProcessorState::Stopped => ProcessorStatus::Stopped,
            ProcessorState::Started { feed_health_rx, .. } => match *feed_health_rx.borrow() {
                FeedHealth::Healthy => ProcessorStatus::Running,
                FeedHealth::Degraded => ProcessorStatus::Degraded,
            },
        }
    }
}
