use std::collections::HashMap;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use metrics::{counter, histogram};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tracing::{Instrument, debug, info, warn};

use crate::concurrency::queue::CompletionRx;
use crate::concurrency::shutdown::ShutdownRx;
use crate::enrich_error;
use crate::error::{EnrichError, EnrichResult, ErrorKind};
use crate::metrics::{ENRICH_ANALYZER_RUNTIME_SECONDS, ENRICH_ANALYZERS_REAPED_TOTAL, OUTCOME_LABEL};
use crate::types::{AnalyzerOutcome, RecordId};
use crate::workers::analyzer::AnalyzerWorkerHandle;
use crate::workers::base::{Worker, WorkerHandle};

/// A worker reclaimed by the reaper.
struct ReapedWorker {
    worker_id: u64,
    record_id: RecordId,
    runtime: Duration,
    result: EnrichResult<AnalyzerOutcome>,
}

/// Joins a worker handle, releasing its capacity unit.
async fn reap(handle: AnalyzerWorkerHandle) -> ReapedWorker {
    let worker_id = handle.worker_id();
    let started_at = handle.started_at();

    let (record_id, result) = handle.join().await;

    ReapedWorker {
        worker_id,
        record_id,
        runtime: started_at.elapsed(),
        result,
    }
}

fn log_reaped(reaped: &ReapedWorker) {
    match &reaped.result {
        Ok(outcome) => {
            debug!(
                worker_id = reaped.worker_id,
                record_id = %reaped.record_id,
                outcome = %outcome,
                runtime_ms = reaped.runtime.as_millis() as u64,
                "reclaimed analyzer worker"
            );
            counter!(ENRICH_ANALYZERS_REAPED_TOTAL, OUTCOME_LABEL => outcome.to_string())
                .increment(1);
        }
        Err(err) if err.kind() == ErrorKind::AnalyzerWorkerCancelled => {
            debug!(
                worker_id = reaped.worker_id,
                record_id = %reaped.record_id,
                "reclaimed force-terminated analyzer worker"
            );
            counter!(ENRICH_ANALYZERS_REAPED_TOTAL, OUTCOME_LABEL => "cancelled").increment(1);
        }
        Err(err) => {
            warn!(
                error = %err,
                worker_id = reaped.worker_id,
                record_id = %reaped.record_id,
                "analyzer worker terminated abnormally"
            );
            counter!(ENRICH_ANALYZERS_REAPED_TOTAL, OUTCOME_LABEL => "panicked").increment(1);
        }
    }

    histogram!(ENRICH_ANALYZER_RUNTIME_SECONDS).record(reaped.runtime.as_secs_f64());
}

/// Handle for monitoring the reaper worker.
#[derive(Debug)]
pub struct ReaperWorkerHandle {
    handle: Option<JoinHandle<EnrichResult<()>>>,
}

impl WorkerHandle for ReaperWorkerHandle {
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
            ErrorKind::ReaperCancelled,
            "Reaper worker was cancelled",
            source: err
        )),
        Err(err) => Err(enrich_error!(
            ErrorKind::ReaperPanic,
            "Reaper worker panicked",
            source: err
        )),
    }
}

/// Worker that reclaims capacity from finished analyzers and force-drains the
/// completion queue on shutdown.
///
/// Instead of polling handles in FIFO order, the reaper keeps the set of live
/// workers and waits for whichever finishes first, so a long-running worker
/// never delays the detection of later, already-finished ones.
#[derive(Debug)]
pub struct ReaperWorker {
    completion_rx: CompletionRx<AnalyzerWorkerHandle>,
    shutdown_rx: ShutdownRx,
}

impl ReaperWorker {
    /// Creates a new reaper worker consuming the given completion queue.
    pub fn new(completion_rx: CompletionRx<AnalyzerWorkerHandle>, shutdown_rx: ShutdownRx) -> Self {
        Self {
            completion_rx,
            shutdown_rx,
        }
    }

    async fn run(mut self) -> EnrichResult<()> {
        let mut live = FuturesUnordered::new();
        let mut aborts: HashMap<u64, AbortHandle> = HashMap::new();

        info!("reaper started");

        // Polling phase: runs until shutdown. A closed queue only means the
        // dispatcher is gone; workers already spawned are still reclaimed
        // here as they finish.
        let mut queue_open = true;
        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.signaled() => break,

                maybe_handle = self.completion_rx.pop(), if queue_open => match maybe_handle {
                    Some(handle) => {
                        aborts.insert(handle.worker_id(), handle.abort_handle());
                        live.push(reap(handle));
                    }
                    None => {
                        debug!("completion queue closed");
                        queue_open = false;
                    }
                },

                Some(reaped) = live.next(), if !live.is_empty() => {
                    aborts.remove(&reaped.worker_id);
                    log_reaped(&reaped);
                }
            }
        }

        // Drain phase: force-terminate every still-live worker. Guaranteed to
        // finish: aborted joins complete promptly, and the dispatcher drops
        // its queue side once it observes shutdown.
        info!(
            live_workers = live.len(),
            "shutdown signalled, force-draining workers"
        );

        for abort in aborts.values() {
            abort.abort();
        }

        while let Some(handle) = self.completion_rx.pop().await {
            handle.abort();
            live.push(reap(handle));
        }

        // Every handle yields exactly one capacity release regardless of how
        // its worker finished.
        while let Some(reaped) = live.next().await {
            aborts.remove(&reaped.worker_id);
            log_reaped(&reaped);
        }

        info!("reaper drained all workers");

        Ok(())
    }
}

impl Worker<ReaperWorkerHandle> for ReaperWorker {
    type Error = EnrichError;

    async fn start(self) -> Result<ReaperWorkerHandle, Self::Error> {
        info!("starting reaper worker");

        let span = tracing::info_span!("reaper_worker");
        let handle = tokio::spawn(self.run().instrument(span.or_current()));

        Ok(ReaperWorkerHandle {
            handle: Some(handle),
        })
    }
}
