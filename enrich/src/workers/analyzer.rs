use std::time::Instant;

use tokio::task::{AbortHandle, JoinHandle};
use tracing::{Instrument, debug, error};

use crate::concurrency::gate::CapacityPermit;
use crate::enrich_error;
use crate::enrichment::base::Enricher;
use crate::error::{EnrichError, EnrichResult, ErrorKind};
use crate::store::base::RecordStore;
use crate::types::{AnalyzerOutcome, RecordId};
use crate::workers::base::{Worker, WorkerHandle};

/// Handle to a spawned analyzer worker.
///
/// The handle owns the worker's capacity unit: it is released exactly once,
/// when the handle is joined or dropped, regardless of how the worker
/// finished. Exactly one live handle exists per spawned worker; a given
/// record may have more than one concurrently live handle, which is an
/// accepted race rather than an invariant.
#[derive(Debug)]
pub struct AnalyzerWorkerHandle {
    worker_id: u64,
    record_id: RecordId,
    started_at: Instant,
    permit: CapacityPermit,
    join: JoinHandle<AnalyzerOutcome>,
}

impl AnalyzerWorkerHandle {
    /// Returns the dispatcher-assigned id of this worker.
    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    /// Returns the id of the record this worker enriches.
    pub fn record_id(&self) -> &RecordId {
        &self.record_id
    }

    /// Returns the instant the worker was spawned at.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Returns a handle that can terminate the worker task.
    pub fn abort_handle(&self) -> AbortHandle {
        self.join.abort_handle()
    }

    /// Forcibly terminates the worker task.
    pub fn abort(&self) {
        self.join.abort();
    }

    /// Waits for the worker task and releases its capacity unit.
    ///
    /// Returns the record id together with the worker outcome. Panics and
    /// cancellations surface as errors instead of propagating.
    pub async fn join(self) -> (RecordId, EnrichResult<AnalyzerOutcome>) {
        let result = self.join.await.map_err(|err| {
            if err.is_cancelled() {
                enrich_error!(
                    ErrorKind::AnalyzerWorkerCancelled,
                    "Analyzer worker was cancelled",
                    source: err
                )
            } else {
                enrich_error!(
                    ErrorKind::AnalyzerWorkerPanic,
                    "Analyzer worker panicked",
                    source: err
                )
            }
        });

        // The permit travels with the handle and is dropped here, releasing
        // exactly one capacity unit for this worker.
        drop(self.permit);

        (self.record_id, result)
    }
}

impl WorkerHandle for AnalyzerWorkerHandle {
    type Output = AnalyzerOutcome;

    async fn wait(self) -> EnrichResult<AnalyzerOutcome> {
        let (_, result) = self.join().await;

        result
    }
}

/// Worker that enriches exactly one record, isolated from the dispatcher and
/// reaper failure domain.
///
/// The worker runs as its own task: a panic during enrichment is contained by
/// the task boundary and can never corrupt supervisor state.
#[derive(Debug)]
pub struct AnalyzerWorker<S, E> {
    worker_id: u64,
    record_id: RecordId,
    store: S,
    enricher: E,
    permit: CapacityPermit,
}

impl<S, E> AnalyzerWorker<S, E> {
    /// Creates a new analyzer worker bound to a single record.
    ///
    /// The capacity unit acquired by the dispatcher travels with the worker;
    /// if startup fails the unit is released when the worker is dropped.
    pub fn new(
        worker_id: u64,
        record_id: RecordId,
        store: S,
        enricher: E,
        permit: CapacityPermit,
    ) -> Self {
        Self {
            worker_id,
            record_id,
            store,
            enricher,
            permit,
        }
    }
}

impl<S, E> Worker<AnalyzerWorkerHandle> for AnalyzerWorker<S, E>
where
    S: RecordStore + Send + Sync + 'static,
    E: Enricher + Send + Sync + 'static,
{
    type Error = EnrichError;

    async fn start(self) -> Result<AnalyzerWorkerHandle, Self::Error> {
        let span = tracing::info_span!(
            "analyzer_worker",
            worker_id = self.worker_id,
            record_id = %self.record_id
        );

        let record_id = self.record_id.clone();
        let store = self.store;
        let enricher = self.enricher;

        let task = {
            let record_id = record_id.clone();
            async move {
                match analyze_record(&record_id, &store, &enricher).await {
                    Ok(outcome) => {
                        debug!(outcome = %outcome, "analyzer worker finished");
                        outcome
                    }
                    Err(err) => {
                        // Faults are contained here: the reaper only observes
                        // a finished worker.
                        error!(error = %err, "analyzer worker failed");
                        AnalyzerOutcome::Faulted
                    }
                }
            }
        }
        .instrument(span.or_current());

        let join = tokio::spawn(task);

        Ok(AnalyzerWorkerHandle {
            worker_id: self.worker_id,
            record_id,
            started_at: Instant::now(),
            permit: self.permit,
            join,
        })
    }
}

/// Enriches a single record.
///
/// Missing and ineligible records finish cleanly without mutation; otherwise
/// the enrichment routine runs and the record is marked analyzed afterwards.
async fn analyze_record<S, E>(
    record_id: &RecordId,
    store: &S,
    enricher: &E,
) -> EnrichResult<AnalyzerOutcome>
where
    S: RecordStore,
    E: Enricher,
{
    let Some(record) = store.load_record(record_id).await? else {
        debug!("record no longer exists, nothing to analyze");

        return Ok(AnalyzerOutcome::Missing);
    };

    if !record.analysis_state.is_eligible() {
        debug!(state = %record.analysis_state, "record not eligible, skipping");

        return Ok(AnalyzerOutcome::Skipped);
    }

    enricher.enrich(&record).await?;
    store.mark_analyzed(record_id).await?;

    Ok(AnalyzerOutcome::Enriched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::concurrency::gate::CapacityGate;
    use crate::concurrency::shutdown::{ShutdownResult, create_shutdown_channel};
    use crate::enrichment::memory::MemoryEnricher;
    use crate::store::memory::MemoryRecordStore;
    use crate::types::{AnalysisState, Record};

    async fn acquire_permit(gate: &CapacityGate) -> CapacityPermit {
        let (_tx, mut rx) = create_shutdown_channel();
        match gate.acquire(&mut rx).await {
            ShutdownResult::Ok(permit) => permit,
            ShutdownResult::Shutdown(()) => unreachable!("gate has capacity"),
        }
    }

    async fn run_worker(
        record_id: RecordId,
        store: &MemoryRecordStore,
        enricher: &MemoryEnricher,
        gate: &CapacityGate,
    ) -> (RecordId, EnrichResult<AnalyzerOutcome>) {
        let permit = acquire_permit(gate).await;
        let worker = AnalyzerWorker::new(1, record_id, store.clone(), enricher.clone(), permit);
        let handle = worker.start().await.unwrap();

        handle.join().await
    }

    #[tokio::test]
    async fn eligible_record_is_enriched_and_marked() {
        let store = MemoryRecordStore::new();
        let enricher = MemoryEnricher::new();
        let gate = CapacityGate::new(1);

        let record = Record::new(RecordId::random(), AnalysisState::Pending);
        store.insert_record(record.clone());

        let (_, result) = run_worker(record.id.clone(), &store, &enricher, &gate).await;
        assert_eq!(result.unwrap(), AnalyzerOutcome::Enriched);

        let loaded = store.get_record(&record.id).unwrap();
        assert_eq!(loaded.analysis_state, AnalysisState::Analyzed);
        assert_eq!(enricher.enriched_ids(), vec![record.id]);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn missing_record_is_a_clean_noop() {
        let store = MemoryRecordStore::new();
        let enricher = MemoryEnricher::new();
        let gate = CapacityGate::new(1);

        let (_, result) = run_worker(RecordId::random(), &store, &enricher, &gate).await;

        assert_eq!(result.unwrap(), AnalyzerOutcome::Missing);
        assert!(enricher.started_ids().is_empty());
    }

    #[tokio::test]
    async fn ineligible_record_is_not_mutated() {
        let store = MemoryRecordStore::new();
        let enricher = MemoryEnricher::new();
        let gate = CapacityGate::new(1);

        let mut record = Record::new(RecordId::random(), AnalysisState::Analyzed);
        record.payload = serde_json::json!({"asn": 64496});
        store.insert_record(record.clone());

        let (_, result) = run_worker(record.id.clone(), &store, &enricher, &gate).await;

        assert_eq!(result.unwrap(), AnalyzerOutcome::Skipped);
        assert_eq!(store.get_record(&record.id), Some(record));
        assert!(enricher.started_ids().is_empty());
    }

    #[tokio::test]
    async fn second_run_on_an_analyzed_record_performs_no_mutation() {
        let store = MemoryRecordStore::new();
        let enricher = MemoryEnricher::new();
        let gate = CapacityGate::new(1);

        let record = Record::new(RecordId::random(), AnalysisState::Pending);
        store.insert_record(record.clone());

        let (_, first) = run_worker(record.id.clone(), &store, &enricher, &gate).await;
        assert_eq!(first.unwrap(), AnalyzerOutcome::Enriched);

        let (_, second) = run_worker(record.id.clone(), &store, &enricher, &gate).await;
        assert_eq!(second.unwrap(), AnalyzerOutcome::Skipped);
        assert_eq!(enricher.enriched_ids(), vec![record.id]);
    }

    #[tokio::test]
    async fn enrichment_fault_is_contained() {
        let store = MemoryRecordStore::new();
        let enricher = MemoryEnricher::new();
        let gate = CapacityGate::new(1);

        let record = Record::new(RecordId::random(), AnalysisState::Pending);
        store.insert_record(record.clone());
        enricher.fail_on(&record.id);

        let (_, result) = run_worker(record.id.clone(), &store, &enricher, &gate).await;

        assert_eq!(result.unwrap(), AnalyzerOutcome::Faulted);
        let loaded = store.get_record(&record.id).unwrap();
        assert_eq!(loaded.analysis_state, AnalysisState::Pending);
        assert_eq!(gate.available(), 1);
    }

    #[tokio::test]
    async fn enrichment_panic_surfaces_as_an_error_and_releases_capacity() {
        let store = MemoryRecordStore::new();
        let enricher = MemoryEnricher::new();
        let gate = CapacityGate::new(1);

        let record = Record::new(RecordId::random(), AnalysisState::Pending);
        store.insert_record(record.clone());
        enricher.panic_on(&record.id);

        let (_, result) = run_worker(record.id.clone(), &store, &enricher, &gate).await;

        assert_eq!(
            result.unwrap_err().kind(),
            ErrorKind::AnalyzerWorkerPanic
        );
        assert_eq!(gate.available(), 1);
    }
}
