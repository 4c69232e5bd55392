use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;

use crate::enrich_error;
use crate::enrichment::base::Enricher;
use crate::error::{EnrichResult, ErrorKind};
use crate::types::{Record, RecordId};

/// Inner state of [`MemoryEnricher`].
#[derive(Debug, Default)]
struct Inner {
    /// Records whose enrichment was entered, in entry order.
    started: Vec<RecordId>,
    /// Records whose enrichment completed, in completion order.
    enriched: Vec<RecordId>,
    /// Records whose enrichment fails with an error.
    fail_on: HashSet<RecordId>,
    /// Records whose enrichment panics.
    panic_on: HashSet<RecordId>,
    /// When set, enrichment parks until the record is released.
    hold_all: bool,
    /// Records individually released while holding.
    released: HashSet<RecordId>,
}

/// In-memory enricher.
///
/// [`MemoryEnricher`] records which enrichments were started and completed,
/// and lets tests keep workers deliberately running (hold/release) or inject
/// faults and panics for specific records.
#[derive(Debug, Clone, Default)]
pub struct MemoryEnricher {
    inner: Arc<Mutex<Inner>>,
    release_notify: Arc<Notify>,
}

impl MemoryEnricher {
    /// Creates a new enricher with no holds or injected faults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks every subsequent enrichment until its record is released.
    pub fn hold_all(&self) {
        self.inner.lock().unwrap().hold_all = true;
    }

    /// Releases one held record.
    pub fn release(&self, id: &RecordId) {
        let mut inner = self.inner.lock().unwrap();
        inner.released.insert(id.clone());
        drop(inner);

        self.release_notify.notify_waiters();
    }

    /// Releases every held record and stops holding new ones.
    pub fn release_all(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.hold_all = false;
        drop(inner);

        self.release_notify.notify_waiters();
    }

    /// Makes enrichment of `id` fail with an error.
    pub fn fail_on(&self, id: &RecordId) {
        self.inner.lock().unwrap().fail_on.insert(id.clone());
    }

    /// Makes enrichment of `id` panic.
    pub fn panic_on(&self, id: &RecordId) {
        self.inner.lock().unwrap().panic_on.insert(id.clone());
    }

    /// Records whose enrichment was entered, in entry order.
    pub fn started_ids(&self) -> Vec<RecordId> {
        self.inner.lock().unwrap().started.clone()
    }

    /// Records whose enrichment completed, in completion order.
    pub fn enriched_ids(&self) -> Vec<RecordId> {
        self.inner.lock().unwrap().enriched.clone()
    }
}

impl Enricher for MemoryEnricher {
    async fn enrich(&self, record: &Record) -> EnrichResult<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            inner.started.push(record.id.clone());
        }

        // Park while held, waking on every release.
        loop {
            let notified = self.release_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let inner = self.inner.lock().unwrap();
                if !inner.hold_all || inner.released.contains(&record.id) {
                    break;
                }
            }

            notified.await;
        }

        let (should_panic, should_fail) = {
            let inner = self.inner.lock().unwrap();
            (
                inner.panic_on.contains(&record.id),
                inner.fail_on.contains(&record.id),
            )
        };

        if should_panic {
            panic!("injected enrichment panic for record {}", record.id);
        }

        if should_fail {
            return Err(enrich_error!(
                ErrorKind::EnrichmentFailed,
                "Enrichment failed",
                format!("injected enrichment fault for record {}", record.id)
            ));
        }

        let mut inner = self.inner.lock().unwrap();
        inner.enriched.push(record.id.clone());

        Ok(())
    }
}
