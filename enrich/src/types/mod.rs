//! Core data types exchanged between the change feed, the dispatcher, and the
//! analyzer workers.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonically ordered position of an event within the change feed.
///
/// Positions are opaque to the core: they are compared, checkpointed, and
/// handed back to the feed to resume reading, never interpreted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct EventPosition(u64);

impl EventPosition {
    /// The position before the first event of the feed.
    pub const ORIGIN: EventPosition = EventPosition(0);

    /// Creates a position from its raw token.
    pub fn new(position: u64) -> Self {
        Self(position)
    }

    /// Returns the position immediately following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw token backing this position.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a record in the external record store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Creates a record id from an externally assigned identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a fresh random record id.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of mutation reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    /// Whether this mutation warrants spawning an analyzer for the target
    /// record. Deletions leave nothing to enrich.
    pub fn triggers_analysis(&self) -> bool {
        matches!(self, OperationKind::Insert | OperationKind::Update)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Insert => f.write_str("insert"),
            OperationKind::Update => f.write_str("update"),
            OperationKind::Delete => f.write_str("delete"),
        }
    }
}

/// A single mutation notification read from the change feed.
///
/// Events are consumed transiently by the dispatcher and never persisted by
/// the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Position of this event within the feed.
    pub position: EventPosition,
    /// Namespace of the record collection the mutation happened in.
    pub namespace: String,
    /// Kind of mutation.
    pub operation: OperationKind,
    /// Identifier of the mutated record.
    pub target_id: RecordId,
}

/// Processing-status marker carried by every record.
///
/// The marker decides whether an analyzer still has work to do for the
/// record; it is the only record field the core ever inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    /// The record has never been enriched.
    Pending,
    /// An enrichment pass was started but has not completed.
    InProgress,
    /// The record has been enriched.
    Analyzed,
}

impl AnalysisState {
    /// A record stays eligible for enrichment until it has been analyzed.
    pub fn is_eligible(&self) -> bool {
        matches!(self, AnalysisState::Pending | AnalysisState::InProgress)
    }
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalysisState::Pending => f.write_str("pending"),
            AnalysisState::InProgress => f.write_str("in_progress"),
            AnalysisState::Analyzed => f.write_str("analyzed"),
        }
    }
}

/// A record loaded from the external record store.
///
/// The payload is opaque to the core; only the analysis state is inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Identifier of the record.
    pub id: RecordId,
    /// Processing-status marker.
    pub analysis_state: AnalysisState,
    /// Opaque record content owned by the excluded collaborators.
    pub payload: serde_json::Value,
}

impl Record {
    /// Creates a record with an empty payload.
    pub fn new(id: RecordId, analysis_state: AnalysisState) -> Self {
        Self {
            id,
            analysis_state,
            payload: serde_json::Value::Null,
        }
    }
}

/// Terminal outcome of one analyzer worker run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzerOutcome {
    /// The record was enriched and marked analyzed.
    Enriched,
    /// The record no longer exists; nothing was done.
    Missing,
    /// The record was not in an eligible state; nothing was mutated.
    Skipped,
    /// Enrichment failed; the fault was contained to the worker.
    Faulted,
}

impl fmt::Display for AnalyzerOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzerOutcome::Enriched => f.write_str("enriched"),
            AnalyzerOutcome::Missing => f.write_str("missing"),
            AnalyzerOutcome::Skipped => f.write_str("skipped"),
            AnalyzerOutcome::Faulted => f.write_str("faulted"),
        }
    }
}
