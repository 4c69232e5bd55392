use std::future::Future;

use crate::error::EnrichResult;
use crate::types::Record;

/// The opaque enrichment routine owned by the excluded collaborators.
///
/// Given a loaded, eligible record, an implementation derives additional
/// fields and persists them back to the record store. The core never inspects
/// what was derived; it only contains failures and flips the analysis marker
/// afterwards.
pub trait Enricher {
    /// Enriches a single record.
    fn enrich(&self, record: &Record) -> impl Future<Output = EnrichResult<()>> + Send;
}
