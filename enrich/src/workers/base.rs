use std::future::Future;

use crate::error::EnrichResult;

/// Trait for background workers in the change processor.
///
/// [`Worker`] defines the interface for starting background workers. Workers
/// return handles that can be used to monitor their execution and wait for
/// completion.
pub trait Worker<H>
where
    H: WorkerHandle,
{
    /// Error type returned when worker startup fails.
    type Error;

    /// Starts the worker and returns a handle for monitoring its execution.
    ///
    /// This method begins background processing and returns immediately with
    /// a handle that can be used to wait for completion.
    fn start(self) -> impl Future<Output = Result<H, Self::Error>> + Send;
}

/// Handle for monitoring a running worker.
///
/// The handle is consumed by waiting; panics inside the worker surface as
/// errors rather than propagating to the caller.
pub trait WorkerHandle {
    /// Value produced by the worker on completion.
    type Output;

    /// Waits for the worker to complete and returns the final result.
    fn wait(self) -> impl Future<Output = EnrichResult<Self::Output>> + Send;
}
