//! Bounded FIFO of spawned-but-not-yet-reclaimed analyzer worker handles.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Transmitter half of the completion queue, used by the dispatcher.
#[derive(Debug, Clone)]
pub struct CompletionTx<H>(mpsc::Sender<H>);

impl<H> CompletionTx<H> {
    /// Pushes a handle onto the tail of the queue, waiting while it is full.
    ///
    /// Returns the handle back when the reaper side is gone, so the caller
    /// can still reclaim its resources.
    pub async fn push(&self, handle: H) -> Result<(), H> {
        self.0.send(handle).await.map_err(|err| err.0)
    }

    /// Attempts to push a handle without waiting.
    pub fn try_push(&self, handle: H) -> Result<(), TrySendError<H>> {
        self.0.try_send(handle)
    }
}

/// Receiver half of the completion queue, owned by the reaper.
#[derive(Debug)]
pub struct CompletionRx<H>(mpsc::Receiver<H>);

impl<H> CompletionRx<H> {
    /// Pops the front handle, waiting while the queue is empty.
    ///
    /// Returns `None` once every transmitter is dropped and the queue is
    /// drained.
    pub async fn pop(&mut self) -> Option<H> {
        self.0.recv().await
    }
}

/// Creates a completion queue bounded at `capacity`.
///
/// Capacity should equal the gate ceiling: with at most that many live
/// workers, a push can only ever block momentarily.
pub fn create_completion_queue<H>(capacity: usize) -> (CompletionTx<H>, CompletionRx<H>) {
    let (tx, rx) = mpsc::channel(capacity);
    (CompletionTx(tx), CompletionRx(rx))
}
