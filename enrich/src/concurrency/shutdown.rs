//! Shutdown signalling for the dispatcher and reaper loops.

use tokio::sync::watch;

/// Transmitter half of the shutdown signal.
///
/// Raising the signal is idempotent and the flag never reverts to `false`.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Raises the shutdown flag, notifying every receiver.
    ///
    /// Returns `true` when this call transitioned the flag, `false` when
    /// shutdown was already signalled.
    pub fn shutdown(&self) -> bool {
        self.0.send_if_modified(|signalled| {
            if *signalled {
                false
            } else {
                *signalled = true;
                true
            }
        })
    }

    /// Creates a new receiver observing this signal.
    ///
    /// Receivers created after the flag was raised still observe it: the
    /// signal is level-triggered, not edge-triggered.
    pub fn subscribe(&self) -> ShutdownRx {
        ShutdownRx(self.0.subscribe())
    }
}

/// Receiver half of the shutdown signal.
#[derive(Debug, Clone)]
pub struct ShutdownRx(watch::Receiver<bool>);

impl ShutdownRx {
    /// Returns `true` once shutdown has been signalled.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Waits until shutdown is signalled, returning immediately when it
    /// already was.
    pub async fn signaled(&mut self) {
        // A dropped transmitter means the controller is gone, which is
        // treated the same as shutdown.
        let _ = self.0.wait_for(|signalled| *signalled).await;
    }
}

/// Creates a connected shutdown signal pair with the flag lowered.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), ShutdownRx(rx))
}

/// Outcome of an operation that races the shutdown signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownResult<T, E> {
    /// The operation completed before shutdown.
    Ok(T),
    /// Shutdown was signalled first; the payload carries whatever was
    /// salvaged.
    Shutdown(E),
}
