//! Capacity gate bounding the number of simultaneously live analyzer workers.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::concurrency::shutdown::{ShutdownResult, ShutdownRx};

/// Counting semaphore with a fixed ceiling.
///
/// At all times `live workers == max - available`. Units are returned by
/// dropping the [`CapacityPermit`], so outstanding releases can never exceed
/// acquisitions.
#[derive(Debug, Clone)]
pub struct CapacityGate {
    semaphore: Arc<Semaphore>,
    max: usize,
}

/// A single unit of worker capacity.
///
/// Dropping the permit returns the unit to the gate.
#[derive(Debug)]
pub struct CapacityPermit {
    _permit: OwnedSemaphorePermit,
}

impl CapacityGate {
    /// Creates a gate with `max` available units.
    pub fn new(max: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            max,
        }
    }

    /// Returns the configured ceiling of the gate.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Returns the number of units currently available.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquires one unit, waiting for capacity while still observing the
    /// shutdown signal.
    ///
    /// When shutdown is signalled before a unit becomes available, the
    /// pending acquire is abandoned and nothing is released.
    pub async fn acquire(&self, shutdown_rx: &mut ShutdownRx) -> ShutdownResult<CapacityPermit, ()> {
        if shutdown_rx.is_shutdown() {
            return ShutdownResult::Shutdown(());
        }

        tokio::select! {
            biased;

            _ = shutdown_rx.signaled() => ShutdownResult::Shutdown(()),

            acquired = self.semaphore.clone().acquire_owned() => match acquired {
                Ok(permit) => ShutdownResult::Ok(CapacityPermit { _permit: permit }),
                // The semaphore is never closed by the gate; closure can only
                // happen during teardown and is treated as shutdown.
                Err(_) => ShutdownResult::Shutdown(()),
            },
        }
    }
}
