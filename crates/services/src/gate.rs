use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use classroom_core::model::SubmissionKey;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-submission write gates.
///
/// Every service that writes answers or status for a key holds that key's gate
/// for the duration of the read-modify-write, so at most one such write is in
/// flight per key within the process.
#[derive(Debug, Default)]
pub struct WriteGates {
    gates: Mutex<HashMap<SubmissionKey, Arc<AsyncMutex<()>>>>,
}

impl WriteGates {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `key`.
    pub async fn acquire(&self, key: SubmissionKey) -> OwnedMutexGuard<()> {
        let gate = {
            let mut gates = self.gates.lock().unwrap_or_else(PoisonError::into_inner);
            // Gates nobody holds or waits on can go.
            gates.retain(|k, gate| *k == key || Arc::strong_count(gate) > 1);
            Arc::clone(gates.entry(key).or_default())
        };
        gate.lock_owned().await
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.gates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
