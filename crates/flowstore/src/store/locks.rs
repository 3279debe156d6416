//! Per-entity mutation locks.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::entity::TechnicalId;

type LockMap = HashMap<TechnicalId, Arc<AsyncMutex<()>>>;

/// Serializes mutations of one technical ID.
///
/// Locks are created on demand and removed once no task holds or waits on
/// them, so the map only grows with the number of in-flight mutations.
#[derive(Debug, Default)]
pub(crate) struct StreamLocks {
    locks: Arc<Mutex<LockMap>>,
}

impl StreamLocks {
    /// Wait for exclusive access to `id`.
    pub async fn lock(&self, id: TechnicalId) -> StreamGuard {
        let mutex = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(id).or_default())
        };
        // Built before waiting so a cancelled wait still cleans up the entry.
        let mut guard = StreamGuard {
            id,
            mutex: Some(Arc::clone(&mutex)),
            guard: None,
            locks: Arc::clone(&self.locks),
        };
        guard.guard = Some(mutex.lock_owned().await);
        guard
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Held while one task mutates an entity. Also tracks a pending wait, in
/// which case `guard` is still empty.
pub(crate) struct StreamGuard {
    id: TechnicalId,
    mutex: Option<Arc<AsyncMutex<()>>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<LockMap>>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        // Release the tokio lock before inspecting the reference count; the
        // owned guard keeps its own clone of the mutex Arc.
        drop(self.guard.take());
        let Some(mutex) = self.mutex.take() else {
            return;
        };
        let mut locks = self.locks.lock();
        // One reference in the map plus ours: nobody else is waiting.
        if Arc::strong_count(&mutex) == 2 {
            locks.remove(&self.id);
        }
    }
}
