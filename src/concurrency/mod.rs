//! Per-scope exclusive locking. Each scope's Store is wrapped in one
//! `tokio::sync::Mutex`; the two scopes' locks are independent and are
//! never acquired in opposing order (there is no engine operation that
//! needs both at once — see spec's concurrency model).

use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};

use crate::memory::store::Store;

/// An async-safe handle to one scope's Store. Cloning is cheap (shared
/// `Arc`); the lock is acquired per-operation, held for the whole
/// find_similar→mutate sequence that needs it, then released.
#[derive(Clone)]
pub struct ScopeLock {
    store: Arc<Mutex<Store>>,
}

impl ScopeLock {
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
        }
    }

    /// Acquire exclusive access to the underlying Store for the duration
    /// of the returned guard. Callers that need several Store calls to be
    /// atomic (find_similar + increment_reinforcement, delete + upsert,
    /// ...) must hold one guard across all of them rather than re-locking.
    pub async fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lock_serializes_access() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("index.db"), 3).unwrap();
        let lock = ScopeLock::new(store);

        let stats = lock.lock().await.get_stats().unwrap();
        assert_eq!(stats.total_chunks, 0);
    }
}
