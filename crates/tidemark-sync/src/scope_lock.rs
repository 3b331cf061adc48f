//! In-process lock registry serializing runs over the same scope.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Hands out one async lock per key. Runs over disjoint keys never wait on
/// each other.
#[derive(Debug, Default, Clone)]
pub struct ScopeLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

/// Held locks; released on drop.
#[derive(Debug)]
pub struct ScopeGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire every key. Keys are taken in sorted order so overlapping runs
    /// cannot deadlock.
    pub async fn acquire<I, K>(&self, keys: I) -> ScopeGuard
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys: BTreeSet<String> = keys.into_iter().map(Into::into).collect();
        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = self.lock_for(&key);
            if lock.try_lock().is_err() {
                tracing::info!(scope = %key, "Waiting for an in-flight run on this scope");
            }
            guards.push(lock.lock_owned().await);
        }
        ScopeGuard { _guards: guards }
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = match self.inner.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_scope_waits() {
        let locks = ScopeLocks::new();
        let guard = locks.acquire(["111/us-east-1"]).await;

        let other = locks.clone();
        let waiter = tokio::spawn(async move {
            let _g = other.acquire(["111/us-east-1"]).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn disjoint_scopes_do_not_wait() {
        let locks = ScopeLocks::new();
        let _a = locks.acquire(["111/us-east-1"]).await;
        tokio::time::timeout(Duration::from_millis(100), locks.acquire(["111/eu-west-1"]))
            .await
            .unwrap();
    }
}
