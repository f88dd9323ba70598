//! Per-model async locks.
//!
//! Operations on different models proceed in parallel; operations on the
//! same model serialize. Guards are owned so they can be held across
//! `.await` points.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

#[derive(Default, Clone)]
pub struct ModelLocks {
    inner: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl ModelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        map.entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `name`.
    pub async fn lock(&self, name: &str) -> OwnedMutexGuard<()> {
        self.slot(name).lock_owned().await
    }

    /// Take the lock only if nobody holds it.
    pub fn try_lock(&self, name: &str) -> Option<OwnedMutexGuard<()>> {
        self.slot(name).try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_model_serializes() {
        let locks = ModelLocks::new();
        let guard = locks.lock("sorter").await;
        assert!(locks.try_lock("sorter").is_none());
        assert!(locks.try_lock("router").is_some());
        drop(guard);
        assert!(locks.try_lock("sorter").is_some());
    }
}
