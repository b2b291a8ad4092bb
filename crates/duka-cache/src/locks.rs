use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

#[derive(Debug, Error)]
#[error("lock acquire timed out after {waited_ms}ms for key {key}")]
pub struct LockTimeout {
    pub key: String,
    pub waited_ms: u64,
}

/// Per-key advisory lock registry.
///
/// Serializes message processing within one conversation: the worker acquires
/// `conv:{conversation_id}` for the duration of a turn. Locks are plain tokio
/// mutexes held behind `Arc`, so a guard keeps its lock alive even if the
/// registry entry is concurrently replaced.
pub struct LockRegistry {
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Messages that arrived while the lock was held, to be merged into the
    /// in-flight turn. Keyed the same as the lock.
    merge_buffers: DashMap<String, Vec<String>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
            merge_buffers: DashMap::new(),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the lock for `key`, waiting up to `timeout`.
    pub async fn acquire(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<OwnedMutexGuard<()>, LockTimeout> {
        let lock = self.lock_for(key);
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => Err(LockTimeout {
                key: key.to_string(),
                waited_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Non-blocking acquire. `None` means another holder is active.
    pub fn try_acquire(&self, key: &str) -> Option<OwnedMutexGuard<()>> {
        self.lock_for(key).try_lock_owned().ok()
    }

    /// True when somebody currently holds the lock for `key`.
    pub fn is_held(&self, key: &str) -> bool {
        self.locks
            .get(key)
            .map(|l| l.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Stash a message for the in-flight turn on `key` to pick up.
    pub fn push_merge(&self, key: &str, text: String) {
        debug!(key, "merging message into in-flight turn");
        self.merge_buffers.entry(key.to_string()).or_default().push(text);
    }

    /// Drain everything merged while the current turn ran. Called by the lock
    /// holder before formatting its reply.
    pub fn drain_merged(&self, key: &str) -> Vec<String> {
        self.merge_buffers
            .remove(key)
            .map(|(_, v)| v)
            .unwrap_or_default()
    }
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_for_first() {
        let reg = Arc::new(LockRegistry::new());
        let g1 = reg.acquire("conv:1", Duration::from_secs(1)).await.unwrap();
        assert!(reg.is_held("conv:1"));

        let reg2 = Arc::clone(&reg);
        let waiter = tokio::spawn(async move {
            reg2.acquire("conv:1", Duration::from_secs(2)).await.unwrap();
        });

        drop(g1);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn acquire_times_out_under_contention() {
        let reg = LockRegistry::new();
        let _g = reg.acquire("conv:1", Duration::from_secs(1)).await.unwrap();
        let err = reg.acquire("conv:1", Duration::from_millis(20)).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn different_keys_do_not_contend() {
        let reg = LockRegistry::new();
        let _g1 = reg.acquire("conv:1", Duration::from_secs(1)).await.unwrap();
        let _g2 = reg.acquire("conv:2", Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn merge_buffer_round_trip() {
        let reg = LockRegistry::new();
        let _g = reg.try_acquire("conv:1").unwrap();
        reg.push_merge("conv:1", "also this".to_string());
        reg.push_merge("conv:1", "and this".to_string());
        assert_eq!(reg.drain_merged("conv:1"), vec!["also this", "and this"]);
        assert!(reg.drain_merged("conv:1").is_empty());
    }
}
