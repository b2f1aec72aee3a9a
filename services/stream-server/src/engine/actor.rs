use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Serializes all mutating operations on a single stream (append, rotate,
/// close, delete) behind one lock per stream id, so two concurrent PUT/POST
/// requests against the same stream never interleave their tail advances.
/// Lazily created, double-checked-lock, grown on first use per stream id.
#[derive(Default)]
pub struct ActorRegistry {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl ActorRegistry {
    pub fn new() -> Self {
        ActorRegistry {
            locks: RwLock::new(HashMap::new()),
        }
    }

    async fn get_or_create(&self, stream_id: &str) -> Arc<Mutex<()>> {
        if let Some(lock) = self.locks.read().await.get(stream_id) {
            return lock.clone();
        }
        let mut locks = self.locks.write().await;
        locks
            .entry(stream_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the single-writer critical section for `stream_id`. The
    /// returned guard must be held for the duration of the read-modify-write
    /// sequence (fetch meta, validate, stage op, advance tail).
    pub async fn lock(&self, stream_id: &str) -> OwnedMutexGuard<()> {
        let lock = self.get_or_create(stream_id).await;
        lock.lock_owned().await
    }

    /// Drop a stream's lock entry after a successful DELETE, so the registry
    /// doesn't grow unboundedly for short-lived streams. Safe to call even
    /// while another caller holds a cloned `Arc`: they keep running against
    /// the now-detached lock and the map entry is simply re-created fresh on
    /// next use.
    pub async fn forget(&self, stream_id: &str) {
        self.locks.write().await.remove(stream_id);
    }

    pub async fn len(&self) -> usize {
        self.locks.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_stream_locks_serialize() {
        let registry = Arc::new(ActorRegistry::new());
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let r1 = registry.clone();
        let o1 = order.clone();
        let h1 = tokio::spawn(async move {
            let _g = r1.lock("s1").await;
            tokio::time::sleep(Duration::from_millis(20)).await;
            o1.lock().await.push(1);
        });

        tokio::time::sleep(Duration::from_millis(5)).await;
        let r2 = registry.clone();
        let o2 = order.clone();
        let h2 = tokio::spawn(async move {
            let _g = r2.lock("s1").await;
            o2.lock().await.push(2);
        });

        h1.await.unwrap();
        h2.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn different_streams_do_not_contend() {
        let registry = ActorRegistry::new();
        let g1 = registry.lock("a").await;
        let g2 = registry.lock("b").await;
        drop(g1);
        drop(g2);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn forget_removes_the_entry() {
        let registry = ActorRegistry::new();
        let _ = registry.lock("a").await;
        registry.forget("a").await;
        assert_eq!(registry.len().await, 0);
    }
}
