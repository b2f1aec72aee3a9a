use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, RwLock};

/// Wakes long-poll waiters parked on a stream once an append lands.
/// One `Notify` per stream, grown lazily like the actor registry.
#[derive(Default)]
pub struct LongPollRegistry {
    waiters: RwLock<HashMap<String, Arc<Notify>>>,
}

impl LongPollRegistry {
    pub fn new() -> Self {
        LongPollRegistry {
            waiters: RwLock::new(HashMap::new()),
        }
    }

    async fn get_or_create(&self, stream_id: &str) -> Arc<Notify> {
        if let Some(n) = self.waiters.read().await.get(stream_id) {
            return n.clone();
        }
        let mut waiters = self.waiters.write().await;
        waiters
            .entry(stream_id.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    /// Called by the append path after a commit, so anyone parked on this
    /// stream re-checks the tail immediately.
    pub async fn notify(&self, stream_id: &str) {
        self.get_or_create(stream_id).await.notify_waiters();
    }

    /// Parks until either notified or `timeout` elapses. Returns `true` if
    /// woken by a notification, `false` on timeout. Callers must re-check
    /// the stream tail after waking, a notification only means "something
    /// changed," not "your specific offset is now available."
    pub async fn wait(&self, stream_id: &str, timeout: Duration) -> bool {
        let notify = self.get_or_create(stream_id).await;
        tokio::select! {
            _ = notify.notified() => true,
            _ = tokio::time::sleep(timeout) => false,
        }
    }

    pub async fn forget(&self, stream_id: &str) {
        self.waiters.write().await.remove(stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn notify_wakes_a_parked_waiter() {
        let registry = Arc::new(LongPollRegistry::new());
        let r = registry.clone();
        let handle = tokio::spawn(async move { r.wait("s1", Duration::from_secs(5)).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.notify("s1").await;

        assert!(handle.await.unwrap());
    }

    #[tokio::test]
    async fn wait_times_out_when_never_notified() {
        let registry = LongPollRegistry::new();
        let woken = registry.wait("s1", Duration::from_millis(20)).await;
        assert!(!woken);
    }
}
