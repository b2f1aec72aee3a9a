use std::collections::HashMap;
use std::sync::Arc;

use stream_protocol::{BlobError, BlobStore};
use tokio::sync::RwLock;

/// In-memory stand-in for the segment blob store, keyed the same way the
/// real backend is: `stream/<b64url(stream_id)>/segment-<read_seq>.seg`.
///
/// PUT is idempotent by key, matching the contract the engine relies on.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.blobs.read().await.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), BlobError> {
        self.blobs.write().await.insert(key.to_owned(), body);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| BlobError::NotFound(key.to_owned()))
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        self.blobs.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let store = MemoryBlobStore::new();
        store.put("k1", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("k1").await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let store = MemoryBlobStore::new();
        assert!(matches!(
            store.get("missing").await,
            Err(BlobError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn put_is_idempotent_by_key() {
        let store = MemoryBlobStore::new();
        store.put("k1", b"first".to_vec()).await.unwrap();
        store.put("k1", b"first".to_vec()).await.unwrap();
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let store = MemoryBlobStore::new();
        store.put("k1", b"x".to_vec()).await.unwrap();
        store.delete("k1").await.unwrap();
        assert!(!store.contains("k1").await);
    }
}
