use std::path::{Path, PathBuf};

use stream_protocol::{BlobError, BlobStore};
use tokio::fs;

/// Filesystem-backed segment blob store. Keys are slash-separated
/// (`stream/<id>/segment-<n>.seg`); each component becomes a directory so a
/// stream's segments live together on disk.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsBlobStore { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait::async_trait]
impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> Result<(), BlobError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| BlobError::Backend(e.to_string()))?;
        }
        // Idempotent by key: a segment blob key is only ever written once
        // by the rotation path, so an existing file at this path is a
        // previous, identical write, not overwritten.
        if fs::metadata(&path).await.is_ok() {
            return Ok(());
        }
        let tmp_path = tmp_path_for(&path);
        fs::write(&tmp_path, &body)
            .await
            .map_err(|e| BlobError::Backend(e.to_string()))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| BlobError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobError> {
        let path = self.path_for(key);
        fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BlobError::NotFound(key.to_string())
            } else {
                BlobError::Backend(e.to_string())
            }
        })
    }

    async fn delete(&self, key: &str) -> Result<(), BlobError> {
        let path = self.path_for(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(BlobError::Backend(e.to_string())),
        }
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let dir = tempfile_dir();
        let store = FsBlobStore::new(&dir);
        store.put("stream/s1/segment-0.seg", b"hello".to_vec()).await.unwrap();
        let body = store.get("stream/s1/segment-0.seg").await.unwrap();
        assert_eq!(body, b"hello");
        fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn get_missing_key_is_not_found() {
        let dir = tempfile_dir();
        let store = FsBlobStore::new(&dir);
        let err = store.get("stream/s1/segment-0.seg").await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound(_)));
        fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn put_is_idempotent_by_key() {
        let dir = tempfile_dir();
        let store = FsBlobStore::new(&dir);
        store.put("k", b"first".to_vec()).await.unwrap();
        store.put("k", b"second".to_vec()).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"first");
        fs::remove_dir_all(&dir).await.ok();
    }

    fn tempfile_dir() -> PathBuf {
        std::env::temp_dir().join(format!(
            "stream-server-blob-test-{}",
            std::process::id() as u64 * 1000 + (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .subsec_nanos() as u64
                % 1000)
        ))
    }
}
