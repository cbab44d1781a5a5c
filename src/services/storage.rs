use crate::error::AppError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;

#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), AppError>;

    /// Fetch blob bytes. Returns `AppError::NotFound` when no blob exists
    /// under the key.
    async fn get(&self, key: &str) -> Result<Vec<u8>, AppError>;

    /// Best-effort removal; deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

pub struct LocalBlobStore {
    base_path: PathBuf,
}

impl LocalBlobStore {
    pub async fn new(base_path: impl Into<PathBuf>) -> Result<Self, AppError> {
        let base_path = base_path.into();
        if !base_path.exists() {
            fs::create_dir_all(&base_path).await?;
        }
        Ok(Self { base_path })
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), AppError> {
        let path = self.base_path.join(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, data).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, AppError> {
        let path = self.base_path.join(key);
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AppError::NotFound(
                anyhow::anyhow!("Blob not found: {}", key),
            )),
            Err(e) => Err(AppError::from(e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        let path = self.base_path.join(key);
        if path.exists() {
            fs::remove_file(path).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        fs::metadata(&self.base_path).await.map_err(|e| {
            AppError::Storage(anyhow::anyhow!(
                "Blob directory {} unavailable: {}",
                self.base_path.display(),
                e
            ))
        })?;
        Ok(())
    }
}

/// Stand-in used when external connections are disabled.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs
            .lock()
            .map(|blobs| blobs.contains_key(key))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|blobs| blobs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<(), AppError> {
        self.blobs
            .lock()
            .map_err(|e| AppError::Storage(anyhow::anyhow!("Blob mutex poisoned: {}", e)))?
            .insert(key.to_string(), data);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, AppError> {
        self.blobs
            .lock()
            .map_err(|e| AppError::Storage(anyhow::anyhow!("Blob mutex poisoned: {}", e)))?
            .get(key)
            .cloned()
            .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Blob not found: {}", key)))
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.blobs
            .lock()
            .map_err(|e| AppError::Storage(anyhow::anyhow!("Blob mutex poisoned: {}", e)))?
            .remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_round_trip_and_not_found() {
        let store = InMemoryBlobStore::new();
        store.put("a/b.txt", b"hello".to_vec()).await.unwrap();
        assert_eq!(store.get("a/b.txt").await.unwrap(), b"hello");

        let err = store.get("missing").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryBlobStore::new();
        store.put("k", vec![1, 2, 3]).await.unwrap();
        store.delete("k").await.unwrap();
        store.delete("k").await.unwrap();
        assert!(!store.contains("k"));
    }

    #[tokio::test]
    async fn local_store_get_missing_is_not_found() {
        let dir = std::env::temp_dir().join(format!("blob-test-{}", uuid::Uuid::new_v4()));
        let store = LocalBlobStore::new(&dir).await.unwrap();
        let err = store.get("nope").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        let _ = tokio::fs::remove_dir_all(&dir).await;
    }
}
