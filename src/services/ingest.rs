use crate::config::UploadConfig;
use crate::error::AppError;
use crate::models::{Document, DocumentStatus, ProcessingEvent};
use crate::services::broker::EventPublisher;
use crate::services::metadata::MetadataStore;
use crate::services::storage::BlobStore;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Orchestrates the upload write sequence across the three independently
/// failing systems: blob write, then metadata insert, then event publish.
///
/// There is no transaction spanning them. Ordering plus a compensating blob
/// delete keeps partial failures invisible to clients, and the reconciler
/// sweep repairs a missed publish. The consistency window is bounded by the
/// reconcile interval: a document whose event was lost stays Uploaded until
/// the next sweep republishes it.
pub struct UploadCoordinator {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    publisher: Arc<dyn EventPublisher>,
    upload: UploadConfig,
}

impl UploadCoordinator {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        publisher: Arc<dyn EventPublisher>,
        upload: UploadConfig,
    ) -> Self {
        Self {
            store,
            blobs,
            publisher,
            upload,
        }
    }

    pub async fn accept(
        &self,
        data: Vec<u8>,
        filename: &str,
        content_type: &str,
        owner_id: &str,
    ) -> Result<Document, AppError> {
        self.validate(&data, filename, content_type)?;

        let checksum = format!("{:x}", Sha256::digest(&data));
        let mut document = Document::new(
            owner_id.to_string(),
            filename.to_string(),
            content_type.to_string(),
            data.len() as i64,
            String::new(),
            checksum,
        );
        document.storage_key = format!("{}/{}", document.id, filename);

        tracing::info!(
            document_id = %document.id,
            filename = %filename,
            size = data.len(),
            "Document upload started"
        );

        // 1. Durable blob write, retried on transient storage errors.
        self.put_with_retry(&document.storage_key, &data).await?;

        // 2. Metadata insert, visible to clients only once the blob exists.
        document.status = DocumentStatus::Uploaded;
        if let Err(insert_err) = self.store.insert(&document).await {
            tracing::error!(
                document_id = %document.id,
                error = %insert_err,
                "Metadata insert failed, compensating blob delete"
            );
            // An orphan blob with no metadata record is invisible to clients;
            // the delete is best-effort and never retried.
            if let Err(delete_err) = self.blobs.delete(&document.storage_key).await {
                tracing::warn!(
                    storage_key = %document.storage_key,
                    error = %delete_err,
                    "Compensating blob delete failed, orphan blob left behind"
                );
            }
            return Err(insert_err);
        }

        // 3. Event publish. A failure here is repaired by the reconciler, so
        // the upload still succeeds and the document stays Uploaded.
        let event = ProcessingEvent::new(
            document.id.clone(),
            document.storage_key.clone(),
            document.checksum.clone(),
            0,
        );
        if let Err(publish_err) = self.publisher.publish(&event).await {
            metrics::counter!("document_publish_failed").increment(1);
            tracing::warn!(
                document_id = %document.id,
                error = %publish_err,
                "Event publish failed, document remains uploaded until reconciliation"
            );
        }

        metrics::counter!("document_uploads_total").increment(1);
        tracing::info!(document_id = %document.id, "Document upload completed");
        Ok(document)
    }

    fn validate(&self, data: &[u8], filename: &str, content_type: &str) -> Result<(), AppError> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| format!(".{}", ext.to_lowercase()))
            .unwrap_or_default();

        if !self.upload.allowed_extensions.contains(&extension) {
            return Err(AppError::Validation(anyhow::anyhow!(
                "File extension {} not allowed. Allowed: {}",
                if extension.is_empty() { "(none)" } else { &extension },
                self.upload.allowed_extensions.join(", ")
            )));
        }

        // Multipart content types may carry parameters ("text/plain; charset=utf-8").
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_lowercase();
        if !self.upload.allowed_content_types.contains(&media_type) {
            return Err(AppError::Validation(anyhow::anyhow!(
                "Content type {} not allowed",
                media_type
            )));
        }

        if data.len() > self.upload.max_file_size {
            return Err(AppError::Validation(anyhow::anyhow!(
                "File size exceeds maximum allowed size of {} bytes",
                self.upload.max_file_size
            )));
        }

        Ok(())
    }

    async fn put_with_retry(&self, key: &str, data: &[u8]) -> Result<(), AppError> {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..Default::default()
        };

        retry(backoff, || async {
            self.blobs
                .put(key, data.to_vec())
                .await
                .map_err(backoff::Error::transient)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DocumentStatus;
    use crate::services::broker::InMemoryBroker;
    use crate::services::metadata::{InMemoryMetadataStore, StatusChange};
    use crate::services::storage::InMemoryBlobStore;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    fn upload_config() -> UploadConfig {
        UploadConfig {
            allowed_extensions: vec![".pdf".into(), ".txt".into(), ".json".into()],
            allowed_content_types: vec![
                "application/pdf".into(),
                "text/plain".into(),
                "application/json".into(),
            ],
            max_file_size: 1024,
        }
    }

    struct Fixture {
        store: Arc<InMemoryMetadataStore>,
        blobs: Arc<InMemoryBlobStore>,
        broker: Arc<InMemoryBroker>,
        coordinator: UploadCoordinator,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryMetadataStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let broker = Arc::new(InMemoryBroker::new(Duration::from_millis(50)));
        let coordinator = UploadCoordinator::new(
            store.clone(),
            blobs.clone(),
            broker.clone(),
            upload_config(),
        );
        Fixture {
            store,
            blobs,
            broker,
            coordinator,
        }
    }

    #[tokio::test]
    async fn accept_writes_blob_metadata_and_event() {
        let f = fixture();
        let document = f
            .coordinator
            .accept(b"hello world".to_vec(), "notes.txt", "text/plain", "owner-1")
            .await
            .unwrap();

        assert_eq!(document.status, DocumentStatus::Uploaded);
        assert_eq!(document.storage_key, format!("{}/notes.txt", document.id));
        assert!(f.blobs.contains(&document.storage_key));

        let stored = f.store.find_by_id(&document.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Uploaded);
        assert_eq!(stored.size, 11);

        use crate::services::broker::EventStream;
        let event = f.broker.next().await.unwrap().unwrap();
        assert_eq!(event.document_id, document.id);
        assert_eq!(event.attempt, 0);
        assert_eq!(event.checksum, document.checksum);
    }

    #[tokio::test]
    async fn disallowed_extension_leaves_no_state() {
        let f = fixture();
        let err = f
            .coordinator
            .accept(b"binary".to_vec(), "malware.exe", "text/plain", "owner-1")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        let (documents, total) = f.store.find_paginated(1, 10).await.unwrap();
        assert!(documents.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn disallowed_content_type_is_rejected() {
        let f = fixture();
        let err = f
            .coordinator
            .accept(b"<html/>".to_vec(), "page.txt", "text/html", "owner-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn oversize_upload_rejected_before_blob_write() {
        let f = fixture();
        let err = f
            .coordinator
            .accept(vec![0u8; 2048], "big.txt", "text/plain", "owner-1")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        let (documents, _) = f.store.find_paginated(1, 10).await.unwrap();
        assert!(documents.is_empty());
    }

    struct FailingMetadataStore;

    #[async_trait]
    impl MetadataStore for FailingMetadataStore {
        async fn insert(&self, _document: &Document) -> Result<(), AppError> {
            Err(AppError::Database(anyhow::anyhow!("insert refused")))
        }
        async fn find_by_id(&self, _id: &str) -> Result<Option<Document>, AppError> {
            Ok(None)
        }
        async fn find_paginated(
            &self,
            _page: u64,
            _per_page: u64,
        ) -> Result<(Vec<Document>, u64), AppError> {
            Ok((Vec::new(), 0))
        }
        async fn update_status(
            &self,
            _id: &str,
            _expected: &[DocumentStatus],
            _next: DocumentStatus,
            _change: StatusChange,
        ) -> Result<bool, AppError> {
            Ok(false)
        }
        async fn find_uploaded_before(
            &self,
            _cutoff: DateTime<Utc>,
        ) -> Result<Vec<Document>, AppError> {
            Ok(Vec::new())
        }
        async fn delete(&self, _id: &str) -> Result<bool, AppError> {
            Ok(false)
        }
        async fn health_check(&self) -> Result<(), AppError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn metadata_insert_failure_compensates_blob() {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let broker = Arc::new(InMemoryBroker::new(Duration::from_millis(50)));
        let coordinator = UploadCoordinator::new(
            Arc::new(FailingMetadataStore),
            blobs.clone(),
            broker,
            upload_config(),
        );

        let err = coordinator
            .accept(b"data".to_vec(), "doc.txt", "text/plain", "owner-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        // The orphan blob was compensated away.
        assert_eq!(blobs.len(), 0);
    }

    struct FailingPublisher;

    #[async_trait]
    impl EventPublisher for FailingPublisher {
        async fn publish(&self, _event: &ProcessingEvent) -> Result<(), AppError> {
            Err(AppError::Publish(anyhow::anyhow!("broker unreachable")))
        }
        async fn publish_dead_letter(
            &self,
            _event: &ProcessingEvent,
            _reason: &str,
        ) -> Result<(), AppError> {
            Ok(())
        }
        async fn health_check(&self) -> Result<(), AppError> {
            Err(AppError::Publish(anyhow::anyhow!("broker unreachable")))
        }
    }

    #[tokio::test]
    async fn publish_failure_is_non_fatal_and_leaves_document_uploaded() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        let coordinator = UploadCoordinator::new(
            store.clone(),
            blobs,
            Arc::new(FailingPublisher),
            upload_config(),
        );

        let document = coordinator
            .accept(b"data".to_vec(), "doc.txt", "text/plain", "owner-1")
            .await
            .unwrap();

        let stored = store.find_by_id(&document.id).await.unwrap().unwrap();
        assert_eq!(stored.status, DocumentStatus::Uploaded);
    }
}
