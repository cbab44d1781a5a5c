use crate::config::WorkerConfig;
use crate::error::AppError;
use crate::models::{Document, DocumentStatus, ExtractionMetadata, ProcessingEvent};
use crate::services::broker::{EventPublisher, EventStream};
use crate::services::metadata::{MetadataStore, StatusChange};
use crate::services::storage::BlobStore;
use crate::workers::extractor::{ExtractorRegistry, ProcessingError};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Pool of independent event consumers.
///
/// Instances coordinate exclusively through the metadata store's conditional
/// status update; there is no shared in-process state between them, so the
/// same protocol holds when consumers run in separate processes.
pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown: CancellationToken,
    enabled: bool,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        publisher: Arc<dyn EventPublisher>,
        stream: Arc<dyn EventStream>,
        registry: Arc<ExtractorRegistry>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let enabled = config.enabled;
        let workers = (0..config.worker_count)
            .map(|id| Worker {
                id,
                config: config.clone(),
                store: store.clone(),
                blobs: blobs.clone(),
                publisher: publisher.clone(),
                stream: stream.clone(),
                registry: registry.clone(),
                shutdown: shutdown.clone(),
            })
            .collect();

        Self {
            workers,
            shutdown,
            enabled,
        }
    }

    pub fn start(&self) {
        if !self.enabled {
            tracing::info!("Worker pool disabled by configuration");
            return;
        }

        for worker in &self.workers {
            let worker = worker.clone();
            tokio::spawn(async move {
                worker.run().await;
            });
        }
        tracing::info!(worker_count = self.workers.len(), "Started worker pool");
    }

    pub fn shutdown(&self) {
        tracing::info!("Initiating worker pool shutdown");
        self.shutdown.cancel();
    }
}

#[derive(Clone)]
struct Worker {
    id: usize,
    config: WorkerConfig,
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    publisher: Arc<dyn EventPublisher>,
    stream: Arc<dyn EventStream>,
    registry: Arc<ExtractorRegistry>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(self) {
        tracing::info!(worker_id = self.id, "Worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = self.stream.next() => match next {
                    Ok(Some(event)) => {
                        if let Err(e) = self.handle_event(&event).await {
                            // Infrastructure failure mid-handling: put the
                            // event back so it is not lost, then back off.
                            tracing::error!(
                                worker_id = self.id,
                                document_id = %event.document_id,
                                error = %e,
                                "Event handling failed, re-enqueueing"
                            );
                            if let Err(publish_err) = self.publisher.publish(&event).await {
                                tracing::error!(
                                    document_id = %event.document_id,
                                    error = %publish_err,
                                    "Failed to re-enqueue event"
                                );
                            }
                            tokio::time::sleep(self.config.poll_interval()).await;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(worker_id = self.id, error = %e, "Event stream poll failed");
                        tokio::time::sleep(self.config.poll_interval()).await;
                    }
                }
            }
        }

        tracing::info!(worker_id = self.id, "Worker stopped");
    }

    /// Handle one delivery. Returns Err only for infrastructure failures
    /// (store/broker unreachable); every processing outcome, including
    /// terminal ones, resolves to Ok with the document status updated.
    async fn handle_event(&self, event: &ProcessingEvent) -> Result<(), AppError> {
        let Some(document) = self.store.find_by_id(&event.document_id).await? else {
            tracing::debug!(
                document_id = %event.document_id,
                "Record gone, discarding event"
            );
            return Ok(());
        };

        // Idempotent short-circuit for duplicate deliveries.
        if document.status == DocumentStatus::Processed && document.checksum == event.checksum {
            tracing::debug!(
                document_id = %document.id,
                "Document already processed, discarding duplicate delivery"
            );
            return Ok(());
        }
        if document.status == DocumentStatus::Dead {
            tracing::debug!(document_id = %document.id, "Document is dead, discarding event");
            return Ok(());
        }

        // The claim: the only writer that observes `true` here owns this
        // processing attempt. Losing the race is a normal outcome.
        let claimed = self
            .store
            .update_status(
                &document.id,
                DocumentStatus::claimable(),
                DocumentStatus::Processing,
                StatusChange::none(),
            )
            .await?;
        if !claimed {
            tracing::debug!(
                worker_id = self.id,
                document_id = %document.id,
                "Claim lost, acknowledging without side effects"
            );
            return Ok(());
        }

        tracing::info!(
            worker_id = self.id,
            document_id = %document.id,
            attempt = event.attempt,
            "Processing attempt started"
        );
        metrics::counter!("document_processing_total").increment(1);
        let start = Instant::now();

        let outcome = match tokio::time::timeout(
            self.config.processing_timeout(),
            self.process(&document),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ProcessingError::Recoverable(anyhow::anyhow!(
                "Processing attempt timed out after {}s",
                self.config.processing_timeout_secs
            ))),
        };

        match outcome {
            Ok(extraction) => self.complete(&document, start, extraction).await,
            Err(ProcessingError::Recoverable(cause)) => {
                self.fail_with_retry(&document, event, cause).await
            }
            Err(ProcessingError::Unrecoverable(cause)) => {
                self.fail_terminally(&document, event, cause).await
            }
        }
    }

    async fn process(&self, document: &Document) -> Result<ExtractionMetadata, ProcessingError> {
        let data = match self.blobs.get(&document.storage_key).await {
            Ok(data) => data,
            Err(AppError::NotFound(e)) => {
                return Err(ProcessingError::Unrecoverable(anyhow::anyhow!(
                    "Blob missing: {}",
                    e
                )))
            }
            Err(e) => {
                return Err(ProcessingError::Recoverable(anyhow::anyhow!(
                    "Blob fetch failed: {}",
                    e
                )))
            }
        };

        let checksum = format!("{:x}", Sha256::digest(&data));
        if checksum != document.checksum {
            return Err(ProcessingError::Unrecoverable(anyhow::anyhow!(
                "Checksum mismatch: record expects {}, blob has {}",
                document.checksum,
                checksum
            )));
        }

        let extractor = self.registry.find(&document.content_type).ok_or_else(|| {
            ProcessingError::Unrecoverable(anyhow::anyhow!(
                "Unsupported content type: {}",
                document.content_type
            ))
        })?;

        extractor.extract(document, &data).await
    }

    async fn complete(
        &self,
        document: &Document,
        start: Instant,
        extraction: ExtractionMetadata,
    ) -> Result<(), AppError> {
        let finished = self
            .store
            .update_status(
                &document.id,
                &[DocumentStatus::Processing],
                DocumentStatus::Processed,
                StatusChange::success(extraction),
            )
            .await?;

        if finished {
            metrics::counter!("document_processing_success").increment(1);
            metrics::histogram!("document_processing_duration")
                .record(start.elapsed().as_secs_f64());
            tracing::info!(
                worker_id = self.id,
                document_id = %document.id,
                duration_ms = start.elapsed().as_millis() as u64,
                "Processing succeeded"
            );
        } else {
            tracing::warn!(
                document_id = %document.id,
                "Extraction result discarded, document left processing state concurrently"
            );
        }
        Ok(())
    }

    async fn fail_with_retry(
        &self,
        document: &Document,
        event: &ProcessingEvent,
        cause: anyhow::Error,
    ) -> Result<(), AppError> {
        let attempts = document.processing_attempts + 1;

        let failed = self
            .store
            .update_status(
                &document.id,
                &[DocumentStatus::Processing],
                DocumentStatus::Failed,
                StatusChange::failure(cause.to_string()),
            )
            .await?;
        if !failed {
            tracing::warn!(
                document_id = %document.id,
                "Failure result discarded, document left processing state concurrently"
            );
            return Ok(());
        }

        metrics::counter!("document_processing_failed").increment(1);
        tracing::warn!(
            worker_id = self.id,
            document_id = %document.id,
            attempts = attempts,
            error = %cause,
            "Processing attempt failed"
        );

        if attempts >= self.config.max_retries {
            let dead = self
                .store
                .update_status(
                    &document.id,
                    &[DocumentStatus::Failed],
                    DocumentStatus::Dead,
                    StatusChange::none(),
                )
                .await?;
            if dead {
                let reason = format!("Attempts exhausted after {} failures: {}", attempts, cause);
                self.publisher
                    .publish_dead_letter(&event.retry(attempts), &reason)
                    .await?;
                metrics::counter!("document_processing_dead").increment(1);
                tracing::error!(
                    document_id = %document.id,
                    attempts = attempts,
                    "Document moved to dead letter"
                );
            }
            return Ok(());
        }

        let delay = self.config.retry_delay(event.attempt);
        let retry_event = event.retry(attempts);
        let publisher = self.publisher.clone();
        tracing::info!(
            document_id = %document.id,
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling retry"
        );
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = publisher.publish(&retry_event).await {
                tracing::error!(
                    document_id = %retry_event.document_id,
                    error = %e,
                    "Failed to re-enqueue retry event"
                );
            }
        });
        Ok(())
    }

    async fn fail_terminally(
        &self,
        document: &Document,
        event: &ProcessingEvent,
        cause: anyhow::Error,
    ) -> Result<(), AppError> {
        let dead = self
            .store
            .update_status(
                &document.id,
                &[DocumentStatus::Processing],
                DocumentStatus::Dead,
                StatusChange::terminal(cause.to_string()),
            )
            .await?;
        if !dead {
            tracing::warn!(
                document_id = %document.id,
                "Terminal failure discarded, document left processing state concurrently"
            );
            return Ok(());
        }

        self.publisher
            .publish_dead_letter(event, &cause.to_string())
            .await?;
        metrics::counter!("document_processing_dead").increment(1);
        tracing::error!(
            worker_id = self.id,
            document_id = %document.id,
            error = %cause,
            "Unrecoverable processing error, document moved to dead letter"
        );
        Ok(())
    }
}
