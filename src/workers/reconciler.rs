use crate::config::ReconcileConfig;
use crate::error::AppError;
use crate::models::ProcessingEvent;
use crate::services::broker::EventPublisher;
use crate::services::metadata::MetadataStore;
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Repairs the publish side of the upload sequence.
///
/// A document left Uploaded longer than the staleness threshold means its
/// processing event may never have reached the broker (publish failed after
/// the metadata insert). Republishing is safe: workers discard duplicates, so
/// over-publishing costs a no-op delivery, while under-publishing would lose
/// the document forever.
pub struct Reconciler {
    store: Arc<dyn MetadataStore>,
    publisher: Arc<dyn EventPublisher>,
    config: ReconcileConfig,
    shutdown: CancellationToken,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        publisher: Arc<dyn EventPublisher>,
        config: ReconcileConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            publisher,
            config,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.config.interval_secs,
            stale_after_secs = self.config.stale_after_secs,
            "Reconciler started"
        );
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep().await {
                        tracing::error!(error = %e, "Reconciliation sweep failed");
                    }
                }
            }
        }
        tracing::info!("Reconciler stopped");
    }

    pub async fn sweep(&self) -> Result<usize, AppError> {
        let cutoff = Utc::now() - self.config.stale_after();
        let stale = self.store.find_uploaded_before(cutoff).await?;

        let mut republished = 0;
        for document in &stale {
            let event = ProcessingEvent::new(
                document.id.clone(),
                document.storage_key.clone(),
                document.checksum.clone(),
                document.processing_attempts,
            );
            match self.publisher.publish(&event).await {
                Ok(()) => {
                    republished += 1;
                    tracing::info!(
                        document_id = %document.id,
                        uploaded_at = %document.uploaded_at,
                        "Republished event for stale uploaded document"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        document_id = %document.id,
                        error = %e,
                        "Failed to republish event, will retry next sweep"
                    );
                }
            }
        }

        if republished > 0 {
            metrics::counter!("document_events_reconciled").increment(republished as u64);
        }
        Ok(republished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Document, DocumentStatus};
    use crate::services::broker::{EventStream, InMemoryBroker};
    use crate::services::metadata::InMemoryMetadataStore;
    use std::time::Duration;

    fn reconcile_config() -> ReconcileConfig {
        ReconcileConfig {
            interval_secs: 60,
            stale_after_secs: 300,
        }
    }

    fn uploaded_document(age_secs: i64) -> Document {
        let mut document = Document::new(
            "owner-1".to_string(),
            "stale.txt".to_string(),
            "text/plain".to_string(),
            10,
            "key/stale.txt".to_string(),
            "checksum".to_string(),
        );
        document.status = DocumentStatus::Uploaded;
        document.uploaded_at = Utc::now() - chrono::Duration::seconds(age_secs);
        document
    }

    #[tokio::test]
    async fn sweep_republishes_only_stale_uploaded_documents() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let broker = Arc::new(InMemoryBroker::new(Duration::from_millis(20)));

        let stale = uploaded_document(600);
        store.insert(&stale).await.unwrap();

        let fresh = uploaded_document(10);
        store.insert(&fresh).await.unwrap();

        let mut processed = uploaded_document(600);
        processed.status = DocumentStatus::Processed;
        store.insert(&processed).await.unwrap();

        let reconciler = Reconciler::new(
            store,
            broker.clone(),
            reconcile_config(),
            CancellationToken::new(),
        );
        let republished = reconciler.sweep().await.unwrap();
        assert_eq!(republished, 1);

        let event = broker.next().await.unwrap().unwrap();
        assert_eq!(event.document_id, stale.id);
        assert_eq!(event.attempt, stale.processing_attempts);
        assert!(broker.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sweep_with_nothing_stale_publishes_nothing() {
        let store = Arc::new(InMemoryMetadataStore::new());
        let broker = Arc::new(InMemoryBroker::new(Duration::from_millis(20)));
        let reconciler = Reconciler::new(
            store,
            broker.clone(),
            reconcile_config(),
            CancellationToken::new(),
        );
        assert_eq!(reconciler.sweep().await.unwrap(), 0);
        assert!(broker.next().await.unwrap().is_none());
    }
}
