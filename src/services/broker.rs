use crate::config::BrokerConfig;
use crate::error::AppError;
use crate::models::ProcessingEvent;
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// Producer side of the broker. Delivery is at-least-once and uncoordinated
/// with the metadata write; duplicates are the consumer's problem.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &ProcessingEvent) -> Result<(), AppError>;

    /// Route an event that exhausted retries (or hit unrecoverable input) to
    /// the dead-letter destination.
    async fn publish_dead_letter(
        &self,
        event: &ProcessingEvent,
        reason: &str,
    ) -> Result<(), AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

/// Consumer side of the broker. `next` returns `None` on a poll timeout so
/// worker loops can interleave shutdown checks.
#[async_trait]
pub trait EventStream: Send + Sync {
    async fn next(&self) -> Result<Option<ProcessingEvent>, AppError>;
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeadLetter {
    pub event: ProcessingEvent,
    pub reason: String,
}

/// Redis list-backed queue adapter: LPUSH to publish, BRPOP to consume,
/// a second list as the dead-letter destination. Key names come from the
/// configured exchange/queue/routing-key so deployments keep their broker
/// naming scheme.
pub struct RedisBroker {
    manager: ConnectionManager,
    queue_key: String,
    dead_letter_key: String,
    routing_key: String,
    poll_timeout: Duration,
}

impl RedisBroker {
    pub async fn connect(config: &BrokerConfig, poll_timeout: Duration) -> Result<Self, AppError> {
        tracing::info!(url = %config.url, "Connecting to broker");
        let client = Client::open(config.url.clone())?;

        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get broker connection manager: {}", e);
            AppError::Publish(anyhow::anyhow!("Failed to connect to broker: {}", e))
        })?;

        tracing::info!(
            queue = %config.queue_key(),
            dead_letter = %config.dead_letter_key(),
            "Connected to broker"
        );

        Ok(Self {
            manager,
            queue_key: config.queue_key(),
            dead_letter_key: config.dead_letter_key(),
            routing_key: config.routing_key.clone(),
            poll_timeout,
        })
    }
}

#[async_trait]
impl EventPublisher for RedisBroker {
    async fn publish(&self, event: &ProcessingEvent) -> Result<(), AppError> {
        let body = serde_json::to_string(event)
            .map_err(|e| AppError::Publish(anyhow::anyhow!("Failed to encode event: {}", e)))?;

        let mut conn = self.manager.clone();
        redis::cmd("LPUSH")
            .arg(&self.queue_key)
            .arg(&body)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::Publish(anyhow::anyhow!("Broker publish failed: {}", e)))?;

        tracing::debug!(
            document_id = %event.document_id,
            attempt = event.attempt,
            routing_key = %self.routing_key,
            "Published processing event"
        );
        Ok(())
    }

    async fn publish_dead_letter(
        &self,
        event: &ProcessingEvent,
        reason: &str,
    ) -> Result<(), AppError> {
        let entry = DeadLetter {
            event: event.clone(),
            reason: reason.to_string(),
        };
        let body = serde_json::to_string(&entry).map_err(|e| {
            AppError::Publish(anyhow::anyhow!("Failed to encode dead letter: {}", e))
        })?;

        let mut conn = self.manager.clone();
        redis::cmd("LPUSH")
            .arg(&self.dead_letter_key)
            .arg(&body)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AppError::Publish(anyhow::anyhow!("Dead-letter publish failed: {}", e)))?;

        tracing::warn!(
            document_id = %event.document_id,
            attempt = event.attempt,
            reason = %reason,
            "Event routed to dead-letter queue"
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Publish(anyhow::anyhow!("Broker health check failed: {}", e)))
    }
}

#[async_trait]
impl EventStream for RedisBroker {
    async fn next(&self) -> Result<Option<ProcessingEvent>, AppError> {
        let mut conn = self.manager.clone();
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.queue_key)
            .arg(self.poll_timeout.as_secs_f64())
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::Publish(anyhow::anyhow!("Broker consume failed: {}", e)))?;

        let Some((_, body)) = popped else {
            return Ok(None);
        };

        match serde_json::from_str::<ProcessingEvent>(&body) {
            Ok(event) => Ok(Some(event)),
            Err(e) => {
                // Undecodable payloads go straight to the dead-letter list so
                // nothing is silently dropped.
                tracing::error!(error = %e, "Discarding malformed event payload to dead letter");
                redis::cmd("LPUSH")
                    .arg(&self.dead_letter_key)
                    .arg(&body)
                    .query_async::<_, ()>(&mut conn)
                    .await
                    .map_err(|e| {
                        AppError::Publish(anyhow::anyhow!("Dead-letter publish failed: {}", e))
                    })?;
                Ok(None)
            }
        }
    }
}

/// Channel-backed stand-in used when external connections are disabled.
/// Dead letters are retained in memory and exposed for inspection.
pub struct InMemoryBroker {
    tx: mpsc::UnboundedSender<ProcessingEvent>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ProcessingEvent>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    poll_timeout: Duration,
}

impl InMemoryBroker {
    pub fn new(poll_timeout: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            dead_letters: Mutex::new(Vec::new()),
            poll_timeout,
        }
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead_letters
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(&self, event: &ProcessingEvent) -> Result<(), AppError> {
        self.tx
            .send(event.clone())
            .map_err(|_| AppError::Publish(anyhow::anyhow!("In-memory queue closed")))
    }

    async fn publish_dead_letter(
        &self,
        event: &ProcessingEvent,
        reason: &str,
    ) -> Result<(), AppError> {
        self.dead_letters
            .lock()
            .map_err(|e| AppError::Publish(anyhow::anyhow!("Dead-letter mutex poisoned: {}", e)))?
            .push(DeadLetter {
                event: event.clone(),
                reason: reason.to_string(),
            });
        tracing::warn!(
            document_id = %event.document_id,
            reason = %reason,
            "Event routed to in-memory dead letter"
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}

#[async_trait]
impl EventStream for InMemoryBroker {
    async fn next(&self) -> Result<Option<ProcessingEvent>, AppError> {
        let mut rx = self.rx.lock().await;
        match tokio::time::timeout(self.poll_timeout, rx.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Ok(None),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, attempt: i32) -> ProcessingEvent {
        ProcessingEvent::new(
            id.to_string(),
            format!("{}/file.txt", id),
            "checksum".to_string(),
            attempt,
        )
    }

    #[tokio::test]
    async fn publish_then_consume_in_order() {
        let broker = InMemoryBroker::new(Duration::from_millis(50));
        broker.publish(&event("a", 0)).await.unwrap();
        broker.publish(&event("b", 0)).await.unwrap();

        let first = broker.next().await.unwrap().unwrap();
        let second = broker.next().await.unwrap().unwrap();
        assert_eq!(first.document_id, "a");
        assert_eq!(second.document_id, "b");
    }

    #[tokio::test]
    async fn next_times_out_on_empty_queue() {
        let broker = InMemoryBroker::new(Duration::from_millis(20));
        assert!(broker.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dead_letters_are_retained() {
        let broker = InMemoryBroker::new(Duration::from_millis(20));
        broker
            .publish_dead_letter(&event("doomed", 3), "attempts exhausted")
            .await
            .unwrap();

        let entries = broker.dead_letters();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event.document_id, "doomed");
        assert_eq!(entries[0].reason, "attempts exhausted");
    }
}
