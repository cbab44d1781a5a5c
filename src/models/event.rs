use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event published when a document is ready for processing.
///
/// This is a wire schema: the publisher and the worker fleet may be deployed
/// and versioned independently, so fields are never renamed or repurposed and
/// unknown fields are ignored on decode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingEvent {
    pub document_id: String,
    pub storage_key: String,
    pub checksum: String,
    pub attempt: i32,
    pub published_at: DateTime<Utc>,
}

impl ProcessingEvent {
    pub fn new(document_id: String, storage_key: String, checksum: String, attempt: i32) -> Self {
        Self {
            document_id,
            storage_key,
            checksum,
            attempt,
            published_at: Utc::now(),
        }
    }

    /// Successor event for a retry of a failed attempt.
    pub fn retry(&self, attempt: i32) -> Self {
        Self {
            document_id: self.document_id.clone(),
            storage_key: self.storage_key.clone(),
            checksum: self.checksum.clone(),
            attempt,
            published_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_tolerates_unknown_fields() {
        let raw = r#"{
            "document_id": "d-1",
            "storage_key": "d-1/report.pdf",
            "checksum": "abc",
            "attempt": 2,
            "published_at": "2026-01-05T10:00:00Z",
            "some_future_field": true
        }"#;
        let event: ProcessingEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.document_id, "d-1");
        assert_eq!(event.attempt, 2);
    }
}
