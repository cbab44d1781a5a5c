use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Uploaded,
    Processing,
    Processed,
    Failed,
    Dead,
}

impl DocumentStatus {
    /// Legal status transitions. Monotonic except the Failed→Processing
    /// retry edge; both the coordinator and the worker consult this before
    /// any status write.
    pub fn can_transition_to(self, next: DocumentStatus) -> bool {
        use DocumentStatus::*;
        matches!(
            (self, next),
            (Pending, Uploaded)
                | (Uploaded, Processing)
                | (Failed, Processing)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Processing, Dead)
                | (Failed, Dead)
        )
    }

    /// Statuses from which a worker may claim a document for processing.
    pub fn claimable() -> &'static [DocumentStatus] {
        &[DocumentStatus::Uploaded, DocumentStatus::Failed]
    }
}

/// Fields derived by the extraction collaborator; all optional since each
/// extractor populates only what applies to its content type.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub word_count: Option<i64>,
    pub character_count: Option<i64>,
    pub page_count: Option<i32>,
    pub json_keys_count: Option<i64>,
    pub content_preview: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,
    pub owner_id: String,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub storage_key: String,
    pub checksum: String,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub extraction: Option<ExtractionMetadata>,
    pub processing_attempts: i32,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub uploaded_at: DateTime<Utc>,
    #[serde(with = "mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl Document {
    pub fn new(
        owner_id: String,
        filename: String,
        content_type: String,
        size: i64,
        storage_key: String,
        checksum: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id,
            filename,
            content_type,
            size,
            storage_key,
            checksum,
            status: DocumentStatus::Pending,
            error_message: None,
            extraction: None,
            processing_attempts: 0,
            uploaded_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DocumentStatus::*;

    #[test]
    fn coordinator_edge() {
        assert!(Pending.can_transition_to(Uploaded));
        assert!(!Uploaded.can_transition_to(Pending));
    }

    #[test]
    fn claim_edges() {
        assert!(Uploaded.can_transition_to(Processing));
        assert!(Failed.can_transition_to(Processing));
        assert!(!Processed.can_transition_to(Processing));
        assert!(!Dead.can_transition_to(Processing));
    }

    #[test]
    fn terminal_edges() {
        assert!(Processing.can_transition_to(Processed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Processing.can_transition_to(Dead));
        assert!(Failed.can_transition_to(Dead));
    }

    #[test]
    fn no_regressions_besides_retry() {
        assert!(!Processed.can_transition_to(Uploaded));
        assert!(!Processed.can_transition_to(Failed));
        assert!(!Dead.can_transition_to(Failed));
        assert!(!Dead.can_transition_to(Uploaded));
        assert!(!Processing.can_transition_to(Uploaded));
    }
}
