use crate::models::{DocumentStatus, ExtractionMetadata};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentResponse {
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
    pub uploaded_at: String,
    pub updated_at: String,
}

impl From<crate::models::Document> for DocumentResponse {
    fn from(document: crate::models::Document) -> Self {
        Self {
            id: document.id,
            owner_id: document.owner_id,
            filename: document.filename,
            content_type: document.content_type,
            size: document.size,
            storage_key: document.storage_key,
            checksum: document.checksum,
            status: document.status,
            error_message: document.error_message,
            extraction: document.extraction,
            processing_attempts: document.processing_attempts,
            uploaded_at: document.uploaded_at.to_rfc3339(),
            updated_at: document.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DocumentListParams {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentListResponse {
    pub documents: Vec<DocumentResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: String,
    /// One entry per external dependency, each reported independently.
    pub dependencies: BTreeMap<String, String>,
}
