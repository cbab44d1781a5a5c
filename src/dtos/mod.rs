pub mod documents;

pub use documents::{DocumentListParams, DocumentListResponse, DocumentResponse, HealthResponse};
