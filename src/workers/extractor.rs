use crate::models::{Document, ExtractionMetadata};
use async_trait::async_trait;
use thiserror::Error;

/// Failure classification for a processing attempt.
///
/// Recoverable errors are retried with backoff; unrecoverable errors (corrupt
/// input, unsupported type) route the document straight to Dead with no
/// further attempts.
#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("recoverable: {0}")]
    Recoverable(anyhow::Error),

    #[error("unrecoverable: {0}")]
    Unrecoverable(anyhow::Error),
}

/// External extraction collaborator. The worker hands over the blob bytes and
/// receives derived fields; everything about how extraction happens is behind
/// this seam.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn content_types(&self) -> Vec<&'static str>;

    async fn extract(
        &self,
        document: &Document,
        data: &[u8],
    ) -> Result<ExtractionMetadata, ProcessingError>;
}

pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    pub fn with(extractors: Vec<Box<dyn Extractor>>) -> Self {
        Self { extractors }
    }

    pub fn find(&self, content_type: &str) -> Option<&dyn Extractor> {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim()
            .to_lowercase();
        self.extractors
            .iter()
            .find(|e| e.content_types().contains(&media_type.as_str()))
            .map(|b| b.as_ref())
    }
}

const PREVIEW_CHARS: usize = 300;

fn preview_of(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > PREVIEW_CHARS {
        let head: String = trimmed.chars().take(PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}

#[derive(Default)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for TextExtractor {
    fn content_types(&self) -> Vec<&'static str> {
        vec!["text/plain"]
    }

    async fn extract(
        &self,
        _document: &Document,
        data: &[u8],
    ) -> Result<ExtractionMetadata, ProcessingError> {
        let text = std::str::from_utf8(data).map_err(|e| {
            ProcessingError::Unrecoverable(anyhow::anyhow!("Text blob is not valid UTF-8: {}", e))
        })?;

        Ok(ExtractionMetadata {
            word_count: Some(text.split_whitespace().count() as i64),
            character_count: Some(text.chars().count() as i64),
            content_preview: Some(preview_of(text)),
            ..ExtractionMetadata::default()
        })
    }
}

#[derive(Default)]
pub struct JsonExtractor;

impl JsonExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Extractor for JsonExtractor {
    fn content_types(&self) -> Vec<&'static str> {
        vec!["application/json", "text/json"]
    }

    async fn extract(
        &self,
        _document: &Document,
        data: &[u8],
    ) -> Result<ExtractionMetadata, ProcessingError> {
        let value: serde_json::Value = serde_json::from_slice(data).map_err(|e| {
            ProcessingError::Unrecoverable(anyhow::anyhow!("Invalid JSON document: {}", e))
        })?;

        let mut metadata = ExtractionMetadata::default();
        match &value {
            serde_json::Value::Object(map) => {
                metadata.json_keys_count = Some(map.len() as i64);
                let keys: Vec<&str> = map.keys().take(5).map(String::as_str).collect();
                let mut preview =
                    format!("JSON object with {} keys: {}", map.len(), keys.join(", "));
                if map.len() > 5 {
                    preview.push_str(&format!(" and {} more...", map.len() - 5));
                }
                metadata.content_preview = Some(preview);
            }
            serde_json::Value::Array(items) => {
                metadata.content_preview = Some(format!("JSON array with {} items", items.len()));
                if let Some(serde_json::Value::Object(first)) = items.first() {
                    metadata.json_keys_count = Some(first.len() as i64);
                }
            }
            other => {
                metadata.content_preview = Some(preview_of(&format!("JSON value: {}", other)));
            }
        }

        Ok(metadata)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Document;

    fn document(content_type: &str) -> Document {
        Document::new(
            "owner".to_string(),
            "file".to_string(),
            content_type.to_string(),
            0,
            "key".to_string(),
            "checksum".to_string(),
        )
    }

    #[tokio::test]
    async fn text_extractor_counts_words_and_previews() {
        let extractor = TextExtractor::new();
        let metadata = extractor
            .extract(&document("text/plain"), b"hello world, three words\n")
            .await
            .unwrap();

        assert_eq!(metadata.word_count, Some(4));
        assert_eq!(metadata.character_count, Some(25));
        assert_eq!(
            metadata.content_preview.as_deref(),
            Some("hello world, three words")
        );
    }

    #[tokio::test]
    async fn text_extractor_rejects_invalid_utf8_as_unrecoverable() {
        let extractor = TextExtractor::new();
        let err = extractor
            .extract(&document("text/plain"), &[0xff, 0xfe, 0x00])
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Unrecoverable(_)));
    }

    #[tokio::test]
    async fn json_extractor_counts_object_keys() {
        let extractor = JsonExtractor::new();
        let metadata = extractor
            .extract(&document("application/json"), br#"{"a": 1, "b": 2}"#)
            .await
            .unwrap();

        assert_eq!(metadata.json_keys_count, Some(2));
        assert_eq!(
            metadata.content_preview.as_deref(),
            Some("JSON object with 2 keys: a, b")
        );
    }

    #[tokio::test]
    async fn json_extractor_rejects_garbage_as_unrecoverable() {
        let extractor = JsonExtractor::new();
        let err = extractor
            .extract(&document("application/json"), b"{not json")
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Unrecoverable(_)));
    }

    #[tokio::test]
    async fn registry_matches_content_type_with_parameters() {
        let registry = ExtractorRegistry::with(vec![
            Box::new(TextExtractor::new()),
            Box::new(JsonExtractor::new()),
        ]);
        assert!(registry.find("text/plain; charset=utf-8").is_some());
        assert!(registry.find("application/json").is_some());
        assert!(registry.find("video/mp4").is_none());
    }

    #[tokio::test]
    async fn long_text_preview_is_truncated() {
        let extractor = TextExtractor::new();
        let body = "word ".repeat(200);
        let metadata = extractor
            .extract(&document("text/plain"), body.as_bytes())
            .await
            .unwrap();
        let preview = metadata.content_preview.unwrap();
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), 303);
    }
}
