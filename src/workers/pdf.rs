use crate::models::{Document, ExtractionMetadata};
use crate::workers::executor::CommandExecutor;
use crate::workers::extractor::{Extractor, ProcessingError};
use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

/// PDF extraction via poppler's pdftotext/pdfinfo. The blob is staged to a
/// temp file since the tools only read from disk.
pub struct PdfExtractor {
    executor: CommandExecutor,
    temp_dir: PathBuf,
}

impl PdfExtractor {
    pub fn new(executor: CommandExecutor, temp_dir: PathBuf) -> Self {
        Self { executor, temp_dir }
    }
}

#[async_trait]
impl Extractor for PdfExtractor {
    fn content_types(&self) -> Vec<&'static str> {
        vec!["application/pdf"]
    }

    async fn extract(
        &self,
        document: &Document,
        data: &[u8],
    ) -> Result<ExtractionMetadata, ProcessingError> {
        let temp_file = self
            .temp_dir
            .join(format!("{}_{}.pdf", document.id, Uuid::new_v4()));

        tokio::fs::write(&temp_file, data).await.map_err(|e| {
            ProcessingError::Recoverable(anyhow::anyhow!("Failed to write temp file: {}", e))
        })?;

        let result = self.extract_from_file(&temp_file).await;

        let _ = tokio::fs::remove_file(&temp_file).await;
        result
    }
}

impl PdfExtractor {
    async fn extract_from_file(
        &self,
        path: &std::path::Path,
    ) -> Result<ExtractionMetadata, ProcessingError> {
        let path_str = path.to_str().ok_or_else(|| {
            ProcessingError::Recoverable(anyhow::anyhow!("Temp path is not valid UTF-8"))
        })?;

        let text_output = self
            .executor
            .execute("pdftotext", &[path_str, "-"], None)
            .await?;
        let text = String::from_utf8_lossy(&text_output.stdout).to_string();

        let info_output = self.executor.execute("pdfinfo", &[path_str], None).await?;
        let page_count = parse_page_count(&info_output.stdout)?;

        tracing::debug!(
            page_count = page_count,
            text_length = text.len(),
            "PDF extraction completed"
        );

        let preview = {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                "No readable text found".to_string()
            } else if trimmed.chars().count() > 300 {
                format!("{}...", trimmed.chars().take(300).collect::<String>())
            } else {
                trimmed.to_string()
            }
        };

        Ok(ExtractionMetadata {
            word_count: Some(text.split_whitespace().count() as i64),
            character_count: Some(text.chars().count() as i64),
            page_count: Some(page_count),
            json_keys_count: None,
            content_preview: Some(preview),
        })
    }
}

fn parse_page_count(output: &[u8]) -> Result<i32, ProcessingError> {
    let output_str = String::from_utf8_lossy(output);

    for line in output_str.lines() {
        if line.starts_with("Pages:") {
            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() >= 2 {
                return parts[1].parse::<i32>().map_err(|e| {
                    ProcessingError::Unrecoverable(anyhow::anyhow!(
                        "Failed to parse page count: {}",
                        e
                    ))
                });
            }
        }
    }

    Err(ProcessingError::Unrecoverable(anyhow::anyhow!(
        "Page count not found in pdfinfo output"
    )))
}
