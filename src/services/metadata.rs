use crate::error::AppError;
use crate::models::{Document, DocumentStatus, ExtractionMetadata};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::{
    bson::{doc, Bson},
    options::{FindOptions, IndexOptions},
    Client as MongoClient, Collection, Database, IndexModel,
};
use std::collections::HashMap;
use std::sync::Mutex;

/// Field changes applied together with a status transition, so the record
/// never shows a new status with stale attempt/error fields.
#[derive(Debug, Clone, Default)]
pub struct StatusChange {
    pub error_message: Option<String>,
    pub clear_error: bool,
    pub extraction: Option<ExtractionMetadata>,
    pub increment_attempts: bool,
}

impl StatusChange {
    pub fn none() -> Self {
        Self::default()
    }

    /// Extraction succeeded: record derived fields and clear any prior error.
    pub fn success(extraction: ExtractionMetadata) -> Self {
        Self {
            extraction: Some(extraction),
            clear_error: true,
            ..Self::default()
        }
    }

    /// An attempt failed: record the error and bump the attempt counter.
    pub fn failure(error: String) -> Self {
        Self {
            error_message: Some(error),
            increment_attempts: true,
            ..Self::default()
        }
    }

    /// Terminal failure without a further attempt (unrecoverable input).
    pub fn terminal(error: String) -> Self {
        Self {
            error_message: Some(error),
            ..Self::default()
        }
    }
}

#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert(&self, document: &Document) -> Result<(), AppError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, AppError>;

    /// Page through documents ordered by upload time descending.
    /// Returns the page plus the total record count.
    async fn find_paginated(&self, page: u64, per_page: u64)
        -> Result<(Vec<Document>, u64), AppError>;

    /// Conditional status update: succeeds only if the stored status is one
    /// of `expected`. Returns true iff this call won the race. This is the
    /// sole cross-process coordination primitive; callers must treat `false`
    /// as "someone else got there first", not as an error.
    async fn update_status(
        &self,
        id: &str,
        expected: &[DocumentStatus],
        next: DocumentStatus,
        change: StatusChange,
    ) -> Result<bool, AppError>;

    /// Reconciliation query: documents still Uploaded with an upload time
    /// before `cutoff`, i.e. whose processing event may never have reached
    /// the broker.
    async fn find_uploaded_before(&self, cutoff: DateTime<Utc>)
        -> Result<Vec<Document>, AppError>;

    async fn delete(&self, id: &str) -> Result<bool, AppError>;

    async fn health_check(&self) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct MongoMetadataStore {
    client: MongoClient,
    db: Database,
}

impl MongoMetadataStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, AppError> {
        tracing::info!(uri = %uri, "Connecting to MongoDB");
        let client = MongoClient::with_uri_str(uri).await.map_err(|e| {
            tracing::error!("Failed to connect to MongoDB at {}: {}", uri, e);
            AppError::from(e)
        })?;
        let db = client.database(database);
        tracing::info!(database = %database, "Connected to MongoDB database");
        Ok(Self { client, db })
    }

    pub async fn initialize_indexes(&self) -> Result<(), AppError> {
        let documents = self.documents();

        let uploaded_at_index = IndexModel::builder()
            .keys(doc! { "uploaded_at": -1 })
            .options(
                IndexOptions::builder()
                    .name("uploaded_at_listing".to_string())
                    .build(),
            )
            .build();
        documents.create_index(uploaded_at_index, None).await?;

        // Supports both the worker claim filter and the reconciliation sweep.
        let status_index = IndexModel::builder()
            .keys(doc! { "status": 1, "uploaded_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("status_uploaded_at".to_string())
                    .build(),
            )
            .build();
        documents.create_index(status_index, None).await?;

        tracing::info!("Created MongoDB indexes for documents collection");
        Ok(())
    }

    pub fn documents(&self) -> Collection<Document> {
        self.db.collection("documents")
    }

    pub fn client(&self) -> &MongoClient {
        &self.client
    }
}

fn status_bson(status: &DocumentStatus) -> Result<Bson, AppError> {
    mongodb::bson::to_bson(status)
        .map_err(|e| AppError::Database(anyhow::anyhow!("Failed to serialize status: {}", e)))
}

#[async_trait]
impl MetadataStore for MongoMetadataStore {
    async fn insert(&self, document: &Document) -> Result<(), AppError> {
        self.documents().insert_one(document, None).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, AppError> {
        let document = self.documents().find_one(doc! { "_id": id }, None).await?;
        Ok(document)
    }

    async fn find_paginated(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<Document>, u64), AppError> {
        let skip = (page - 1) * per_page;
        let total = self.documents().count_documents(doc! {}, None).await?;

        let find_options = FindOptions::builder()
            .sort(doc! { "uploaded_at": -1 })
            .skip(skip)
            .limit(per_page as i64)
            .build();

        let mut cursor = self.documents().find(doc! {}, find_options).await?;
        let mut documents = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            documents.push(document);
        }

        Ok((documents, total))
    }

    async fn update_status(
        &self,
        id: &str,
        expected: &[DocumentStatus],
        next: DocumentStatus,
        change: StatusChange,
    ) -> Result<bool, AppError> {
        let expected: Vec<Bson> = expected
            .iter()
            .map(status_bson)
            .collect::<Result<_, _>>()?;

        let mut set = doc! {
            "status": status_bson(&next)?,
            "updated_at": mongodb::bson::DateTime::from_chrono(Utc::now()),
        };
        if let Some(error) = change.error_message {
            set.insert("error_message", error);
        } else if change.clear_error {
            set.insert("error_message", Bson::Null);
        }
        if let Some(extraction) = change.extraction {
            let extraction = mongodb::bson::to_bson(&extraction).map_err(|e| {
                AppError::Database(anyhow::anyhow!("Failed to serialize extraction: {}", e))
            })?;
            set.insert("extraction", extraction);
        }

        let mut update = doc! { "$set": set };
        if change.increment_attempts {
            update.insert("$inc", doc! { "processing_attempts": 1 });
        }

        let result = self
            .documents()
            .update_one(
                doc! { "_id": id, "status": { "$in": expected } },
                update,
                None,
            )
            .await?;

        Ok(result.modified_count == 1)
    }

    async fn find_uploaded_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Document>, AppError> {
        let filter = doc! {
            "status": status_bson(&DocumentStatus::Uploaded)?,
            "uploaded_at": { "$lt": mongodb::bson::DateTime::from_chrono(cutoff) },
        };

        let mut cursor = self.documents().find(filter, None).await?;
        let mut documents = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            documents.push(document);
        }
        Ok(documents)
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let result = self.documents().delete_one(doc! { "_id": id }, None).await?;
        Ok(result.deleted_count == 1)
    }

    async fn health_check(&self) -> Result<(), AppError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 }, None)
            .await?;
        Ok(())
    }
}

/// Stand-in used when external connections are disabled. The conditional
/// update holds the map lock for the whole read-compare-write, giving the
/// same atomicity the Mongo filter provides.
#[derive(Default)]
pub struct InMemoryMetadataStore {
    documents: Mutex<HashMap<String, Document>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    async fn insert(&self, document: &Document) -> Result<(), AppError> {
        self.documents
            .lock()
            .map_err(|e| AppError::Database(anyhow::anyhow!("Metadata mutex poisoned: {}", e)))?
            .insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Document>, AppError> {
        let document = self
            .documents
            .lock()
            .map_err(|e| AppError::Database(anyhow::anyhow!("Metadata mutex poisoned: {}", e)))?
            .get(id)
            .cloned();
        Ok(document)
    }

    async fn find_paginated(
        &self,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<Document>, u64), AppError> {
        let documents = self
            .documents
            .lock()
            .map_err(|e| AppError::Database(anyhow::anyhow!("Metadata mutex poisoned: {}", e)))?;

        let total = documents.len() as u64;
        let mut all: Vec<Document> = documents.values().cloned().collect();
        all.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));

        let skip = ((page - 1) * per_page) as usize;
        let page_items = all.into_iter().skip(skip).take(per_page as usize).collect();
        Ok((page_items, total))
    }

    async fn update_status(
        &self,
        id: &str,
        expected: &[DocumentStatus],
        next: DocumentStatus,
        change: StatusChange,
    ) -> Result<bool, AppError> {
        let mut documents = self
            .documents
            .lock()
            .map_err(|e| AppError::Database(anyhow::anyhow!("Metadata mutex poisoned: {}", e)))?;

        let Some(document) = documents.get_mut(id) else {
            return Ok(false);
        };
        if !expected.contains(&document.status) {
            return Ok(false);
        }

        document.status = next;
        document.updated_at = Utc::now();
        if let Some(error) = change.error_message {
            document.error_message = Some(error);
        } else if change.clear_error {
            document.error_message = None;
        }
        if let Some(extraction) = change.extraction {
            document.extraction = Some(extraction);
        }
        if change.increment_attempts {
            document.processing_attempts += 1;
        }

        Ok(true)
    }

    async fn find_uploaded_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Document>, AppError> {
        let documents = self
            .documents
            .lock()
            .map_err(|e| AppError::Database(anyhow::anyhow!("Metadata mutex poisoned: {}", e)))?;

        Ok(documents
            .values()
            .filter(|d| d.status == DocumentStatus::Uploaded && d.uploaded_at < cutoff)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<bool, AppError> {
        let removed = self
            .documents
            .lock()
            .map_err(|e| AppError::Database(anyhow::anyhow!("Metadata mutex poisoned: {}", e)))?
            .remove(id);
        Ok(removed.is_some())
    }

    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }
}
