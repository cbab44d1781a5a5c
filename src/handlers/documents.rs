use crate::dtos::{DocumentListParams, DocumentListResponse, DocumentResponse};
use crate::error::AppError;
use crate::startup::AppState;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};

fn owner_id(headers: &HeaderMap) -> String {
    headers
        .get("X-User-ID")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("anonymous")
        .to_string()
}

pub async fn upload_document(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let field = multipart
        .next_field()
        .await
        .map_err(|e| AppError::Validation(anyhow::anyhow!("Failed to read multipart field: {}", e)))?
        .ok_or_else(|| AppError::Validation(anyhow::anyhow!("No file uploaded")))?;

    let filename = field.file_name().unwrap_or("unnamed").to_string();
    let content_type = field
        .content_type()
        .unwrap_or("application/octet-stream")
        .to_string();

    let data = field
        .bytes()
        .await
        .map_err(|e| AppError::Validation(anyhow::anyhow!("Failed to read file bytes: {}", e)))?
        .to_vec();

    let document = state
        .coordinator
        .accept(data, &filename, &content_type, &owner_id(&headers))
        .await?;

    Ok((StatusCode::CREATED, Json(DocumentResponse::from(document))))
}

pub async fn list_documents(
    State(state): State<AppState>,
    Query(params): Query<DocumentListParams>,
) -> Result<impl IntoResponse, AppError> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(10).clamp(1, 100);

    let (documents, total) = state.store.find_paginated(page, per_page).await?;

    let total_pages = total.div_ceil(per_page);

    Ok(Json(DocumentListResponse {
        documents: documents.into_iter().map(DocumentResponse::from).collect(),
        total,
        page,
        per_page,
        total_pages,
    }))
}

pub async fn get_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let document = state
        .store
        .find_by_id(&document_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Document not found")))?;

    Ok(Json(DocumentResponse::from(document)))
}

pub async fn download_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let document = state
        .store
        .find_by_id(&document_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Document not found")))?;

    let data = state.blobs.get(&document.storage_key).await.map_err(|e| {
        tracing::error!(
            document_id = %document_id,
            storage_key = %document.storage_key,
            error = %e,
            "Failed to fetch blob for download"
        );
        e
    })?;

    tracing::info!(
        document_id = %document_id,
        size = data.len(),
        "Document download completed"
    );

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, document.content_type),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", document.filename),
            ),
        ],
        data,
    ))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path(document_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let document = state
        .store
        .find_by_id(&document_id)
        .await?
        .ok_or_else(|| AppError::NotFound(anyhow::anyhow!("Document not found")))?;

    // Blob first; losing the blob of a record about to disappear is harmless,
    // the reverse order would leave a record pointing at nothing.
    if let Err(e) = state.blobs.delete(&document.storage_key).await {
        tracing::warn!(
            document_id = %document_id,
            storage_key = %document.storage_key,
            error = %e,
            "Blob delete failed during document removal"
        );
    }

    state.store.delete(&document_id).await?;

    tracing::info!(document_id = %document_id, "Document deleted");
    Ok(StatusCode::NO_CONTENT)
}
