use crate::dtos::HealthResponse;
use crate::startup::AppState;
use axum::{extract::State, response::IntoResponse, Json};
use std::collections::BTreeMap;

/// Reports each external dependency independently rather than one aggregated
/// boolean, so an operator can tell which system is down. Always 200; callers
/// inspect the body.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut dependencies = BTreeMap::new();

    dependencies.insert(
        "metadata_store".to_string(),
        match state.store.health_check().await {
            Ok(()) => "healthy".to_string(),
            Err(e) => format!("error: {}", e),
        },
    );
    dependencies.insert(
        "blob_store".to_string(),
        match state.blobs.health_check().await {
            Ok(()) => "healthy".to_string(),
            Err(e) => format!("error: {}", e),
        },
    );
    dependencies.insert(
        "broker".to_string(),
        match state.publisher.health_check().await {
            Ok(()) => "healthy".to_string(),
            Err(e) => format!("error: {}", e),
        },
    );

    let status = if dependencies.values().all(|v| v == "healthy") {
        "healthy"
    } else {
        "degraded"
    };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        dependencies,
    })
}

pub async fn metrics_endpoint() -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        crate::services::get_metrics(),
    )
}
