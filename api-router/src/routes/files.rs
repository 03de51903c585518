use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::info;

use common::storage::types::source_document::{DocumentState, SourceDocument};

use crate::{api_state::ApiState, error::ApiError};

/// GET /api/files: every document currently available for querying.
pub async fn list_files(State(state): State<ApiState>) -> Result<impl IntoResponse, ApiError> {
    let documents = SourceDocument::list_present(&state.db).await?;

    let files: Vec<_> = documents
        .into_iter()
        .map(|doc| {
            json!({
                "file_name": doc.file_name,
                "page_count": doc.page_count,
                "mime_type": doc.mime_type,
                "uploaded_at": doc.created_at.to_rfc3339(),
            })
        })
        .collect();

    Ok(Json(json!({ "files": files })))
}

/// DELETE /api/files/{file_name}: cascading delete of a document, its
/// chunks and its stored bytes.
pub async fn delete_file(
    State(state): State<ApiState>,
    Path(file_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let report = state.lifecycle.delete_document(&file_name).await?;

    info!(
        file_name = %report.file_name,
        chunks_deleted = report.chunks_deleted,
        "document deleted via API"
    );

    Ok(Json(json!({
        "status": "deleted",
        "file_name": report.file_name,
        "chunks_deleted": report.chunks_deleted,
    })))
}

/// GET /files/{file_name}: the original uploaded bytes, served with the
/// stored content type.
pub async fn serve_file(
    State(state): State<ApiState>,
    Path(file_name): Path<String>,
) -> Result<Response, ApiError> {
    let document = SourceDocument::find_by_file_name(&file_name, &state.db)
        .await?
        .filter(|doc| doc.state == DocumentState::Present)
        .ok_or_else(|| ApiError::NotFound(format!("document {file_name} not found")))?;

    let bytes = state
        .storage
        .get(&document.path)
        .await
        .map_err(common::error::AppError::Storage)?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, document.mime_type)],
        bytes,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use bytes::Bytes;

    async fn seed_present_document(state: &ApiState, file_name: &str) -> SourceDocument {
        let document = SourceDocument::new(file_name.to_string(), b"bytes");
        state
            .storage
            .put(&document.path, Bytes::from_static(b"bytes"))
            .await
            .expect("put");
        state
            .db
            .store_item(document.clone())
            .await
            .expect("store document");
        document
    }

    #[tokio::test]
    async fn test_list_files_shows_present_documents() {
        let state = test_state().await;
        seed_present_document(&state, "manual.pdf").await;

        let response = list_files(State(state)).await.expect("list");
        let response = response.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_404() {
        let state = test_state().await;
        let result = delete_file(State(state), Path("ghost.pdf".to_string())).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_serve_file_round_trip() {
        let state = test_state().await;
        seed_present_document(&state, "notes.txt").await;

        let response = serve_file(State(state.clone()), Path("notes.txt".to_string()))
            .await
            .expect("serve");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok()),
            Some("text/plain")
        );
    }

    #[tokio::test]
    async fn test_deleted_document_is_not_served() {
        let state = test_state().await;
        let document = seed_present_document(&state, "notes.txt").await;
        SourceDocument::set_state(&document.id, DocumentState::Deleted, &state.db)
            .await
            .expect("set state");

        let result = serve_file(State(state), Path("notes.txt".to_string())).await;
        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }
}
