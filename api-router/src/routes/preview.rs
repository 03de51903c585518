use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use serde_json::json;

use common::error::AppError;
use retrieval_pipeline::citations::is_fallback_marker;

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct PreviewParams {
    #[serde(rename = "chunkId")]
    pub chunk_id: String,
}

/// GET /api/preview?chunkId=...: the source text behind a citation.
///
/// Fallback markers (`citation-<n>`) are answered with 200 and no
/// provenance, since there was never a chunk behind them; an id for a
/// chunk that no longer exists is a dangling citation and maps to 404.
pub async fn preview_chunk(
    State(state): State<ApiState>,
    Query(params): Query<PreviewParams>,
) -> Result<impl IntoResponse, ApiError> {
    if params.chunk_id.trim().is_empty() {
        return Err(ApiError::ValidationError("chunkId must not be empty".into()));
    }

    if is_fallback_marker(&params.chunk_id) {
        return Ok((
            StatusCode::OK,
            Json(json!({
                "kind": "fallback",
                "marker": params.chunk_id,
            })),
        ));
    }

    match state.chunk_store.fetch_by_id(&params.chunk_id).await {
        Ok(preview) => Ok((
            StatusCode::OK,
            Json(json!({
                "kind": "resolved",
                "chunk_id": params.chunk_id,
                "text": preview.text,
                "source_pdf": preview.source_pdf,
                "page_number": preview.page_number,
            })),
        )),
        Err(AppError::NotFound(_)) => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({
                "kind": "dangling",
                "chunk_id": params.chunk_id,
            })),
        )),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use common::storage::types::document_chunk::DocumentChunk;

    #[tokio::test]
    async fn test_preview_resolves_existing_chunk() {
        let state = test_state().await;
        let embedding = vec![0.0; state.embedding_provider.dimension()];
        let chunk = DocumentChunk::new(
            "report.pdf".to_string(),
            "cited text".to_string(),
            3,
            0,
            embedding,
        );
        state
            .chunk_store
            .insert(vec![chunk.clone()])
            .await
            .expect("insert");

        let response = preview_chunk(
            State(state),
            Query(PreviewParams {
                chunk_id: chunk.chunk_id,
            }),
        )
        .await
        .expect("preview")
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_preview_fallback_marker_is_ok_without_provenance() {
        let state = test_state().await;
        let response = preview_chunk(
            State(state),
            Query(PreviewParams {
                chunk_id: "citation-4".to_string(),
            }),
        )
        .await
        .expect("preview")
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_preview_missing_chunk_is_dangling_404() {
        let state = test_state().await;
        let response = preview_chunk(
            State(state),
            Query(PreviewParams {
                chunk_id: "no-such-chunk".to_string(),
            }),
        )
        .await
        .expect("preview")
        .into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_preview_empty_id_is_rejected() {
        let state = test_state().await;
        let result = preview_chunk(
            State(state),
            Query(PreviewParams {
                chunk_id: "  ".to_string(),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::ValidationError(_))));
    }
}
