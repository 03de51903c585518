use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_typed_multipart::{FieldData, TryFromMultipart, TypedMultipart};
use serde_json::json;
use tempfile::NamedTempFile;
use tracing::{info, warn};

use common::{
    error::AppError,
    storage::types::source_document::SourceDocument,
};
use ingestion_pipeline::{extract_pages, IngestionReport};

use crate::{api_state::ApiState, error::ApiError};

pub const UPLOAD_MAX_BODY_BYTES: usize = 50_000_000;

#[derive(Debug, TryFromMultipart)]
pub struct UploadParams {
    #[form_data(limit = "50000000")]
    #[form_data(default)]
    pub pdfs: Vec<FieldData<NamedTempFile>>,
}

/// POST /upload: ingest one or more documents. Re-uploading an existing
/// file name replaces the previous version: the old document is
/// cascade-deleted before the new one is ingested.
pub async fn upload_document(
    State(state): State<ApiState>,
    TypedMultipart(input): TypedMultipart<UploadParams>,
) -> Result<impl IntoResponse, ApiError> {
    if input.pdfs.is_empty() {
        return Err(ApiError::ValidationError("upload contains no files".into()));
    }

    let mut reports = Vec::with_capacity(input.pdfs.len());
    for file in input.pdfs {
        let file_name = file
            .metadata
            .file_name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ApiError::ValidationError("upload is missing a file name".into()))?;

        let bytes = tokio::fs::read(file.contents.path())
            .await
            .map_err(AppError::Io)?;

        let report = ingest_upload(&state, file_name, bytes).await?;
        reports.push(report);
    }

    let status = if reports.iter().all(IngestionReport::is_complete) {
        "complete"
    } else {
        "partial"
    };

    Ok((
        StatusCode::OK,
        Json(json!({
            "status": status,
            "files": reports.iter().map(report_json).collect::<Vec<_>>(),
        })),
    ))
}

fn report_json(report: &IngestionReport) -> serde_json::Value {
    json!({
        "file_name": report.file_name,
        "pages": report.pages,
        "chunks_planned": report.chunks_planned,
        "chunks_ingested": report.chunks_ingested,
        "failed_batches": report
            .failed_batches
            .iter()
            .map(|failure| json!({
                "batch_index": failure.batch_index,
                "chunks": failure.sequence_indexes.len(),
                "error": failure.error,
            }))
            .collect::<Vec<_>>(),
    })
}

/// The ingestion flow behind the handler: replace any previous document
/// with the same name, persist record and bytes, then chunk and embed.
pub async fn ingest_upload(
    state: &ApiState,
    file_name: String,
    bytes: Vec<u8>,
) -> Result<IngestionReport, AppError> {
    if let Some(existing) = SourceDocument::find_by_file_name(&file_name, &state.db).await? {
        info!(
            file_name,
            previous_id = %existing.id,
            "replacing existing document"
        );
        state.lifecycle.delete_document(&file_name).await?;
    }

    let document = SourceDocument::new(file_name.clone(), &bytes);

    let pages = match extract_pages(bytes.clone(), &document.mime_type).await {
        Ok(pages) => pages,
        Err(err) => {
            warn!(file_name, error = %err, "extraction failed, nothing ingested");
            return Err(err);
        }
    };

    state
        .storage
        .put(&document.path, bytes::Bytes::from(bytes))
        .await?;
    state
        .db
        .store_item(document.clone())
        .await
        .map_err(AppError::Database)?;

    let page_count = pages.last().map_or(0, |page| page.page_number);
    SourceDocument::set_page_count(&document.id, page_count, &state.db).await?;

    let report = state
        .ingestion_pipeline()
        .ingest_pages(&file_name, &pages)
        .await?;

    info!(
        file_name,
        document_id = %document.id,
        chunks_ingested = report.chunks_ingested,
        complete = report.is_complete(),
        "upload ingested"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use common::storage::types::document_chunk::DocumentChunk;

    fn long_text() -> Vec<u8> {
        "Cooperative scheduling means a task yields at await points. "
            .repeat(30)
            .into_bytes()
    }

    #[tokio::test]
    async fn test_upload_ingests_text_document() {
        let state = test_state().await;

        let report = ingest_upload(&state, "notes.txt".to_string(), long_text())
            .await
            .expect("ingest");

        assert!(report.is_complete());
        assert!(report.chunks_ingested > 0);

        let documents = SourceDocument::list_present(&state.db).await.expect("list");
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].file_name, "notes.txt");
        assert_eq!(documents[0].page_count, 1);
        assert!(state
            .storage
            .exists(&documents[0].path)
            .await
            .expect("exists"));

        let chunks: Vec<DocumentChunk> = state
            .db
            .get_all_stored_items()
            .await
            .expect("list chunks");
        assert_eq!(chunks.len(), report.chunks_ingested);
        assert!(chunks.iter().all(|c| c.source_pdf == "notes.txt"));
    }

    #[tokio::test]
    async fn test_reupload_replaces_previous_version() {
        let state = test_state().await;

        ingest_upload(&state, "notes.txt".to_string(), long_text())
            .await
            .expect("first ingest");
        let first_chunks: Vec<DocumentChunk> = state
            .db
            .get_all_stored_items()
            .await
            .expect("list chunks");

        let report = ingest_upload(
            &state,
            "notes.txt".to_string(),
            b"A much shorter replacement text.".to_vec(),
        )
        .await
        .expect("second ingest");

        assert!(report.is_complete());

        let documents = SourceDocument::list_present(&state.db).await.expect("list");
        assert_eq!(documents.len(), 1, "still exactly one document");

        let chunks: Vec<DocumentChunk> = state
            .db
            .get_all_stored_items()
            .await
            .expect("list chunks");
        assert_eq!(chunks.len(), report.chunks_ingested);
        // None of the first version's chunks survive.
        for old in &first_chunks {
            assert!(chunks.iter().all(|c| c.chunk_id != old.chunk_id));
        }
    }

    #[tokio::test]
    async fn test_unsupported_content_is_rejected_without_side_effects() {
        let state = test_state().await;

        let result = ingest_upload(&state, "image.png".to_string(), vec![0x89, 0x50]).await;
        assert!(matches!(result, Err(AppError::Validation(_))));

        let documents = SourceDocument::list_present(&state.db).await.expect("list");
        assert!(documents.is_empty(), "no record for a rejected upload");
    }
}
