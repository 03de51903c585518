use axum::{extract::State, response::IntoResponse, Json};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use retrieval_pipeline::{
    answer::generate_answer,
    citations::{resolve_markers, CitationOutcome},
    retrieve_chunks, RetrievalOptions,
};

use crate::{api_state::ApiState, error::ApiError};

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    /// File names to search; empty means all documents.
    #[serde(default)]
    pub documents: Vec<String>,
    /// Overrides the configured approximate/exact search choice.
    #[serde(default)]
    pub exact: Option<bool>,
}

/// POST /query: retrieve relevant chunks, generate a cited answer, and
/// classify every citation marker the model emitted.
pub async fn query_documents(
    State(state): State<ApiState>,
    Json(request): Json<QueryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut options = RetrievalOptions::from_config(&state.config)
        .with_document_filter(request.documents.clone());
    if let Some(exact) = request.exact {
        options.exact = exact;
    }

    let retrieved = retrieve_chunks(
        &state.chunk_store,
        &state.embedding_provider,
        &request.question,
        &options,
    )
    .await?;

    let answer = generate_answer(
        &state.openai_client,
        &state.config.query_model,
        &retrieved,
        &request.question,
    )
    .await?;

    let citations = resolve_markers(&state.chunk_store, &answer).await?;

    info!(
        question_chars = request.question.len(),
        retrieved = retrieved.len(),
        citations = citations.len(),
        "query answered"
    );

    Ok(Json(json!({
        "answer": answer,
        "chunks": retrieved
            .iter()
            .map(|r| json!({
                "chunk_id": r.chunk.chunk_id,
                "source_pdf": r.chunk.source_pdf,
                "page_number": r.chunk.page_number,
                "score": r.score,
            }))
            .collect::<Vec<_>>(),
        "citations": citations.iter().map(citation_json).collect::<Vec<_>>(),
    })))
}

fn citation_json(outcome: &CitationOutcome) -> Value {
    match outcome {
        CitationOutcome::Resolved {
            label,
            chunk_id,
            preview,
        } => json!({
            "kind": "resolved",
            "label": label,
            "chunk_id": chunk_id,
            "source_pdf": preview.source_pdf,
            "page_number": preview.page_number,
        }),
        CitationOutcome::Fallback { marker } => json!({
            "kind": "fallback",
            "marker": marker,
        }),
        CitationOutcome::Dangling { label, chunk_id } => json!({
            "kind": "dangling",
            "label": label,
            "chunk_id": chunk_id,
        }),
    }
}
