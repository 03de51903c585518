pub mod answer;
pub mod citations;

use std::sync::Arc;

use tracing::debug;

use common::{
    error::AppError,
    storage::{chunk_store::ChunkStore, types::document_chunk::DocumentChunk},
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};

/// A chunk returned by retrieval, scored by cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub chunk: DocumentChunk,
    pub score: f32,
}

/// Knobs for a retrieval run. `document_filter` is a list of file names;
/// empty means search all documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalOptions {
    pub num_candidates: usize,
    pub limit: usize,
    pub exact: bool,
    pub document_filter: Vec<String>,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self {
            num_candidates: 40,
            limit: 10,
            exact: false,
            document_filter: Vec::new(),
        }
    }
}

impl RetrievalOptions {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            num_candidates: cfg.query_num_candidates,
            limit: cfg.query_limit,
            exact: cfg.query_exact,
            document_filter: Vec::new(),
        }
    }

    pub fn with_document_filter(mut self, document_filter: Vec<String>) -> Self {
        self.document_filter = document_filter;
        self
    }
}

/// Embeds the question and runs nearest-neighbor search over the chunk
/// store. Results come back ordered by descending score.
pub async fn retrieve_chunks(
    chunk_store: &ChunkStore,
    embedding_provider: &Arc<EmbeddingProvider>,
    question: &str,
    options: &RetrievalOptions,
) -> Result<Vec<RetrievedChunk>, AppError> {
    if question.trim().is_empty() {
        return Err(AppError::Validation("question must not be empty".into()));
    }
    if options.limit == 0 {
        return Err(AppError::Validation(
            "retrieval limit must be non-zero".into(),
        ));
    }

    let query_embedding = embedding_provider.embed_with_retry(question).await?;

    let results = chunk_store
        .search(
            &query_embedding,
            options.num_candidates,
            options.exact,
            options.limit,
            &options.document_filter,
        )
        .await?;

    debug!(
        question_chars = question.len(),
        results = results.len(),
        exact = options.exact,
        filtered = !options.document_filter.is_empty(),
        "retrieval finished"
    );

    Ok(results
        .into_iter()
        .map(|(chunk, score)| RetrievedChunk { chunk, score })
        .collect())
}
