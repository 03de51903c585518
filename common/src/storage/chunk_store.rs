use std::{cmp::Ordering, sync::Arc};

use futures::{stream, StreamExt};
use tracing::debug;

use crate::{
    error::AppError,
    storage::{db::SurrealDbClient, types::document_chunk::DocumentChunk},
};

const DEFAULT_INSERT_CONCURRENCY: usize = 8;

/// Provenance subset of a chunk, returned for citation previews.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPreview {
    pub text: String,
    pub source_pdf: String,
    pub page_number: u32,
}

/// A single chunk that failed to insert.
#[derive(Debug)]
pub struct InsertFailure {
    pub chunk_id: String,
    pub error: AppError,
}

/// What a batch insert actually did. Chunks succeed and fail
/// independently; `inserted` counts the chunks that are in the store and
/// retrievable even when `failures` is non-empty.
#[derive(Debug, Default)]
pub struct InsertOutcome {
    pub inserted: usize,
    pub failures: Vec<InsertFailure>,
}

impl InsertOutcome {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Store of immutable document chunks with vector search. All chunks share
/// one embedding dimension, fixed at construction; inserts with any other
/// dimension are rejected before touching the database.
#[derive(Clone)]
pub struct ChunkStore {
    db: Arc<SurrealDbClient>,
    dimension: usize,
    insert_concurrency: usize,
}

impl ChunkStore {
    pub fn new(db: Arc<SurrealDbClient>, dimension: usize) -> Self {
        Self {
            db,
            dimension,
            insert_concurrency: DEFAULT_INSERT_CONCURRENCY,
        }
    }

    pub fn with_insert_concurrency(mut self, insert_concurrency: usize) -> Self {
        self.insert_concurrency = insert_concurrency.max(1);
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Inserts chunks with bounded parallelism. Order is not preserved.
    /// A mismatched embedding dimension fails validation up front and
    /// nothing is written. Write failures do not abort the rest: the
    /// outcome counts every chunk that was persisted and lists the ones
    /// that were not, with a colliding chunk id classified as
    /// `DuplicateKey` (an invariant violation).
    pub async fn insert(&self, chunks: Vec<DocumentChunk>) -> Result<InsertOutcome, AppError> {
        for chunk in &chunks {
            if chunk.vector_embeddings.len() != self.dimension {
                return Err(AppError::Validation(format!(
                    "chunk {} has embedding dimension {}, store expects {}",
                    chunk.chunk_id,
                    chunk.vector_embeddings.len(),
                    self.dimension
                )));
            }
        }

        let results: Vec<Result<(), InsertFailure>> =
            stream::iter(chunks.into_iter().map(|chunk| {
                let db = Arc::clone(&self.db);
                async move {
                    let chunk_id = chunk.chunk_id.clone();
                    db.store_item(chunk).await.map(|_| ()).map_err(|err| {
                        let error = classify_insert_error(&err, &chunk_id);
                        InsertFailure { chunk_id, error }
                    })
                }
            }))
            .buffer_unordered(self.insert_concurrency)
            .collect()
            .await;

        let mut outcome = InsertOutcome::default();
        for result in results {
            match result {
                Ok(()) => outcome.inserted += 1,
                Err(failure) => outcome.failures.push(failure),
            }
        }

        Ok(outcome)
    }

    /// Removes every chunk belonging to the document. Idempotent: deleting
    /// for an absent document removes zero chunks and is not an error.
    pub async fn delete_by_document(&self, document_id: &str) -> Result<usize, AppError> {
        let mut response = self
            .db
            .query("DELETE document_chunk WHERE source_pdf = $document RETURN BEFORE")
            .bind(("document", document_id.to_string()))
            .await?;
        let deleted: Vec<DocumentChunk> = response.take(0)?;

        debug!(
            document_id,
            chunks_deleted = deleted.len(),
            "deleted chunks by document"
        );

        Ok(deleted.len())
    }

    pub async fn fetch_by_id(&self, chunk_id: &str) -> Result<ChunkPreview, AppError> {
        let chunk: Option<DocumentChunk> = self.db.get_item(chunk_id).await?;

        chunk
            .map(|chunk| ChunkPreview {
                text: chunk.text,
                source_pdf: chunk.source_pdf,
                page_number: chunk.page_number,
            })
            .ok_or_else(|| AppError::NotFound(format!("chunk {chunk_id} not found")))
    }

    /// Nearest-neighbor search over chunk embeddings by cosine similarity.
    ///
    /// `exact` selects brute-force scoring over the whole table; the
    /// default approximate path goes through the HNSW index with
    /// `num_candidates` as the candidate-pool size, which may miss true
    /// neighbors near the pool boundary (a recall property, not a bug).
    /// A non-empty `document_filter` restricts results to those documents;
    /// a filter matching nothing yields an empty result set.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        num_candidates: usize,
        exact: bool,
        limit: usize,
        document_filter: &[String],
    ) -> Result<Vec<(DocumentChunk, f32)>, AppError> {
        if query_embedding.len() != self.dimension {
            return Err(AppError::Validation(format!(
                "query embedding dimension {} does not match store dimension {}",
                query_embedding.len(),
                self.dimension
            )));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let filtered = !document_filter.is_empty();
        let query = if exact {
            let filter_clause = if filtered {
                "WHERE source_pdf IN $sources "
            } else {
                ""
            };
            format!(
                "SELECT *, vector::similarity::cosine(vector_embeddings, $query_embedding) \
                 AS similarity FROM document_chunk {filter_clause}\
                 ORDER BY similarity DESC LIMIT {limit}"
            )
        } else {
            let ef = num_candidates.max(limit);
            let filter_clause = if filtered {
                "AND source_pdf IN $sources"
            } else {
                ""
            };
            format!(
                "SELECT * FROM document_chunk \
                 WHERE vector_embeddings <|{limit},{ef}|> $query_embedding {filter_clause}"
            )
        };

        let mut statement = self
            .db
            .query(query)
            .bind(("query_embedding", query_embedding.to_vec()));
        if filtered {
            statement = statement.bind(("sources", document_filter.to_vec()));
        }

        let mut response = statement.await?;
        let chunks: Vec<DocumentChunk> = response.take(0)?;

        let mut results: Vec<(DocumentChunk, f32)> = chunks
            .into_iter()
            .map(|chunk| {
                let score = cosine_similarity(query_embedding, &chunk.vector_embeddings);
                (chunk, score)
            })
            .collect();

        // Descending similarity; ties broken by insertion recency so a
        // fixed store state always yields the same ordering.
        results.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.0.created_at.cmp(&a.0.created_at))
        });
        results.truncate(limit);

        Ok(results)
    }
}

fn classify_insert_error(err: &surrealdb::Error, chunk_id: &str) -> AppError {
    if err.to_string().contains("already exists") {
        AppError::DuplicateKey(format!("chunk id {chunk_id} already present"))
    } else {
        AppError::InternalError(format!("failed to insert chunk {chunk_id}: {err}"))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
