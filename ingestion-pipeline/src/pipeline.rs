use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tracing::{info, warn};

use common::{
    error::AppError,
    storage::{
        chunk_store::{ChunkStore, InsertOutcome},
        types::document_chunk::DocumentChunk,
    },
    utils::embedding::EmbeddingProvider,
};

use crate::{
    extract::PageText,
    splitter::{plan_chunks, ChunkingConfig, PlannedChunk},
};

/// Service seam for the embed-and-persist stages so tests can inject
/// failing backends.
#[async_trait]
pub trait PipelineServices: Send + Sync {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError>;

    async fn persist_chunks(&self, chunks: Vec<DocumentChunk>) -> Result<InsertOutcome, AppError>;
}

pub struct DefaultPipelineServices {
    embedding_provider: Arc<EmbeddingProvider>,
    chunk_store: ChunkStore,
}

impl DefaultPipelineServices {
    pub fn new(embedding_provider: Arc<EmbeddingProvider>, chunk_store: ChunkStore) -> Self {
        Self {
            embedding_provider,
            chunk_store,
        }
    }
}

#[async_trait]
impl PipelineServices for DefaultPipelineServices {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        self.embedding_provider.embed_batch_with_retry(texts).await
    }

    async fn persist_chunks(&self, chunks: Vec<DocumentChunk>) -> Result<InsertOutcome, AppError> {
        self.chunk_store.insert(chunks).await
    }
}

/// A batch that failed to embed or persist, in whole or in part.
/// `sequence_indexes` names only the chunks that are actually missing
/// from the store; chunks of the same batch that were written before the
/// failure count as ingested.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFailure {
    pub batch_index: usize,
    pub sequence_indexes: Vec<u32>,
    pub error: String,
}

/// Outcome of an ingestion run. Batches fail independently: a report can
/// be partial, with every successfully processed batch already persisted
/// and visible to retrieval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionReport {
    pub file_name: String,
    pub pages: usize,
    pub chunks_planned: usize,
    pub chunks_ingested: usize,
    pub failed_batches: Vec<BatchFailure>,
}

impl IngestionReport {
    pub fn is_complete(&self) -> bool {
        self.failed_batches.is_empty()
    }
}

/// Turns extracted pages into embedded, persisted chunks.
pub struct IngestionPipeline {
    services: Arc<dyn PipelineServices>,
    chunking: ChunkingConfig,
    batch_size: usize,
}

impl IngestionPipeline {
    pub fn new(
        services: Arc<dyn PipelineServices>,
        chunking: ChunkingConfig,
        batch_size: usize,
    ) -> Self {
        Self {
            services,
            chunking,
            batch_size: batch_size.max(1),
        }
    }

    /// Chunks, embeds and persists the pages of one document. Embedding
    /// runs in batches; a failing batch is recorded and skipped rather
    /// than aborting the run, so everything that embedded cleanly is kept.
    pub async fn ingest_pages(
        &self,
        file_name: &str,
        pages: &[PageText],
    ) -> Result<IngestionReport, AppError> {
        let planned = plan_chunks(pages, &self.chunking)?;
        let chunks_planned = planned.len();

        let mut chunks_ingested = 0;
        let mut failed_batches = Vec::new();

        for (batch_index, batch) in planned.chunks(self.batch_size).enumerate() {
            let (persisted, failure) = self.process_batch(file_name, batch).await;
            chunks_ingested += persisted;
            if let Some((sequence_indexes, error)) = failure {
                warn!(
                    file_name,
                    batch_index,
                    persisted,
                    missing = sequence_indexes.len(),
                    error = %error,
                    "ingestion batch failed, continuing with remaining batches"
                );
                failed_batches.push(BatchFailure {
                    batch_index,
                    sequence_indexes,
                    error,
                });
            }
        }

        let report = IngestionReport {
            file_name: file_name.to_string(),
            pages: pages.len(),
            chunks_planned,
            chunks_ingested,
            failed_batches,
        };

        info!(
            file_name,
            pages = report.pages,
            chunks_planned = report.chunks_planned,
            chunks_ingested = report.chunks_ingested,
            failed_batches = report.failed_batches.len(),
            "ingestion run finished"
        );

        Ok(report)
    }

    /// Embeds and persists one batch. Returns the number of chunks now
    /// in the store plus, if anything went wrong, the sequence indexes
    /// that are missing and the error text.
    async fn process_batch(
        &self,
        file_name: &str,
        batch: &[PlannedChunk],
    ) -> (usize, Option<(Vec<u32>, String)>) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embeddings = match self.services.embed_batch(texts).await {
            Ok(embeddings) => embeddings,
            Err(err) => return (0, Some((all_sequence_indexes(batch), err.to_string()))),
        };

        if embeddings.len() != batch.len() {
            let error = format!(
                "embedding backend returned {} vectors for {} chunks",
                embeddings.len(),
                batch.len()
            );
            return (0, Some((all_sequence_indexes(batch), error)));
        }

        let chunks: Vec<DocumentChunk> = batch
            .iter()
            .zip(embeddings)
            .map(|(planned, embedding)| {
                DocumentChunk::new(
                    file_name.to_string(),
                    planned.text.clone(),
                    planned.page_number,
                    planned.sequence_index,
                    embedding,
                )
            })
            .collect();

        let index_by_chunk_id: HashMap<String, u32> = chunks
            .iter()
            .zip(batch)
            .map(|(chunk, planned)| (chunk.chunk_id.clone(), planned.sequence_index))
            .collect();

        match self.services.persist_chunks(chunks).await {
            Ok(outcome) if outcome.is_complete() => (outcome.inserted, None),
            Ok(outcome) => {
                let mut missing: Vec<u32> = outcome
                    .failures
                    .iter()
                    .filter_map(|failure| index_by_chunk_id.get(&failure.chunk_id).copied())
                    .collect();
                missing.sort_unstable();
                let error = outcome
                    .failures
                    .iter()
                    .map(|failure| failure.error.to_string())
                    .collect::<Vec<_>>()
                    .join("; ");
                (outcome.inserted, Some((missing, error)))
            }
            Err(err) => (0, Some((all_sequence_indexes(batch), err.to_string()))),
        }
    }
}

fn all_sequence_indexes(batch: &[PlannedChunk]) -> Vec<u32> {
    batch.iter().map(|c| c.sequence_index).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{
        storage::{db::SurrealDbClient, indexes::ensure_runtime_indexes},
        utils::config::ChunkUnit,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn test_chunking() -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: 120,
            chunk_overlap: 20,
            unit: ChunkUnit::Characters,
        }
    }

    fn pages(count: usize) -> Vec<PageText> {
        let sentence = "The quick brown fox jumps over the lazy dog near the river bank. ";
        (0..count)
            .map(|i| PageText {
                page_number: (i + 1) as u32,
                text: sentence.repeat(6),
            })
            .collect()
    }

    async fn real_services() -> (Arc<DefaultPipelineServices>, ChunkStore) {
        let database = Uuid::new_v4().to_string();
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &database)
                .await
                .expect("Failed to start in-memory surrealdb"),
        );
        ensure_runtime_indexes(&db, 8)
            .await
            .expect("Failed to define indexes");

        let provider = Arc::new(EmbeddingProvider::new_hashed(8).expect("provider"));
        let chunk_store = ChunkStore::new(db, 8);
        let services = Arc::new(DefaultPipelineServices::new(provider, chunk_store.clone()));

        (services, chunk_store)
    }

    #[tokio::test]
    async fn test_full_ingestion_persists_every_chunk() {
        let (services, chunk_store) = real_services().await;
        let pipeline = IngestionPipeline::new(services, test_chunking(), 4);

        let report = pipeline
            .ingest_pages("report.pdf", &pages(2))
            .await
            .expect("ingest");

        assert!(report.is_complete());
        assert!(report.chunks_planned > 0);
        assert_eq!(report.chunks_ingested, report.chunks_planned);
        assert_eq!(report.pages, 2);

        // Everything is queryable straight away.
        let query = vec![0.5; 8];
        let results = chunk_store
            .search(&query, 40, true, 100, &[])
            .await
            .expect("search");
        assert_eq!(results.len(), report.chunks_ingested);
    }

    #[tokio::test]
    async fn test_empty_pages_produce_an_empty_complete_report() {
        let (services, _chunk_store) = real_services().await;
        let pipeline = IngestionPipeline::new(services, test_chunking(), 4);

        let report = pipeline
            .ingest_pages("empty.pdf", &[])
            .await
            .expect("ingest");

        assert!(report.is_complete());
        assert_eq!(report.chunks_planned, 0);
        assert_eq!(report.chunks_ingested, 0);
    }

    /// Embedding backend that fails on one specific batch, to exercise
    /// the partial-ingestion path.
    struct FlakyServices {
        inner: Arc<DefaultPipelineServices>,
        failing_call: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl PipelineServices for FlakyServices {
        async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call == self.failing_call {
                return Err(AppError::Processing("embedding backend unavailable".into()));
            }
            self.inner.embed_batch(texts).await
        }

        async fn persist_chunks(
            &self,
            chunks: Vec<DocumentChunk>,
        ) -> Result<InsertOutcome, AppError> {
            self.inner.persist_chunks(chunks).await
        }
    }

    #[tokio::test]
    async fn test_failed_batch_is_reported_and_others_persist() {
        let (inner, chunk_store) = real_services().await;
        let services = Arc::new(FlakyServices {
            inner,
            failing_call: 1,
            calls: AtomicUsize::new(0),
        });
        let pipeline = IngestionPipeline::new(services, test_chunking(), 2);

        let report = pipeline
            .ingest_pages("report.pdf", &pages(3))
            .await
            .expect("ingest");

        assert!(!report.is_complete());
        assert_eq!(report.failed_batches.len(), 1);
        assert_eq!(report.failed_batches[0].batch_index, 1);
        assert!(!report.failed_batches[0].sequence_indexes.is_empty());
        assert!(report.chunks_ingested < report.chunks_planned);
        assert_eq!(
            report.chunks_ingested + report.failed_batches[0].sequence_indexes.len(),
            report.chunks_planned
        );

        // Persisted batches are visible despite the failure.
        let query = vec![0.5; 8];
        let results = chunk_store
            .search(&query, 40, true, 100, &[])
            .await
            .expect("search");
        assert_eq!(results.len(), report.chunks_ingested);
    }

    /// Persistence backend that writes the first chunk of every batch and
    /// reports the rest as failed, to exercise partial persistence inside
    /// a single batch.
    struct HalfPersistServices {
        inner: Arc<DefaultPipelineServices>,
    }

    #[async_trait]
    impl PipelineServices for HalfPersistServices {
        async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
            self.inner.embed_batch(texts).await
        }

        async fn persist_chunks(
            &self,
            mut chunks: Vec<DocumentChunk>,
        ) -> Result<InsertOutcome, AppError> {
            use common::storage::chunk_store::InsertFailure;

            let dropped = chunks.split_off(1);
            let mut outcome = self.inner.persist_chunks(chunks).await?;
            for chunk in dropped {
                outcome.failures.push(InsertFailure {
                    chunk_id: chunk.chunk_id,
                    error: AppError::InternalError("write timed out".into()),
                });
            }
            Ok(outcome)
        }
    }

    #[tokio::test]
    async fn test_partially_persisted_batch_counts_written_chunks() {
        let (inner, chunk_store) = real_services().await;
        let services = Arc::new(HalfPersistServices { inner });
        let pipeline = IngestionPipeline::new(services, test_chunking(), 16);

        let report = pipeline
            .ingest_pages("report.pdf", &pages(1))
            .await
            .expect("ingest");

        assert!(report.chunks_planned > 1, "need a multi-chunk batch");
        assert!(!report.is_complete());
        assert_eq!(report.chunks_ingested, 1);
        assert_eq!(report.failed_batches.len(), 1);
        assert_eq!(
            report.failed_batches[0].sequence_indexes.len(),
            report.chunks_planned - report.chunks_ingested,
            "only the chunks missing from the store may be reported failed"
        );
        assert!(
            !report.failed_batches[0].sequence_indexes.contains(&0),
            "the persisted chunk is not among the missing ones"
        );

        // The report matches what retrieval can actually see.
        let query = vec![0.5; 8];
        let results = chunk_store
            .search(&query, 40, true, 100, &[])
            .await
            .expect("search");
        assert_eq!(results.len(), report.chunks_ingested);
    }

    #[tokio::test]
    async fn test_batch_size_of_zero_is_clamped() {
        let (services, _chunk_store) = real_services().await;
        let pipeline = IngestionPipeline::new(services, test_chunking(), 0);

        let report = pipeline
            .ingest_pages("report.pdf", &pages(1))
            .await
            .expect("ingest");
        assert!(report.is_complete());
    }
}
