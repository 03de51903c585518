use std::sync::Arc;

use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::{info, warn};

use crate::{
    error::AppError,
    storage::{
        chunk_store::ChunkStore,
        db::SurrealDbClient,
        store::StorageManager,
        types::source_document::{DocumentState, SourceDocument},
    },
};

/// Outcome of a completed document deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub document_id: String,
    pub file_name: String,
    pub chunks_deleted: usize,
}

/// Coordinates the removal of a document and everything derived from it:
/// its chunks, its stored bytes, and finally the document record itself.
#[derive(Clone)]
pub struct DocumentLifecycle {
    db: Arc<SurrealDbClient>,
    chunk_store: ChunkStore,
    storage: StorageManager,
}

impl DocumentLifecycle {
    pub fn new(db: Arc<SurrealDbClient>, chunk_store: ChunkStore, storage: StorageManager) -> Self {
        Self {
            db,
            chunk_store,
            storage,
        }
    }

    /// Deletes a document by file name, cascading to its chunks and bytes.
    ///
    /// The document is marked `deleted` first so it drops out of listings
    /// and retrieval filters while the cascade runs. Chunks go before
    /// bytes; if chunk removal fails the state is restored to `present`
    /// and nothing has been removed. A cascade interrupted after the chunk
    /// phase leaves a `deleted` record behind, and calling this again for
    /// the same name resumes it to completion (each phase tolerates
    /// already-removed data).
    pub async fn delete_document(&self, file_name: &str) -> Result<DeletionReport, AppError> {
        let document = SourceDocument::find_by_file_name(file_name, &self.db)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("document {file_name} not found")))?;

        SourceDocument::set_state(&document.id, DocumentState::Deleted, &self.db).await?;

        let chunks_deleted = match self.delete_chunks_with_retry(file_name).await {
            Ok(count) => count,
            Err(err) => {
                warn!(
                    file_name,
                    error = %err,
                    "chunk deletion failed, restoring document state"
                );
                SourceDocument::set_state(&document.id, DocumentState::Present, &self.db).await?;
                return Err(err);
            }
        };

        if let Err(err) = self.delete_bytes_with_retry(&document.storage_prefix()).await {
            warn!(
                file_name,
                document_id = %document.id,
                error = %err,
                "chunks removed but stored bytes remain, deleting again resumes the cascade"
            );
            return Err(err);
        }

        self.db
            .delete_item::<SourceDocument>(&document.id)
            .await
            .map_err(AppError::Database)?;

        info!(
            file_name,
            document_id = %document.id,
            chunks_deleted,
            "document deleted"
        );

        Ok(DeletionReport {
            document_id: document.id,
            file_name: document.file_name,
            chunks_deleted,
        })
    }

    async fn delete_chunks_with_retry(&self, file_name: &str) -> Result<usize, AppError> {
        let strategy = ExponentialBackoff::from_millis(50).map(jitter).take(3);
        Retry::spawn(strategy, || self.chunk_store.delete_by_document(file_name)).await
    }

    async fn delete_bytes_with_retry(&self, prefix: &str) -> Result<(), AppError> {
        let strategy = ExponentialBackoff::from_millis(50).map(jitter).take(3);
        Retry::spawn(strategy, || self.storage.delete_prefix(prefix))
            .await
            .map_err(AppError::Storage)
    }
}
