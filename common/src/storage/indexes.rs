use crate::{error::AppError, storage::db::SurrealDbClient};

/// Defines the indexes the service relies on at runtime. Idempotent, so it
/// runs on every startup; the HNSW dimension must match the embedding
/// provider in use.
pub async fn ensure_runtime_indexes(
    db: &SurrealDbClient,
    embedding_dimension: usize,
) -> Result<(), AppError> {
    if embedding_dimension == 0 {
        return Err(AppError::Validation(
            "embedding dimension for index definition must be non-zero".into(),
        ));
    }

    db.query(format!(
        "DEFINE INDEX IF NOT EXISTS idx_chunk_embedding ON TABLE document_chunk \
         FIELDS vector_embeddings HNSW DIMENSION {embedding_dimension} DIST COSINE;"
    ))
    .await?;

    db.query(
        "DEFINE INDEX IF NOT EXISTS idx_chunk_source ON TABLE document_chunk FIELDS source_pdf;",
    )
    .await?;

    db.query(
        "DEFINE INDEX IF NOT EXISTS idx_document_name ON TABLE source_document \
         FIELDS file_name UNIQUE;",
    )
    .await?;

    Ok(())
}
