use uuid::Uuid;

use crate::stored_object;

// The persisted chunk record. Field names are a durable contract shared
// with external tooling: `text`, `page_number`, `source_pdf`, `chunk_id`,
// `vector_embeddings`. The record key and `chunk_id` carry the same uuid.
stored_object!(DocumentChunk, "document_chunk", {
    text: String,
    page_number: u32,
    sequence_index: u32,
    source_pdf: String,
    chunk_id: String,
    vector_embeddings: Vec<f32>
});

impl DocumentChunk {
    /// Builds a chunk with a fresh id. Ids are never derived from content:
    /// identical text in two places still gets distinct identities.
    pub fn new(
        source_pdf: String,
        text: String,
        page_number: u32,
        sequence_index: u32,
        vector_embeddings: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        Self {
            id: id.clone(),
            created_at: now,
            updated_at: now,
            text,
            page_number,
            sequence_index,
            source_pdf,
            chunk_id: id,
            vector_embeddings,
        }
    }
}
