use std::path::Path;

use mime_guess::from_path;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// Lifecycle state of an uploaded document. Deletion is irreversible;
/// `Deleted` only exists transiently while the cascade runs.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentState {
    Present,
    Deleted,
}

stored_object!(SourceDocument, "source_document", {
    file_name: String,
    path: String,
    sha256: String,
    mime_type: String,
    page_count: u32,
    state: DocumentState
});

impl SourceDocument {
    pub fn new(file_name: String, content: &[u8]) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4().to_string();
        let sanitized = Self::sanitize_file_name(&file_name);
        let path = format!("documents/{id}/{sanitized}");

        Self {
            id,
            created_at: now,
            updated_at: now,
            sha256: sha256_hex(content),
            mime_type: Self::guess_mime_type(Path::new(&sanitized)),
            path,
            file_name,
            page_count: 0,
            state: DocumentState::Present,
        }
    }

    /// Object-store prefix holding this document's bytes.
    pub fn storage_prefix(&self) -> String {
        format!("documents/{}", self.id)
    }

    /// Guesses the MIME type based on the file extension.
    fn guess_mime_type(path: &Path) -> String {
        from_path(path)
            .first_or(mime::APPLICATION_OCTET_STREAM)
            .to_string()
    }

    /// Sanitizes the file name to prevent directory traversal in storage
    /// locations. Replaces anything outside [A-Za-z0-9_] (keeping the
    /// extension separator) with underscores.
    fn sanitize_file_name(file_name: &str) -> String {
        let sanitize = |part: &str| -> String {
            part.chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect()
        };

        if let Some(idx) = file_name.rfind('.') {
            let (name, ext) = file_name.split_at(idx);
            format!("{}{}", sanitize(name), ext)
        } else {
            sanitize(file_name)
        }
    }

    /// Looks a document up by its unique file name, regardless of state,
    /// so an interrupted deletion can be retried to completion.
    pub async fn find_by_file_name(
        file_name: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM source_document WHERE file_name = $file_name")
            .bind(("file_name", file_name.to_string()))
            .await?;
        let documents: Vec<Self> = response.take(0)?;

        Ok(documents.into_iter().next())
    }

    /// All documents currently in the `present` state.
    pub async fn list_present(db: &SurrealDbClient) -> Result<Vec<Self>, AppError> {
        let mut response = db
            .query("SELECT * FROM source_document WHERE state = 'present' ORDER BY file_name")
            .await?;
        let documents: Vec<Self> = response.take(0)?;

        Ok(documents)
    }

    pub async fn set_state(
        id: &str,
        state: DocumentState,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('source_document', $id) \
             SET state = $state, updated_at = time::now()",
        )
        .bind(("id", id.to_string()))
        .bind(("state", state))
        .await?;

        Ok(())
    }

    pub async fn set_page_count(
        id: &str,
        page_count: u32,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.query(
            "UPDATE type::thing('source_document', $id) \
             SET page_count = $page_count, updated_at = time::now()",
        )
        .bind(("id", id.to_string()))
        .bind(("page_count", page_count))
        .await?;

        Ok(())
    }
}

fn sha256_hex(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}
