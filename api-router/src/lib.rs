use api_state::ApiState;
use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use routes::{
    files::{delete_file, list_files, serve_file},
    preview::preview_chunk,
    query::query_documents,
    upload::{upload_document, UPLOAD_MAX_BODY_BYTES},
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for the document question-answering API.
pub fn api_routes(app_state: ApiState) -> Router {
    Router::new()
        .route("/api/files", get(list_files))
        .route("/api/files/{file_name}", delete(delete_file))
        .route(
            "/upload",
            post(upload_document).layer(DefaultBodyLimit::max(UPLOAD_MAX_BODY_BYTES)),
        )
        .route("/query", post(query_documents))
        .route("/api/preview", get(preview_chunk))
        .route("/files/{file_name}", get(serve_file))
        .with_state(app_state)
}
