use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Memory,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    OpenAI,
    Hashed,
}

/// Unit used when measuring chunk size and overlap.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChunkUnit {
    Characters,
    Tokens,
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub openai_api_key: String,
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub http_port: u16,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_storage_kind")]
    pub storage: StorageKind,

    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackend,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: u32,
    #[serde(default = "default_query_model")]
    pub query_model: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_chunk_unit")]
    pub chunk_unit: ChunkUnit,
    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,
    #[serde(default = "default_chunk_insert_concurrency")]
    pub chunk_insert_concurrency: usize,

    #[serde(default = "default_query_num_candidates")]
    pub query_num_candidates: usize,
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
    #[serde(default)]
    pub query_exact: bool,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_storage_kind() -> StorageKind {
    StorageKind::Local
}

fn default_embedding_backend() -> EmbeddingBackend {
    EmbeddingBackend::OpenAI
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> u32 {
    1536
}

fn default_query_model() -> String {
    "gpt-4o-mini".to_string()
}

// Chunking defaults match the original ingestion behavior: 1000-unit
// chunks with 100 units of overlap, measured in characters.
fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    100
}

fn default_chunk_unit() -> ChunkUnit {
    ChunkUnit::Characters
}

fn default_embedding_batch_size() -> usize {
    16
}

fn default_chunk_insert_concurrency() -> usize {
    8
}

fn default_query_num_candidates() -> usize {
    40
}

fn default_query_limit() -> usize {
    10
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}

#[cfg(any(test, feature = "test-utils"))]
impl AppConfig {
    /// A configuration suitable for unit tests: in-memory storage, hashed
    /// embeddings with a tiny dimension, character-based chunking.
    pub fn for_tests() -> Self {
        Self {
            openai_api_key: "test".into(),
            surrealdb_address: "mem://".into(),
            surrealdb_username: "test".into(),
            surrealdb_password: "test".into(),
            surrealdb_namespace: "test".into(),
            surrealdb_database: "test".into(),
            data_dir: "/tmp/unused".into(),
            http_port: 0,
            openai_base_url: default_base_url(),
            storage: StorageKind::Memory,
            embedding_backend: EmbeddingBackend::Hashed,
            embedding_model: default_embedding_model(),
            embedding_dimensions: 8,
            query_model: default_query_model(),
            chunk_size: 250,
            chunk_overlap: 50,
            chunk_unit: ChunkUnit::Characters,
            embedding_batch_size: 4,
            chunk_insert_concurrency: 4,
            query_num_candidates: 40,
            query_limit: 10,
            query_exact: false,
        }
    }
}
