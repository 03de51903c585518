use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};

use common::{
    error::AppError,
    storage::{
        chunk_store::ChunkStore, db::SurrealDbClient, lifecycle::DocumentLifecycle,
        store::StorageManager,
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use ingestion_pipeline::{ChunkingConfig, DefaultPipelineServices, IngestionPipeline};

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub config: AppConfig,
    pub storage: StorageManager,
    pub chunk_store: ChunkStore,
    pub lifecycle: DocumentLifecycle,
    pub embedding_provider: Arc<EmbeddingProvider>,
    pub openai_client: Arc<Client<OpenAIConfig>>,
}

impl ApiState {
    /// Connects to the database, defines indexes for the embedding
    /// dimension in use, and wires up the shared services.
    pub async fn new(config: &AppConfig, storage: StorageManager) -> Result<Self, AppError> {
        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        let openai_client = Arc::new(Client::with_config(
            OpenAIConfig::new()
                .with_api_key(config.openai_api_key.clone())
                .with_api_base(config.openai_base_url.clone()),
        ));

        let embedding_provider = Arc::new(
            EmbeddingProvider::from_config(config, Some(Arc::clone(&openai_client))).await?,
        );

        db.ensure_initialized(embedding_provider.dimension()).await?;

        Ok(Self::from_parts(
            db,
            config.clone(),
            storage,
            embedding_provider,
            openai_client,
        ))
    }

    /// Assembles a state from already-built pieces, which is also how
    /// tests construct one around an in-memory database.
    pub fn from_parts(
        db: Arc<SurrealDbClient>,
        config: AppConfig,
        storage: StorageManager,
        embedding_provider: Arc<EmbeddingProvider>,
        openai_client: Arc<Client<OpenAIConfig>>,
    ) -> Self {
        let chunk_store = ChunkStore::new(Arc::clone(&db), embedding_provider.dimension())
            .with_insert_concurrency(config.chunk_insert_concurrency);
        let lifecycle =
            DocumentLifecycle::new(Arc::clone(&db), chunk_store.clone(), storage.clone());

        Self {
            db,
            config,
            storage,
            chunk_store,
            lifecycle,
            embedding_provider,
            openai_client,
        }
    }

    /// The ingestion pipeline for this state's embedding provider and
    /// chunk store.
    pub fn ingestion_pipeline(&self) -> IngestionPipeline {
        let services = Arc::new(DefaultPipelineServices::new(
            Arc::clone(&self.embedding_provider),
            self.chunk_store.clone(),
        ));
        IngestionPipeline::new(
            services,
            ChunkingConfig::from_app_config(&self.config),
            self.config.embedding_batch_size,
        )
    }
}
