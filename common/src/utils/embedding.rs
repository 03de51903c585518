use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use async_openai::{types::CreateEmbeddingRequestArgs, Client};
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingBackend},
};

const RETRY_BASE_DELAY_MS: u64 = 100;
const RETRY_ATTEMPTS: usize = 3;

/// Gateway to the external embedding service. Every chunk and query vector
/// in a store comes from one provider, which fixes the store's dimension.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::Hashed { .. } => "hashed",
            EmbeddingInner::OpenAI { .. } => "openai",
        }
    }

    pub fn dimension(&self) -> usize {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => *dimension,
            EmbeddingInner::OpenAI { dimensions, .. } => *dimensions as usize,
        }
    }

    pub async fn from_config(
        config: &AppConfig,
        openai_client: Option<Arc<Client<async_openai::config::OpenAIConfig>>>,
    ) -> Result<Self, AppError> {
        match config.embedding_backend {
            EmbeddingBackend::Hashed => {
                Self::new_hashed(config.embedding_dimensions as usize)
            }
            EmbeddingBackend::OpenAI => {
                let client = openai_client.ok_or_else(|| {
                    AppError::Validation(
                        "openai embedding backend requires an OpenAI client".into(),
                    )
                })?;
                Ok(Self::new_openai(
                    client,
                    config.embedding_model.clone(),
                    config.embedding_dimensions,
                ))
            }
        }
    }

    pub fn new_openai(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
        dimensions: u32,
    ) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            },
        }
    }

    pub fn new_hashed(dimension: usize) -> Result<Self, AppError> {
        if dimension == 0 {
            return Err(AppError::Validation(
                "hashed embedding dimension must be non-zero".into(),
            ));
        }
        Ok(EmbeddingProvider {
            inner: EmbeddingInner::Hashed { dimension },
        })
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(hashed_embedding(text, *dimension)),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input([text])
                    .dimensions(*dimensions)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                response
                    .data
                    .into_iter()
                    .next()
                    .map(|item| item.embedding)
                    .ok_or_else(|| {
                        AppError::Processing("No embedding data received from API".into())
                    })
            }
        }
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .into_iter()
                .map(|text| hashed_embedding(&text, *dimension))
                .collect()),
            EmbeddingInner::OpenAI {
                client,
                model,
                dimensions,
            } => {
                let expected = texts.len();
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .dimensions(*dimensions)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                let embeddings: Vec<Vec<f32>> = response
                    .data
                    .into_iter()
                    .map(|item| item.embedding)
                    .collect();

                if embeddings.len() != expected {
                    return Err(AppError::Processing(format!(
                        "embedding service returned {} vectors for {} inputs",
                        embeddings.len(),
                        expected
                    )));
                }

                Ok(embeddings)
            }
        }
    }

    /// `embed` wrapped in bounded exponential backoff for transient
    /// upstream failures (rate limits, timeouts).
    pub async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY_MS)
            .map(jitter)
            .take(RETRY_ATTEMPTS);

        Retry::spawn(retry_strategy, || self.embed(text)).await
    }

    /// `embed_batch` wrapped in bounded exponential backoff. Exhausted
    /// retries surface the final error to the caller.
    pub async fn embed_batch_with_retry(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, AppError> {
        let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY_MS)
            .map(jitter)
            .take(RETRY_ATTEMPTS);

        Retry::spawn(retry_strategy, || self.embed_batch(texts.clone())).await
    }
}

// Helper functions for hashed embeddings
fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    let mut token_count = 0f32;
    for token in tokens(text) {
        token_count += 1.0;
        let idx = bucket(&token, dim);
        vector[idx] += 1.0;
    }

    if token_count == 0.0 {
        return vector;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hashed_embedding_is_deterministic_and_normalized() {
        let provider = EmbeddingProvider::new_hashed(16).expect("provider");

        let a = provider.embed("cooperative scheduling").await.expect("embed");
        let b = provider.embed("cooperative scheduling").await.expect("embed");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5, "expected unit norm, got {norm}");
    }

    #[tokio::test]
    async fn test_hashed_embed_batch_matches_single_embeds() {
        let provider = EmbeddingProvider::new_hashed(8).expect("provider");
        let texts = vec!["first chunk".to_string(), "second chunk".to_string()];

        let batch = provider.embed_batch(texts.clone()).await.expect("batch");
        assert_eq!(batch.len(), 2);

        let first = provider.embed(&texts[0]).await.expect("embed");
        assert_eq!(batch[0], first);
    }

    #[tokio::test]
    async fn test_empty_batch_returns_no_vectors() {
        let provider = EmbeddingProvider::new_hashed(8).expect("provider");
        let batch = provider.embed_batch(Vec::new()).await.expect("batch");
        assert!(batch.is_empty());
    }

    #[test]
    fn test_zero_dimension_rejected() {
        assert!(EmbeddingProvider::new_hashed(0).is_err());
    }

    #[tokio::test]
    async fn test_empty_text_embeds_to_zero_vector() {
        let provider = EmbeddingProvider::new_hashed(4).expect("provider");
        let vector = provider.embed("").await.expect("embed");
        assert_eq!(vector, vec![0.0; 4]);
    }
}
