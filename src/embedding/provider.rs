//! Embedding provider trait and remote HTTP implementation

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use super::EmbeddingConfig;

#[derive(Error, Debug, Clone)]
pub enum EmbeddingError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding generation failed: {0}")]
    Generation(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Trait for embedding providers
///
/// Allows abstraction over different embedding backends; production uses the
/// remote HTTP provider, tests substitute deterministic stubs.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Generate embeddings for multiple texts, order-preserving
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Remote embedding provider calling an embedContent-style HTTP endpoint
///
/// The request timeout is fixed on the client at construction; an expired
/// deadline abandons the in-flight call and surfaces a generation error.
/// This layer performs no retries.
pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimension: usize,
}

#[derive(Deserialize)]
struct EmbedContentResponse {
    embeddings: Vec<EmbeddingValues>,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

impl RemoteEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig, api_key: String) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
            dimension: config.dimension,
        })
    }

    async fn request(&self, contents: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let expected = contents.len();

        let body = serde_json::json!({
            "model": self.model,
            "contents": contents,
            "taskType": "RETRIEVAL_DOCUMENT",
            "outputDimensionality": self.dimension,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", &self.api_key)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EmbeddingError::Generation(format!(
                "embedding endpoint returned {}: {}",
                status, detail
            )));
        }

        let parsed: EmbedContentResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Generation(e.to_string()))?;

        if parsed.embeddings.len() != expected {
            return Err(EmbeddingError::Generation(format!(
                "expected {} embeddings, endpoint returned {}",
                expected,
                parsed.embeddings.len()
            )));
        }

        parsed
            .embeddings
            .into_iter()
            .map(|e| fit_dimension(e.values, self.dimension))
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".to_string()));
        }

        let mut embeddings = self.request(vec![trimmed.to_string()]).await?;
        Ok(embeddings.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let trimmed: Vec<String> = texts.iter().map(|t| t.trim().to_string()).collect();
        if trimmed.iter().any(|t| t.is_empty()) {
            return Err(EmbeddingError::InvalidInput(
                "batch contains empty text".to_string(),
            ));
        }

        self.request(trimmed).await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Fit a returned vector to the system dimension: truncate when longer,
/// reject when shorter (never pad)
fn fit_dimension(mut values: Vec<f32>, dimension: usize) -> Result<Vec<f32>, EmbeddingError> {
    if values.len() < dimension {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension,
            actual: values.len(),
        });
    }

    values.truncate(dimension);
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_dimension_exact() {
        let values = vec![1.0, 2.0, 3.0];
        assert_eq!(fit_dimension(values.clone(), 3).unwrap(), values);
    }

    #[test]
    fn test_fit_dimension_truncates_longer() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(fit_dimension(values, 3).unwrap(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_fit_dimension_rejects_shorter() {
        let result = fit_dimension(vec![1.0, 2.0], 3);
        assert!(matches!(
            result,
            Err(EmbeddingError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_embed_rejects_empty_text() {
        let provider =
            RemoteEmbeddingProvider::new(&EmbeddingConfig::default(), "test-key".to_string())
                .unwrap();

        let result = provider.embed("   ").await;
        assert!(matches!(result, Err(EmbeddingError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_embed_batch_rejects_empty_member() {
        let provider =
            RemoteEmbeddingProvider::new(&EmbeddingConfig::default(), "test-key".to_string())
                .unwrap();

        let texts = vec!["valid".to_string(), "  ".to_string()];
        let result = provider.embed_batch(&texts).await;
        assert!(matches!(result, Err(EmbeddingError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn test_embed_batch_empty_input() {
        let provider =
            RemoteEmbeddingProvider::new(&EmbeddingConfig::default(), "test-key".to_string())
                .unwrap();

        let result = provider.embed_batch(&[]).await.unwrap();
        assert!(result.is_empty());
    }

    // Integration test (requires a live endpoint and API key, run manually)
    #[tokio::test]
    #[ignore]
    async fn test_remote_provider_integration() {
        let api_key = std::env::var("TRAWL_EMBEDDING_API_KEY")
            .expect("TRAWL_EMBEDDING_API_KEY must be set for integration tests");

        let provider =
            RemoteEmbeddingProvider::new(&EmbeddingConfig::default(), api_key).unwrap();

        let embedding = provider.embed("graphing calculator").await.unwrap();
        assert_eq!(embedding.len(), provider.dimension());
    }
}
