//! Embedding acquisition: provider contract, remote client, request cache,
//! and catalog backfill.

mod backfill;
mod cache;
mod provider;

pub use backfill::{backfill_embeddings, BackfillReport};
pub use cache::EmbeddingCache;
pub use provider::{EmbeddingError, EmbeddingProvider, RemoteEmbeddingProvider};

use serde::{Deserialize, Serialize};

/// Configuration for embedding generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding endpoint URL
    pub endpoint: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Model identifier sent to the endpoint
    pub model: String,
    /// Embedding dimension, fixed system-wide
    pub dimension: usize,
    /// Batch size for backfill
    pub batch_size: usize,
    /// Request timeout in seconds for provider calls
    pub timeout_secs: u64,
    /// Cache entry time-to-live in seconds
    pub cache_ttl_secs: u64,
    /// Cache sweep period in seconds
    pub cache_sweep_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent".to_string(),
            api_key_env: "TRAWL_EMBEDDING_API_KEY".to_string(),
            model: "gemini-embedding-001".to_string(),
            dimension: 768,
            batch_size: 10,
            timeout_secs: 30,
            cache_ttl_secs: 3600,
            cache_sweep_secs: 3600,
        }
    }
}
