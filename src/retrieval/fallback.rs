//! Exact cosine-similarity scan, the degraded path when the similarity
//! index is unavailable
//!
//! Cost is O(N * D) over the eligible catalog. The scan filters only by the
//! query's similarity floor; the adaptive tightening applied on the index
//! path is deliberately skipped so degraded mode favors recall.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::sync::Arc;

use super::semantic::{RetrievalError, SemanticHit, SemanticRequest, SemanticRetriever};
use crate::catalog::CatalogRepository;

/// Cosine similarity of two vectors: dot(a,b) / (|a| * |b|)
///
/// Returns 0 when either norm is zero or the dimensions differ; never NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Exact-scan retriever over the catalog
pub struct ExactScanRetriever {
    repository: Arc<dyn CatalogRepository>,
}

impl ExactScanRetriever {
    pub fn new(repository: Arc<dyn CatalogRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl SemanticRetriever for ExactScanRetriever {
    async fn retrieve(
        &self,
        request: &SemanticRequest,
    ) -> Result<Vec<SemanticHit>, RetrievalError> {
        let products = self.repository.find_eligible(&request.filter)?;

        let mut hits: Vec<SemanticHit> = products
            .iter()
            .filter_map(|product| {
                let embedding = product.embedding.as_ref()?;
                if embedding.len() != request.vector.len() {
                    return None;
                }
                Some(SemanticHit {
                    id: product.id,
                    similarity: cosine_similarity(&request.vector, embedding),
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
        });
        hits.truncate(request.limit * 2);
        hits.retain(|hit| hit.similarity >= request.min_similarity);
        hits.truncate(request.limit);

        tracing::debug!(
            scanned = products.len(),
            kept = hits.len(),
            "exact scan retrieval"
        );

        Ok(hits)
    }
}
