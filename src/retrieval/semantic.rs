//! Semantic retrieval capability: trait plus the ANN index implementation
//!
//! The similarity index may be unprovisioned or failing at any time; both
//! surface as `IndexUnavailable`, a recoverable condition the orchestrator
//! answers with the exact scan fallback. Catalog read failures are fatal and
//! propagate unchanged.

use async_trait::async_trait;
use hnsw_rs::prelude::*;
use std::sync::RwLock;
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{EligibilityFilter, Product, RepositoryError};
use crate::config::IndexConfig;

/// Candidate scan ceiling for the similarity index
const CANDIDATE_CAP_MAX: usize = 300;

/// Returned-result ceiling for the similarity index
const RESULT_CAP_MAX: usize = 50;

#[derive(Error, Debug)]
pub enum RetrievalError {
    /// The similarity index is unprovisioned or failing; recoverable
    #[error("Similarity index unavailable: {0}")]
    IndexUnavailable(String),

    /// Catalog read failure; fatal
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// A semantic retrieval request with orchestrator-computed caps
#[derive(Debug, Clone)]
pub struct SemanticRequest {
    pub vector: Vec<f32>,
    pub filter: EligibilityFilter,
    pub limit: usize,
    pub min_similarity: f32,
    /// How many eligible items the index may scan before ranking
    pub candidate_cap: usize,
    /// How many ranked hits the index may return, always <= candidate_cap
    pub result_cap: usize,
}

impl SemanticRequest {
    pub fn new(
        vector: Vec<f32>,
        filter: EligibilityFilter,
        limit: usize,
        min_similarity: f32,
    ) -> Self {
        let candidate_cap = (limit * 3).min(CANDIDATE_CAP_MAX);
        let result_cap = limit.min(RESULT_CAP_MAX).min(candidate_cap);

        Self {
            vector,
            filter,
            limit,
            min_similarity,
            candidate_cap,
            result_cap,
        }
    }
}

/// One semantic hit: product id plus cosine similarity
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticHit {
    pub id: Uuid,
    pub similarity: f32,
}

/// One retrieval capability, two implementations: the ANN index when
/// provisioned, the exact catalog scan when it is not
#[async_trait]
pub trait SemanticRetriever: Send + Sync {
    /// Hits ranked by descending similarity, filtered to eligible items and
    /// `similarity >= min_similarity`
    async fn retrieve(&self, request: &SemanticRequest)
        -> Result<Vec<SemanticHit>, RetrievalError>;
}

/// Eligibility snapshot taken when a product is indexed
struct IndexedProduct {
    id: Uuid,
    category: String,
    eligible: bool,
}

/// HNSW-backed approximate nearest-neighbor retriever
///
/// The index cannot evaluate predicates itself, so it over-fetches up to
/// `candidate_cap` neighbors and post-filters on the eligibility snapshot.
/// Stale snapshots are tolerated; the orchestrator re-checks eligibility at
/// hydration time.
pub struct HnswRetriever {
    index: RwLock<Hnsw<'static, f32, DistCosine>>,
    items: Vec<IndexedProduct>,
    dimension: usize,
    ef_search: usize,
}

impl HnswRetriever {
    /// Build an index over every product carrying an embedding
    pub fn build(
        products: &[Product],
        config: &IndexConfig,
        dimension: usize,
    ) -> Result<Self, RetrievalError> {
        let capacity = products.len().max(16);
        let index = Hnsw::<f32, DistCosine>::new(
            config.m,
            capacity,
            16,
            config.ef_construction,
            DistCosine,
        );

        let mut items = Vec::new();

        for product in products {
            let embedding = match &product.embedding {
                Some(embedding) => embedding,
                None => continue,
            };

            if embedding.len() != dimension {
                tracing::warn!(
                    product = %product.id,
                    expected = dimension,
                    actual = embedding.len(),
                    "skipping product with mismatched embedding dimension"
                );
                continue;
            }

            let data = embedding.clone();
            index.insert((&data, items.len()));

            items.push(IndexedProduct {
                id: product.id,
                category: product.category.clone(),
                eligible: product.is_eligible(),
            });
        }

        tracing::debug!(indexed = items.len(), dimension, "similarity index built");

        Ok(Self {
            index: RwLock::new(index),
            items,
            dimension,
            ef_search: config.ef_search,
        })
    }

    /// Number of indexed products
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[async_trait]
impl SemanticRetriever for HnswRetriever {
    async fn retrieve(
        &self,
        request: &SemanticRequest,
    ) -> Result<Vec<SemanticHit>, RetrievalError> {
        if request.vector.len() != self.dimension {
            return Err(RetrievalError::IndexUnavailable(format!(
                "query dimension {} does not match index dimension {}",
                request.vector.len(),
                self.dimension
            )));
        }

        if self.items.is_empty() {
            return Ok(Vec::new());
        }

        let knbn = request.candidate_cap.min(self.items.len());
        let ef = self.ef_search.max(knbn);

        let neighbours = {
            let index = self.index.read().map_err(|_| {
                RetrievalError::IndexUnavailable("index lock poisoned".to_string())
            })?;
            index.search(&request.vector, knbn, ef)
        };

        let mut hits = Vec::new();

        for neighbour in neighbours {
            let item = match self.items.get(neighbour.d_id) {
                Some(item) => item,
                None => continue,
            };

            if !item.eligible {
                continue;
            }

            if let Some(category) = &request.filter.category {
                if item.category != *category {
                    continue;
                }
            }

            // DistCosine yields 1 - cos; invert back to similarity
            let similarity = 1.0 - neighbour.distance;
            if similarity < request.min_similarity {
                continue;
            }

            hits.push(SemanticHit {
                id: item.id,
                similarity,
            });

            if hits.len() == request.result_cap {
                break;
            }
        }

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProductStatus;
    use chrono::Utc;

    fn embedded_product(name: &str, category: &str, embedding: Vec<f32>) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: format!("{} description", name),
            category: category.to_string(),
            condition: None,
            price: 10.0,
            stock: 1,
            status: ProductStatus::Active,
            seller_id: Uuid::new_v4(),
            created_at: Utc::now(),
            embedding: Some(embedding),
        }
    }

    fn test_config() -> IndexConfig {
        IndexConfig {
            enabled: true,
            ef_construction: 200,
            ef_search: 50,
            m: 16,
        }
    }

    #[test]
    fn test_request_caps() {
        let request = SemanticRequest::new(vec![1.0], EligibilityFilter::default(), 20, 0.5);
        assert_eq!(request.candidate_cap, 60);
        assert_eq!(request.result_cap, 20);

        let large = SemanticRequest::new(vec![1.0], EligibilityFilter::default(), 200, 0.5);
        assert_eq!(large.candidate_cap, 300);
        assert_eq!(large.result_cap, 50);
        assert!(large.result_cap <= large.candidate_cap);
    }

    #[tokio::test]
    async fn test_retrieve_ranks_by_similarity() {
        let close = embedded_product("Close", "Books", vec![0.9, 0.1, 0.0, 0.0]);
        let far = embedded_product("Far", "Books", vec![0.0, 0.0, 1.0, 0.0]);
        let products = vec![close.clone(), far];

        let retriever = HnswRetriever::build(&products, &test_config(), 4).unwrap();
        assert_eq!(retriever.len(), 2);

        let request = SemanticRequest::new(
            vec![1.0, 0.0, 0.0, 0.0],
            EligibilityFilter::default(),
            10,
            0.5,
        );
        let hits = retriever.retrieve(&request).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, close.id);
        assert!(hits[0].similarity > 0.9);
    }

    #[tokio::test]
    async fn test_retrieve_filters_category() {
        let book = embedded_product("Book", "Books", vec![1.0, 0.0, 0.0, 0.0]);
        let lamp = embedded_product("Lamp", "Dorm", vec![1.0, 0.0, 0.0, 0.0]);
        let products = vec![book, lamp.clone()];

        let retriever = HnswRetriever::build(&products, &test_config(), 4).unwrap();

        let request = SemanticRequest::new(
            vec![1.0, 0.0, 0.0, 0.0],
            EligibilityFilter::for_category(Some("Dorm".to_string())),
            10,
            0.5,
        );
        let hits = retriever.retrieve(&request).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, lamp.id);
    }

    #[tokio::test]
    async fn test_retrieve_excludes_ineligible() {
        let mut sold = embedded_product("Sold", "Books", vec![1.0, 0.0, 0.0, 0.0]);
        sold.status = ProductStatus::Sold;
        let products = vec![sold];

        let retriever = HnswRetriever::build(&products, &test_config(), 4).unwrap();

        let request = SemanticRequest::new(
            vec![1.0, 0.0, 0.0, 0.0],
            EligibilityFilter::default(),
            10,
            0.0,
        );
        let hits = retriever.retrieve(&request).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_unavailable() {
        let product = embedded_product("Book", "Books", vec![1.0, 0.0, 0.0, 0.0]);
        let retriever = HnswRetriever::build(&[product], &test_config(), 4).unwrap();

        let request = SemanticRequest::new(vec![1.0, 0.0], EligibilityFilter::default(), 10, 0.5);
        let result = retriever.retrieve(&request).await;
        assert!(matches!(result, Err(RetrievalError::IndexUnavailable(_))));
    }

    #[test]
    fn test_build_skips_mismatched_embeddings() {
        let good = embedded_product("Good", "Books", vec![1.0, 0.0, 0.0, 0.0]);
        let bad = embedded_product("Bad", "Books", vec![1.0, 0.0]);
        let none = {
            let mut p = embedded_product("None", "Books", vec![]);
            p.embedding = None;
            p
        };

        let retriever = HnswRetriever::build(&[good, bad, none], &test_config(), 4).unwrap();
        assert_eq!(retriever.len(), 1);
    }
}
