//! Hybrid orchestrator: keyword and semantic retrieval fused per product
//!
//! Each request fans out to keyword matching and embedding acquisition
//! concurrently, runs semantic retrieval against the similarity index (or
//! the exact scan when the index is unavailable), merges the two result
//! sets under fixed fusion weights, and partitions the output into exact
//! matches and suggestions.

use ahash::AHashMap;
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use uuid::Uuid;

use super::semantic::{RetrievalError, SemanticHit, SemanticRequest, SemanticRetriever};
use super::{
    HybridResponse, KeywordMatcher, MatchType, RankedProduct, ScoredProduct, SearchQuery,
    SemanticResponse,
};
use crate::catalog::{CatalogRepository, EligibilityFilter, Product, RepositoryError};
use crate::embedding::{EmbeddingCache, EmbeddingError, EmbeddingProvider};

/// Semantic hits must reach this fraction of the top score to survive the
/// adaptive cutoff on the index path
const ADAPTIVE_TOP_RATIO: f32 = 0.96;

/// Weight of the existing (keyword) score when fusing a hybrid entry
const KEYWORD_FUSION_WEIGHT: f32 = 0.7;

/// Weight of the semantic similarity when fusing a hybrid entry
const SEMANTIC_FUSION_WEIGHT: f32 = 0.3;

/// Hard ceiling on the suggestions list
const MAX_SUGGESTIONS: usize = 10;

#[derive(Error, Debug)]
pub enum SearchError {
    /// Missing or empty query text; never retried
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Embedding provider failure surfaced in semantic-only mode
    #[error("Embedding generation failed")]
    Embedding(#[source] EmbeddingError),

    /// Catalog read failure; fatal
    #[error("Catalog unavailable")]
    Repository(#[from] RepositoryError),
}

/// Hybrid searcher over the catalog
///
/// Holds the primary retriever as an option: the similarity index may never
/// have been provisioned, in which case every request takes the exact scan.
pub struct HybridSearcher {
    repository: Arc<dyn CatalogRepository>,
    cache: Arc<EmbeddingCache>,
    provider: Arc<dyn EmbeddingProvider>,
    keyword: Arc<dyn KeywordMatcher>,
    primary: Option<Arc<dyn SemanticRetriever>>,
    fallback: Arc<dyn SemanticRetriever>,
}

impl HybridSearcher {
    pub fn new(
        repository: Arc<dyn CatalogRepository>,
        cache: Arc<EmbeddingCache>,
        provider: Arc<dyn EmbeddingProvider>,
        keyword: Arc<dyn KeywordMatcher>,
        primary: Option<Arc<dyn SemanticRetriever>>,
        fallback: Arc<dyn SemanticRetriever>,
    ) -> Self {
        Self {
            repository,
            cache,
            provider,
            keyword,
            primary,
            fallback,
        }
    }

    /// Hybrid discovery: keyword exact matches plus semantic suggestions
    pub async fn search(&self, query: &SearchQuery) -> Result<HybridResponse, SearchError> {
        let started = Instant::now();
        let filter = query.filter();

        let (embedding, keyword_hits) = tokio::join!(
            self.embed_query(&query.text),
            self.keyword_hits(query, &filter)
        );

        let mut degraded = false;
        let semantic_hits = match embedding {
            Ok(vector) => self.semantic_hits(vector, query, &filter, true).await?,
            Err(e) => {
                tracing::warn!(
                    query = %query.text,
                    error = %e,
                    "embedding unavailable, degrading to keyword-only results"
                );
                degraded = true;
                Vec::new()
            }
        };

        let merged = self.merge(keyword_hits, &semantic_hits)?;
        let (exact_matches, suggestions) = partition(merged, query.limit);

        let timing_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            query = %query.text,
            exact = exact_matches.len(),
            suggestions = suggestions.len(),
            timing_ms,
            degraded,
            "hybrid search complete"
        );

        Ok(HybridResponse {
            count: exact_matches.len(),
            suggestions_count: suggestions.len(),
            exact_matches,
            suggestions,
            timing_ms,
            degraded,
        })
    }

    /// Semantic-only discovery: one list ranked by raw similarity
    ///
    /// No adaptive tightening on this path; embedding failure propagates
    /// instead of degrading.
    pub async fn search_semantic(
        &self,
        query: &SearchQuery,
    ) -> Result<SemanticResponse, SearchError> {
        let started = Instant::now();
        let filter = query.filter();

        let vector = self.embed_query(&query.text).await.map_err(|e| {
            tracing::warn!(query = %query.text, error = %e, "embedding failed");
            SearchError::Embedding(e)
        })?;

        let mut hits = self.semantic_hits(vector, query, &filter, false).await?;
        hits.truncate(query.limit);

        let ids: Vec<Uuid> = hits.iter().map(|h| h.id).collect();
        let products = self.hydrate(&ids)?;

        let data: Vec<RankedProduct> = hits
            .iter()
            .filter_map(|hit| {
                products.get(&hit.id).map(|product| RankedProduct {
                    product: product.clone(),
                    relevance_score: hit.similarity,
                })
            })
            .collect();

        let timing_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            query = %query.text,
            count = data.len(),
            timing_ms,
            "semantic search complete"
        );

        Ok(SemanticResponse {
            count: data.len(),
            data,
            timing_ms,
        })
    }

    /// Query embedding via the cache; concurrent requests for the same text
    /// share one provider call
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let provider = Arc::clone(&self.provider);
        self.cache
            .get(text, || {
                let provider = Arc::clone(&provider);
                let text = text.to_string();
                async move { provider.embed(&text).await }
            })
            .await
    }

    /// Keyword matching; failure yields an empty list, never an error
    async fn keyword_hits(&self, query: &SearchQuery, filter: &EligibilityFilter) -> Vec<Product> {
        match self.keyword.find(&query.text, filter, query.limit).await {
            Ok(hits) => {
                tracing::debug!(query = %query.text, count = hits.len(), "keyword matches");
                hits
            }
            Err(e) => {
                tracing::warn!(
                    query = %query.text,
                    error = %e,
                    "keyword matching failed, continuing without literal matches"
                );
                Vec::new()
            }
        }
    }

    /// Semantic retrieval: primary index first, exact scan on unavailability
    ///
    /// The adaptive cutoff applies only to index results; the scan path
    /// keeps the plain similarity floor.
    async fn semantic_hits(
        &self,
        vector: Vec<f32>,
        query: &SearchQuery,
        filter: &EligibilityFilter,
        adaptive: bool,
    ) -> Result<Vec<SemanticHit>, SearchError> {
        let request = SemanticRequest::new(
            vector,
            filter.clone(),
            query.limit,
            query.min_similarity,
        );

        if let Some(index) = &self.primary {
            match index.retrieve(&request).await {
                Ok(hits) => {
                    let kept = if adaptive {
                        apply_adaptive_threshold(hits, query.min_similarity)
                    } else {
                        hits
                    };
                    tracing::debug!(query = %query.text, count = kept.len(), "index retrieval");
                    return Ok(kept);
                }
                Err(RetrievalError::IndexUnavailable(detail)) => {
                    tracing::warn!(
                        query = %query.text,
                        category = ?filter.category,
                        detail,
                        "similarity index unavailable, using exact scan fallback"
                    );
                }
                Err(RetrievalError::Repository(e)) => return Err(e.into()),
            }
        }

        match self.fallback.retrieve(&request).await {
            Ok(hits) => Ok(hits),
            Err(RetrievalError::Repository(e)) => Err(e.into()),
            Err(RetrievalError::IndexUnavailable(detail)) => {
                // The scan has no index to lose; treat this as an empty
                // semantic contribution rather than failing the request
                tracing::warn!(query = %query.text, detail, "fallback retrieval unavailable");
                Ok(Vec::new())
            }
        }
    }

    /// Merge keyword and semantic hits into one map keyed by product id
    fn merge(
        &self,
        keyword_hits: Vec<Product>,
        semantic_hits: &[SemanticHit],
    ) -> Result<Vec<ScoredProduct>, SearchError> {
        let mut combined: AHashMap<Uuid, ScoredProduct> =
            AHashMap::with_capacity(keyword_hits.len() + semantic_hits.len());

        for product in keyword_hits {
            combined.insert(
                product.id,
                ScoredProduct {
                    product,
                    score: 1.0,
                    match_type: MatchType::Keyword,
                },
            );
        }

        let missing: Vec<Uuid> = semantic_hits
            .iter()
            .filter(|hit| !combined.contains_key(&hit.id))
            .map(|hit| hit.id)
            .collect();
        let hydrated = self.hydrate(&missing)?;

        for hit in semantic_hits {
            match combined.get_mut(&hit.id) {
                Some(entry) => {
                    entry.score = fuse_hybrid_score(entry.score, hit.similarity);
                    entry.match_type = MatchType::Hybrid;
                }
                None => {
                    // Hydration drops items that went ineligible since the
                    // index snapshot; skip those hits entirely
                    if let Some(product) = hydrated.get(&hit.id) {
                        combined.insert(
                            hit.id,
                            ScoredProduct {
                                product: product.clone(),
                                score: semantic_only_score(hit.similarity),
                                match_type: MatchType::Semantic,
                            },
                        );
                    }
                }
            }
        }

        Ok(combined.into_values().collect())
    }

    /// Fetch full products for semantic hit ids, re-checking eligibility
    fn hydrate(&self, ids: &[Uuid]) -> Result<AHashMap<Uuid, Product>, SearchError> {
        if ids.is_empty() {
            return Ok(AHashMap::new());
        }

        Ok(self
            .repository
            .get_many(ids)?
            .into_iter()
            .filter(|p| p.is_eligible())
            .map(|p| (p.id, p))
            .collect())
    }
}

/// Cutoff relative to the best hit of this query: max(floor, top * 0.96)
///
/// Keeps near-top results when the floor is loose and discards the long
/// tail when many items cross it.
fn adaptive_threshold(min_similarity: f32, top_score: f32) -> f32 {
    min_similarity.max(top_score * ADAPTIVE_TOP_RATIO)
}

fn apply_adaptive_threshold(hits: Vec<SemanticHit>, min_similarity: f32) -> Vec<SemanticHit> {
    let top_score = hits
        .iter()
        .map(|hit| hit.similarity)
        .fold(0.0f32, f32::max);
    let threshold = adaptive_threshold(min_similarity, top_score);

    let kept: Vec<SemanticHit> = hits
        .into_iter()
        .filter(|hit| hit.similarity >= threshold)
        .collect();

    tracing::debug!(threshold, kept = kept.len(), "adaptive similarity filter");
    kept
}

/// Fused score for a product found by both strategies; bounded to [0, 1]
fn fuse_hybrid_score(existing: f32, similarity: f32) -> f32 {
    existing * KEYWORD_FUSION_WEIGHT + similarity * SEMANTIC_FUSION_WEIGHT
}

/// Score for a semantic-only hit; bounded to [0, 0.7]
fn semantic_only_score(similarity: f32) -> f32 {
    similarity * KEYWORD_FUSION_WEIGHT
}

fn sort_by_score_desc(results: &mut [ScoredProduct]) {
    results.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
}

/// Split merged results into exact matches (keyword/hybrid) and semantic
/// suggestions, each sorted descending and truncated
fn partition(
    results: Vec<ScoredProduct>,
    limit: usize,
) -> (Vec<ScoredProduct>, Vec<ScoredProduct>) {
    let (mut exact_matches, mut suggestions): (Vec<_>, Vec<_>) = results
        .into_iter()
        .partition(|r| r.match_type != MatchType::Semantic);

    sort_by_score_desc(&mut exact_matches);
    exact_matches.truncate(limit);

    sort_by_score_desc(&mut suggestions);
    suggestions.truncate(MAX_SUGGESTIONS.min(limit));

    (exact_matches, suggestions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ProductStatus;
    use chrono::Utc;

    fn hit(similarity: f32) -> SemanticHit {
        SemanticHit {
            id: Uuid::new_v4(),
            similarity,
        }
    }

    fn scored(score: f32, match_type: MatchType) -> ScoredProduct {
        ScoredProduct {
            product: Product {
                id: Uuid::new_v4(),
                name: "P".to_string(),
                description: String::new(),
                category: "Books".to_string(),
                condition: None,
                price: 1.0,
                stock: 1,
                status: ProductStatus::Active,
                seller_id: Uuid::new_v4(),
                created_at: Utc::now(),
                embedding: None,
            },
            score,
            match_type,
        }
    }

    #[test]
    fn test_adaptive_threshold_tracks_top_score() {
        // 0.9 * 0.96 = 0.864 beats the loose 0.5 floor
        assert!((adaptive_threshold(0.5, 0.9) - 0.864).abs() < 1e-6);
        // A tight floor wins over a weak top score
        assert!((adaptive_threshold(0.8, 0.5) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_adaptive_filter_keeps_only_near_top() {
        let hits = vec![hit(0.9), hit(0.85), hit(0.5)];
        let kept = apply_adaptive_threshold(hits, 0.5);

        assert_eq!(kept.len(), 1);
        assert!((kept[0].similarity - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_adaptive_filter_empty_input() {
        let kept = apply_adaptive_threshold(Vec::new(), 0.5);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_fusion_weights() {
        // Keyword 1.0 corroborated by similarity 0.8
        assert!((fuse_hybrid_score(1.0, 0.8) - 0.94).abs() < 1e-6);
        // Semantic-only at 0.6
        assert!((semantic_only_score(0.6) - 0.42).abs() < 1e-6);
    }

    #[test]
    fn test_fused_scores_stay_in_bounds() {
        assert!(fuse_hybrid_score(1.0, 1.0) <= 1.0);
        assert!(semantic_only_score(1.0) <= 0.7);
        assert!(semantic_only_score(0.0) >= 0.0);
    }

    #[test]
    fn test_partition_splits_and_sorts() {
        let results = vec![
            scored(0.42, MatchType::Semantic),
            scored(1.0, MatchType::Keyword),
            scored(0.94, MatchType::Hybrid),
            scored(0.63, MatchType::Semantic),
        ];

        let (exact, suggestions) = partition(results, 20);

        assert_eq!(exact.len(), 2);
        assert_eq!(exact[0].match_type, MatchType::Keyword);
        assert_eq!(exact[1].match_type, MatchType::Hybrid);

        assert_eq!(suggestions.len(), 2);
        assert!(suggestions[0].score > suggestions[1].score);
    }

    #[test]
    fn test_partition_caps_suggestions() {
        let results: Vec<ScoredProduct> = (0..15)
            .map(|i| scored(0.1 + i as f32 * 0.01, MatchType::Semantic))
            .collect();

        let (_, suggestions) = partition(results, 20);
        assert_eq!(suggestions.len(), MAX_SUGGESTIONS);

        let results: Vec<ScoredProduct> = (0..5)
            .map(|i| scored(0.1 + i as f32 * 0.01, MatchType::Semantic))
            .collect();
        let (_, suggestions) = partition(results, 2);
        assert_eq!(suggestions.len(), 2);
    }
}
