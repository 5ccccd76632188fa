//! Hybrid product discovery
//!
//! Answers free-text queries against the catalog by combining literal
//! keyword matching with vector-embedding semantic similarity. Results are
//! fused per product and partitioned into an exact-match list and a
//! secondary suggestions list.

mod fallback;
mod hybrid;
mod keyword;
mod semantic;

pub use fallback::{cosine_similarity, ExactScanRetriever};
pub use hybrid::{HybridSearcher, SearchError};
pub use keyword::{KeywordMatcher, ScanKeywordMatcher};
pub use semantic::{
    HnswRetriever, RetrievalError, SemanticHit, SemanticRequest, SemanticRetriever,
};

use crate::catalog::{EligibilityFilter, Product};
use serde::{Deserialize, Serialize};

/// Result limit applied when the query does not specify one
pub const DEFAULT_LIMIT: usize = 20;

/// Similarity floor applied when the query does not specify one
pub const DEFAULT_MIN_SIMILARITY: f32 = 0.5;

/// A validated discovery query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Query text, trimmed, never empty
    pub text: String,

    /// Optional category restriction
    pub category: Option<String>,

    /// Maximum number of exact matches to return
    pub limit: usize,

    /// Similarity floor for semantic hits
    pub min_similarity: f32,
}

impl SearchQuery {
    /// Build a query with defaults, rejecting empty text
    pub fn new(text: impl Into<String>) -> Result<Self, SearchError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(SearchError::InvalidQuery(
                "query text cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            text,
            category: None,
            limit: DEFAULT_LIMIT,
            min_similarity: DEFAULT_MIN_SIMILARITY,
        })
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }

    pub fn with_min_similarity(mut self, min_similarity: f32) -> Self {
        self.min_similarity = min_similarity.clamp(0.0, 1.0);
        self
    }

    /// Eligibility predicate for this query
    pub fn filter(&self) -> EligibilityFilter {
        EligibilityFilter::for_category(self.category.clone())
    }
}

/// How a product earned its place in the results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Literal keyword containment
    Keyword,
    /// Vector similarity only
    Semantic,
    /// Keyword hit corroborated by semantic similarity
    Hybrid,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Keyword => "keyword",
            MatchType::Semantic => "semantic",
            MatchType::Hybrid => "hybrid",
        }
    }
}

/// A product with its fused discovery score
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredProduct {
    #[serde(flatten)]
    pub product: Product,
    pub score: f32,
    pub match_type: MatchType,
}

/// A product ranked by raw semantic similarity (semantic-only mode)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedProduct {
    #[serde(flatten)]
    pub product: Product,
    pub relevance_score: f32,
}

/// Hybrid discovery response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HybridResponse {
    pub exact_matches: Vec<ScoredProduct>,
    pub suggestions: Vec<ScoredProduct>,
    pub count: usize,
    pub suggestions_count: usize,
    pub timing_ms: u64,
    /// True when the request fell back to keyword-only results after an
    /// embedding failure
    pub degraded: bool,
}

/// Semantic-only discovery response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemanticResponse {
    pub data: Vec<RankedProduct>,
    pub count: usize,
    pub timing_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_trims_text() {
        let query = SearchQuery::new("  study guides  ").unwrap();
        assert_eq!(query.text, "study guides");
        assert_eq!(query.limit, DEFAULT_LIMIT);
        assert_eq!(query.min_similarity, DEFAULT_MIN_SIMILARITY);
    }

    #[test]
    fn test_query_rejects_empty_text() {
        assert!(SearchQuery::new("").is_err());
        assert!(SearchQuery::new("   ").is_err());
    }

    #[test]
    fn test_query_clamps_parameters() {
        let query = SearchQuery::new("lamp")
            .unwrap()
            .with_limit(0)
            .with_min_similarity(2.0);
        assert_eq!(query.limit, 1);
        assert_eq!(query.min_similarity, 1.0);
    }

    #[test]
    fn test_match_type_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&MatchType::Hybrid).unwrap(),
            "\"hybrid\""
        );
        assert_eq!(MatchType::Keyword.as_str(), "keyword");
    }
}
