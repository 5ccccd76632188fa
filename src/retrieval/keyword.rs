//! Literal keyword matching over product text fields
//!
//! Containment only, no relevance ranking: the whole phrase matches
//! case-insensitively against name, description, and category; multi-word
//! queries additionally match any token longer than two characters against
//! name and category.

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};
use std::sync::Arc;

use crate::catalog::{CatalogRepository, EligibilityFilter, Product, RepositoryError};

/// Tokens at or below this length are too noisy to match on their own
const MIN_TOKEN_LEN: usize = 2;

/// Keyword matching capability; failure is non-fatal to the orchestrator
#[async_trait]
pub trait KeywordMatcher: Send + Sync {
    /// Eligible products containing the query text, bounded to `limit`
    async fn find(
        &self,
        text: &str,
        filter: &EligibilityFilter,
        limit: usize,
    ) -> Result<Vec<Product>, RepositoryError>;
}

/// Keyword matcher scanning the eligible catalog set
pub struct ScanKeywordMatcher {
    repository: Arc<dyn CatalogRepository>,
}

impl ScanKeywordMatcher {
    pub fn new(repository: Arc<dyn CatalogRepository>) -> Self {
        Self { repository }
    }
}

fn literal_pattern(text: &str) -> Result<Regex, RepositoryError> {
    RegexBuilder::new(&regex::escape(text))
        .case_insensitive(true)
        .build()
        .map_err(|e| RepositoryError::ReadError(format!("keyword pattern: {}", e)))
}

fn matches(product: &Product, phrase: &Regex, tokens: &[Regex]) -> bool {
    if phrase.is_match(&product.name)
        || phrase.is_match(&product.description)
        || phrase.is_match(&product.category)
    {
        return true;
    }

    tokens
        .iter()
        .any(|token| token.is_match(&product.name) || token.is_match(&product.category))
}

#[async_trait]
impl KeywordMatcher for ScanKeywordMatcher {
    async fn find(
        &self,
        text: &str,
        filter: &EligibilityFilter,
        limit: usize,
    ) -> Result<Vec<Product>, RepositoryError> {
        let text = text.trim();
        let phrase = literal_pattern(text)?;

        // Token matching only applies to multi-word queries; a single word
        // already is the phrase
        let words: Vec<&str> = text
            .split_whitespace()
            .filter(|w| w.len() > MIN_TOKEN_LEN)
            .collect();
        let tokens: Vec<Regex> = if words.len() > 1 {
            words
                .iter()
                .map(|w| literal_pattern(w))
                .collect::<Result<_, _>>()?
        } else {
            Vec::new()
        };

        let mut results = Vec::new();
        for product in self.repository.find_eligible(filter)? {
            if matches(&product, &phrase, &tokens) {
                results.push(product);
                if results.len() == limit {
                    break;
                }
            }
        }

        Ok(results)
    }
}
