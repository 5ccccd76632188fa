//! Product catalog model and read-only repository interface
//!
//! The discovery engine never writes catalog data beyond embedding backfill;
//! CRUD and ownership rules belong to the surrounding application.

mod sqlite;

pub use sqlite::SqliteCatalog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Catalog read failed: {0}")]
    ReadError(String),

    #[error("Catalog write failed: {0}")]
    WriteError(String),

    #[error("Product not found: {0}")]
    NotFound(Uuid),

    #[error("Connection pool error: {0}")]
    PoolError(String),

    #[error("Corrupt embedding for product {id}: {detail}")]
    CorruptEmbedding { id: Uuid, detail: String },
}

/// Listing lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    Active,
    Paused,
    Sold,
    Deleted,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Paused => "paused",
            ProductStatus::Sold => "sold",
            ProductStatus::Deleted => "deleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ProductStatus::Active),
            "paused" => Some(ProductStatus::Paused),
            "sold" => Some(ProductStatus::Sold),
            "deleted" => Some(ProductStatus::Deleted),
            _ => None,
        }
    }
}

/// A catalog listing as seen by the discovery engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub category: String,
    #[serde(default)]
    pub condition: Option<String>,
    pub price: f64,
    pub stock: u32,
    pub status: ProductStatus,
    pub seller_id: Uuid,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Precomputed embedding of the listing text; absent until backfilled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

impl Product {
    /// Whether this listing can appear in discovery results
    pub fn is_eligible(&self) -> bool {
        self.status == ProductStatus::Active && self.stock > 0
    }

    /// Text fed to the embedding provider for this listing
    pub fn embedding_text(&self) -> String {
        let mut parts = vec![
            self.name.as_str(),
            self.description.as_str(),
            self.category.as_str(),
        ];
        if let Some(condition) = &self.condition {
            parts.push(condition.as_str());
        }
        parts
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Variable part of the eligibility predicate; active status and positive
/// stock are always required
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EligibilityFilter {
    pub category: Option<String>,
}

impl EligibilityFilter {
    pub fn for_category(category: Option<String>) -> Self {
        Self { category }
    }

    pub fn matches(&self, product: &Product) -> bool {
        if !product.is_eligible() {
            return false;
        }
        match &self.category {
            Some(category) => product.category == *category,
            None => true,
        }
    }
}

/// Read access to the catalog, plus the narrow write surface needed for
/// embedding backfill and seeding
pub trait CatalogRepository: Send + Sync {
    /// All eligible listings matching the filter, embeddings included
    fn find_eligible(&self, filter: &EligibilityFilter) -> Result<Vec<Product>, RepositoryError>;

    /// Fetch listings by id; missing ids are skipped, order is not guaranteed
    fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Product>, RepositoryError>;

    /// Listings that do not yet carry an embedding, regardless of status
    fn find_missing_embeddings(&self) -> Result<Vec<Product>, RepositoryError>;

    /// Store a freshly generated embedding for a listing
    fn set_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<(), RepositoryError>;

    /// Insert a listing (seeding / ingest)
    fn insert(&self, product: &Product) -> Result<(), RepositoryError>;

    /// Number of listings in the catalog
    fn count(&self) -> Result<usize, RepositoryError>;
}
