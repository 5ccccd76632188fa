use crate::config::Config;
use crate::error::{Result, TrawlError, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_discovery(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_catalog(config, &mut errors);
        Self::validate_index(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TrawlError::ConfigValidation { errors })
        }
    }

    fn validate_discovery(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.discovery.default_limit == 0 {
            errors.push(ValidationError::new(
                "discovery.default_limit",
                "Default limit must be greater than 0",
            ));
        }

        let min_similarity = config.discovery.default_min_similarity;
        if !(0.0..=1.0).contains(&min_similarity) {
            errors.push(ValidationError::new(
                "discovery.default_min_similarity",
                format!(
                    "Minimum similarity must be between 0.0 and 1.0, got {}",
                    min_similarity
                ),
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.endpoint.is_empty() {
            errors.push(ValidationError::new(
                "embedding.endpoint",
                "Endpoint cannot be empty",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }

        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.timeout_secs == 0 {
            errors.push(ValidationError::new(
                "embedding.timeout_secs",
                "Request timeout must be greater than 0",
            ));
        }

        if config.embedding.cache_ttl_secs == 0 {
            errors.push(ValidationError::new(
                "embedding.cache_ttl_secs",
                "Cache TTL must be greater than 0",
            ));
        }

        if config.embedding.cache_sweep_secs == 0 {
            errors.push(ValidationError::new(
                "embedding.cache_sweep_secs",
                "Cache sweep period must be greater than 0",
            ));
        }
    }

    fn validate_catalog(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.catalog.db_path.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "catalog.db_path",
                "Catalog database path cannot be empty",
            ));
        }
    }

    fn validate_index(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.index.ef_construction == 0 {
            errors.push(ValidationError::new(
                "index.ef_construction",
                "HNSW ef_construction must be greater than 0",
            ));
        }

        if config.index.ef_search == 0 {
            errors.push(ValidationError::new(
                "index.ef_search",
                "HNSW ef_search must be greater than 0",
            ));
        }

        if config.index.m == 0 {
            errors.push(ValidationError::new(
                "index.m",
                "HNSW M must be greater than 0",
            ));
        }
    }
}
