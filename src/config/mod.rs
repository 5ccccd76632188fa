//! Configuration management for trawl
//!
//! Loads, validates, and persists the TOML configuration that wires the
//! discovery engine together: result defaults, embedding endpoint, catalog
//! location, and similarity index parameters.

use crate::embedding::EmbeddingConfig;
use crate::error::{Result, TrawlError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub discovery: DiscoveryConfig,
    pub embedding: EmbeddingConfig,
    pub catalog: CatalogConfig,
    pub index: IndexConfig,
}

/// Defaults applied to incoming queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Result limit when the query does not specify one
    pub default_limit: usize,
    /// Similarity floor when the query does not specify one
    pub default_min_similarity: f32,
}

/// Catalog storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    pub db_path: PathBuf,
}

/// Similarity index configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Build the ANN index at startup; when false every request takes the
    /// exact scan path
    pub enabled: bool,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub m: usize,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TrawlError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| TrawlError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let config: Config = toml::from_str(&content)?;

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TrawlError::Io {
                source: e,
                context: format!("Failed to create config directory: {:?}", parent),
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| TrawlError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load the config at `path` (or the default location), falling back to
    /// defaults when no file exists yet
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Self::default_path()?;
                if default.exists() {
                    Self::load(&default)
                } else {
                    let mut config = Self::default();
                    config.catalog.db_path = Self::default_data_dir()?.join("catalog.db");
                    Ok(config)
                }
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| TrawlError::Config("Cannot determine config directory".to_string()))?;

        Ok(config_dir.join("trawl").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| TrawlError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".trawl"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery: DiscoveryConfig {
                default_limit: 20,
                default_min_similarity: 0.5,
            },
            embedding: EmbeddingConfig::default(),
            catalog: CatalogConfig {
                db_path: PathBuf::from("~/.trawl/catalog.db"),
            },
            index: IndexConfig {
                enabled: true,
                ef_construction: 200,
                ef_search: 50,
                m: 16,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(ConfigValidator::validate(&config).is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.toml");

        let config = Config::default();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.discovery.default_limit, config.discovery.default_limit);
        assert_eq!(loaded.embedding.dimension, config.embedding.dimension);
        assert_eq!(loaded.index.m, config.index.m);
    }

    #[test]
    fn test_load_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = Config::load(&temp.path().join("nope.toml"));
        assert!(matches!(result, Err(TrawlError::ConfigNotFound { .. })));
    }
}
