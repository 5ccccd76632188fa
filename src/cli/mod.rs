//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "trawl",
    version,
    about = "Hybrid product discovery over a local catalog",
    long_about = "Trawl answers free-text queries against a product catalog by combining literal \
                  keyword matching with vector-embedding semantic similarity, returning ranked \
                  exact matches plus semantic suggestions."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/trawl/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load catalog listings from a JSON file
    Seed {
        /// Path to a JSON array of products
        file: PathBuf,
    },

    /// Generate embeddings for listings that lack one
    Embed,

    /// Run a discovery query against the catalog
    Search {
        /// Query text
        query: String,

        /// Maximum number of exact matches
        #[arg(short, long)]
        limit: Option<usize>,

        /// Restrict to a category
        #[arg(long)]
        category: Option<String>,

        /// Similarity floor for semantic hits (0.0 to 1.0)
        #[arg(long)]
        min_similarity: Option<f32>,

        /// Skip keyword matching and return one similarity-ranked list
        #[arg(long)]
        semantic_only: bool,

        /// Print the raw JSON response
        #[arg(long)]
        json: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show current configuration
    Show,

    /// Print the configuration file path
    Path,
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
