use std::sync::Arc;
use std::time::Duration;

use trawl::catalog::{CatalogRepository, EligibilityFilter, Product, SqliteCatalog};
use trawl::cli::{Cli, Commands, ConfigAction};
use trawl::config::Config;
use trawl::embedding::{
    backfill_embeddings, EmbeddingCache, EmbeddingProvider, RemoteEmbeddingProvider,
};
use trawl::error::{Result, TrawlError};
use trawl::retrieval::{
    ExactScanRetriever, HnswRetriever, HybridSearcher, ScanKeywordMatcher, ScoredProduct,
    SearchQuery, SemanticRetriever,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    init_logging(cli.verbose);

    let config = Config::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Commands::Seed { file } => cmd_seed(&config, &file)?,
        Commands::Embed => cmd_embed(&config).await?,
        Commands::Search {
            query,
            limit,
            category,
            min_similarity,
            semantic_only,
            json,
        } => {
            cmd_search(
                &config,
                &query,
                limit,
                category,
                min_similarity,
                semantic_only,
                json,
            )
            .await?
        }
        Commands::Config { action } => cmd_config(&config, action)?,
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "trawl=debug" } else { "trawl=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn open_catalog(config: &Config) -> Result<Arc<SqliteCatalog>> {
    Ok(Arc::new(SqliteCatalog::new(&config.catalog.db_path)?))
}

fn build_provider(config: &Config, api_key: String) -> Result<Arc<dyn EmbeddingProvider>> {
    let provider = RemoteEmbeddingProvider::new(&config.embedding, api_key)
        .map_err(|e| TrawlError::Config(format!("embedding provider: {}", e)))?;
    Ok(Arc::new(provider))
}

fn cmd_seed(config: &Config, file: &std::path::Path) -> Result<()> {
    let content = std::fs::read_to_string(file).map_err(|e| TrawlError::Io {
        source: e,
        context: format!("Failed to read seed file: {:?}", file),
    })?;

    let products: Vec<Product> = serde_json::from_str(&content).map_err(|e| TrawlError::Json {
        source: e,
        context: format!("Failed to parse seed file: {:?}", file),
    })?;

    let catalog = open_catalog(config)?;
    for product in &products {
        catalog.insert(product)?;
    }

    println!(
        "Seeded {} listings into {:?} ({} total)",
        products.len(),
        config.catalog.db_path,
        catalog.count()?
    );
    Ok(())
}

async fn cmd_embed(config: &Config) -> Result<()> {
    let api_key = std::env::var(&config.embedding.api_key_env).map_err(|_| {
        TrawlError::Config(format!(
            "environment variable {} must be set to generate embeddings",
            config.embedding.api_key_env
        ))
    })?;

    let catalog = open_catalog(config)?;
    let provider = build_provider(config, api_key)?;

    let report =
        backfill_embeddings(catalog.as_ref(), provider, config.embedding.batch_size).await?;

    println!(
        "Backfill complete: {} pending, {} embedded, {} failed",
        report.total, report.succeeded, report.failed
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn cmd_search(
    config: &Config,
    query_text: &str,
    limit: Option<usize>,
    category: Option<String>,
    min_similarity: Option<f32>,
    semantic_only: bool,
    json: bool,
) -> Result<()> {
    let catalog = open_catalog(config)?;

    // A missing key is not fatal here: provider calls will fail and the
    // request degrades to keyword-only results
    let api_key = std::env::var(&config.embedding.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!(
            var = %config.embedding.api_key_env,
            "embedding API key not set; semantic retrieval will be degraded"
        );
    }
    let provider = build_provider(config, api_key)?;

    let cache = Arc::new(EmbeddingCache::new(Duration::from_secs(
        config.embedding.cache_ttl_secs,
    )));
    let _sweeper = cache.spawn_sweeper(Duration::from_secs(config.embedding.cache_sweep_secs));

    let primary: Option<Arc<dyn SemanticRetriever>> = if config.index.enabled {
        let products = catalog.find_eligible(&EligibilityFilter::default())?;
        match HnswRetriever::build(&products, &config.index, config.embedding.dimension) {
            Ok(index) if !index.is_empty() => Some(Arc::new(index)),
            Ok(_) => {
                tracing::debug!("no embedded listings to index, using exact scan");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "index build failed, requests will use the exact scan");
                None
            }
        }
    } else {
        None
    };

    let searcher = HybridSearcher::new(
        catalog.clone(),
        cache,
        provider,
        Arc::new(ScanKeywordMatcher::new(catalog.clone())),
        primary,
        Arc::new(ExactScanRetriever::new(catalog)),
    );

    let query = SearchQuery::new(query_text)?
        .with_category(category)
        .with_limit(limit.unwrap_or(config.discovery.default_limit))
        .with_min_similarity(min_similarity.unwrap_or(config.discovery.default_min_similarity));

    if semantic_only {
        let response = searcher.search_semantic(&query).await?;
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&response).map_err(|e| TrawlError::Json {
                    source: e,
                    context: "Failed to serialize response".to_string(),
                })?
            );
        } else {
            println!("{} results ({}ms)", response.count, response.timing_ms);
            for ranked in &response.data {
                println!(
                    "  {:.3}  {}  (${:.2}, {})",
                    ranked.relevance_score,
                    ranked.product.name,
                    ranked.product.price,
                    ranked.product.category
                );
            }
        }
    } else {
        let response = searcher.search(&query).await?;
        if json {
            println!(
                "{}",
                serde_json::to_string_pretty(&response).map_err(|e| TrawlError::Json {
                    source: e,
                    context: "Failed to serialize response".to_string(),
                })?
            );
        } else {
            if response.degraded {
                println!("(semantic retrieval unavailable, keyword matches only)");
            }
            println!(
                "{} exact matches ({}ms)",
                response.count, response.timing_ms
            );
            print_scored(&response.exact_matches);

            if !response.suggestions.is_empty() {
                println!("{} suggestions", response.suggestions_count);
                print_scored(&response.suggestions);
            }
        }
    }

    Ok(())
}

fn print_scored(results: &[ScoredProduct]) {
    for result in results {
        println!(
            "  {:.3}  [{}]  {}  (${:.2}, {})",
            result.score,
            result.match_type.as_str(),
            result.product.name,
            result.product.price,
            result.product.category
        );
    }
}

fn cmd_config(config: &Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = Config::default_path()?;
            if path.exists() && !force {
                return Err(TrawlError::Config(format!(
                    "config already exists at {:?}, use --force to overwrite",
                    path
                )));
            }

            Config::default().save(&path)?;
            println!("Wrote default configuration to {:?}", path);
        }
        ConfigAction::Show => {
            let content = toml::to_string_pretty(config)?;
            println!("{}", content);
        }
        ConfigAction::Path => {
            println!("{}", Config::default_path()?.display());
        }
    }
    Ok(())
}
