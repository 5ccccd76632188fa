//! Batch embedding backfill for catalog listings

use std::sync::Arc;

use super::EmbeddingProvider;
use crate::catalog::{CatalogRepository, RepositoryError};

/// Outcome of a backfill run
#[derive(Debug, Default)]
pub struct BackfillReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

/// Generate and store embeddings for every listing that lacks one
///
/// Listings are processed in provider-sized batches; a failed batch is
/// retried item by item so one bad listing does not sink its neighbors.
pub async fn backfill_embeddings(
    repository: &dyn CatalogRepository,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
) -> Result<BackfillReport, RepositoryError> {
    let pending = repository.find_missing_embeddings()?;
    let mut report = BackfillReport {
        total: pending.len(),
        ..Default::default()
    };

    if pending.is_empty() {
        return Ok(report);
    }

    tracing::info!(total = report.total, "backfilling listing embeddings");

    let batch_size = batch_size.max(1);

    for batch in pending.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|p| p.embedding_text()).collect();

        match provider.embed_batch(&texts).await {
            Ok(embeddings) => {
                for (product, embedding) in batch.iter().zip(embeddings) {
                    match repository.set_embedding(product.id, &embedding) {
                        Ok(()) => report.succeeded += 1,
                        Err(e) => {
                            report.failed += 1;
                            tracing::warn!(
                                product = %product.id,
                                error = %e,
                                "failed to store embedding"
                            );
                        }
                    }
                }
            }
            Err(batch_error) => {
                tracing::warn!(
                    error = %batch_error,
                    size = batch.len(),
                    "batch embedding failed, retrying items individually"
                );

                for product in batch {
                    match provider.embed(&product.embedding_text()).await {
                        Ok(embedding) => match repository.set_embedding(product.id, &embedding) {
                            Ok(()) => report.succeeded += 1,
                            Err(e) => {
                                report.failed += 1;
                                tracing::warn!(
                                    product = %product.id,
                                    error = %e,
                                    "failed to store embedding"
                                );
                            }
                        },
                        Err(e) => {
                            report.failed += 1;
                            tracing::warn!(
                                product = %product.id,
                                error = %e,
                                "failed to generate embedding"
                            );
                        }
                    }
                }
            }
        }
    }

    tracing::info!(
        succeeded = report.succeeded,
        failed = report.failed,
        "embedding backfill complete"
    );

    Ok(report)
}
