//! SQLite-backed catalog repository with migrations

use super::{CatalogRepository, EligibilityFilter, Product, ProductStatus, RepositoryError};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Row};
use std::path::Path;
use uuid::Uuid;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

const MIGRATIONS: &[&str] = &["
    CREATE TABLE products (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        category TEXT NOT NULL,
        condition TEXT,
        price REAL NOT NULL,
        stock INTEGER NOT NULL,
        status TEXT NOT NULL,
        seller_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        embedding BLOB
    );
    CREATE INDEX idx_products_status_stock ON products(status, stock);
    CREATE INDEX idx_products_category ON products(category, status);
    "];

/// SQLite catalog repository
pub struct SqliteCatalog {
    pool: DbPool,
}

impl SqliteCatalog {
    /// Open (or create) a catalog database at the given path
    pub fn new(db_path: &Path) -> Result<Self, RepositoryError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RepositoryError::WriteError(format!(
                    "Failed to create catalog directory {:?}: {}",
                    parent, e
                ))
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| RepositoryError::PoolError(e.to_string()))?;

        {
            let conn = pool
                .get()
                .map_err(|e| RepositoryError::PoolError(e.to_string()))?;

            // WAL mode for concurrent readers
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
            .map_err(|e| RepositoryError::WriteError(e.to_string()))?;
        }

        let catalog = Self { pool };
        catalog.migrate()?;

        Ok(catalog)
    }

    fn get_conn(
        &self,
    ) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, RepositoryError> {
        self.pool
            .get()
            .map_err(|e| RepositoryError::PoolError(e.to_string()))
    }

    fn migrate(&self) -> Result<(), RepositoryError> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| RepositoryError::WriteError(e.to_string()))?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying catalog migration {}", version);

                conn.execute_batch(migration)
                    .map_err(|e| RepositoryError::WriteError(e.to_string()))?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )
                .map_err(|e| RepositoryError::WriteError(e.to_string()))?;
            }
        }

        Ok(())
    }

    fn row_to_product(row: &Row<'_>) -> rusqlite::Result<(Product, Option<Vec<u8>>)> {
        let id: String = row.get(0)?;
        let status: String = row.get(7)?;
        let seller_id: String = row.get(8)?;
        let created_at: i64 = row.get(9)?;
        let embedding_blob: Option<Vec<u8>> = row.get(10)?;

        let product = Product {
            id: Uuid::parse_str(&id).unwrap_or_default(),
            name: row.get(1)?,
            description: row.get(2)?,
            category: row.get(3)?,
            condition: row.get(4)?,
            price: row.get(5)?,
            stock: row.get::<_, i64>(6)?.max(0) as u32,
            status: ProductStatus::parse(&status).unwrap_or(ProductStatus::Deleted),
            seller_id: Uuid::parse_str(&seller_id).unwrap_or_default(),
            created_at: DateTime::<Utc>::from_timestamp(created_at, 0)
                .unwrap_or_else(Utc::now),
            embedding: None,
        };

        Ok((product, embedding_blob))
    }

    fn decode_row(row: &Row<'_>) -> Result<Product, RepositoryError> {
        let (mut product, blob) =
            Self::row_to_product(row).map_err(|e| RepositoryError::ReadError(e.to_string()))?;

        if let Some(blob) = blob {
            product.embedding = Some(decode_embedding(product.id, &blob)?);
        }

        Ok(product)
    }

    const SELECT_COLUMNS: &'static str = "id, name, description, category, condition, price, \
                                          stock, status, seller_id, created_at, embedding";
}

impl CatalogRepository for SqliteCatalog {
    fn find_eligible(&self, filter: &EligibilityFilter) -> Result<Vec<Product>, RepositoryError> {
        let conn = self.get_conn()?;

        let base = format!(
            "SELECT {} FROM products WHERE status = 'active' AND stock > 0",
            Self::SELECT_COLUMNS
        );

        let mut products = Vec::new();

        match &filter.category {
            Some(category) => {
                let mut stmt = conn
                    .prepare(&format!("{} AND category = ?1", base))
                    .map_err(|e| RepositoryError::ReadError(e.to_string()))?;
                let mut rows = stmt
                    .query(params![category])
                    .map_err(|e| RepositoryError::ReadError(e.to_string()))?;
                while let Some(row) = rows
                    .next()
                    .map_err(|e| RepositoryError::ReadError(e.to_string()))?
                {
                    products.push(Self::decode_row(row)?);
                }
            }
            None => {
                let mut stmt = conn
                    .prepare(&base)
                    .map_err(|e| RepositoryError::ReadError(e.to_string()))?;
                let mut rows = stmt
                    .query([])
                    .map_err(|e| RepositoryError::ReadError(e.to_string()))?;
                while let Some(row) = rows
                    .next()
                    .map_err(|e| RepositoryError::ReadError(e.to_string()))?
                {
                    products.push(Self::decode_row(row)?);
                }
            }
        }

        Ok(products)
    }

    fn get_many(&self, ids: &[Uuid]) -> Result<Vec<Product>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM products WHERE id = ?1",
                Self::SELECT_COLUMNS
            ))
            .map_err(|e| RepositoryError::ReadError(e.to_string()))?;

        let mut products = Vec::with_capacity(ids.len());
        for id in ids {
            let mut rows = stmt
                .query(params![id.to_string()])
                .map_err(|e| RepositoryError::ReadError(e.to_string()))?;
            if let Some(row) = rows
                .next()
                .map_err(|e| RepositoryError::ReadError(e.to_string()))?
            {
                products.push(Self::decode_row(row)?);
            }
        }

        Ok(products)
    }

    fn find_missing_embeddings(&self) -> Result<Vec<Product>, RepositoryError> {
        let conn = self.get_conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM products WHERE embedding IS NULL",
                Self::SELECT_COLUMNS
            ))
            .map_err(|e| RepositoryError::ReadError(e.to_string()))?;

        let mut rows = stmt
            .query([])
            .map_err(|e| RepositoryError::ReadError(e.to_string()))?;

        let mut products = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| RepositoryError::ReadError(e.to_string()))?
        {
            products.push(Self::decode_row(row)?);
        }

        Ok(products)
    }

    fn set_embedding(&self, id: Uuid, embedding: &[f32]) -> Result<(), RepositoryError> {
        let conn = self.get_conn()?;
        let blob = encode_embedding(embedding);

        let updated = conn
            .execute(
                "UPDATE products SET embedding = ?1 WHERE id = ?2",
                params![blob, id.to_string()],
            )
            .map_err(|e| RepositoryError::WriteError(e.to_string()))?;

        if updated == 0 {
            return Err(RepositoryError::NotFound(id));
        }

        Ok(())
    }

    fn insert(&self, product: &Product) -> Result<(), RepositoryError> {
        let conn = self.get_conn()?;
        let blob = product.embedding.as_deref().map(encode_embedding);

        conn.execute(
            "INSERT INTO products
                (id, name, description, category, condition, price, stock, status,
                 seller_id, created_at, embedding)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                product.id.to_string(),
                product.name,
                product.description,
                product.category,
                product.condition,
                product.price,
                product.stock as i64,
                product.status.as_str(),
                product.seller_id.to_string(),
                product.created_at.timestamp(),
                blob,
            ],
        )
        .map_err(|e| RepositoryError::WriteError(e.to_string()))?;

        Ok(())
    }

    fn count(&self) -> Result<usize, RepositoryError> {
        let conn = self.get_conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))
            .map_err(|e| RepositoryError::ReadError(e.to_string()))?;
        Ok(count as usize)
    }
}

/// Encode an embedding as little-endian f32 bytes
fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a little-endian f32 blob back into an embedding
fn decode_embedding(id: Uuid, blob: &[u8]) -> Result<Vec<f32>, RepositoryError> {
    if blob.len() % 4 != 0 {
        return Err(RepositoryError::CorruptEmbedding {
            id,
            detail: format!("blob length {} is not a multiple of 4", blob.len()),
        });
    }

    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_product(name: &str, category: &str, stock: u32) -> Product {
        Product {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: format!("{} description", name),
            category: category.to_string(),
            condition: Some("Good".to_string()),
            price: 19.99,
            stock,
            status: ProductStatus::Active,
            seller_id: Uuid::new_v4(),
            created_at: Utc::now(),
            embedding: None,
        }
    }

    fn open_catalog(temp: &TempDir) -> SqliteCatalog {
        SqliteCatalog::new(&temp.path().join("catalog.db")).unwrap()
    }

    #[test]
    fn test_insert_and_count() {
        let temp = TempDir::new().unwrap();
        let catalog = open_catalog(&temp);

        catalog.insert(&sample_product("Desk Lamp", "Dorm Essentials", 3)).unwrap();
        catalog.insert(&sample_product("Notebook", "School Supplies", 10)).unwrap();

        assert_eq!(catalog.count().unwrap(), 2);
    }

    #[test]
    fn test_find_eligible_filters_status_and_stock() {
        let temp = TempDir::new().unwrap();
        let catalog = open_catalog(&temp);

        let mut sold = sample_product("Sold Item", "Books", 1);
        sold.status = ProductStatus::Sold;
        let out_of_stock = sample_product("Out of Stock", "Books", 0);
        let active = sample_product("Active Item", "Books", 5);

        catalog.insert(&sold).unwrap();
        catalog.insert(&out_of_stock).unwrap();
        catalog.insert(&active).unwrap();

        let eligible = catalog.find_eligible(&EligibilityFilter::default()).unwrap();
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].name, "Active Item");
    }

    #[test]
    fn test_find_eligible_category_filter() {
        let temp = TempDir::new().unwrap();
        let catalog = open_catalog(&temp);

        catalog.insert(&sample_product("Textbook", "Books", 2)).unwrap();
        catalog.insert(&sample_product("Calculator", "Electronics", 2)).unwrap();

        let filter = EligibilityFilter::for_category(Some("Books".to_string()));
        let eligible = catalog.find_eligible(&filter).unwrap();

        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].category, "Books");
    }

    #[test]
    fn test_embedding_roundtrip() {
        let temp = TempDir::new().unwrap();
        let catalog = open_catalog(&temp);

        let product = sample_product("Embedded", "Books", 1);
        catalog.insert(&product).unwrap();

        let embedding = vec![0.25_f32, -1.5, 3.0, 0.0];
        catalog.set_embedding(product.id, &embedding).unwrap();

        let fetched = catalog.get_many(&[product.id]).unwrap();
        assert_eq!(fetched.len(), 1);
        assert_eq!(fetched[0].embedding.as_deref(), Some(embedding.as_slice()));
    }

    #[test]
    fn test_set_embedding_unknown_id() {
        let temp = TempDir::new().unwrap();
        let catalog = open_catalog(&temp);

        let result = catalog.set_embedding(Uuid::new_v4(), &[1.0, 2.0]);
        assert!(matches!(result, Err(RepositoryError::NotFound(_))));
    }

    #[test]
    fn test_find_missing_embeddings() {
        let temp = TempDir::new().unwrap();
        let catalog = open_catalog(&temp);

        let with = {
            let mut p = sample_product("Has Embedding", "Books", 1);
            p.embedding = Some(vec![1.0, 0.0]);
            p
        };
        let without = sample_product("No Embedding", "Books", 1);

        catalog.insert(&with).unwrap();
        catalog.insert(&without).unwrap();

        let missing = catalog.find_missing_embeddings().unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "No Embedding");
    }

    #[test]
    fn test_reopen_preserves_data() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("catalog.db");

        {
            let catalog = SqliteCatalog::new(&db_path).unwrap();
            catalog.insert(&sample_product("Persistent", "Books", 1)).unwrap();
        }

        let catalog = SqliteCatalog::new(&db_path).unwrap();
        assert_eq!(catalog.count().unwrap(), 1);
    }
}
