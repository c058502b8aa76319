//! Catalog datastores: pgvector-backed products table and an in-memory index

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{Postgres, QueryBuilder};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::embedding::HashingEmbedder;
use crate::types::{CatalogEntry, DEFAULT_CURRENCY};

/// Vector-similarity catalog lookup with exact price predicates
#[async_trait]
pub trait CatalogStore: Send + Sync {
    fn name(&self) -> &'static str;

    /// Entries ordered by ascending distance to `vector`, restricted to
    /// `min_price <= price <= max_price` where given
    async fn nearest(
        &self,
        vector: &[f32],
        min_price: Option<f64>,
        max_price: Option<f64>,
        top_n: usize,
    ) -> Result<Vec<CatalogEntry>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<CatalogEntry>>;
}

const PRODUCT_COLUMNS: &str = "product_id::text AS product_id, \
    product_display_name, \
    brand_name, \
    price::float8 AS price, \
    master_category, \
    sub_category, \
    article_type, \
    age_group, \
    gender, \
    base_color, \
    usage, \
    article_attributes::jsonb AS article_attributes, \
    description, \
    image_url";

#[derive(Debug, sqlx::FromRow)]
struct ProductRow {
    product_id: String,
    product_display_name: Option<String>,
    brand_name: Option<String>,
    price: Option<f64>,
    master_category: Option<String>,
    sub_category: Option<String>,
    article_type: Option<String>,
    age_group: Option<String>,
    gender: Option<String>,
    base_color: Option<String>,
    usage: Option<String>,
    article_attributes: Option<serde_json::Value>,
    description: Option<String>,
    image_url: Option<String>,
    distance: Option<f64>,
}

impl From<ProductRow> for CatalogEntry {
    fn from(row: ProductRow) -> Self {
        let attributes = match row.article_attributes {
            Some(serde_json::Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        CatalogEntry {
            id: row.product_id,
            name: row.product_display_name.unwrap_or_default(),
            description: row.description,
            brand: row.brand_name,
            price: row.price.unwrap_or_default(),
            currency: DEFAULT_CURRENCY.to_string(),
            master_category: row.master_category,
            sub_category: row.sub_category,
            article_type: row.article_type,
            age_group: row.age_group,
            gender: row.gender,
            color: row.base_color,
            usage: row.usage,
            attributes,
            image_url: row.image_url,
            distance: row.distance.unwrap_or_default(),
        }
    }
}

/// pgvector text literal, e.g. `[0.1,0.2]`
fn vector_literal(vector: &[f32]) -> String {
    let parts: Vec<String> = vector.iter().map(|x| x.to_string()).collect();
    format!("[{}]", parts.join(","))
}

/// `products` table with a `description_embedding vector` column
#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(options: PgConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(1)
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .context("Failed to initialize database connection pool")?;
        info!("Database connection pool initialized (max {} connections)", max_connections);
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Database connection pool closed");
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn nearest(
        &self,
        vector: &[f32],
        min_price: Option<f64>,
        max_price: Option<f64>,
        top_n: usize,
    ) -> Result<Vec<CatalogEntry>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
        builder.push(PRODUCT_COLUMNS);
        builder.push(", (description_embedding <-> ");
        builder.push_bind(vector_literal(vector));
        builder.push("::vector)::float8 AS distance FROM products");
        builder.push(" WHERE description_embedding IS NOT NULL");
        if let Some(min) = min_price {
            builder.push(" AND price >= ").push_bind(min);
        }
        if let Some(max) = max_price {
            builder.push(" AND price <= ").push_bind(max);
        }
        builder.push(" ORDER BY distance LIMIT ").push_bind(top_n as i64);

        // Connection goes back to the pool when `conn` drops, on every path.
        let acquire_start = Instant::now();
        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire database connection")?;
        debug!(
            "Database connection acquired in {:.1}ms",
            acquire_start.elapsed().as_secs_f64() * 1000.0
        );

        let query_start = Instant::now();
        let rows: Vec<ProductRow> = builder
            .build_query_as()
            .fetch_all(&mut *conn)
            .await
            .context("Hybrid search query failed")?;
        debug!(
            "SQL query executed in {:.1}ms ({} rows)",
            query_start.elapsed().as_secs_f64() * 1000.0,
            rows.len()
        );

        Ok(rows.into_iter().map(CatalogEntry::from).collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CatalogEntry>> {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT ");
        builder.push(PRODUCT_COLUMNS);
        builder.push(", 0::float8 AS distance FROM products WHERE product_id::text = ");
        builder.push_bind(id);
        builder.push(" LIMIT 1");

        let mut conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire database connection")?;
        let row: Option<ProductRow> = builder
            .build_query_as()
            .fetch_optional(&mut *conn)
            .await
            .context("Product lookup query failed")?;

        Ok(row.map(CatalogEntry::from))
    }
}

/// Catalog held in memory, indexed with a [`HashingEmbedder`].
///
/// Distance is Euclidean, matching pgvector's `<->`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalogStore {
    entries: Vec<(CatalogEntry, Vec<f32>)>,
}

impl InMemoryCatalogStore {
    pub fn new(entries: Vec<(CatalogEntry, Vec<f32>)>) -> Self {
        Self { entries }
    }

    /// Index entries by their descriptive text
    pub fn index(entries: Vec<CatalogEntry>, embedder: &HashingEmbedder) -> Self {
        let entries = entries
            .into_iter()
            .map(|e| {
                let v = embedder.vectorize(&e.index_text());
                (e, v)
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| ((x - y) as f64).powi(2))
        .sum::<f64>()
        .sqrt()
}

#[async_trait]
impl CatalogStore for InMemoryCatalogStore {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    async fn nearest(
        &self,
        vector: &[f32],
        min_price: Option<f64>,
        max_price: Option<f64>,
        top_n: usize,
    ) -> Result<Vec<CatalogEntry>> {
        let mut hits: Vec<CatalogEntry> = self
            .entries
            .iter()
            .filter(|(e, _)| min_price.map_or(true, |min| e.price >= min))
            .filter(|(e, _)| max_price.map_or(true, |max| e.price <= max))
            .map(|(e, v)| {
                let mut entry = e.clone();
                entry.distance = euclidean(vector, v);
                entry
            })
            .collect();

        // Stable: ties keep insertion order.
        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_n);
        Ok(hits)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<CatalogEntry>> {
        Ok(self
            .entries
            .iter()
            .find(|(e, _)| e.id == id)
            .map(|(e, _)| e.clone()))
    }
}
