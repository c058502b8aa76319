//! Hybrid search: semantic ranking with hard price constraints

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::catalog_store::CatalogStore;
use crate::embedding::Embedder;
use crate::types::{CatalogEntry, SearchCriteria};

/// Main search engine (thread-safe via Arc)
pub struct SearchEngine {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn CatalogStore>,
}

pub type SharedSearchEngine = Arc<SearchEngine>;

impl SearchEngine {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn CatalogStore>) -> SharedSearchEngine {
        Arc::new(Self { embedder, store })
    }

    /// Rank catalog entries for the criteria, at most `top_n`.
    ///
    /// Keywords and soft hints only influence the embedding; price bounds are
    /// enforced by the store. Failures are logged and produce an empty list.
    pub async fn search(&self, criteria: &SearchCriteria, top_n: usize) -> Vec<CatalogEntry> {
        let start = Instant::now();
        let query_text = criteria.semantic_query();
        if query_text.is_empty() {
            warn!("Empty semantic query; nothing to embed");
            return Vec::new();
        }

        info!("Generating embedding for combined query: '{}'", query_text);
        let embed_start = Instant::now();
        let vector = match self.embedder.embed(&query_text).await {
            Ok(v) if !v.is_empty() => v,
            Ok(_) => {
                error!("Embedder '{}' returned an empty vector", self.embedder.name());
                return Vec::new();
            }
            Err(e) => {
                error!("Failed to generate embedding for query: {:#}", e);
                return Vec::new();
            }
        };
        debug!(
            "Embedding latency: {:.1}ms (dimension {})",
            embed_start.elapsed().as_secs_f64() * 1000.0,
            vector.len()
        );

        info!(
            "Executing hybrid search for '{}' with hard filters min_price={:?} max_price={:?}",
            query_text, criteria.min_price, criteria.max_price
        );
        let results = match self
            .store
            .nearest(&vector, criteria.min_price, criteria.max_price, top_n)
            .await
        {
            Ok(mut rows) => {
                rows.truncate(top_n);
                rows
            }
            Err(e) => {
                error!("Catalog store '{}' search failed: {:#}", self.store.name(), e);
                Vec::new()
            }
        };

        info!(
            "Found {} products for '{}' in {:.1}ms",
            results.len(),
            query_text,
            start.elapsed().as_secs_f64() * 1000.0
        );
        results
    }

    /// Look up one catalog entry by id; failures are logged and yield `None`
    pub async fn find_item(&self, id: &str) -> Option<CatalogEntry> {
        match self.store.find_by_id(id).await {
            Ok(found) => {
                if found.is_none() {
                    warn!("Product '{}' not found in catalog", id);
                }
                found
            }
            Err(e) => {
                error!("Catalog store '{}' lookup for '{}' failed: {:#}", self.store.name(), id, e);
                None
            }
        }
    }
}
