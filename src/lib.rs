//! Catalog BPP - asynchronous search/select provider
//!
//! Implements the provider side of a discovery protocol:
//! - Immediate ACK, fulfillment on a background task
//! - Filter-expression parsing into keywords and a price range
//! - Hybrid search (embedding similarity + exact price predicates)
//! - Callback delivery and deliver-once polling

pub mod types;
pub mod protocol;
pub mod config;
pub mod query_parser;
pub mod registry;
pub mod embedding;
pub mod catalog_store;
pub mod search_engine;
pub mod response_builder;
pub mod dispatcher;
pub mod executor;
pub mod gateway;
pub mod server;

pub use types::*;
pub use config::Config;
pub use catalog_store::{CatalogStore, InMemoryCatalogStore, PgCatalogStore};
pub use embedding::{Embedder, HashingEmbedder, HttpEmbedder};
pub use registry::{SharedRegistry, TransactionRegistry};
pub use search_engine::{SearchEngine, SharedSearchEngine};
pub use response_builder::ResponseBuilder;
pub use dispatcher::CallbackDispatcher;
pub use executor::TaskExecutor;
pub use gateway::Gateway;
