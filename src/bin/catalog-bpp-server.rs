//! Catalog BPP HTTP server binary

use anyhow::Context;
use catalog_bpp::{
    server, CatalogEntry, CatalogStore, Config, Embedder, Gateway, HashingEmbedder, HttpEmbedder,
    InMemoryCatalogStore, PgCatalogStore, SearchEngine,
};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging; RUST_LOG wins over LOG_LEVEL
    let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .init();

    println!("🛒 Catalog BPP");
    println!("   Version: {}", env!("CARGO_PKG_VERSION"));
    println!();

    let config = Config::from_env()?;

    // Check for --use-real flag
    let use_real = std::env::args().any(|arg| arg == "--use-real");

    let (embedder, store): (Arc<dyn Embedder>, Arc<dyn CatalogStore>) = if use_real {
        println!("✓ Mode: REAL catalog (Postgres + embedding API)");
        let api_key = config
            .embedding
            .api_key
            .clone()
            .context("GOOGLE_API_KEY must be set with --use-real")?;
        let embedder =
            HttpEmbedder::new(&config.embedding.api_url, &config.embedding.model, api_key)?;
        println!("✓ Embedding model: {}", config.embedding.model);

        let options = config.database.connect_options()?;
        let store = match PgCatalogStore::connect(options, config.database.pool_max).await {
            Ok(store) => store,
            Err(e) => {
                eprintln!("❌ Failed to connect to the product database: {:#}", e);
                return Err(e);
            }
        };
        println!("✓ Product database pool ready (max {} connections)", config.database.pool_max);

        (Arc::new(embedder), Arc::new(store))
    } else {
        println!("✓ Mode: MOCK in-memory catalog");
        println!("   (use --use-real to search the Postgres catalog)");
        let embedder = HashingEmbedder::default();
        let store = InMemoryCatalogStore::index(create_mock_catalog(), &embedder);
        println!("✓ Indexed {} mock products", store.len());

        (Arc::new(embedder), Arc::new(store))
    };

    let engine = SearchEngine::new(embedder, store);
    let gateway = Gateway::assemble(&config, engine)?;

    println!("✓ Search engine initialized");
    println!("✓ Starting HTTP server on port {}...", config.port);
    println!();

    server::run_server(gateway, config.port, &config.route_prefix).await?;

    Ok(())
}

/// id | name | brand | price | master | sub | article | gender | color | usage
const MOCK_CATALOG: &str = "\
15970|Turtle Check Men Navy Blue Shirt|Turtle|1299|Apparel|Topwear|Shirts|Men|Navy Blue|Casual
39386|Peter England Men Party Blue Jeans|Peter England|1999|Apparel|Bottomwear|Jeans|Men|Blue|Casual
59263|Titan Women Silver Watch|Titan|4595|Accessories|Watches|Watches|Women|Silver|Casual
21379|Manchester United Men Solid Black Track Pants|Manchester United|1495|Apparel|Bottomwear|\
Track Pants|Men|Black|Casual
53759|Puma Men Grey T-shirt|Puma|699|Apparel|Topwear|Tshirts|Men|Grey|Casual
1855|Inkfruit Mens Chain Reaction Red T-shirt|Inkfruit|399|Apparel|Topwear|Tshirts|Men|Red|Casual
30805|Fabindia Men Striped Green Shirt|Fabindia|890|Apparel|Topwear|Shirts|Men|Green|Ethnic
26960|Jealous 21 Women Purple Shirt|Jealous 21|599|Apparel|Topwear|Shirts|Women|Purple|Casual
29114|Puma Men Pack of 3 Socks|Puma|299|Accessories|Socks|Socks|Men|Navy Blue|Casual
9204|Puma Men Future Cat Remix SF Black Casual Shoes|Puma|4499|Footwear|Shoes|Casual Shoes|\
Men|Black|Casual
48123|Nike Women Red Running Shoes|Nike|3995|Footwear|Shoes|Sports Shoes|Women|Red|Sports
18653|Fila Men Cush Flex Black Slippers|Fila|990|Footwear|Flip Flops|Flip Flops|Men|Black|Casual";

/// Small fashion catalog for running without a database
fn create_mock_catalog() -> Vec<CatalogEntry> {
    MOCK_CATALOG.lines().filter_map(mock_entry).collect()
}

fn mock_entry(line: &str) -> Option<CatalogEntry> {
    let fields: Vec<&str> = line.split('|').map(str::trim).collect();
    let [id, name, brand, price, master, sub, article, gender, color, usage] = fields[..] else {
        return None;
    };
    let text = |v: &str| Some(v.to_string());

    let mut entry = CatalogEntry::new(id, name, price.parse().ok()?);
    entry.description = Some(format!(
        "{} {} by {} for {} wear",
        color, article, brand, usage
    ));
    entry.brand = text(brand);
    entry.master_category = text(master);
    entry.sub_category = text(sub);
    entry.article_type = text(article);
    entry.age_group = text("Adults");
    entry.gender = text(gender);
    entry.color = text(color);
    entry.usage = text(usage);
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_catalog_parses_every_row() {
        let catalog = create_mock_catalog();
        assert_eq!(catalog.len(), 12);
        let pants = catalog.iter().find(|e| e.id == "21379").unwrap();
        assert_eq!(pants.article_type.as_deref(), Some("Track Pants"));
        assert_eq!(pants.price, 1495.0);
    }
}
