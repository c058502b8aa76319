//! Service configuration read from the environment

use anyhow::{Context, Result};
use sqlx::postgres::PgConnectOptions;
use std::str::FromStr;
use std::time::Duration;

use crate::dispatcher::{DEFAULT_CALLBACK_TIMEOUT, DEFAULT_METADATA_URL};
use crate::embedding::{DEFAULT_EMBEDDING_API_URL, DEFAULT_EMBEDDING_MODEL};
use crate::executor::{ExecutorSettings, DEFAULT_MAX_CONCURRENT_TASKS, DEFAULT_TOP_N};
use crate::protocol::{CallbackSource, ServiceIdentity};
use crate::response_builder::CatalogBranding;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_ROUTE_PREFIX: &str = "/beckn";

/// How outbound callbacks are authenticated
#[derive(Debug, Clone, PartialEq)]
pub enum CallbackAuth {
    None,
    Static { token: String },
    Metadata { url: String },
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: u16,
    pub name: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub pool_max: u32,
}

impl DatabaseConfig {
    /// `DATABASE_URL` wins; otherwise host, name, user and password are all required
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        if let Some(url) = &self.url {
            return PgConnectOptions::from_str(url).context("Invalid DATABASE_URL");
        }
        match (&self.host, &self.name, &self.user, &self.password) {
            (Some(host), Some(name), Some(user), Some(password)) => Ok(PgConnectOptions::new()
                .host(host)
                .port(self.port)
                .database(name)
                .username(user)
                .password(password)),
            _ => anyhow::bail!(
                "Database credentials missing: set DATABASE_URL \
                 or DB_HOST, DB_NAME, DB_USER and DB_PASSWORD"
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub api_url: String,
    pub model: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub route_prefix: String,
    pub identity: ServiceIdentity,
    pub branding: CatalogBranding,
    pub executor: ExecutorSettings,
    pub callback_timeout: Duration,
    pub callback_auth: CallbackAuth,
    pub callback_source: CallbackSource,
    pub embedding: EmbeddingConfig,
    pub database: DatabaseConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup (the environment in production)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = CatalogBranding::default();

        let callback_auth = match get("CALLBACK_AUTH").as_deref().unwrap_or("none") {
            "none" => CallbackAuth::None,
            "static" => CallbackAuth::Static {
                token: get("CALLBACK_BEARER_TOKEN")
                    .context("CALLBACK_AUTH=static requires CALLBACK_BEARER_TOKEN")?,
            },
            "metadata" => CallbackAuth::Metadata {
                url: get("METADATA_URL").unwrap_or_else(|| DEFAULT_METADATA_URL.to_string()),
            },
            other => anyhow::bail!(
                "Invalid CALLBACK_AUTH '{}': expected none, static or metadata",
                other
            ),
        };

        let callback_source = match get("CALLBACK_SOURCE") {
            Some(raw) => raw
                .parse::<CallbackSource>()
                .map_err(|e| anyhow::anyhow!("Invalid CALLBACK_SOURCE: {}", e))?,
            None => CallbackSource::default(),
        };

        Ok(Self {
            port: parse_or(&get, "PORT", DEFAULT_PORT)?,
            route_prefix: get("ROUTE_PREFIX").unwrap_or_else(|| DEFAULT_ROUTE_PREFIX.to_string()),
            identity: ServiceIdentity {
                bpp_id: get("BPP_ID"),
                bpp_uri: get("BPP_URI"),
            },
            branding: CatalogBranding {
                catalog_name: get("CATALOG_NAME").unwrap_or(defaults.catalog_name),
                catalog_short_desc: get("CATALOG_SHORT_DESC")
                    .unwrap_or(defaults.catalog_short_desc),
                provider_id: get("PROVIDER_ID").unwrap_or(defaults.provider_id),
                provider_name: get("PROVIDER_NAME").unwrap_or(defaults.provider_name),
                image_base_url: get("IMAGE_BASE_URL").unwrap_or(defaults.image_base_url),
            },
            executor: ExecutorSettings {
                max_concurrent_tasks: parse_or(
                    &get,
                    "MAX_CONCURRENT_TASKS",
                    DEFAULT_MAX_CONCURRENT_TASKS,
                )?,
                top_n: parse_or(&get, "SEARCH_TOP_N", DEFAULT_TOP_N)?,
            },
            callback_timeout: Duration::from_secs(parse_or(
                &get,
                "CALLBACK_TIMEOUT_SECS",
                DEFAULT_CALLBACK_TIMEOUT.as_secs(),
            )?),
            callback_auth,
            callback_source,
            embedding: EmbeddingConfig {
                api_url: get("EMBEDDING_API_URL")
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_API_URL.to_string()),
                model: get("EMBEDDING_MODEL")
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
                api_key: get("GOOGLE_API_KEY"),
            },
            database: DatabaseConfig {
                url: get("DATABASE_URL"),
                host: get("DB_HOST"),
                port: parse_or(&get, "DB_PORT", 5432)?,
                name: get("DB_NAME"),
                user: get("DB_USER"),
                password: get("DB_PASSWORD"),
                pool_max: parse_or(&get, "DB_POOL_MAX", 10)?,
            },
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        None => Ok(default),
    }
}
