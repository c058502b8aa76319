//! Query embedding: HTTP client for the hosted embedding model plus a local hashing embedder

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};
use tracing::debug;

/// Turns query text into a fixed-length vector
#[async_trait]
pub trait Embedder: Send + Sync {
    fn name(&self) -> &'static str;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Request body for `models/*:embedContent`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}

pub const DEFAULT_EMBEDDING_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_EMBEDDING_MODEL: &str = "models/text-embedding-004";

/// Embedder backed by the Generative Language `embedContent` endpoint
pub struct HttpEmbedder {
    api_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl HttpEmbedder {
    pub fn new(
        api_url: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build embedding HTTP client")?;
        Ok(Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.into(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/{}:embedContent?key={}",
            self.api_url,
            self.model,
            urlencoding::encode(&self.api_key)
        )
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn name(&self) -> &'static str {
        "http_embedding"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            anyhow::bail!("Refusing to embed empty text");
        }

        let request = EmbedContentRequest {
            model: &self.model,
            content: Content {
                parts: vec![Part { text }],
            },
            task_type: "RETRIEVAL_QUERY",
        };

        let start = Instant::now();
        let response = self
            .client
            .post(self.endpoint())
            .json(&request)
            .send()
            .await
            .context("Failed to call embedding service")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Embedding service error ({}): {}", status, error_text);
        }

        let body: EmbedContentResponse = response
            .json()
            .await
            .context("Failed to parse embedding service response")?;

        debug!(
            "Embedding generated in {:.1}ms (dimension {})",
            start.elapsed().as_secs_f64() * 1000.0,
            body.embedding.values.len()
        );

        if body.embedding.values.is_empty() {
            anyhow::bail!("Embedding service returned an empty vector");
        }
        Ok(body.embedding.values)
    }
}

/// Deterministic bag-of-words embedder for mock mode and tests.
///
/// Each lowercase alphanumeric token is hashed into one of `dimension`
/// buckets; the vector is unit-normalized.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dimension];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.to_lowercase().hash(&mut hasher);
            v[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &'static str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            anyhow::bail!("Refusing to embed empty text");
        }
        Ok(self.vectorize(text))
    }
}
