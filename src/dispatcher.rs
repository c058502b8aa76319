//! Outbound delivery of on_search / on_select payloads to the caller's endpoint

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::protocol::CallbackPayload;
use crate::types::Action;

pub const DEFAULT_CALLBACK_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_METADATA_URL: &str = "http://metadata.google.internal";

/// Terminal delivery outcomes; none of them is retried
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no callback endpoint supplied")]
    MissingEndpoint,

    #[error("invalid callback endpoint '{uri}': {reason}")]
    InvalidEndpoint { uri: String, reason: String },

    #[error("unsupported callback scheme '{scheme}' in '{uri}'")]
    UnsupportedScheme { uri: String, scheme: String },

    #[error("failed to obtain token for audience {audience}: {message}")]
    Auth { audience: String, message: String },

    #[error("failed to encode {action} payload: {source}")]
    Encoding {
        action: Action,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to send callback to {target}: {source}")]
    Transport {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("callback {target} rejected payload with status {status}: {body}")]
    Rejected {
        target: String,
        status: u16,
        body: String,
    },
}

impl DeliveryError {
    /// Short label for log fields
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::MissingEndpoint => "missing_endpoint",
            DeliveryError::InvalidEndpoint { .. } => "invalid_endpoint",
            DeliveryError::UnsupportedScheme { .. } => "unsupported_scheme",
            DeliveryError::Auth { .. } => "auth",
            DeliveryError::Encoding { .. } => "encoding",
            DeliveryError::Transport { .. } => "transport",
            DeliveryError::Rejected { .. } => "rejected",
        }
    }
}

/// Where a callback goes and which audience its token is scoped to
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackTarget {
    pub url: Url,
    pub audience: String,
}

/// Append the action to the endpoint path and derive the token audience
/// (`scheme://host[:port]`).
pub fn callback_target(
    callback_uri: &str,
    action: Action,
) -> Result<CallbackTarget, DeliveryError> {
    let mut url = Url::parse(callback_uri.trim()).map_err(|e| DeliveryError::InvalidEndpoint {
        uri: callback_uri.to_string(),
        reason: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(DeliveryError::UnsupportedScheme {
            uri: callback_uri.to_string(),
            scheme: url.scheme().to_string(),
        });
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(DeliveryError::InvalidEndpoint {
            uri: callback_uri.to_string(),
            reason: "missing host".to_string(),
        });
    }

    let audience = url.origin().ascii_serialization();
    let path = format!("{}/{}", url.path().trim_end_matches('/'), action.as_str());
    url.set_path(&path);

    Ok(CallbackTarget { url, audience })
}

/// Source of bearer tokens for authenticated callbacks
#[async_trait]
pub trait TokenProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn token(&self, audience: &str) -> Result<String>;
}

/// Same pre-issued token for every audience
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn token(&self, _audience: &str) -> Result<String> {
        if self.token.is_empty() {
            anyhow::bail!("Static callback token is empty");
        }
        Ok(self.token.clone())
    }
}

const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

/// Identity tokens minted by the cloud metadata server for each audience
pub struct MetadataTokenProvider {
    base_url: String,
    client: reqwest::Client,
}

impl MetadataTokenProvider {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build metadata HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl TokenProvider for MetadataTokenProvider {
    fn name(&self) -> &'static str {
        "metadata"
    }

    async fn token(&self, audience: &str) -> Result<String> {
        let url = format!(
            "{}{}?audience={}&format=full",
            self.base_url,
            IDENTITY_PATH,
            urlencoding::encode(audience)
        );

        debug!("Fetching identity token for audience {}", audience);

        let response = self
            .client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .context("Failed to call metadata server")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Metadata server error {}: {}", status, body);
        }

        let token = response.text().await.context("Failed to read identity token")?;
        if token.trim().is_empty() {
            anyhow::bail!("Metadata server returned an empty token");
        }
        Ok(token.trim().to_string())
    }
}

/// Successful delivery
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReceipt {
    pub target: String,
    pub status: u16,
}

/// Posts built payloads to `{callback}/on_search` or `{callback}/on_select`
#[derive(Clone)]
pub struct CallbackDispatcher {
    client: reqwest::Client,
    tokens: Option<Arc<dyn TokenProvider>>,
    timeout: Duration,
}

impl CallbackDispatcher {
    pub fn new(timeout: Duration, tokens: Option<Arc<dyn TokenProvider>>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build callback HTTP client")?;
        Ok(Self {
            client,
            tokens,
            timeout,
        })
    }

    pub async fn deliver(
        &self,
        callback_uri: Option<&str>,
        payload: &CallbackPayload,
    ) -> Result<DeliveryReceipt, DeliveryError> {
        let callback_uri = callback_uri
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(DeliveryError::MissingEndpoint)?;
        let action = payload.action();
        let target = callback_target(callback_uri, action)?;

        let body = serde_json::to_vec(payload)
            .map_err(|source| DeliveryError::Encoding { action, source })?;

        let mut request = self
            .client
            .post(target.url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(tokens) = &self.tokens {
            // The token fetch shares the callback's time budget.
            let fetch = tokio::time::timeout(self.timeout, tokens.token(&target.audience));
            let token = match fetch.await {
                Ok(Ok(token)) => token,
                Ok(Err(e)) => {
                    return Err(DeliveryError::Auth {
                        audience: target.audience.clone(),
                        message: format!("{:#}", e),
                    })
                }
                Err(_) => {
                    return Err(DeliveryError::Auth {
                        audience: target.audience.clone(),
                        message: format!(
                            "{} token provider timed out after {:?}",
                            tokens.name(),
                            self.timeout
                        ),
                    })
                }
            };
            debug!("Attached {} token for {}", tokens.name(), target.audience);
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        info!("Sending {} to {}", action, target.url);
        let response = request.send().await.map_err(|source| DeliveryError::Transport {
            target: target.url.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                target: target.url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(DeliveryReceipt {
            target: target.url.to_string(),
            status: status.as_u16(),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::http::{HeaderMap, StatusCode, Uri};
    use axum::{Json, Router};
    use serde_json::Value;
    use tokio::sync::mpsc;

    /// One request seen by the capture server
    #[derive(Debug)]
    pub struct Captured {
        pub path: String,
        pub authorization: Option<String>,
        pub body: Value,
    }

    /// Local listener that records every JSON POST and answers with `status`.
    /// Returns the base URL (`http://127.0.0.1:<port>/bap`).
    pub async fn capture_server(status: StatusCode) -> (String, mpsc::UnboundedReceiver<Captured>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let app = Router::new().fallback(
            move |uri: Uri, headers: HeaderMap, Json(body): Json<Value>| {
                let tx = tx.clone();
                async move {
                    let authorization = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let _ = tx.send(Captured {
                        path: uri.path().to_string(),
                        authorization,
                        body,
                    });
                    status
                }
            },
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/bap", addr), rx)
    }
}
