//! HTTP server for the catalog BPP

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::gateway::{Gateway, GatewayError};
use crate::protocol::{BareAck, SearchRequest, SelectRequest};
use crate::types::Action;

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

const NOT_READY: &str = "Results not found or not ready for this transaction_id.";

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::MissingItemId => {
                error_response(StatusCode::BAD_REQUEST, self.to_string())
            }
        }
    }
}

async fn search_handler(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<SearchRequest>,
) -> Response {
    let start = Instant::now();
    info!(
        "Received /search request: transaction_id={:?}, intent={:?}",
        req.context.transaction_id, req.message.intent
    );

    let accepted = gateway.accept_search(req);
    info!(
        "ACK sent and async search initiated for {:?} in {:.2}ms",
        accepted.ack.context.transaction_id,
        start.elapsed().as_secs_f64() * 1000.0
    );
    (StatusCode::ACCEPTED, Json(accepted.ack)).into_response()
}

async fn select_handler(
    State(gateway): State<Arc<Gateway>>,
    Json(req): Json<SelectRequest>,
) -> Result<Response, GatewayError> {
    info!(
        "Received /select request: transaction_id={:?}",
        req.context.transaction_id
    );

    let accepted = gateway.accept_select(req).map_err(|e| {
        warn!("Rejected /select request: {}", e);
        e
    })?;
    Ok((StatusCode::ACCEPTED, Json(accepted.ack)).into_response())
}

async fn on_search_handler(Json(body): Json<Value>) -> Json<BareAck> {
    info!("Received /on_search callback: {}", body);
    Json(BareAck::default())
}

async fn on_select_handler(Json(body): Json<Value>) -> Json<BareAck> {
    info!("Received /on_select callback: {}", body);
    Json(BareAck::default())
}

fn poll(gateway: &Gateway, action: Action, transaction_id: &str) -> Response {
    let start = Instant::now();
    let result = gateway.poll(action, transaction_id);
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;

    match result {
        Some(payload) => {
            info!(
                "{} results found for {} ({:.2}ms)",
                action, transaction_id, elapsed_ms
            );
            (StatusCode::OK, Json(payload)).into_response()
        }
        None => {
            warn!(
                "{} results not found or not ready for {} ({:.2}ms)",
                action, transaction_id, elapsed_ms
            );
            error_response(StatusCode::NOT_FOUND, NOT_READY)
        }
    }
}

async fn search_results_handler(
    State(gateway): State<Arc<Gateway>>,
    Path(transaction_id): Path<String>,
) -> Response {
    poll(&gateway, Action::Search, &transaction_id)
}

async fn select_results_handler(
    State(gateway): State<Arc<Gateway>>,
    Path(transaction_id): Path<String>,
) -> Response {
    poll(&gateway, Action::Select, &transaction_id)
}

/// Health check handler
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "catalog-bpp".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Protocol routes, unprefixed
pub fn protocol_routes(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/search", post(search_handler))
        .route("/select", post(select_handler))
        .route("/on_search", post(on_search_handler))
        .route("/on_select", post(on_select_handler))
        .route("/get_search_results/:transaction_id", get(search_results_handler))
        .route("/get_select_results/:transaction_id", get(select_results_handler))
        .with_state(gateway)
}

/// Create and configure the HTTP server
pub fn create_router(gateway: Arc<Gateway>, route_prefix: &str) -> Router {
    let prefix = route_prefix.trim_matches('/');
    let health = Router::new().route("/health", get(health_handler));
    if prefix.is_empty() {
        health.merge(protocol_routes(gateway))
    } else {
        health.nest(&format!("/{}", prefix), protocol_routes(gateway))
    }
}

/// Run the HTTP server
pub async fn run_server(
    gateway: Arc<Gateway>,
    port: u16,
    route_prefix: &str,
) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    info!("Starting catalog BPP server on {}", addr);

    let app = create_router(gateway, route_prefix);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on {} (protocol routes under '{}')", addr, route_prefix);

    axum::serve(listener, app).await?;

    Ok(())
}
