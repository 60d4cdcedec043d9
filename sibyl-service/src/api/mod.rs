//! Read-only HTTP surface over the coordinator's store.

pub mod handlers;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::{error, info};
use sibyl_core::foundation::constants::HTTP_REQUEST_TIMEOUT;
use sibyl_core::foundation::error::{OracleError, Result};
use sibyl_core::infrastructure::storage::Store;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

pub struct ApiState {
    pub store: Arc<dyn Store>,
    /// The coordinator's quorum threshold, used by confirmed-record queries.
    pub threshold: usize,
}

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/list", get(handlers::list))
        .route("/data/{dsid}/list", get(handlers::list_by_field))
        .route("/data/{dsid}/latest", get(handlers::latest))
        .route("/hash", get(handlers::by_hash))
        .route("/structures", get(handlers::structures))
        .route("/health", get(handlers::health))
        .layer(middleware::from_fn(request_timeout))
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: Arc<ApiState>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    info!("binding http api addr={addr}");
    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| OracleError::Config(format!("failed to bind {addr}: {err}")))?;
    info!("http api ready addr={addr}");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
        .map_err(|err| {
            error!("http api terminated unexpectedly addr={addr} error={err}");
            OracleError::Message(err.to_string())
        })
}

async fn request_timeout(request: Request, next: Next) -> Response {
    match tokio::time::timeout(HTTP_REQUEST_TIMEOUT, next.run(request)).await {
        Ok(response) => response,
        Err(_) => (StatusCode::GATEWAY_TIMEOUT, "request timed out").into_response(),
    }
}

async fn request_logging(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(request).await;
    info!(
        "api request method={method} path={path} status={} elapsed_ms={}",
        response.status().as_u16(),
        start.elapsed().as_millis()
    );
    response
}
