//! REST API for running incident playbooks.
//!
//! Exposes the incident engine over HTTP: catalog lookup, incident
//! lifecycle, step evidence and attachments, lessons learned and reports.

use anyhow::{Context, Result};
use axum::{
    extract::DefaultBodyLimit,
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod dto;
pub mod error;
pub mod openapi;
pub mod routes;
pub mod state;

pub use openapi::ApiDoc;
pub use state::ApiState;

/// Largest accepted request body, sized for step attachments
pub const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

async fn openapi_json() -> impl IntoResponse {
    match ApiDoc::json() {
        Ok(doc) => ([(header::CONTENT_TYPE, "application/json")], doc).into_response(),
        Err(e) => error::ApiError::InternalError(e.to_string()).into_response(),
    }
}

/// Build the API router with all routes
pub fn build_router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/api/v1/health", get(routes::health::health))
        .route("/api/v1/status", get(routes::health::status))
        .route("/api/v1/openapi.json", get(openapi_json))
        // Catalog endpoints
        .route("/api/v1/catalog", get(routes::catalog::list))
        .route("/api/v1/catalog/search", get(routes::catalog::search))
        // Incident endpoints
        .route(
            "/api/v1/incidents",
            get(routes::incidents::list).post(routes::incidents::create),
        )
        .route(
            "/api/v1/incidents/:id",
            get(routes::incidents::get_one)
                .put(routes::incidents::reclassify)
                .delete(routes::incidents::delete),
        )
        .route(
            "/api/v1/incidents/:id/progress",
            get(routes::incidents::progress),
        )
        .route(
            "/api/v1/incidents/:id/lessons",
            post(routes::incidents::lessons),
        )
        .route(
            "/api/v1/incidents/:id/resume",
            post(routes::incidents::resume),
        )
        .route(
            "/api/v1/incidents/:id/report",
            get(routes::incidents::download_report).post(routes::incidents::generate_report),
        )
        // Step endpoints
        .route("/api/v1/incidents/:id/steps", get(routes::steps::list))
        .route(
            "/api/v1/incidents/:id/steps/:index",
            get(routes::steps::get_one).post(routes::steps::submit),
        )
        .route(
            "/api/v1/incidents/:id/steps/:index/attachment",
            post(routes::steps::attach),
        )
        // Session endpoints
        .route(
            "/api/v1/session",
            get(routes::session::current).delete(routes::session::close),
        )
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Start the REST API server and run until Ctrl-C
pub async fn serve(state: ApiState, addr: &str) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind REST API to {addr}"))?;
    tracing::info!("REST API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
