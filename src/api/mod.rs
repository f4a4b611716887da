// HTTP API module
// POST /query over the RAG pipeline, plus liveness and readiness probes

mod error;

#[cfg(test)]
mod tests;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::Config;
use crate::rag::{QueryResult, RagPipeline};
use crate::{Result, ThesiaError};

pub use error::ApiError;

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub question: String,
}

/// Shared handler state. One mutex serializes queries so turns are recorded in order.
#[derive(Clone)]
pub struct ApiState {
    pipeline: Arc<Mutex<RagPipeline>>,
    ready: bool,
}

impl ApiState {
    #[inline]
    pub fn new(pipeline: RagPipeline) -> Self {
        let ready = pipeline.is_ready();
        Self {
            pipeline: Arc::new(Mutex::new(pipeline)),
            ready,
        }
    }
}

#[inline]
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/query", post(query))
        .route("/live", get(live))
        .route("/ready", get(ready))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn query(
    State(state): State<ApiState>,
    payload: std::result::Result<Json<QueryRequest>, JsonRejection>,
) -> std::result::Result<Json<QueryResult>, ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::UnprocessableEntity(e.body_text()))?;

    let mut pipeline = state.pipeline.lock().await;
    let result = pipeline.query(&request.question).await?;

    Ok(Json(result))
}

/// Liveness probe: always 200 while the process is running
async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

/// Readiness probe: 200 once the pipeline is initialized, 503 before
async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    if state.ready {
        (StatusCode::OK, Json(json!({"status": "ok"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "error", "reason": "pipeline not initialized"})),
        )
    }
}

/// Initialize the pipeline, then serve the API until Ctrl-C
#[inline]
pub async fn serve(config: &Config) -> Result<()> {
    let mut pipeline = RagPipeline::from_config(config).await?;
    let report = pipeline.initialize().await?;
    info!(
        "Initialized: {} documents, {} chunks indexed, {} files skipped, existing index reused: {}",
        report.documents_loaded,
        report.chunks_indexed,
        report.skipped_files.len(),
        report.reused_existing_index
    );

    let address = config.server_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on http://{}", address);

    axum::serve(listener, router(ApiState::new(pipeline)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(ThesiaError::Io)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
