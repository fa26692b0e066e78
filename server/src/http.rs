//! HTTP shell: `GET /health`, `POST /search`. Graceful shutdown on SIGINT/SIGTERM
//! mirrors this codebase's existing `main.rs::shutdown_signal`.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use osgrep_core::types::validate_path;
use osgrep_store::Store;

use crate::searcher::{SearchHit, Searcher};
use crate::worker_client::WorkerClient;

const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub project_root: PathBuf,
    pub store: Arc<Mutex<Store>>,
    pub worker: Arc<WorkerClient>,
}

#[derive(Debug, Deserialize)]
struct SearchRequest {
    query: String,
    limit: Option<usize>,
    path: Option<String>,
}

#[derive(Debug, Serialize)]
struct SearchHitDto {
    path: String,
    start_line: u32,
    num_lines: u32,
    text: String,
    score: f32,
    is_anchor: bool,
}

impl From<SearchHit> for SearchHitDto {
    fn from(h: SearchHit) -> Self {
        Self {
            path: h.path,
            start_line: h.start_line,
            num_lines: h.num_lines,
            text: h.text,
            score: h.score,
            is_anchor: h.is_anchor,
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchResponse {
    results: Vec<SearchHitDto>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/search", post(search))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn search(State(state): State<AppState>, body: Bytes) -> impl IntoResponse {
    if body.len() > MAX_PAYLOAD_BYTES {
        return (StatusCode::PAYLOAD_TOO_LARGE, Json(ErrorBody { error: "payload_too_large" }))
            .into_response();
    }

    let req: SearchRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, Json(ErrorBody { error: "invalid_request" }))
                .into_response()
        }
    };

    let where_expr = match &req.path {
        Some(p) => match validate_path(&state.project_root, p) {
            Ok(resolved) => {
                let prefix = resolved
                    .strip_prefix(&state.project_root)
                    .unwrap_or(&resolved)
                    .to_string_lossy()
                    .replace('\\', "/");
                Some(osgrep_store::predicate::WherePredicate::PathStartsWith(prefix).to_expr())
            }
            Err(_) => {
                return (StatusCode::BAD_REQUEST, Json(ErrorBody { error: "invalid_path" }))
                    .into_response()
            }
        },
        None => None,
    };

    let limit = req.limit.unwrap_or(20);
    let query = req.query;
    let store = state.store.clone();
    let worker = state.worker.clone();

    // encode_query/rerank block the calling thread on the worker pool's reply channel
    // (`WorkerPool::submit`'s `mpsc::Receiver::recv`). Running the search on a blocking
    // thread keeps a slow embed/rerank from stalling the async runtime's worker threads,
    // per the pool's documented `spawn_blocking` contract.
    let outcome = tokio::task::spawn_blocking(move || {
        let searcher = Searcher::new(worker);
        let store = store.lock().unwrap();
        searcher.search(&store, &query, limit, where_expr.as_deref())
    })
    .await;

    match outcome {
        Ok(Ok(hits)) => {
            let results = hits.into_iter().map(SearchHitDto::from).collect();
            Json(SearchResponse { results }).into_response()
        }
        Ok(Err(e)) => {
            error!(error = %e, "search failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: "search_failed" }))
                .into_response()
        }
        Err(e) => {
            error!(error = %e, "search task panicked");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorBody { error: "search_failed" }))
                .into_response()
        }
    }
}

pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for Ctrl+C");
        info!("received Ctrl+C, shutting down");
    }
}
