//! API layer -- axum routes, handlers, and middleware.

pub mod error;
mod routes;
mod state;

use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Request bodies above this size are rejected before parsing.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Per-request deadline.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the application router with all API routes.
pub fn router(state: AppState) -> Router {
    let cors = match &state.config.frontend_url {
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => CorsLayer::new()
                .allow_origin(value)
                .allow_methods(Any)
                .allow_headers(Any),
            Err(_) => {
                tracing::warn!(%origin, "invalid FRONTEND_URL, allowing any origin");
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        },
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    Router::new()
        .route("/health", get(routes::health))
        .route("/analyze", post(routes::analyze))
        .route("/history", get(routes::history))
        .route("/train", post(routes::train))
        .route("/pipelines/:name", get(routes::pipeline_diff))
        .route("/model/info", get(routes::model_info))
        .route("/pipeline-logs", get(routes::list_logs))
        .route("/pipeline-logs/:filename", get(routes::get_log))
        .route("/pipeline-logs/:filename/process", post(routes::process_log))
        .fallback(fallback)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn fallback() -> (axum::http::StatusCode, &'static str) {
    (axum::http::StatusCode::NOT_FOUND, "not found")
}
