//! Axum server setup and router configuration.

use crate::state::AppState;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router, routing::get};
use serde::Serialize;
use skygrep_sdk::objects::{HealthResponse, MetricsResponse};
use std::future::Future;
use tokio::net::TcpListener;

/// Build the status router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .fallback(not_found)
        .with_state(state)
}

/// Liveness verdict; 503 while unhealthy.
async fn health(State(state): State<AppState>) -> Response {
    let report = state.health.derive();
    let status = StatusCode::from_u16(report.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    pretty_json(status, &HealthResponse::from(report))
}

/// Match count per topic, in declaration order.
async fn metrics(State(state): State<AppState>) -> Response {
    pretty_json(StatusCode::OK, &MetricsResponse(state.metrics.snapshot()))
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: &'static str,
}

fn internal_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            error: "Internal Server Error",
            message: "An unexpected error occurred",
        }),
    )
        .into_response()
}

fn pretty_json<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_string_pretty(body) {
        Ok(body) => (status, [(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "HTTP server error");
            internal_error()
        }
    }
}

/// Serve until `shutdown` completes, then drain open connections.
pub async fn run_server(
    listener: TcpListener,
    router: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Server listening on {}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("HTTP server stopped");
    Ok(())
}
