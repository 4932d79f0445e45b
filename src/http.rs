//! HTTP server for the Prometheus metrics endpoint and session administration.
//!
//! Runs on a separate tokio task:
//! - `GET /metrics` - Prometheus scrape
//! - `GET /sessions` - JSON list of session summaries
//! - `POST /sessions/:id/kickout` - terminate one session
//! - `POST /sessions/kickout` - terminate every session

use crate::upend::registry::{SessionRegistry, SessionSummary};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tether_proto::SessionIdentifier;

#[derive(Debug, Serialize)]
struct KickoutResponse {
    kicked: usize,
}

/// Handler for GET /metrics - returns Prometheus metrics in text format.
async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

async fn sessions_handler(State(registry): State<Arc<SessionRegistry>>) -> Json<Vec<SessionSummary>> {
    Json(registry.sessions())
}

async fn kickout_handler(
    State(registry): State<Arc<SessionRegistry>>,
    Path(id): Path<String>,
) -> Result<Json<KickoutResponse>, StatusCode> {
    let session: SessionIdentifier = id.parse().map_err(|_| StatusCode::BAD_REQUEST)?;
    if registry.kickout(&session) {
        Ok(Json(KickoutResponse { kicked: 1 }))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

async fn kickout_all_handler(State(registry): State<Arc<SessionRegistry>>) -> Json<KickoutResponse> {
    let kicked = registry.kickout_all();
    tracing::info!(kicked, "Administrative kickout of all sessions");
    Json(KickoutResponse { kicked })
}

/// Build the admin router. Split out so tests can drive it without a socket.
pub fn router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/sessions", get(sessions_handler))
        .route("/sessions/kickout", post(kickout_all_handler))
        .route("/sessions/:id/kickout", post(kickout_handler))
        .with_state(registry)
}

/// Run the HTTP server for metrics and administration.
///
/// Binds to `0.0.0.0:port`. This is a long-running task that should be
/// spawned in the background.
pub async fn run_http_server(port: u16, registry: Arc<SessionRegistry>) {
    let app = router(registry);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Admin HTTP server listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind HTTP server on {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("HTTP server error: {}", e);
    }
}
