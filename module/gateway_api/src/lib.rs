//! The axum HTTP/WebSocket server binding every gateway component
//! together: `AppState` owns the ledger, registry, policy, worker pool,
//! agentic executor, and direct client, and `build_router` wires each
//! endpoint in the HTTP surface to its handler.

pub mod auth;
pub mod error;
pub mod lifecycle;
pub mod routes;
pub mod state;
pub mod support;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use state::AppState;

/// Build the full router: every path in the HTTP surface, a permissive
/// CORS layer (this gateway is consumed by local tooling, not browsers
/// across origins that need restricting), and request tracing.
#[must_use]
pub fn build_router(state: Arc<AppState>) -> Router
{
  Router::new()
    .route("/health", get(routes::health::health))
    .route("/ready", get(routes::health::ready))
    .route("/v1/capabilities", get(routes::capabilities::list_capabilities))
    .route("/v1/chat/completions", post(routes::chat::chat_completions))
    .route("/v1/batch", post(routes::batch::batch))
    .route("/v1/route", post(routes::route::route))
    .route("/v1/usage", get(routes::usage::usage))
    .route("/v1/task", post(routes::task::task))
    .route("/v1/process", post(routes::process::process))
    .route("/v1/providers", get(routes::providers::list_providers))
    .route("/v1/providers/:provider/models", get(routes::providers::provider_models))
    .route("/v1/stream", get(routes::stream::stream))
    .layer(TraceLayer::new_for_http())
    .layer(CorsLayer::permissive())
    .with_state(state)
}
