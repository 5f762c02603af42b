//! `GET /health`, `GET /ready`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::{AppState, VERSION};

#[derive(Serialize)]
struct ServiceStatus
{
  ledger: &'static str,
  workerpool: &'static str,
  registry: &'static str,
}

#[derive(Serialize)]
struct HealthBody
{
  status: &'static str,
  version: &'static str,
  uptime_seconds: u64,
  services: ServiceStatus,
  overall: &'static str,
}

/// Liveness probe: always 200 once the process can answer HTTP at all, but
/// reports which dependency, if any, is unreachable.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse
{
  let ledger_up = sqlx::query_scalar::<_, i64>("SELECT 1").fetch_one(state.ledger.pool()).await.is_ok();
  let pool_stats = state.workerpool.stats().await;
  let pool_up = pool_stats.running <= pool_stats.max_concurrent;
  let registry_up = true;

  let overall = if ledger_up && pool_up && registry_up { "healthy" } else { "degraded" };

  Json(HealthBody {
    status: "ok",
    version: VERSION,
    uptime_seconds: state.uptime_seconds(),
    services: ServiceStatus {
      ledger: if ledger_up { "up" } else { "down" },
      workerpool: if pool_up { "up" } else { "down" },
      registry: if registry_up { "up" } else { "down" },
    },
    overall,
  })
}

#[derive(Serialize)]
struct ReadyBody
{
  ready: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  reason: Option<&'static str>,
}

/// Readiness probe: 200 once startup finished and the instance isn't
/// draining for shutdown, 503 otherwise.
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse
{
  if state.is_ready()
  {
    (StatusCode::OK, Json(ReadyBody { ready: true, reason: None }))
  }
  else
  {
    (StatusCode::SERVICE_UNAVAILABLE, Json(ReadyBody { ready: false, reason: Some("starting up or draining") }))
  }
}
