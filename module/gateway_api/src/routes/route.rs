//! `POST /v1/route`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::auth::bearer_token;
use crate::error::{ApiError, JsonBody};
use crate::routes::chat::resolve_project_id;
use crate::state::AppState;
use crate::support::{model_for_tier, now_ms, remaining_budget_tokens};

#[derive(Debug, Deserialize)]
pub struct RouteRequest
{
  pub prompt: String,
  pub context_size: i64,
  pub project_id: Option<String>,
}

#[derive(Serialize)]
pub struct RouteResponse
{
  pub recommended_model: String,
  pub reasoning: String,
  pub budget_status: String,
}

/// A pure routing decision with no side effects beyond the auth/rate-limit
/// check every endpoint pays.
pub async fn route(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  JsonBody(request): JsonBody<RouteRequest>,
) -> Result<Json<RouteResponse>, ApiError>
{
  let (key, _profile) = state.policy.authenticate_and_rate_limit(bearer_token(&headers).as_deref(), now_ms()).await?;
  let project_id = resolve_project_id(&key.project_id, request.project_id.as_deref())?;

  let project = state.ledger.get_project(&project_id).await?;
  let committed = state.ledger.committed_tokens(&project_id).await?;
  let remaining = remaining_budget_tokens(project.budget_tokens, committed);

  let budget_status = match remaining
  {
    None => "unlimited".to_string(),
    Some(tokens) => format!("~{tokens} tokens remaining"),
  };

  let decision = gateway_router::route(&request.prompt, request.context_size, remaining, state.router_thresholds);

  Ok(Json(RouteResponse { recommended_model: model_for_tier(decision.tier).to_string(), reasoning: decision.reason, budget_status }))
}
