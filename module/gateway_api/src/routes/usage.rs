//! `GET /v1/usage`.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use gateway_ledger::TierUsage;
use gateway_types::Error;

use crate::auth::bearer_token;
use crate::error::ApiError;
use crate::state::AppState;
use crate::support::now_ms;

#[derive(Debug, Deserialize)]
pub struct UsageQuery
{
  pub project_id: String,
  pub period: Option<String>,
}

#[derive(Serialize)]
pub struct UsageResponse
{
  pub project_id: String,
  pub period: String,
  pub total_tokens: i64,
  pub total_cost: String,
  pub by_model: std::collections::HashMap<String, TierUsage>,
  pub limit: Option<i64>,
  pub remaining: Option<i64>,
}

/// Read-only usage aggregation over a caller-selected window (`1h`, `24h`,
/// `7d`, `30d`, or `all`; defaults to `24h`).
pub async fn usage(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Query(query): Query<UsageQuery>,
) -> Result<Json<UsageResponse>, ApiError>
{
  let (key, _profile) = state.policy.authenticate_and_rate_limit(bearer_token(&headers).as_deref(), now_ms()).await?;

  if query.project_id != key.project_id
  {
    return Err(Error::BadRequest { field: "project_id".into(), reason: "does not match the authenticated key's project".into() }.into());
  }

  let period = query.period.clone().unwrap_or_else(|| "24h".to_string());
  let since_ms = now_ms() - period_to_millis(&period)?;
  let until_ms = now_ms();

  let window = state.ledger.usage_window(&query.project_id, since_ms, until_ms).await?;
  let project = state.ledger.get_project(&query.project_id).await?;
  let committed = state.ledger.committed_tokens(&query.project_id).await?;

  let (limit, remaining) = match project.budget_tokens
  {
    Some(budget) => (Some(budget), Some((budget - committed).max(0))),
    None => (None, None),
  };

  Ok(Json(UsageResponse {
    project_id: window.project_id,
    period,
    total_tokens: window.input_tokens + window.output_tokens,
    total_cost: window.cost_usd,
    by_model: window.by_model,
    limit,
    remaining,
  }))
}

fn period_to_millis(period: &str) -> Result<i64, ApiError>
{
  let millis = match period
  {
    "1h" => 3_600_000,
    "24h" => 86_400_000,
    "7d" => 604_800_000,
    "30d" => 2_592_000_000,
    "all" => i64::MAX / 2,
    other => return Err(Error::BadRequest { field: "period".into(), reason: format!("unknown period '{other}'") }.into()),
  };
  Ok(millis)
}
