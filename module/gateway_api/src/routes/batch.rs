//! `POST /v1/batch`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use gateway_direct::ChatMessage;
use gateway_policy::CapabilityRequest;
use gateway_types::Error;

use crate::auth::bearer_token;
use crate::error::{ApiError, JsonBody};
use crate::routes::chat::resolve_project_id;
use crate::state::AppState;
use crate::support::{estimate_cost, estimate_tokens, model_for_tier, now_ms, remaining_budget_tokens};

#[derive(Debug, Deserialize)]
pub struct BatchPrompt
{
  pub prompt: String,
  pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest
{
  pub prompts: Vec<BatchPrompt>,
  pub model: Option<String>,
  pub project_id: Option<String>,
  pub timeout: Option<u64>,
}

#[derive(Serialize)]
pub struct BatchItemResult
{
  pub id: String,
  pub status: &'static str,
  pub content: Option<String>,
  pub cost: Option<Decimal>,
  pub tokens: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

#[derive(Serialize)]
pub struct BatchResponse
{
  pub total: usize,
  pub completed: usize,
  pub failed: usize,
  pub results: Vec<BatchItemResult>,
  pub total_cost: Decimal,
  pub total_tokens: i64,
}

/// Run every prompt against the direct completion path under one shared
/// deadline. A per-prompt failure is reported in-band; only a failure to
/// reserve the batch's combined estimated cost up front rejects the whole
/// request.
pub async fn batch(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  JsonBody(request): JsonBody<BatchRequest>,
) -> Result<Json<BatchResponse>, ApiError>
{
  if request.prompts.is_empty()
  {
    return Err(Error::BadRequest { field: "prompts".into(), reason: "must contain at least one prompt".into() }.into());
  }

  let (key, _profile) = state.policy.authenticate_and_rate_limit(bearer_token(&headers).as_deref(), now_ms()).await?;
  let project_id = resolve_project_id(&key.project_id, request.project_id.as_deref())?;

  let capability_request = CapabilityRequest::default();
  let profile = state.ledger.permission_profile(&key.id).await?;
  let admission = state.policy.validate_and_gate(&key, &profile, &capability_request).await?;

  let project = state.ledger.get_project(&project_id).await?;
  let committed = state.ledger.committed_tokens(&project_id).await?;
  let remaining = remaining_budget_tokens(project.budget_tokens, committed);

  let default_output_tokens = 1024;
  let estimates: Vec<(Decimal, i64, gateway_types::Tier, String)> = request
    .prompts
    .iter()
    .map(|item| {
      let (tier, model_name) = match &request.model
      {
        Some(name) => (gateway_cost::tier_for_model(name).unwrap_or(gateway_types::Tier::Medium), name.clone()),
        None =>
        {
          let decision = gateway_router::route(&item.prompt, estimate_tokens(&item.prompt), remaining, state.router_thresholds);
          (decision.tier, model_for_tier(decision.tier).to_string())
        }
      };
      let cost = estimate_cost(&state.pricing, tier, &item.prompt, default_output_tokens);
      let tokens = estimate_tokens(&item.prompt) + default_output_tokens;
      (cost, tokens, tier, model_name)
    })
    .collect();

  let total_estimate: Decimal = estimates.iter().map(|(cost, _, _, _)| *cost).sum();
  if total_estimate > admission.effective_max_cost_usd
  {
    return Err(Error::BudgetExceeded(format!(
      "combined batch estimate {total_estimate} exceeds the per-request ceiling {}",
      admission.effective_max_cost_usd
    ))
    .into());
  }

  let deadline = Duration::from_secs(request.timeout.unwrap_or(u64::try_from(admission.effective_timeout_secs).unwrap_or(60)));

  let mut results = Vec::with_capacity(request.prompts.len());
  let mut completed = 0usize;
  let mut failed = 0usize;
  let mut total_cost = Decimal::ZERO;
  let mut total_tokens = 0i64;

  for (index, item) in request.prompts.iter().enumerate()
  {
    let (_estimated_cost, estimated_tokens, _tier, model_name) = &estimates[index];
    let id = item.id.clone().unwrap_or_else(|| format!("item_{index}"));

    let outcome = run_one(&state, &project_id, &key.id, &model_name, &item.prompt, *estimated_tokens, deadline).await;
    match outcome
    {
      Ok((content, cost, tokens)) =>
      {
        completed += 1;
        total_cost += cost;
        total_tokens += tokens;
        results.push(BatchItemResult { id, status: "completed", content: Some(content), cost: Some(cost), tokens: Some(tokens), error: None });
      }
      Err(err) =>
      {
        failed += 1;
        results.push(BatchItemResult { id, status: "failed", content: None, cost: None, tokens: None, error: Some(err.to_string()) });
      }
    }
  }

  Ok(Json(BatchResponse { total: request.prompts.len(), completed, failed, results, total_cost, total_tokens }))
}

async fn run_one(
  state: &AppState,
  project_id: &str,
  api_key_id: &str,
  model_name: &str,
  prompt: &str,
  estimated_tokens: i64,
  deadline: Duration,
) -> Result<(String, Decimal, i64), Error>
{
  let token = state.ledger.admit(project_id, estimated_tokens).await?;
  let messages = vec![ChatMessage { role: "user".into(), content: prompt.to_string() }];

  let outcome = tokio::time::timeout(deadline, state.direct.complete(model_name, None, &messages, 1024, None)).await;

  let output = match outcome
  {
    Ok(Ok(output)) => output,
    Ok(Err(err)) =>
    {
      state.ledger.release(&token).await?;
      return Err(err);
    }
    Err(_) =>
    {
      state.ledger.release(&token).await?;
      return Err(Error::TaskTimedOut);
    }
  };

  state.ledger.debit(&token, Some(api_key_id), None, &output.usage).await?;
  Ok((output.content, output.usage.cost_usd, output.usage.total_tokens()))
}
