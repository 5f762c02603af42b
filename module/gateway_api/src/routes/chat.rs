//! `POST /v1/chat/completions`.

use std::sync::Arc;

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
use crate::state::AppState;
use crate::support::{estimate_cost, model_for_tier, now_ms, remaining_budget_tokens};

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest
{
  pub model: Option<String>,
  pub messages: Vec<ChatMessage>,
  pub project_id: Option<String>,
  pub timeout: Option<i64>,
  pub max_tokens: Option<i64>,
}

#[derive(Serialize)]
pub struct UsageBody
{
  pub input_tokens: i64,
  pub output_tokens: i64,
  pub total_tokens: i64,
}

#[derive(Serialize)]
pub struct ChatCompletionResponse
{
  pub id: String,
  pub model: String,
  pub content: String,
  pub usage: UsageBody,
  pub cost: Decimal,
  pub project_id: String,
}

/// A single non-agentic completion over the direct (non-CLI) path.
pub async fn chat_completions(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  JsonBody(request): JsonBody<ChatCompletionRequest>,
) -> Result<Json<ChatCompletionResponse>, ApiError>
{
  let (key, _profile) = state.policy.authenticate_and_rate_limit(bearer_token(&headers).as_deref(), now_ms()).await?;

  let project_id = resolve_project_id(&key.project_id, request.project_id.as_deref())?;

  let capability_request = CapabilityRequest { requested_timeout_secs: request.timeout, ..CapabilityRequest::default() };
  let profile = state.ledger.permission_profile(&key.id).await?;
  let admission = state.policy.validate_and_gate(&key, &profile, &capability_request).await?;

  let project = state.ledger.get_project(&project_id).await?;
  let committed = state.ledger.committed_tokens(&project_id).await?;

  let prompt = request.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
  let max_tokens = request.max_tokens.unwrap_or(1024);
  let estimated_input_tokens = estimate_tokens_all(&request.messages);

  let (tier, model_name) = match &request.model
  {
    Some(name) => (gateway_cost::tier_for_model(name).ok_or_else(|| Error::UnknownModel(name.clone()))?, name.clone()),
    None =>
    {
      let remaining = remaining_budget_tokens(project.budget_tokens, committed);
      let decision = gateway_router::route(&prompt, estimated_input_tokens, remaining, state.router_thresholds);
      (decision.tier, model_for_tier(decision.tier).to_string())
    }
  };

  let estimated_cost = estimate_cost(&state.pricing, tier, &prompt, max_tokens);
  if estimated_cost > admission.effective_max_cost_usd
  {
    return Err(Error::BudgetExceeded(format!(
      "estimated cost {estimated_cost} exceeds the per-task ceiling {}",
      admission.effective_max_cost_usd
    ))
    .into());
  }
  let token = state.ledger.admit(&project_id, estimated_input_tokens + max_tokens).await?;

  let outcome = state.direct.complete(&model_name, None, &request.messages, max_tokens, None).await;

  let output = match outcome
  {
    Ok(output) => output,
    Err(err) =>
    {
      state.ledger.release(&token).await?;
      return Err(err.into());
    }
  };

  state.ledger.debit(&token, Some(&key.id), None, &output.usage).await?;

  Ok(Json(ChatCompletionResponse {
    id: format!("chatcmpl_{}", uuid::Uuid::new_v4()),
    model: output.usage.model.clone(),
    content: output.content,
    usage: UsageBody {
      input_tokens: output.usage.input_tokens,
      output_tokens: output.usage.output_tokens,
      total_tokens: output.usage.total_tokens(),
    },
    cost: output.usage.cost_usd,
    project_id,
  }))
}

/// A request-supplied `project_id` must agree with the authenticated key's
/// own project; it exists so a caller can make the association explicit,
/// not to let one key spend against another project's budget.
pub(crate) fn resolve_project_id(key_project_id: &str, requested: Option<&str>) -> Result<String, ApiError>
{
  match requested
  {
    Some(requested) if requested != key_project_id =>
    {
      Err(ApiError(Error::BadRequest { field: "project_id".into(), reason: "does not match the authenticated key's project".into() }))
    }
    _ => Ok(key_project_id.to_string()),
  }
}

pub(crate) fn estimate_tokens_all(messages: &[ChatMessage]) -> i64
{
  messages.iter().map(|m| crate::support::estimate_tokens(&m.content)).sum()
}
