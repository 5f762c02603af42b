//! `POST /v1/task`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use gateway_executor::{AgenticRequest, ExecutionOutcome};
use gateway_policy::CapabilityRequest;

use crate::auth::bearer_token;
use crate::error::{ApiError, JsonBody};
use crate::routes::chat::resolve_project_id;
use crate::state::AppState;
use crate::support::{estimate_tokens, now_ms, remaining_budget_tokens, worst_case_tokens_for_cost};

#[derive(Debug, Deserialize)]
pub struct TaskRequest
{
  pub description: String,
  #[serde(default)]
  pub allow_tools: Vec<String>,
  #[serde(default)]
  pub allow_agents: Vec<String>,
  #[serde(default)]
  pub allow_skills: Vec<String>,
  /// Accepted for API compatibility but not honored as an arbitrary path
  /// override: every task runs in its own generated workspace directory,
  /// never a caller-supplied one, so a client can't point the executor at
  /// an arbitrary filesystem location.
  #[allow(dead_code)]
  pub working_directory: Option<String>,
  pub timeout: Option<i64>,
  pub max_cost: Option<rust_decimal::Decimal>,
  pub project_id: Option<String>,
}

/// Run a multi-step agentic task through the registry-aware executor.
pub async fn task(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  JsonBody(request): JsonBody<TaskRequest>,
) -> Result<Json<ExecutionOutcome>, ApiError>
{
  let (key, _profile) = state.policy.authenticate_and_rate_limit(bearer_token(&headers).as_deref(), now_ms()).await?;
  let project_id = resolve_project_id(&key.project_id, request.project_id.as_deref())?;

  let capability_request = CapabilityRequest {
    tools: request.allow_tools.clone(),
    agents: request.allow_agents.clone(),
    skills: request.allow_skills.clone(),
    requested_timeout_secs: request.timeout,
    requested_max_cost_usd: request.max_cost,
  };
  let profile = state.ledger.permission_profile(&key.id).await?;
  let admission = state.policy.validate_and_gate(&key, &profile, &capability_request).await?;

  let project = state.ledger.get_project(&project_id).await?;
  let committed = state.ledger.committed_tokens(&project_id).await?;
  let remaining = remaining_budget_tokens(project.budget_tokens, committed);

  let decision = gateway_router::route(&request.description, estimate_tokens(&request.description), remaining, state.router_thresholds);

  let agentic_request = AgenticRequest {
    description: request.description.clone(),
    allow_tools: request.allow_tools.clone(),
    allow_agents: request.allow_agents.clone(),
    allow_skills: request.allow_skills.clone(),
    deadline: Duration::from_secs(u64::try_from(admission.effective_timeout_secs).unwrap_or(60)),
    max_cost_usd: admission.effective_max_cost_usd,
  };

  let estimated_tokens = worst_case_tokens_for_cost(&state.pricing, decision.tier, admission.effective_max_cost_usd);
  let token = state.ledger.admit(&project_id, estimated_tokens).await?;

  let outcome = state.executor.execute(decision.tier, &agentic_request).await;

  let outcome = match outcome
  {
    Ok(outcome) => outcome,
    Err(err) =>
    {
      state.ledger.release(&token).await?;
      state
        .policy
        .audit(None, Some(&key.id), Some(&project_id), "task_failed", Some(&format!("{{\"error\":\"{err}\"}}")), "error")
        .await?;
      return Err(err.into());
    }
  };

  if outcome.over_budget
  {
    state.ledger.release(&token).await?;
  }
  else
  {
    state.ledger.debit(&token, Some(&key.id), None, &outcome.usage).await?;
  }

  state
    .policy
    .audit(None, Some(&key.id), Some(&project_id), "agentic_task", Some(&format!("{{\"status\":\"{}\"}}", outcome.status)), "info")
    .await?;

  Ok(Json(outcome))
}
