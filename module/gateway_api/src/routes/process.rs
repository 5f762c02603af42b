//! `POST /v1/process`: the dual-path (direct or CLI) provider-compatibility
//! completion endpoint.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use gateway_direct::ChatMessage;
use gateway_types::{Error, Tier, Usage};

use crate::auth::bearer_token;
use crate::error::{ApiError, JsonBody};
use crate::routes::chat::resolve_project_id;
use crate::state::AppState;
use crate::support::{estimate_tokens, model_for_tier, now_ms};

#[derive(Debug, Deserialize)]
pub struct ProcessRequest
{
  pub provider: String,
  pub model_name: String,
  pub messages: Option<Vec<ChatMessage>>,
  pub system_message: Option<String>,
  pub user_message: Option<String>,
  pub max_tokens: Option<i64>,
  pub temperature: Option<f64>,
  #[serde(default)]
  pub use_cli: bool,
  pub project_id: Option<String>,
}

#[derive(Serialize)]
pub struct ProcessMetadata
{
  pub actual_model: String,
  pub usage: Usage,
  pub cost_usd: rust_decimal::Decimal,
  pub mapped_from: String,
}

#[derive(Serialize)]
pub struct ProcessResponse
{
  pub content: String,
  pub model: String,
  pub provider: String,
  pub metadata: ProcessMetadata,
}

/// Maps a `(provider, model_name)` pair to the tier this gateway actually
/// runs. Anthropic model names resolve through `gateway_cost::tier_for_model`
/// directly; every other declared provider falls back to its nearest
/// capability tier since only the Anthropic-backed paths are wired to a
/// live upstream.
fn map_to_tier(provider: &str, model_name: &str) -> (Tier, String)
{
  match provider.to_ascii_lowercase().as_str()
  {
    "anthropic" =>
    {
      let tier = gateway_cost::tier_for_model(model_name).unwrap_or(Tier::Medium);
      (tier, format!("anthropic:{model_name}"))
    }
    "openai" =>
    {
      let tier = if model_name.contains("mini") || model_name.contains("nano") { Tier::Small } else { Tier::Large };
      (tier, format!("openai:{model_name} (nearest-capability)"))
    }
    "google" =>
    {
      let tier = if model_name.contains("flash") { Tier::Small } else { Tier::Medium };
      (tier, format!("google:{model_name} (nearest-capability)"))
    }
    "deepseek" => (Tier::Medium, format!("deepseek:{model_name} (nearest-capability)")),
    other => (Tier::Medium, format!("{other}:{model_name} (default-medium)")),
  }
}

fn build_messages(request: &ProcessRequest) -> Result<Vec<ChatMessage>, ApiError>
{
  if let Some(messages) = &request.messages
  {
    if !messages.is_empty()
    {
      return Ok(messages.clone());
    }
  }
  let user = request
    .user_message
    .clone()
    .ok_or_else(|| Error::BadRequest { field: "user_message".into(), reason: "required when messages is absent".into() })?;
  let mut out = Vec::new();
  if let Some(system) = &request.system_message
  {
    out.push(ChatMessage { role: "system".into(), content: system.clone() });
  }
  out.push(ChatMessage { role: "user".into(), content: user });
  Ok(out)
}

/// Compatibility-shaped completion, routed through the direct path unless
/// `use_cli` asks for the interactive-CLI pool instead.
pub async fn process(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  JsonBody(request): JsonBody<ProcessRequest>,
) -> Result<Json<ProcessResponse>, ApiError>
{
  let (key, _profile) = state.policy.authenticate_and_rate_limit(bearer_token(&headers).as_deref(), now_ms()).await?;
  let project_id = resolve_project_id(&key.project_id, request.project_id.as_deref())?;

  let messages = build_messages(&request)?;
  let (tier, mapped_from) = map_to_tier(&request.provider, &request.model_name);
  let model_name = if request.provider.eq_ignore_ascii_case("anthropic") { request.model_name.clone() } else { model_for_tier(tier).to_string() };

  let prompt = messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
  let max_tokens = request.max_tokens.unwrap_or(1024);
  let token = state.ledger.admit(&project_id, estimate_tokens(&prompt) + max_tokens).await?;

  let (content, usage) = if request.use_cli
  {
    let task_id = state.workerpool.submit(prompt, tier, Some(state.default_task_deadline), None).await;
    match state.workerpool.wait(&task_id, std::future::pending()).await
    {
      Ok(output) => (output.content, output.usage),
      Err(err) =>
      {
        state.ledger.release(&token).await?;
        return Err(err.into());
      }
    }
  }
  else
  {
    match state.direct.complete(&model_name, request.system_message.as_deref(), &messages, max_tokens, request.temperature).await
    {
      Ok(output) => (output.content, output.usage),
      Err(err) =>
      {
        state.ledger.release(&token).await?;
        return Err(err.into());
      }
    }
  };

  state.ledger.debit(&token, Some(&key.id), None, &usage).await?;

  Ok(Json(ProcessResponse {
    content,
    model: model_name.clone(),
    provider: request.provider,
    metadata: ProcessMetadata { actual_model: model_name, cost_usd: usage.cost_usd, usage, mapped_from },
  }))
}
