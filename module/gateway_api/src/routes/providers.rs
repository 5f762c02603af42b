//! `GET /v1/providers`, `GET /v1/providers/{provider}/models`.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::auth::bearer_token;
use crate::error::ApiError;
use crate::state::AppState;
use crate::support::now_ms;

#[derive(Serialize)]
pub struct ModelCapabilities
{
  pub max_tokens: i64,
  pub context_window: i64,
  pub supports_functions: bool,
  pub supports_vision: bool,
}

#[derive(Serialize)]
pub struct ProviderSummary
{
  pub name: &'static str,
  pub available: bool,
  pub models: Vec<&'static str>,
}

const PROVIDERS: &[(&str, bool, &[&str])] = &[
  ("anthropic", true, &["claude-3-5-haiku-20241022", "claude-sonnet-4-20250514", "claude-opus-4-20250514"]),
  ("openai", false, &["gpt-4o-mini", "gpt-4o", "gpt-4.1"]),
  ("google", false, &["gemini-1.5-flash", "gemini-1.5-pro"]),
  ("deepseek", false, &["deepseek-chat", "deepseek-reasoner"]),
];

/// List every declared provider and whether this gateway has a live
/// upstream wired for it. Only `anthropic` is backed by a real call path;
/// the rest are declared so `/v1/process`'s mapping table has somewhere
/// to point, but are reported unavailable.
pub async fn list_providers(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<Vec<ProviderSummary>>, ApiError>
{
  state.policy.authenticate_and_rate_limit(bearer_token(&headers).as_deref(), now_ms()).await?;

  Ok(Json(
    PROVIDERS.iter().map(|(name, available, models)| ProviderSummary { name, available: *available, models: models.to_vec() }).collect(),
  ))
}

#[derive(Serialize)]
pub struct ProviderModelsResponse
{
  pub provider: String,
  pub models: std::collections::HashMap<&'static str, ModelCapabilities>,
}

/// Per-tier capability table for one provider. Figures are declared
/// constants describing what this gateway assumes about each tier, not a
/// live upstream query.
pub async fn provider_models(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  Path(provider): Path<String>,
) -> Result<Response, ApiError>
{
  state.policy.authenticate_and_rate_limit(bearer_token(&headers).as_deref(), now_ms()).await?;

  if !PROVIDERS.iter().any(|(name, _, _)| *name == provider.to_ascii_lowercase())
  {
    #[derive(Serialize)]
    struct NotFoundBody
    {
      detail: String,
    }
    return Ok((StatusCode::NOT_FOUND, Json(NotFoundBody { detail: format!("unknown provider '{provider}'") })).into_response());
  }

  let mut models = std::collections::HashMap::new();
  models.insert("small", ModelCapabilities { max_tokens: 8_192, context_window: 200_000, supports_functions: true, supports_vision: false });
  models.insert("medium", ModelCapabilities { max_tokens: 8_192, context_window: 200_000, supports_functions: true, supports_vision: true });
  models.insert("large", ModelCapabilities { max_tokens: 8_192, context_window: 200_000, supports_functions: true, supports_vision: true });

  Ok(Json(ProviderModelsResponse { provider, models }).into_response())
}
