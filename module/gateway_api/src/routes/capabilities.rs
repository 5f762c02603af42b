//! `GET /v1/capabilities`.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use gateway_registry::{AgentDescriptor, SkillDescriptor};

use crate::auth::bearer_token;
use crate::error::ApiError;
use crate::state::AppState;
use crate::support::now_ms;

#[derive(Serialize)]
pub struct CapabilitiesBody
{
  pub agents: Vec<AgentDescriptor>,
  pub skills: Vec<SkillDescriptor>,
  pub agents_count: usize,
  pub skills_count: usize,
}

/// List every registered agent and skill. Requires a valid key (but no
/// specific capability grant — seeing what's available is not the same as
/// being allowed to use it).
pub async fn list_capabilities(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<CapabilitiesBody>, ApiError>
{
  state.policy.authenticate_and_rate_limit(bearer_token(&headers).as_deref(), now_ms()).await?;

  let (agents, skills) = state.registry.list().await;
  Ok(Json(CapabilitiesBody { agents_count: agents.len(), skills_count: skills.len(), agents, skills }))
}
