//! `WS /v1/stream`: a pseudo-streaming transport over the same chat/agentic
//! completion paths the REST endpoints use. The CLI and DirectPath both
//! return their output in one shot, so "streaming" here means tokenizing
//! the finished text into chunks and emitting them in sequence rather than
//! running a streaming-capable upstream call.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use gateway_direct::ChatMessage;
use gateway_executor::AgenticRequest;

use crate::auth::bearer_token;
use crate::error::ApiError;
use crate::routes::chat::resolve_project_id;
use crate::state::AppState;
use crate::support::{estimate_tokens, model_for_tier, now_ms, remaining_budget_tokens, worst_case_tokens_for_cost};

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamRequest
{
  Chat
  {
    model: Option<String>, messages: Vec<ChatMessage>, project_id: Option<String>
  },
  AgenticTask
  {
    description: String,
    #[serde(default)]
    allow_tools: Vec<String>,
    #[serde(default)]
    allow_agents: Vec<String>,
    #[serde(default)]
    allow_skills: Vec<String>,
    timeout: Option<i64>,
    max_cost: Option<rust_decimal::Decimal>,
    project_id: Option<String>,
  },
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamEvent<'a>
{
  Token
  {
    text: &'a str
  },
  ToolCall
  {
    name: &'a str
  },
  AgentSpawn
  {
    name: &'a str
  },
  SkillInvoke
  {
    name: &'a str
  },
  Result
  {
    content: &'a str, cost: rust_decimal::Decimal, total_tokens: i64
  },
  Error
  {
    detail: String
  },
}

/// Authenticate on the HTTP handshake (closing the connection attempt
/// outright on a bad key, rather than accepting the socket and closing it
/// immediately after) and hand off to the long-lived socket loop.
pub async fn stream(
  State(state): State<Arc<AppState>>,
  headers: HeaderMap,
  ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError>
{
  let (key, _profile) = state.policy.authenticate_and_rate_limit(bearer_token(&headers).as_deref(), now_ms()).await?;
  Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, key)))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, key: gateway_ledger::ApiKeyRecord)
{
  let Some(Ok(Message::Text(first))) = socket.recv().await
  else
  {
    let _ = socket.send(Message::Close(None)).await;
    return;
  };

  let request: StreamRequest = match serde_json::from_str(&first)
  {
    Ok(request) => request,
    Err(err) =>
    {
      send_event(&mut socket, &StreamEvent::Error { detail: format!("malformed first frame: {err}") }).await;
      let _ = socket.send(Message::Close(None)).await;
      return;
    }
  };

  if let Err(err) = run_request(&mut socket, &state, &key, request).await
  {
    send_event(&mut socket, &StreamEvent::Error { detail: err.to_string() }).await;
  }

  let _ = socket.send(Message::Close(None)).await;
}

async fn run_request(socket: &mut WebSocket, state: &AppState, key: &gateway_ledger::ApiKeyRecord, request: StreamRequest) -> gateway_types::Result<()>
{
  match request
  {
    StreamRequest::Chat { model, messages, project_id } =>
    {
      let project_id = resolve_project_id(&key.project_id, project_id.as_deref()).map_err(|e| e.0)?;
      let project = state.ledger.get_project(&project_id).await?;
      let committed = state.ledger.committed_tokens(&project_id).await?;

      let prompt = messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n");
      let (_tier, model_name) = match &model
      {
        Some(name) => (gateway_cost::tier_for_model(name).unwrap_or(gateway_types::Tier::Medium), name.clone()),
        None =>
        {
          let remaining = remaining_budget_tokens(project.budget_tokens, committed);
          let decision = gateway_router::route(&prompt, estimate_tokens(&prompt), remaining, state.router_thresholds);
          (decision.tier, model_for_tier(decision.tier).to_string())
        }
      };

      let token = state.ledger.admit(&project_id, estimate_tokens(&prompt) + 1024).await?;

      let output = match state.direct.complete(&model_name, None, &messages, 1024, None).await
      {
        Ok(output) => output,
        Err(err) =>
        {
          state.ledger.release(&token).await?;
          return Err(err);
        }
      };

      state.ledger.debit(&token, Some(&key.id), None, &output.usage).await?;

      for chunk in tokenize(&output.content)
      {
        send_event(socket, &StreamEvent::Token { text: chunk }).await;
        tokio::time::sleep(Duration::from_millis(15)).await;
      }
      send_event(socket, &StreamEvent::Result { content: &output.content, cost: output.usage.cost_usd, total_tokens: output.usage.total_tokens() }).await;
      Ok(())
    }
    StreamRequest::AgenticTask { description, allow_tools, allow_agents, allow_skills, timeout, max_cost, project_id } =>
    {
      let project_id = resolve_project_id(&key.project_id, project_id.as_deref()).map_err(|e| e.0)?;

      let capability_request = gateway_policy::CapabilityRequest {
        tools: allow_tools.clone(),
        agents: allow_agents.clone(),
        skills: allow_skills.clone(),
        requested_timeout_secs: timeout,
        requested_max_cost_usd: max_cost,
      };
      let profile = state.ledger.permission_profile(&key.id).await?;
      let admission = state.policy.validate_and_gate(key, &profile, &capability_request).await?;

      for agent in &allow_agents
      {
        send_event(socket, &StreamEvent::AgentSpawn { name: agent }).await;
      }
      for skill in &allow_skills
      {
        send_event(socket, &StreamEvent::SkillInvoke { name: skill }).await;
      }

      let project = state.ledger.get_project(&project_id).await?;
      let committed = state.ledger.committed_tokens(&project_id).await?;
      let remaining = remaining_budget_tokens(project.budget_tokens, committed);
      let decision = gateway_router::route(&description, estimate_tokens(&description), remaining, state.router_thresholds);

      let agentic_request = AgenticRequest {
        description,
        allow_tools,
        allow_agents,
        allow_skills,
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
          return Err(err);
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

      for event in &outcome.execution_log
      {
        if let Some(name) = event.get("name").and_then(serde_json::Value::as_str)
        {
          send_event(socket, &StreamEvent::ToolCall { name }).await;
        }
      }
      for chunk in tokenize(&outcome.result)
      {
        send_event(socket, &StreamEvent::Token { text: chunk }).await;
        tokio::time::sleep(Duration::from_millis(15)).await;
      }
      send_event(socket, &StreamEvent::Result { content: &outcome.result, cost: outcome.usage.cost_usd, total_tokens: outcome.usage.total_tokens() }).await;
      Ok(())
    }
  }
}

async fn send_event(socket: &mut WebSocket, event: &StreamEvent<'_>)
{
  if let Ok(json) = serde_json::to_string(event)
  {
    let _ = socket.send(Message::Text(json)).await;
  }
}

/// Splits text into whitespace-bounded chunks of roughly four words, the
/// same granularity a real token stream would read at.
fn tokenize(text: &str) -> Vec<&str>
{
  let mut chunks = Vec::new();
  let mut start = 0;
  let words: Vec<(usize, &str)> = text.match_indices(char::is_whitespace).collect();
  let mut word_count = 0;
  for (idx, _) in words
  {
    word_count += 1;
    if word_count % 4 == 0
    {
      chunks.push(&text[start..idx]);
      start = idx;
    }
  }
  if start < text.len()
  {
    chunks.push(&text[start..]);
  }
  if chunks.is_empty() && !text.is_empty()
  {
    chunks.push(text);
  }
  chunks
}
