//! Non-subprocess completion path: a persistent `reqwest::Client` kept for
//! connection reuse.
//!
//! Unlike the CLI path this never shells out and cannot invoke tools,
//! agents, or skills — only plain completions take this path, and never
//! as a fallback after the CLI path fails; callers choose one path per
//! request and do not retry on the other.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use gateway_cost::{PricingManager, Tracker};
use gateway_types::{Error, Result, Usage};

/// One turn of a chat-style completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage
{
  pub role: String,
  pub content: String,
}

/// Result of a successful direct completion: same shape the CLI path's
/// `CompletionOutput` produces, so `RequestFlow` can debit either one the
/// same way.
#[derive(Debug, Clone)]
pub struct CompletionOutput
{
  pub content: String,
  pub usage: Usage,
}

/// Fixed at client construction.
#[derive(Debug, Clone)]
pub struct DirectConfig
{
  pub endpoint: String,
  pub api_key: String,
  pub timeout: Duration,
}

/// Persistent HTTP client for the non-agentic completion path.
#[derive(Clone)]
pub struct DirectClient
{
  http: reqwest::Client,
  endpoint: String,
  api_key: String,
  pricing: Arc<PricingManager>,
}

impl DirectClient
{
  /// # Errors
  /// `Error::StorageUnavailable` if the underlying `reqwest::Client`
  /// cannot be built (TLS backend init failure); this never happens in
  /// practice but `reqwest::Client::builder().build()` is fallible.
  pub fn new(config: DirectConfig, pricing: Arc<PricingManager>) -> Result<Self>
  {
    let http = reqwest::Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| Error::StorageUnavailable(format!("building http client: {e}")))?;

    Ok(Self { http, endpoint: config.endpoint, api_key: config.api_key, pricing })
  }

  /// `complete(model, system, messages, maxTokens, temperature) -> {content, usage}`.
  ///
  /// # Errors
  /// `Error::UpstreamUnavailable` on a transport failure or a 5xx
  /// response, `Error::UpstreamRejected` on any other non-2xx status,
  /// `Error::UpstreamRateLimited` on a 429, `Error::UnknownModel` if the
  /// upstream's response names a model this gateway has no pricing for.
  pub async fn complete(
    &self,
    model: &str,
    system: Option<&str>,
    messages: &[ChatMessage],
    max_tokens: i64,
    temperature: Option<f64>,
  ) -> Result<CompletionOutput>
  {
    let body = RequestBody { model, system, messages, max_tokens, temperature };

    let response = self
      .http
      .post(format!("{}/v1/messages", self.endpoint))
      .header("x-api-key", &self.api_key)
      .header("anthropic-version", "2023-06-01")
      .json(&body)
      .send()
      .await
      .map_err(|e| Error::UpstreamUnavailable(e.to_string()))?;

    let status = response.status();
    let raw = response.text().await.map_err(|e| Error::UpstreamUnavailable(format!("reading response body: {e}")))?;

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS
    {
      return Err(Error::UpstreamRateLimited);
    }
    if status.is_server_error()
    {
      return Err(Error::UpstreamUnavailable(format!("{status}: {raw}")));
    }
    if !status.is_success()
    {
      return Err(Error::UpstreamRejected { status: status.as_u16(), body: raw });
    }

    let tracker = Tracker::new(&self.pricing);
    let usage = tracker.parse(&raw)?;
    let content = extract_text(&raw);

    Ok(CompletionOutput { content, usage })
  }
}

#[derive(Serialize)]
struct RequestBody<'a>
{
  model: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  system: Option<&'a str>,
  messages: &'a [ChatMessage],
  max_tokens: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  temperature: Option<f64>,
}

#[derive(Deserialize)]
struct RawResponse
{
  #[serde(default)]
  content: Vec<RawBlock>,
}

#[derive(Deserialize)]
struct RawBlock
{
  #[serde(rename = "type")]
  kind: String,
  #[serde(default)]
  text: Option<String>,
}

/// Concatenate every `text` content block. Non-text blocks (tool-use,
/// images) never occur on this path since DirectPath requests carry no
/// tool definitions.
fn extract_text(raw: &str) -> String
{
  let Ok(parsed) = serde_json::from_str::<RawResponse>(raw)
  else
  {
    return String::new();
  };
  parsed
    .content
    .into_iter()
    .filter(|b| b.kind == "text")
    .filter_map(|b| b.text)
    .collect::<Vec<_>>()
    .join("")
}

#[cfg(test)]
mod tests
{
  use super::*;
  use wiremock::matchers::{header, method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn client_for(endpoint: String) -> DirectClient
  {
    let config = DirectConfig { endpoint, api_key: "test-key".into(), timeout: Duration::from_secs(5) };
    DirectClient::new(config, Arc::new(PricingManager::new())).expect("build client")
  }

  #[tokio::test]
  async fn successful_completion_concatenates_text_blocks_and_prices_usage()
  {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v1/messages"))
      .and(header("x-api-key", "test-key"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "model": "claude-3-5-haiku-20241022",
        "content": [{"type": "text", "text": "hello "}, {"type": "text", "text": "world"}],
        "usage": {"input_tokens": 10, "output_tokens": 5},
      })))
      .mount(&server)
      .await;

    let client = client_for(server.uri());
    let messages = vec![ChatMessage { role: "user".into(), content: "hi".into() }];
    let output = client.complete("claude-3-5-haiku-20241022", None, &messages, 100, None).await.expect("completes");

    assert_eq!(output.content, "hello world");
    assert_eq!(output.usage.input_tokens, 10);
  }

  #[tokio::test]
  async fn http_429_maps_to_upstream_rate_limited()
  {
    let server = MockServer::start().await;
    Mock::given(method("POST")).and(path("/v1/messages")).respond_with(ResponseTemplate::new(429)).mount(&server).await;

    let client = client_for(server.uri());
    let err = client.complete("claude-3-5-haiku", None, &[], 10, None).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamRateLimited));
  }

  #[tokio::test]
  async fn http_400_maps_to_upstream_rejected_with_body()
  {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v1/messages"))
      .respond_with(ResponseTemplate::new(400).set_body_string("invalid request"))
      .mount(&server)
      .await;

    let client = client_for(server.uri());
    let err = client.complete("claude-3-5-haiku", None, &[], 10, None).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamRejected { status: 400, ref body } if body.contains("invalid request")));
  }

  #[tokio::test]
  async fn http_500_maps_to_upstream_unavailable()
  {
    let server = MockServer::start().await;
    Mock::given(method("POST")).and(path("/v1/messages")).respond_with(ResponseTemplate::new(500)).mount(&server).await;

    let client = client_for(server.uri());
    let err = client.complete("claude-3-5-haiku", None, &[], 10, None).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamUnavailable(_)));
  }

  #[tokio::test]
  async fn connection_failure_maps_to_upstream_unavailable()
  {
    let client = client_for("http://127.0.0.1:1".into());
    let err = client.complete("claude-3-5-haiku", None, &[], 10, None).await.unwrap_err();
    assert!(matches!(err, Error::UpstreamUnavailable(_)));
  }

  #[tokio::test]
  async fn unknown_model_in_response_is_rejected()
  {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/v1/messages"))
      .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "model": "gpt-4-turbo",
        "content": [{"type": "text", "text": "hi"}],
        "usage": {"input_tokens": 1, "output_tokens": 1},
      })))
      .mount(&server)
      .await;

    let client = client_for(server.uri());
    let err = client.complete("gpt-4-turbo", None, &[], 10, None).await.unwrap_err();
    assert!(matches!(err, Error::UnknownModel(_)));
  }
}
