//! Five ordered checks that gate every request: authenticate,
//! rate-limit, validate capabilities, resource-gate, audit. Any failure
//! halts processing before `gateway_ledger::Ledger::admit` is ever called
//! and before a CLI child is spawned.
//!
//! Checks run cheapest-first: string lookup, then a quantitative counter,
//! then a registry lookup, then a policy comparison. Audit always runs
//! last so a denied request still leaves a trail.

use std::sync::Arc;

use rust_decimal::Decimal;

use gateway_ledger::{ApiKeyRecord, Ledger, PermissionProfile};
use gateway_registry::Registry;
use gateway_types::{Error, Result};

/// What a caller is asking permission to do, beyond plain authentication
/// and rate limiting. `None` fields fall back to the key's profile
/// ceiling: a missing request value defaults to the ceiling.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRequest
{
  pub tools: Vec<String>,
  pub agents: Vec<String>,
  pub skills: Vec<String>,
  pub requested_timeout_secs: Option<i64>,
  pub requested_max_cost_usd: Option<Decimal>,
}

/// The outcome of a successful gate: the authenticated key plus the
/// effective (request-or-ceiling) resource limits to pass downstream.
#[derive(Debug, Clone)]
pub struct Admission
{
  pub key: ApiKeyRecord,
  pub profile: PermissionProfile,
  pub effective_timeout_secs: i64,
  pub effective_max_cost_usd: Decimal,
}

/// Ties together the ledger (auth, rate limits, profiles, audit) and the
/// registry (agent/skill existence) behind the five-check sequence.
#[derive(Clone)]
pub struct Policy
{
  ledger: Arc<Ledger>,
  registry: Arc<Registry>,
}

impl Policy
{
  #[must_use]
  pub fn new(ledger: Arc<Ledger>, registry: Arc<Registry>) -> Self
  {
    Self { ledger, registry }
  }

  /// Authenticate, then rate-limit. Used by every request path, including
  /// ones that never touch capabilities (plain completions, `/v1/route`).
  ///
  /// # Errors
  /// `Error::AuthMissing`/`AuthInvalid`/`AuthRevoked` from authentication,
  /// `Error::RateLimited` if the key's one-minute bucket is exhausted.
  pub async fn authenticate_and_rate_limit(&self, presented_key: Option<&str>, now_ms: i64) -> Result<(ApiKeyRecord, PermissionProfile)>
  {
    let presented_key = presented_key.ok_or(Error::AuthMissing)?;
    let key = self.ledger.authenticate(presented_key).await?;
    let profile = self.ledger.permission_profile(&key.id).await?;

    let decision = self.ledger.check_rate_limit(&key.id, now_ms, profile.rate_limit_per_minute).await?;
    if let gateway_ledger::RateLimitDecision::Limited { count_in_window } = decision
    {
      self
        .audit(None, Some(&key.id), None, "rate_limited", Some(&format!("{{\"count\":{count_in_window}}}")), "warning")
        .await?;
      return Err(Error::RateLimited);
    }

    Ok((key, profile))
  }

  /// Rules 3 and 4: capability validation and the resource gate. Only
  /// called for requests that name tools/agents/skills (agentic tasks).
  ///
  /// # Errors
  /// `Error::PermissionDenied`, either naming the first name not on the
  /// profile's allow-list (or, for agents/skills, not in the registry), or
  /// describing a requested timeout/cost that exceeds the profile's
  /// ceiling — the resource gate is a permission check like the others,
  /// not a malformed-request error.
  pub async fn validate_and_gate(&self, key: &ApiKeyRecord, profile: &PermissionProfile, request: &CapabilityRequest) -> Result<Admission>
  {
    if let Err(err) = self.validate_capabilities(key, profile, request).await
    {
      self.record_denial(key, request.describe_denial(&err), &err).await?;
      return Err(err);
    }

    let effective_timeout_secs = match request.requested_timeout_secs
    {
      Some(t) if t > profile.max_wall_seconds =>
      {
        let err = Error::PermissionDenied(format!("timeout {t}s exceeds profile ceiling of {}s", profile.max_wall_seconds));
        self.record_denial(key, "resource_gate", &err).await?;
        return Err(err);
      }
      Some(t) => t,
      None => profile.max_wall_seconds,
    };

    let effective_max_cost_usd = match request.requested_max_cost_usd
    {
      Some(c) if c > profile.max_cost_usd =>
      {
        let err = Error::PermissionDenied(format!("max_cost ${c} exceeds profile ceiling of ${}", profile.max_cost_usd));
        self.record_denial(key, "resource_gate", &err).await?;
        return Err(err);
      }
      Some(c) => c,
      None => profile.max_cost_usd,
    };

    self
      .audit(None, Some(&key.id), None, "capability_grant", None, "info")
      .await?;

    Ok(Admission { key: key.clone(), profile: profile.clone(), effective_timeout_secs, effective_max_cost_usd })
  }

  async fn validate_capabilities(&self, key: &ApiKeyRecord, profile: &PermissionProfile, request: &CapabilityRequest) -> Result<()>
  {
    let allowed_tools = self.ledger.allowed_names(&key.id, "tool").await?;
    for tool in &request.tools
    {
      if !allow_list_permits(&allowed_tools, tool)
      {
        return Err(Error::PermissionDenied(tool.clone()));
      }
    }

    let allowed_agents = self.ledger.allowed_names(&key.id, "agent").await?;
    for agent in &request.agents
    {
      if !allow_list_permits(&allowed_agents, agent)
      {
        return Err(Error::PermissionDenied(agent.clone()));
      }
    }
    let missing_agents = self.registry.validate_agents(&request.agents).await;
    if let Some(name) = missing_agents.first()
    {
      return Err(Error::PermissionDenied(name.clone()));
    }

    let allowed_skills = self.ledger.allowed_names(&key.id, "skill").await?;
    for skill in &request.skills
    {
      if !allow_list_permits(&allowed_skills, skill)
      {
        return Err(Error::PermissionDenied(skill.clone()));
      }
    }
    let missing_skills = self.registry.validate_skills(&request.skills).await;
    if let Some(name) = missing_skills.first()
    {
      return Err(Error::PermissionDenied(name.clone()));
    }

    let _ = profile;
    Ok(())
  }

  async fn record_denial(&self, key: &ApiKeyRecord, kind: &str, err: &Error) -> Result<()>
  {
    let severity = if matches!(err, Error::PermissionDenied(_)) { "warning" } else { "critical" };
    tracing::warn!(api_key_id = %key.id, %kind, %err, "policy denied request");
    let details = serde_json::json!({ "reason": err.to_string() }).to_string();
    self.audit(None, Some(&key.id), Some(&key.project_id), kind, Some(&details), severity).await
  }

  /// Rule 5: append an audit event. Called directly by callers that want
  /// a custom `kind`/`details_json` (e.g. the executor recording
  /// `tool_call`/`task_failed` after a task finishes).
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` if the write fails.
  pub async fn audit(
    &self,
    task_id: Option<&str>,
    api_key_id: Option<&str>,
    project_id: Option<&str>,
    kind: &str,
    details_json: Option<&str>,
    severity: &str,
  ) -> Result<()>
  {
    self.ledger.audit(task_id, api_key_id, project_id, kind, details_json, severity).await
  }
}

impl CapabilityRequest
{
  fn describe_denial(&self, err: &Error) -> &'static str
  {
    match err
    {
      Error::PermissionDenied(name) if self.agents.iter().any(|a| a == name) => "permission_violation",
      Error::PermissionDenied(name) if self.skills.iter().any(|s| s == name) => "permission_violation",
      Error::PermissionDenied(_) => "permission_violation",
      _ => "resource_gate",
    }
  }
}

fn allow_list_permits(allowed: &[String], name: &str) -> bool
{
  allowed.iter().any(|a| a == "*" || a == name)
}

#[cfg(test)]
mod tests
{
  use super::*;
  use rust_decimal_macros::dec;

  async fn setup() -> (Policy, String, ApiKeyRecord)
  {
    let ledger = Arc::new(Ledger::new("sqlite::memory:").await.expect("connect"));
    ledger.create_project("proj_1", "Test", None).await.expect("create project");
    let (plaintext, key) = ledger.create_api_key("proj_1", Some("ci")).await.expect("mint key");

    let tmp = tempfile::tempdir().unwrap();
    let registry = Arc::new(Registry::new(tmp.path().join("agents"), tmp.path().join("skills")));

    (Policy::new(ledger, registry), plaintext, key)
  }

  #[tokio::test]
  async fn authenticate_and_rate_limit_admits_fresh_key()
  {
    let (policy, plaintext, key) = setup().await;
    let (authed, profile) = policy.authenticate_and_rate_limit(Some(&plaintext), 1_000).await.expect("admit");
    assert_eq!(authed.id, key.id);
    assert_eq!(profile.rate_limit_per_minute, 60);
  }

  #[tokio::test]
  async fn missing_bearer_token_is_auth_missing()
  {
    let (policy, _plaintext, _key) = setup().await;
    let err = policy.authenticate_and_rate_limit(None, 0).await.unwrap_err();
    assert!(matches!(err, Error::AuthMissing));
  }

  #[tokio::test]
  async fn unknown_capability_request_is_denied_with_offending_name()
  {
    let (policy, _plaintext, key) = setup().await;
    let profile = policy.ledger.permission_profile(&key.id).await.unwrap();

    let request = CapabilityRequest { tools: vec!["forbidden-tool".into()], ..Default::default() };
    let err = policy.validate_and_gate(&key, &profile, &request).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(name) if name == "forbidden-tool"));
  }

  #[tokio::test]
  async fn wildcard_grant_permits_any_tool_name()
  {
    let (policy, _plaintext, key) = setup().await;
    policy.ledger.grant(&key.id, "tool", "*").await.unwrap();
    let profile = policy.ledger.permission_profile(&key.id).await.unwrap();

    let request = CapabilityRequest { tools: vec!["anything".into()], ..Default::default() };
    let admitted = policy.validate_and_gate(&key, &profile, &request).await.unwrap();
    assert_eq!(admitted.key.id, key.id);
  }

  #[tokio::test]
  async fn requested_timeout_above_ceiling_is_rejected()
  {
    let (policy, _plaintext, key) = setup().await;
    let profile = policy.ledger.permission_profile(&key.id).await.unwrap();

    let request = CapabilityRequest { requested_timeout_secs: Some(profile.max_wall_seconds + 1), ..Default::default() };
    let err = policy.validate_and_gate(&key, &profile, &request).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(reason) if reason.contains("timeout")));
  }

  #[tokio::test]
  async fn missing_resource_values_default_to_profile_ceiling()
  {
    let (policy, _plaintext, key) = setup().await;
    let profile = policy.ledger.permission_profile(&key.id).await.unwrap();

    let request = CapabilityRequest::default();
    let admitted = policy.validate_and_gate(&key, &profile, &request).await.unwrap();
    assert_eq!(admitted.effective_timeout_secs, profile.max_wall_seconds);
    assert_eq!(admitted.effective_max_cost_usd, profile.max_cost_usd);
  }

  #[tokio::test]
  async fn requested_cost_above_ceiling_is_rejected()
  {
    let (policy, _plaintext, key) = setup().await;
    let profile = policy.ledger.permission_profile(&key.id).await.unwrap();

    let request = CapabilityRequest { requested_max_cost_usd: Some(profile.max_cost_usd + dec!(1)), ..Default::default() };
    let err = policy.validate_and_gate(&key, &profile, &request).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(reason) if reason.contains("max_cost")));
  }
}
