//! Agentic task execution: a workspace directory per task, an enriched
//! prompt built from `gateway_registry`, submission to `gateway_workerpool`,
//! and post-run artifact/execution-log collection.
//!
//! Unlike the plain completion paths, this component always drives the
//! CLI path — only the CLI can invoke tools, agents, and skills — and it
//! never memoizes: repeated calls with identical inputs are independent
//! runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rust_decimal::Decimal;
use serde::Serialize;

use gateway_registry::Registry;
use gateway_types::{Error, Result, TaskId, Tier, Usage};
use gateway_workerpool::WorkerPool;

/// Everything the executor needs, already validated by `gateway_policy`.
#[derive(Debug, Clone)]
pub struct AgenticRequest
{
  pub description: String,
  pub allow_tools: Vec<String>,
  pub allow_agents: Vec<String>,
  pub allow_skills: Vec<String>,
  pub deadline: Duration,
  pub max_cost_usd: Decimal,
}

/// One file the task created or modified, by path relative to its
/// workspace root.
#[derive(Debug, Clone, Serialize)]
pub struct Artifact
{
  pub path: String,
  pub size: u64,
}

/// The full result of one agentic run, matching the `POST /v1/task`
/// response shape.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome
{
  pub status: String,
  pub result: String,
  pub execution_log: Vec<serde_json::Value>,
  pub artifacts: Vec<Artifact>,
  pub usage: Usage,
  pub over_budget: bool,
}

/// Runs multi-step agentic tasks against a bounded CLI pool, in a
/// per-task scratch directory under `workspace_root`.
pub struct AgenticExecutor
{
  workerpool: Arc<WorkerPool>,
  registry: Arc<Registry>,
  workspace_root: PathBuf,
}

impl AgenticExecutor
{
  #[must_use]
  pub fn new(workerpool: Arc<WorkerPool>, registry: Arc<Registry>, workspace_root: impl Into<PathBuf>) -> Self
  {
    Self { workerpool, registry, workspace_root: workspace_root.into() }
  }

  /// Run one agentic task end to end: build the workspace, enrich the
  /// prompt, submit to the pool, wait for a terminal state, then collect
  /// artifacts and the execution log.
  ///
  /// # Errors
  /// `Error::PermissionDenied` if an agent/skill name doesn't exist in
  /// the registry (capability allow-listing itself is `gateway_policy`'s
  /// job; this is a defense-in-depth existence check), or whatever error
  /// `WorkerPool::wait` produced (`TaskTimedOut`, `TaskFailed`, ...).
  /// Partial artifacts and execution-log entries collected before a
  /// failure are logged, not returned, keeping one classified error per
  /// call site.
  pub async fn execute(&self, tier: Tier, request: &AgenticRequest) -> Result<ExecutionOutcome>
  {
    let workspace_id = TaskId::generate();
    let workspace = self.workspace_root.join(workspace_id.as_str());
    std::fs::create_dir_all(&workspace)
      .map_err(|e| Error::TaskFailed(format!("creating workspace directory: {e}")))?;

    let enriched = self
      .registry
      .enrich_prompt(&request.description, &request.allow_agents, &request.allow_skills)
      .await?;
    let prompt = with_tool_preamble(&enriched, &request.allow_tools);

    let started_at = SystemTime::now();
    let pool_task_id = self.workerpool.submit(prompt, tier, Some(request.deadline), Some(workspace.clone())).await;

    let outcome = self.workerpool.wait(&pool_task_id, std::future::pending()).await;

    let output = match outcome
    {
      Ok(output) => output,
      Err(err) =>
      {
        let partial = scan_artifacts(&workspace, started_at).unwrap_or_default();
        tracing::warn!(task_id = %pool_task_id, artifacts = partial.len(), %err, "agentic task failed; discarding partial artifacts");
        return Err(err);
      }
    };

    let artifacts = scan_artifacts(&workspace, started_at).unwrap_or_else(|e| {
      tracing::warn!(task_id = %pool_task_id, error = %e, "artifact scan failed");
      Vec::new()
    });

    let (execution_log, log_parse_failed) = match output.execution_log
    {
      Some(serde_json::Value::Array(events)) => (events, false),
      Some(_) =>
      {
        tracing::warn!(task_id = %pool_task_id, "execution_log field was not a JSON array");
        (Vec::new(), true)
      }
      None => (Vec::new(), false),
    };

    let over_budget = output.usage.cost_usd > request.max_cost_usd;
    let status = if log_parse_failed { "completed_with_parse_errors" } else { "completed" };

    Ok(ExecutionOutcome {
      status: status.to_string(),
      result: output.content,
      execution_log,
      artifacts,
      usage: output.usage,
      over_budget,
    })
  }
}

/// Prepend an allowed-tools preamble ahead of the registry's own
/// agent/skill enrichment. Additive only.
fn with_tool_preamble(prompt: &str, allow_tools: &[String]) -> String
{
  if allow_tools.is_empty()
  {
    return prompt.to_string();
  }
  format!("Allowed tools: {}\n\n{prompt}", allow_tools.join(", "))
}

/// Recursively find files under `workspace` modified at or after
/// `started_at`, returning paths relative to `workspace`. Any entry whose
/// canonicalized path escapes `workspace` (a symlink pointing outside it)
/// is rejected rather than reported.
fn scan_artifacts(workspace: &Path, started_at: SystemTime) -> std::io::Result<Vec<Artifact>>
{
  let workspace_canonical = workspace.canonicalize()?;
  let mut artifacts = Vec::new();

  for entry in walkdir::WalkDir::new(workspace).into_iter().filter_map(std::result::Result::ok)
  {
    if !entry.file_type().is_file()
    {
      continue;
    }

    let Ok(canonical) = entry.path().canonicalize() else { continue };
    if !canonical.starts_with(&workspace_canonical)
    {
      tracing::warn!(path = %entry.path().display(), "rejecting artifact that escapes its workspace");
      continue;
    }

    let metadata = entry.metadata()?;
    let modified = metadata.modified().unwrap_or(started_at);
    if modified < started_at
    {
      continue;
    }

    let Ok(relative) = entry.path().strip_prefix(workspace) else { continue };
    artifacts.push(Artifact { path: relative.to_string_lossy().into_owned(), size: metadata.len() });
  }

  artifacts.sort_by(|a, b| a.path.cmp(&b.path));
  Ok(artifacts)
}

#[cfg(test)]
mod tests
{
  use super::*;
  use gateway_workerpool::WorkerPoolConfig;
  use rust_decimal_macros::dec;
  use std::os::unix::fs::PermissionsExt;

  fn echo_script(dir: &Path, body: &str) -> PathBuf
  {
    let path = dir.join("fake_cli.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
  }

  fn executor_for(cli_bin: PathBuf, scratch: &Path) -> AgenticExecutor
  {
    let config = WorkerPoolConfig {
      max_concurrent: 2,
      cli_bin,
      cli_strip_env: vec!["ANTHROPIC_CLI_NESTED".into()],
      capability_config: None,
      default_deadline: Duration::from_secs(5),
    };
    let pool = Arc::new(WorkerPool::new(config, gateway_cost::PricingManager::new()));
    let registry = Arc::new(Registry::new(scratch.join("agents"), scratch.join("skills")));
    AgenticExecutor::new(pool, registry, scratch.join("workspaces"))
  }

  fn base_request() -> AgenticRequest
  {
    AgenticRequest {
      description: "do the thing".into(),
      allow_tools: vec!["bash".into()],
      allow_agents: vec![],
      allow_skills: vec![],
      deadline: Duration::from_secs(5),
      max_cost_usd: dec!(10.00),
    }
  }

  #[tokio::test]
  async fn successful_run_collects_artifacts_and_execution_log()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(
      tmp.path(),
      r#"echo 'created' > note.txt
echo '{"content":"done","model":"claude-3-5-haiku","usage":{"input_tokens":10,"output_tokens":5},"execution_log":[{"kind":"tool_call","name":"bash"}]}'"#,
    );
    let executor = executor_for(script, tmp.path());

    let outcome = executor.execute(Tier::Small, &base_request()).await.expect("completes");
    assert_eq!(outcome.status, "completed");
    assert_eq!(outcome.result, "done");
    assert_eq!(outcome.execution_log.len(), 1);
    assert_eq!(outcome.artifacts.len(), 1);
    assert_eq!(outcome.artifacts[0].path, "note.txt");
    assert!(!outcome.over_budget);
  }

  #[tokio::test]
  async fn cost_above_ceiling_is_marked_over_budget_but_still_returned()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(
      tmp.path(),
      r#"echo '{"content":"done","model":"claude-3-opus","usage":{"input_tokens":1000000,"output_tokens":1000000}}'"#,
    );
    let executor = executor_for(script, tmp.path());

    let mut request = base_request();
    request.max_cost_usd = dec!(0.01);
    let outcome = executor.execute(Tier::Large, &request).await.expect("completes");
    assert!(outcome.over_budget);
  }

  #[tokio::test]
  async fn unknown_agent_name_is_rejected_before_submission()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(tmp.path(), "touch ./should-not-run");
    let executor = executor_for(script, tmp.path());

    let mut request = base_request();
    request.allow_agents = vec!["ghost".into()];
    let err = executor.execute(Tier::Small, &request).await.unwrap_err();
    assert!(matches!(err, Error::PermissionDenied(name) if name == "ghost"));
  }

  #[tokio::test]
  async fn task_failure_propagates_classified_error()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(tmp.path(), "echo 'boom' >&2\nexit 1");
    let executor = executor_for(script, tmp.path());

    let err = executor.execute(Tier::Small, &base_request()).await.unwrap_err();
    assert!(matches!(err, Error::TaskFailed(msg) if msg.contains("boom")));
  }
}
