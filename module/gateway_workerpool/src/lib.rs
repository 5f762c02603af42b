//! Bounded CLI-subprocess pool with deadline enforcement.
//!
//! Concurrency is a `tokio::sync::Semaphore`, which grants permits in the
//! order they were requested — this is what gives the FIFO-no-priorities
//! ordering guarantee for free, without a separate queue data structure.
//! Completion signalling is a per-task `Notify`, never polling: `wait`
//! resolves within the same tick the owning task finishes. Each launch
//! slot owns a real child process, with a process-group kill path for the
//! deadline timer and piped stdout/stderr capture.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::{oneshot, Notify, RwLock, Semaphore};
use tokio::time::Instant;

use gateway_cost::{PricingManager, Tracker};
use gateway_types::{Error, Result, TaskId, Tier, Usage};

/// Grace period between `SIGTERM` and `SIGKILL` when a deadline fires.
const KILL_GRACE: Duration = Duration::from_secs(5);
/// How much of stderr to keep in a `TaskFailed` message.
const STDERR_EXCERPT_BYTES: usize = 4000;

/// Configuration fixed at pool construction.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig
{
  pub max_concurrent: usize,
  pub cli_bin: PathBuf,
  /// Environment variables removed from the child's environment. Always
  /// includes the variable that would make the CLI refuse to nest inside
  /// another instance of itself.
  pub cli_strip_env: Vec<String>,
  pub capability_config: Option<PathBuf>,
  pub default_deadline: Duration,
}

/// Result of a successful completion: the model's answer plus the usage
/// block `gateway_ledger::Ledger::debit` needs.
#[derive(Debug, Clone)]
pub struct CompletionOutput
{
  pub content: String,
  pub usage: Usage,
  /// The CLI output's `execution_log` field, verbatim, for agentic tasks
  /// that emit a tool/agent/skill event transcript. `None` for plain
  /// completions. `gateway_workerpool` doesn't interpret this value; only
  /// `gateway_executor` does.
  pub execution_log: Option<serde_json::Value>,
}

/// Lifecycle state of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState
{
  Queued,
  Running,
  Completed,
  Failed,
  TimedOut,
  Cancelled,
}

impl TaskState
{
  #[must_use]
  pub fn is_terminal(self) -> bool
  {
    !matches!(self, TaskState::Queued | TaskState::Running)
  }
}

/// Snapshot for `/health`.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStats
{
  pub queued: usize,
  pub running: usize,
  pub completed: usize,
  pub max_concurrent: usize,
}

struct TaskEntry
{
  state: RwLock<TaskState>,
  outcome: RwLock<Option<std::result::Result<CompletionOutput, Error>>>,
  notify: Notify,
  pid: AtomicU32,
  cancel: RwLock<Option<oneshot::Sender<()>>>,
}

impl TaskEntry
{
  fn new(cancel_tx: oneshot::Sender<()>) -> Arc<Self>
  {
    Arc::new(Self {
      state: RwLock::new(TaskState::Queued),
      outcome: RwLock::new(None),
      notify: Notify::new(),
      pid: AtomicU32::new(0),
      cancel: RwLock::new(Some(cancel_tx)),
    })
  }

  async fn finish(&self, state: TaskState, result: std::result::Result<CompletionOutput, Error>)
  {
    *self.outcome.write().await = Some(result);
    *self.state.write().await = state;
    self.cancel.write().await.take();
    self.notify.notify_waiters();
  }
}

/// Runs CLI subprocesses under a global concurrency cap.
pub struct WorkerPool
{
  config: WorkerPoolConfig,
  semaphore: Arc<Semaphore>,
  pricing: Arc<PricingManager>,
  tasks: RwLock<HashMap<TaskId, Arc<TaskEntry>>>,
  shutting_down: AtomicBool,
  handles: StdMutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl WorkerPool
{
  #[must_use]
  pub fn new(config: WorkerPoolConfig, pricing: PricingManager) -> Self
  {
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    Self {
      config,
      semaphore,
      pricing: Arc::new(pricing),
      tasks: RwLock::new(HashMap::new()),
      shutting_down: AtomicBool::new(false),
      handles: StdMutex::new(Vec::new()),
    }
  }

  /// Enqueue a task. Never blocks: admission against `max_concurrent`
  /// happens inside the spawned task, not here. `cwd`, when set, becomes
  /// the child's working directory — agentic tasks set this to their
  /// workspace directory so tool-written files land there; plain
  /// completions leave it unset.
  ///
  /// Once `shutdown` has been called, submissions are finalized
  /// immediately as `TaskFailed` without ever acquiring a slot.
  pub async fn submit(&self, prompt: String, model_tier: Tier, deadline: Option<Duration>, cwd: Option<PathBuf>) -> TaskId
  {
    let task_id = TaskId::generate();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let entry = TaskEntry::new(cancel_tx);

    self.tasks.write().await.insert(task_id.clone(), entry.clone());

    if self.shutting_down.load(Ordering::SeqCst)
    {
      entry.finish(TaskState::Failed, Err(Error::TaskFailed("pool is shutting down".into()))).await;
      return task_id;
    }

    let config = self.config.clone();
    let pricing = self.pricing.clone();
    let semaphore = self.semaphore.clone();
    let deadline = deadline.unwrap_or(config.default_deadline);

    let handle = tokio::spawn(run_task(entry, config, pricing, semaphore, prompt, model_tier, deadline, cwd, cancel_rx));
    self.handles.lock().expect("handles mutex poisoned").push(handle);

    task_id
  }

  /// Stop accepting submissions, give `running` tasks up to `timeout` to
  /// finish on their own, cancel whatever remains, and join every
  /// internally spawned task before returning. After this returns, no
  /// child process started by the pool remains in the process tree.
  pub async fn shutdown(&self, timeout: Duration)
  {
    self.shutting_down.store(true, Ordering::SeqCst);

    let deadline = Instant::now() + timeout;
    loop
    {
      let stats = self.stats().await;
      if stats.running == 0 && stats.queued == 0
      {
        break;
      }
      if Instant::now() >= deadline
      {
        break;
      }
      tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let remaining: Vec<TaskId> = {
      let tasks = self.tasks.read().await;
      let mut ids = Vec::new();
      for (id, entry) in tasks.iter()
      {
        if !entry.state.read().await.is_terminal()
        {
          ids.push(id.clone());
        }
      }
      ids
    };

    for id in &remaining
    {
      self.cancel(id).await;
    }
    for id in &remaining
    {
      let _ = tokio::time::timeout(KILL_GRACE + Duration::from_secs(1), self.wait(id, std::future::pending())).await;
    }

    let handles: Vec<_> = std::mem::take(&mut *self.handles.lock().expect("handles mutex poisoned"));
    for handle in handles
    {
      let _ = handle.await;
    }
  }

  /// Block until `task_id` reaches a terminal state, or `ctx` (a future
  /// that resolves when the caller's context is cancelled) fires first.
  ///
  /// # Errors
  /// Returns the task's stored error on failure/timeout/cancellation, or
  /// `Error::BadRequest` if `task_id` is unknown.
  pub async fn wait(&self, task_id: &TaskId, ctx: impl std::future::Future<Output = ()>) -> Result<CompletionOutput>
  {
    let entry = self
      .tasks
      .read()
      .await
      .get(task_id)
      .cloned()
      .ok_or_else(|| Error::BadRequest { field: "task_id".into(), reason: "unknown task".into() })?;

    tokio::pin!(ctx);
    loop
    {
      if entry.state.read().await.is_terminal()
      {
        break;
      }
      let notified = entry.notify.notified();
      tokio::select! {
        () = notified => {}
        () = &mut ctx => return Err(Error::TaskFailed("caller context cancelled".into())),
      }
    }

    match entry.outcome.write().await.take()
    {
      Some(Ok(output)) => Ok(output),
      Some(Err(e)) => Err(e),
      None => Err(Error::TaskFailed("task finished with no recorded outcome".into())),
    }
  }

  /// Best-effort, idempotent cancellation. No-op if `task_id` is unknown
  /// or already terminal.
  pub async fn cancel(&self, task_id: &TaskId)
  {
    let Some(entry) = self.tasks.read().await.get(task_id).cloned()
    else
    {
      return;
    };
    if let Some(tx) = entry.cancel.write().await.take()
    {
      let _ = tx.send(());
    }
  }

  /// Current counts for `/health`.
  pub async fn stats(&self) -> PoolStats
  {
    let tasks = self.tasks.read().await;
    let mut stats = PoolStats { queued: 0, running: 0, completed: 0, max_concurrent: self.config.max_concurrent };
    for entry in tasks.values()
    {
      match *entry.state.read().await
      {
        TaskState::Queued => stats.queued += 1,
        TaskState::Running => stats.running += 1,
        _ => stats.completed += 1,
      }
    }
    stats
  }

  /// Current state of one task, for `/v1/task` polling.
  pub async fn task_state(&self, task_id: &TaskId) -> Option<TaskState>
  {
    let entry = self.tasks.read().await.get(task_id).cloned()?;
    Some(*entry.state.read().await)
  }
}

enum RunOutcome
{
  Cancelled,
  TimedOut,
  Exited(std::io::Result<std::process::ExitStatus>),
}

#[allow(clippy::too_many_arguments)]
async fn run_task(
  entry: Arc<TaskEntry>,
  config: WorkerPoolConfig,
  pricing: Arc<PricingManager>,
  semaphore: Arc<Semaphore>,
  prompt: String,
  model_tier: Tier,
  deadline: Duration,
  cwd: Option<PathBuf>,
  mut cancel_rx: oneshot::Receiver<()>,
)
{
  let permit = tokio::select! {
    biased;
    _ = &mut cancel_rx =>
    {
      entry.finish(TaskState::Cancelled, Err(Error::TaskFailed("cancelled before start".into()))).await;
      return;
    }
    permit = semaphore.acquire_owned() => permit.expect("semaphore is never closed"),
  };

  *entry.state.write().await = TaskState::Running;

  let prompt_file = match tempfile::NamedTempFile::new()
  {
    Ok(f) => f,
    Err(e) =>
    {
      entry.finish(TaskState::Failed, Err(Error::TaskFailed(format!("spawn error: writing prompt file: {e}")))).await;
      drop(permit);
      return;
    }
  };
  if let Err(e) = std::fs::write(prompt_file.path(), &prompt)
  {
    entry.finish(TaskState::Failed, Err(Error::TaskFailed(format!("spawn error: writing prompt file: {e}")))).await;
    drop(permit);
    return;
  }

  let mut cmd = build_command(&config, prompt_file.path(), model_tier, cwd.as_deref());
  let mut child = match cmd.spawn()
  {
    Ok(c) => c,
    Err(e) =>
    {
      entry.finish(TaskState::Failed, Err(Error::TaskFailed(format!("spawn error: {e}")))).await;
      drop(permit);
      return;
    }
  };

  let pid = child.id().unwrap_or(0);
  entry.pid.store(pid, Ordering::SeqCst);

  let mut stdout = child.stdout.take().expect("stdout was piped");
  let mut stderr = child.stderr.take().expect("stderr was piped");
  let stdout_task = tokio::spawn(async move {
    let mut buf = Vec::new();
    let _ = stdout.read_to_end(&mut buf).await;
    buf
  });
  let stderr_task = tokio::spawn(async move {
    let mut buf = Vec::new();
    let _ = stderr.read_to_end(&mut buf).await;
    buf
  });

  let sleep = tokio::time::sleep(deadline);
  tokio::pin!(sleep);

  let outcome = tokio::select! {
    biased;
    _ = &mut cancel_rx =>
    {
      kill_process_group(pid, Signal::Term);
      let _ = child.wait().await;
      RunOutcome::Cancelled
    }
    () = &mut sleep =>
    {
      kill_with_grace(pid, &mut child).await;
      RunOutcome::TimedOut
    }
    status = child.wait() => RunOutcome::Exited(status),
  };

  let stdout_buf = stdout_task.await.unwrap_or_default();
  let stderr_buf = stderr_task.await.unwrap_or_default();
  drop(prompt_file);

  let (state, result) = match outcome
  {
    RunOutcome::Cancelled => (TaskState::Cancelled, Err(Error::TaskFailed("cancelled".into()))),
    RunOutcome::TimedOut => (TaskState::TimedOut, Err(Error::TaskTimedOut)),
    RunOutcome::Exited(Ok(status)) if status.success() =>
    {
      let stdout_str = String::from_utf8_lossy(&stdout_buf).into_owned();
      match parse_completion(&pricing, &stdout_str)
      {
        Ok(output) => (TaskState::Completed, Ok(output)),
        Err(e) => (TaskState::Failed, Err(e)),
      }
    }
    RunOutcome::Exited(Ok(status)) =>
    {
      let stderr_str = String::from_utf8_lossy(&stderr_buf);
      let excerpt = tail_bytes(&stderr_str, STDERR_EXCERPT_BYTES);
      (TaskState::Failed, Err(Error::TaskFailed(format!("exit {}: {excerpt}", status.code().unwrap_or(-1)))))
    }
    RunOutcome::Exited(Err(e)) => (TaskState::Failed, Err(Error::TaskFailed(format!("wait error: {e}")))),
  };

  entry.finish(state, result).await;
  drop(permit);
}

fn build_command(config: &WorkerPoolConfig, prompt_path: &std::path::Path, model_tier: Tier, cwd: Option<&std::path::Path>) -> Command
{
  let mut cmd = Command::new(&config.cli_bin);
  cmd
    .arg("-p")
    .arg(prompt_path)
    .arg("--model")
    .arg(model_tier.as_str())
    .arg("--output-format")
    .arg("json")
    .stdin(Stdio::null())
    .stdout(Stdio::piped())
    .stderr(Stdio::piped())
    .kill_on_drop(true);

  if let Some(capability_config) = &config.capability_config
  {
    cmd.arg("--config").arg(capability_config);
  }
  for var in &config.cli_strip_env
  {
    cmd.env_remove(var);
  }
  if let Some(cwd) = cwd
  {
    cmd.current_dir(cwd);
  }

  #[cfg(unix)]
  {
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);
  }

  cmd
}

/// Raw shape expected from the CLI's JSON output, just the field Tracker
/// doesn't already parse.
#[derive(serde::Deserialize)]
struct RawContent
{
  #[serde(default)]
  content: Option<String>,
  #[serde(default)]
  execution_log: Option<serde_json::Value>,
}

fn parse_completion(pricing: &PricingManager, raw: &str) -> Result<CompletionOutput>
{
  let tracker = Tracker::new(pricing);
  let usage = tracker.parse(raw)?;
  let parsed = serde_json::from_str::<RawContent>(raw).ok();
  let content = parsed.as_ref().and_then(|r| r.content.clone()).unwrap_or_else(|| raw.to_string());
  let execution_log = parsed.and_then(|r| r.execution_log);
  Ok(CompletionOutput { content, usage, execution_log })
}

fn tail_bytes(s: &str, max_bytes: usize) -> String
{
  if s.len() <= max_bytes
  {
    return s.to_string();
  }
  let start = s.len() - max_bytes;
  let boundary = (start..s.len()).find(|&i| s.is_char_boundary(i)).unwrap_or(start);
  s[boundary..].to_string()
}

#[derive(Clone, Copy)]
enum Signal
{
  Term,
  Kill,
}

fn kill_process_group(pid: u32, signal: Signal)
{
  if pid == 0
  {
    return;
  }
  use nix::sys::signal::{kill, Signal as NixSignal};
  use nix::unistd::Pid;

  let sig = match signal
  {
    Signal::Term => NixSignal::SIGTERM,
    Signal::Kill => NixSignal::SIGKILL,
  };
  // `process_group(0)` at spawn time made the child its own group leader, so
  // its pid doubles as the process group id; negating it targets the group.
  let pgid = Pid::from_raw(-i32::try_from(pid).unwrap_or(i32::MAX));
  let _ = kill(pgid, sig);
}

async fn kill_with_grace(pid: u32, child: &mut tokio::process::Child)
{
  kill_process_group(pid, Signal::Term);
  let grace = tokio::time::sleep(KILL_GRACE);
  tokio::pin!(grace);
  tokio::select! {
    _ = child.wait() => {}
    () = &mut grace =>
    {
      kill_process_group(pid, Signal::Kill);
      let _ = child.wait().await;
    }
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  fn test_config(cli_bin: PathBuf) -> WorkerPoolConfig
  {
    WorkerPoolConfig {
      max_concurrent: 2,
      cli_bin,
      cli_strip_env: vec!["ANTHROPIC_API_KEY".into()],
      capability_config: None,
      default_deadline: Duration::from_secs(5),
    }
  }

  fn echo_script(dir: &std::path::Path, body: &str) -> PathBuf
  {
    let path = dir.join("fake_cli.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
  }

  #[tokio::test]
  async fn successful_completion_reports_parsed_usage()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(
      &tmp.path().to_path_buf(),
      r#"echo '{"content":"hi there","model":"claude-3-5-haiku","usage":{"input_tokens":10,"output_tokens":5}}'"#,
    );
    let pool = WorkerPool::new(test_config(script), PricingManager::new());

    let task_id = pool.submit("hello".into(), Tier::Small, None, None).await;
    let output = pool.wait(&task_id, std::future::pending()).await.expect("completes");
    assert_eq!(output.content, "hi there");
    assert_eq!(output.usage.input_tokens, 10);
  }

  #[tokio::test]
  async fn nonzero_exit_is_task_failed_with_stderr()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(&tmp.path().to_path_buf(), "echo 'boom' >&2\nexit 3");
    let pool = WorkerPool::new(test_config(script), PricingManager::new());

    let task_id = pool.submit("hello".into(), Tier::Small, None, None).await;
    let err = pool.wait(&task_id, std::future::pending()).await.unwrap_err();
    assert!(matches!(err, Error::TaskFailed(msg) if msg.contains("boom") && msg.contains("exit 3")));
  }

  #[tokio::test]
  async fn deadline_firing_times_out_a_slow_child()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(&tmp.path().to_path_buf(), "sleep 5");
    let mut config = test_config(script);
    config.default_deadline = Duration::from_millis(100);
    let pool = WorkerPool::new(config, PricingManager::new());

    let task_id = pool.submit("hello".into(), Tier::Small, None, None).await;
    let err = pool.wait(&task_id, std::future::pending()).await.unwrap_err();
    assert!(matches!(err, Error::TaskTimedOut));
  }

  #[tokio::test]
  async fn cancel_before_start_never_spawns_a_child()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(&tmp.path().to_path_buf(), "touch ./should-not-exist; sleep 2");
    let mut config = test_config(script);
    config.max_concurrent = 1;
    let pool = WorkerPool::new(config, PricingManager::new());

    let blocker = pool.submit("block".into(), Tier::Small, None, None).await;
    let queued = pool.submit("queued".into(), Tier::Small, None, None).await;
    pool.cancel(&queued).await;

    let err = pool.wait(&queued, std::future::pending()).await.unwrap_err();
    assert!(matches!(err, Error::TaskFailed(_)));
    pool.cancel(&blocker).await;
  }

  #[tokio::test]
  async fn stats_reports_max_concurrent()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(&tmp.path().to_path_buf(), "exit 0");
    let pool = WorkerPool::new(test_config(script), PricingManager::new());
    let stats = pool.stats().await;
    assert_eq!(stats.max_concurrent, 2);
  }

  #[tokio::test]
  async fn unknown_task_id_is_bad_request()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(&tmp.path().to_path_buf(), "exit 0");
    let pool = WorkerPool::new(test_config(script), PricingManager::new());
    let err = pool.wait(&TaskId::generate(), std::future::pending()).await.unwrap_err();
    assert!(matches!(err, Error::BadRequest { .. }));
  }

  #[tokio::test]
  async fn shutdown_drains_running_task_within_timeout()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(&tmp.path().to_path_buf(), "sleep 0.05");
    let pool = WorkerPool::new(test_config(script), PricingManager::new());

    let task_id = pool.submit("hello".into(), Tier::Small, None, None).await;
    pool.shutdown(Duration::from_secs(2)).await;

    let state = pool.task_state(&task_id).await.expect("known task");
    assert!(state.is_terminal());
  }

  #[tokio::test]
  async fn shutdown_cancels_tasks_that_outlive_the_timeout()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(&tmp.path().to_path_buf(), "sleep 5");
    let pool = WorkerPool::new(test_config(script), PricingManager::new());

    let task_id = pool.submit("hello".into(), Tier::Small, None, None).await;
    pool.shutdown(Duration::from_millis(50)).await;

    let state = pool.task_state(&task_id).await.expect("known task");
    assert_eq!(state, TaskState::Cancelled);
  }

  #[tokio::test]
  async fn submit_after_shutdown_fails_immediately_without_spawning()
  {
    let tmp = tempfile::tempdir().unwrap();
    let script = echo_script(&tmp.path().to_path_buf(), "touch ./should-not-exist");
    let pool = WorkerPool::new(test_config(script), PricingManager::new());

    pool.shutdown(Duration::from_secs(1)).await;
    let task_id = pool.submit("late".into(), Tier::Small, None, None).await;
    let err = pool.wait(&task_id, std::future::pending()).await.unwrap_err();
    assert!(matches!(err, Error::TaskFailed(msg) if msg.contains("shutting down")));
  }
}
