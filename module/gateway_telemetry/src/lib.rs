//! Centralized logging/tracing init for the gateway.
//!
//! - Structured logging via `tracing`
//! - Log level configured from `GATEWAY_LOG_LEVEL` at startup
//! - Helpers for the handful of structured events other components want to
//!   emit consistently (task lifecycle, policy decisions)

#![cfg_attr(not(feature = "enabled"), allow(unused_variables, dead_code))]

#[cfg(feature = "enabled")]
mod implementation
{
  use tracing::level_filters::LevelFilter;

  /// Log level configuration.
  #[derive(Debug, Clone, Copy)]
  pub enum LogLevel
  {
    Debug,
    Info,
    Warn,
    Error,
  }

  impl std::str::FromStr for LogLevel
  {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
      match s.to_ascii_lowercase().as_str()
      {
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(format!("unknown log level: {other}")),
      }
    }
  }

  impl From<LogLevel> for LevelFilter
  {
    fn from(level: LogLevel) -> Self
    {
      match level
      {
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Error => LevelFilter::ERROR,
      }
    }
  }

  /// Initialize the global tracing subscriber. Call once at process startup.
  pub fn init_logging(level: LogLevel) -> Result<(), Box<dyn std::error::Error>>
  {
    use tracing_subscriber::FmtSubscriber;

    let subscriber = FmtSubscriber::builder()
      .with_max_level(level)
      .with_target(false)
      .with_thread_ids(true)
      .with_line_number(true)
      .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    Ok(())
  }

  /// Log a WorkerPool task lifecycle transition.
  pub fn log_task_event(task_id: &str, project_id: &str, state: &str)
  {
    tracing::info!(task_id = %task_id, project_id = %project_id, state = %state, "task event");
  }

  /// Log a policy decision (allow or deny) outside of the durable audit
  /// trail, for operator-facing tailing.
  pub fn log_policy_decision(api_key_prefix: &str, kind: &str, allowed: bool)
  {
    if allowed
    {
      tracing::info!(api_key = %api_key_prefix, kind = %kind, "policy allow");
    }
    else
    {
      tracing::warn!(api_key = %api_key_prefix, kind = %kind, "policy deny");
    }
  }

  /// Log that a project crossed a budget warning threshold (not yet
  /// exceeded, just notable).
  pub fn log_budget_warning(project_id: &str, spent_tokens: i64, limit_tokens: i64)
  {
    #[allow(clippy::cast_precision_loss)]
    let percentage = (spent_tokens as f64 / limit_tokens as f64) * 100.0;
    tracing::warn!(
      project_id = %project_id,
      spent_tokens,
      limit_tokens,
      percentage,
      "budget threshold reached"
    );
  }
}

#[cfg(feature = "enabled")]
pub use implementation::*;

#[cfg(not(feature = "enabled"))]
mod stub
{
  #[derive(Debug, Clone, Copy)]
  pub enum LogLevel
  {
    Debug,
    Info,
    Warn,
    Error,
  }

  pub fn init_logging(_level: LogLevel) -> Result<(), Box<dyn std::error::Error>>
  {
    Ok(())
  }

  pub fn log_task_event(_task_id: &str, _project_id: &str, _state: &str) {}
  pub fn log_policy_decision(_api_key_prefix: &str, _kind: &str, _allowed: bool) {}
  pub fn log_budget_warning(_project_id: &str, _spent_tokens: i64, _limit_tokens: i64) {}
}

#[cfg(not(feature = "enabled"))]
pub use stub::*;
