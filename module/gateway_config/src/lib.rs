//! Environment-variable configuration: every variable shares the `GATEWAY_`
//! prefix, with no layered project/user/workspace precedence system — flat
//! env-var configuration fits this gateway's flat deployment surface.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError
{
  #[error("invalid value for {var}: {reason}")]
  InvalidValue
  {
    var: &'static str,
    reason: String,
  },

  #[error("{var} is required and not set, and no CLI binary was found on PATH")]
  CliBinaryNotFound
  {
    var: &'static str,
  },
}

/// Full gateway configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config
{
  pub listen_addr: String,
  pub max_concurrent: usize,
  pub cli_bin: PathBuf,
  pub cli_strip_env: String,
  pub capability_config: Option<PathBuf>,
  pub database_url: String,
  pub log_level: String,
  pub direct_endpoint: String,
  pub pricing_override: Option<PathBuf>,
  pub agents_dir: PathBuf,
  pub skills_dir: PathBuf,
  pub workspace_root: PathBuf,
  pub default_task_deadline: Duration,
}

impl Config
{
  /// Load configuration from the process environment.
  ///
  /// # Errors
  /// Returns `ConfigError` if a numeric variable fails to parse, or if
  /// `GATEWAY_CLI_BIN` is unset and no `claude`-like CLI binary is found on
  /// `PATH`.
  pub fn from_env() -> Result<Self, ConfigError>
  {
    let listen_addr = env_or("GATEWAY_LISTEN_ADDR", "0.0.0.0:8080");

    let max_concurrent = parse_env("GATEWAY_MAX_CONCURRENT", 8usize)?;

    let cli_bin = match std::env::var("GATEWAY_CLI_BIN")
    {
      Ok(v) => PathBuf::from(v),
      Err(_) => autodetect_cli_bin().ok_or(ConfigError::CliBinaryNotFound { var: "GATEWAY_CLI_BIN" })?,
    };

    let cli_strip_env = env_or("GATEWAY_CLI_STRIP_ENV", "ANTHROPIC_CLI_NESTED");

    let capability_config = std::env::var("GATEWAY_CAPABILITY_CONFIG").ok().map(PathBuf::from);

    let database_url = env_or("GATEWAY_DATABASE_URL", "sqlite://gateway.db");
    let log_level = env_or("GATEWAY_LOG_LEVEL", "info");
    let direct_endpoint = env_or("GATEWAY_DIRECT_ENDPOINT", "https://api.anthropic.com");
    let pricing_override = std::env::var("GATEWAY_PRICING_OVERRIDE").ok().map(PathBuf::from);

    let agents_dir = PathBuf::from(env_or("GATEWAY_AGENTS_DIR", "./agents"));
    let skills_dir = PathBuf::from(env_or("GATEWAY_SKILLS_DIR", "./skills"));
    let workspace_root = PathBuf::from(env_or("GATEWAY_WORKSPACE_ROOT", "./workspaces"));

    let default_task_deadline = Duration::from_secs(parse_env("GATEWAY_DEFAULT_TASK_DEADLINE_SECS", 120u64)?);

    Ok(Self {
      listen_addr,
      max_concurrent,
      cli_bin,
      cli_strip_env,
      capability_config,
      database_url,
      log_level,
      direct_endpoint,
      pricing_override,
      agents_dir,
      skills_dir,
      workspace_root,
      default_task_deadline,
    })
  }

  /// A configuration suitable for tests: in-memory store, tiny pool,
  /// deterministic paths under a caller-supplied scratch directory.
  #[must_use]
  pub fn default_test(scratch: &std::path::Path) -> Self
  {
    Self {
      listen_addr: "127.0.0.1:0".into(),
      max_concurrent: 2,
      cli_bin: PathBuf::from("/bin/true"),
      cli_strip_env: "ANTHROPIC_CLI_NESTED".into(),
      capability_config: None,
      database_url: "sqlite::memory:".into(),
      log_level: "debug".into(),
      direct_endpoint: "http://127.0.0.1:0".into(),
      pricing_override: None,
      agents_dir: scratch.join("agents"),
      skills_dir: scratch.join("skills"),
      workspace_root: scratch.join("workspaces"),
      default_task_deadline: Duration::from_secs(5),
    }
  }
}

fn env_or(var: &str, default: &str) -> String
{
  std::env::var(var).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(var: &'static str, default: T) -> Result<T, ConfigError>
where
  T: std::str::FromStr,
  T::Err: std::fmt::Display,
{
  match std::env::var(var)
  {
    Ok(raw) => raw
      .parse()
      .map_err(|e: T::Err| ConfigError::InvalidValue { var, reason: e.to_string() }),
    Err(_) => Ok(default),
  }
}

/// Autodetect the CLI binary from `PATH` when `GATEWAY_CLI_BIN` is unset.
fn autodetect_cli_bin() -> Option<PathBuf>
{
  const CANDIDATES: [&str; 2] = ["claude", "claude-code"];

  let path_var = std::env::var_os("PATH")?;
  for dir in std::env::split_paths(&path_var)
  {
    for candidate in CANDIDATES
    {
      let full = dir.join(candidate);
      if full.is_file()
      {
        return Some(full);
      }
    }
  }
  None
}

#[cfg(test)]
mod tests
{
  use super::*;
  use serial_test::serial;

  fn clear_gateway_env()
  {
    for (key, _) in std::env::vars()
    {
      if key.starts_with("GATEWAY_")
      {
        std::env::remove_var(key);
      }
    }
  }

  #[test]
  #[serial]
  fn from_env_applies_defaults_when_cli_bin_set()
  {
    clear_gateway_env();
    std::env::set_var("GATEWAY_CLI_BIN", "/bin/true");

    let config = Config::from_env().expect("loads");
    assert_eq!(config.listen_addr, "0.0.0.0:8080");
    assert_eq!(config.max_concurrent, 8);
    assert_eq!(config.cli_bin, PathBuf::from("/bin/true"));

    clear_gateway_env();
  }

  #[test]
  #[serial]
  fn from_env_rejects_non_numeric_max_concurrent()
  {
    clear_gateway_env();
    std::env::set_var("GATEWAY_CLI_BIN", "/bin/true");
    std::env::set_var("GATEWAY_MAX_CONCURRENT", "not-a-number");

    let err = Config::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::InvalidValue { var: "GATEWAY_MAX_CONCURRENT", .. }));

    clear_gateway_env();
  }

  #[test]
  #[serial]
  fn from_env_errors_without_cli_bin_or_path_match()
  {
    clear_gateway_env();
    std::env::set_var("PATH", "/nonexistent-bin-dir");

    let err = Config::from_env().unwrap_err();
    assert!(matches!(err, ConfigError::CliBinaryNotFound { .. }));

    clear_gateway_env();
  }

  #[test]
  fn default_test_uses_in_memory_database()
  {
    let dir = std::env::temp_dir();
    let config = Config::default_test(&dir);
    assert_eq!(config.database_url, "sqlite::memory:");
  }
}
