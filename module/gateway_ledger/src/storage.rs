//! `SQLite` persistence for projects, API keys, usage, and admission
//! reservations.

use rust_decimal::Decimal;
use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};

use crate::error::{storage, Result};
use crate::token_generator::TokenGenerator;
use gateway_types::{Error, TaskId, Tier, Usage};

/// Width of the "current monthly window" admission and `getUsage` both
/// reason about: a trailing 30 days from now, the same approximation
/// `gateway_api`'s `/v1/usage?period=30d` already uses, rather than a
/// calendar-month boundary.
const MONTHLY_WINDOW_MS: i64 = 30 * 24 * 60 * 60 * 1000;

/// A project: the unit of budgeting and grouping for usage.
#[derive(Debug, Clone)]
pub struct ProjectRecord
{
  pub id: String,
  pub name: String,
  pub budget_tokens: Option<i64>,
  pub created_at: i64,
}

/// An API key bound to a project.
#[derive(Debug, Clone)]
pub struct ApiKeyRecord
{
  pub id: String,
  pub project_id: String,
  pub label: Option<String>,
  pub revoked: bool,
  pub created_at: i64,
  pub last_used_at: Option<i64>,
}

/// Per-key resource ceilings. The
/// tool/agent/skill allow-lists themselves live in `api_key_permissions`
/// and are fetched separately via `allowed_names`.
#[derive(Debug, Clone)]
pub struct PermissionProfile
{
  pub rate_limit_per_minute: i64,
  pub max_concurrent_tasks: i64,
  pub max_wall_seconds: i64,
  pub max_cost_usd: Decimal,
  pub fs_access_mode: String,
  pub workspace_size_ceiling_bytes: i64,
}

/// A reservation made by `admit` and settled by `debit` or `release`.
#[derive(Debug, Clone)]
pub struct AdmissionToken
{
  pub id: String,
  pub project_id: String,
}

/// Durable storage for the gateway's ledger.
#[derive(Debug, Clone)]
pub struct Ledger
{
  pool: SqlitePool,
  generator: TokenGenerator,
}

impl Ledger
{
  /// Connect and apply all pending migrations.
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` if the connection or a migration
  /// fails.
  pub async fn new(database_url: &str) -> Result<Self>
  {
    let pool = SqlitePoolOptions::new()
      .max_connections(5)
      .connect(database_url)
      .await
      .map_err(storage)?;

    let migration_001 = include_str!("../migrations/001_initial_schema.sql");
    sqlx::raw_sql(migration_001).execute(&pool).await.map_err(storage)?;

    let migration_002_completed: i64 = sqlx::query_scalar(
      "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='_migration_002_completed'",
    )
    .fetch_one(&pool)
    .await
    .map_err(storage)?;

    if migration_002_completed == 0
    {
      let migration_002 = include_str!("../migrations/002_add_revocation_index.sql");
      sqlx::raw_sql(migration_002).execute(&pool).await.map_err(storage)?;
    }

    Ok(Self { pool, generator: TokenGenerator::new() })
  }

  /// Expose the pool for integration tests that want to inspect rows
  /// directly. Not for use outside tests.
  #[must_use]
  pub fn pool(&self) -> &SqlitePool
  {
    &self.pool
  }

  /// Create a project.
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` on insert failure.
  pub async fn create_project(&self, id: &str, name: &str, budget_tokens: Option<i64>) -> Result<ProjectRecord>
  {
    let now = now_ms();
    sqlx::query("INSERT INTO projects (id, name, budget_tokens, created_at) VALUES ($1, $2, $3, $4)")
      .bind(id)
      .bind(name)
      .bind(budget_tokens)
      .bind(now)
      .execute(&self.pool)
      .await
      .map_err(storage)?;

    Ok(ProjectRecord { id: id.to_string(), name: name.to_string(), budget_tokens, created_at: now })
  }

  /// Look up a project by id.
  ///
  /// # Errors
  /// Returns `Error::BadRequest` if no such project exists.
  pub async fn get_project(&self, id: &str) -> Result<ProjectRecord>
  {
    let row = sqlx::query("SELECT id, name, budget_tokens, created_at FROM projects WHERE id = $1")
      .bind(id)
      .fetch_optional(&self.pool)
      .await
      .map_err(storage)?
      .ok_or_else(|| Error::BadRequest { field: "project_id".into(), reason: "unknown project".into() })?;

    Ok(project_from_row(&row))
  }

  /// Mint and store a new API key for a project. Returns the plaintext key;
  /// only the hash is persisted.
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` on insert failure.
  pub async fn create_api_key(&self, project_id: &str, label: Option<&str>) -> Result<(String, ApiKeyRecord)>
  {
    let plaintext = self.generator.generate();
    let key_hash = self.generator.hash_key(&plaintext);
    let id = format!("key_{}", uuid::Uuid::new_v4());
    let now = now_ms();

    let mut tx = self.pool.begin().await.map_err(storage)?;

    sqlx::query(
      "INSERT INTO api_keys (id, key_hash, project_id, label, revoked, created_at) \
       VALUES ($1, $2, $3, $4, 0, $5)",
    )
    .bind(&id)
    .bind(&key_hash)
    .bind(project_id)
    .bind(label)
    .bind(now)
    .execute(&mut *tx)
    .await
    .map_err(storage)?;

    sqlx::query("INSERT INTO permission_profiles (api_key_id) VALUES ($1)")
      .bind(&id)
      .execute(&mut *tx)
      .await
      .map_err(storage)?;

    tx.commit().await.map_err(storage)?;

    Ok((
      plaintext,
      ApiKeyRecord { id, project_id: project_id.to_string(), label: label.map(String::from), revoked: false, created_at: now, last_used_at: None },
    ))
  }

  /// Resolve a presented plaintext key to its record, or
  /// `Error::AuthInvalid`/`Error::AuthRevoked`.
  ///
  /// # Errors
  /// `Error::AuthInvalid` if no key matches, `Error::AuthRevoked` if the key
  /// is revoked, `Error::StorageUnavailable` on query failure.
  pub async fn authenticate(&self, presented_key: &str) -> Result<ApiKeyRecord>
  {
    let key_hash = self.generator.hash_key(presented_key);

    let row = sqlx::query(
      "SELECT id, project_id, label, revoked, created_at, last_used_at FROM api_keys WHERE key_hash = $1",
    )
    .bind(&key_hash)
    .fetch_optional(&self.pool)
    .await
    .map_err(storage)?
    .ok_or(Error::AuthInvalid)?;

    let record = api_key_from_row(&row);
    if record.revoked
    {
      return Err(Error::AuthRevoked);
    }

    sqlx::query("UPDATE api_keys SET last_used_at = $1 WHERE id = $2")
      .bind(now_ms())
      .bind(&record.id)
      .execute(&self.pool)
      .await
      .map_err(storage)?;

    Ok(record)
  }

  /// Revoke an API key.
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` on update failure.
  pub async fn revoke_api_key(&self, api_key_id: &str) -> Result<()>
  {
    sqlx::query("UPDATE api_keys SET revoked = 1 WHERE id = $1")
      .bind(api_key_id)
      .execute(&self.pool)
      .await
      .map_err(storage)?;
    Ok(())
  }

  /// Names allowed for one capability kind (`tool`, `agent`, or `skill`).
  /// A single entry of `"*"` means everything of that kind is allowed.
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` on query failure.
  pub async fn allowed_names(&self, api_key_id: &str, kind: &str) -> Result<Vec<String>>
  {
    let rows = sqlx::query("SELECT name FROM api_key_permissions WHERE api_key_id = $1 AND kind = $2")
      .bind(api_key_id)
      .bind(kind)
      .fetch_all(&self.pool)
      .await
      .map_err(storage)?;

    Ok(rows.iter().map(|r| r.get::<String, _>("name")).collect())
  }

  /// Grant a name (or `"*"` for a wildcard) for a capability kind to an
  /// API key.
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` on insert failure.
  pub async fn grant(&self, api_key_id: &str, kind: &str, name: &str) -> Result<()>
  {
    sqlx::query("INSERT OR IGNORE INTO api_key_permissions (api_key_id, kind, name) VALUES ($1, $2, $3)")
      .bind(api_key_id)
      .bind(kind)
      .bind(name)
      .execute(&self.pool)
      .await
      .map_err(storage)?;
    Ok(())
  }

  /// Fetch the per-key resource ceilings.
  ///
  /// # Errors
  /// Returns `Error::BadRequest` if the key has no profile row (should
  /// never happen outside of tests that bypass `create_api_key`), or
  /// `Error::StorageUnavailable` on query failure.
  pub async fn permission_profile(&self, api_key_id: &str) -> Result<PermissionProfile>
  {
    let row = sqlx::query(
      "SELECT rate_limit_per_minute, max_concurrent_tasks, max_wall_seconds, max_cost_usd, fs_access_mode, workspace_size_ceiling_bytes \
       FROM permission_profiles WHERE api_key_id = $1",
    )
    .bind(api_key_id)
    .fetch_optional(&self.pool)
    .await
    .map_err(storage)?
    .ok_or_else(|| Error::BadRequest { field: "api_key".into(), reason: "no permission profile".into() })?;

    let max_cost_usd: Decimal = row
      .get::<String, _>("max_cost_usd")
      .parse()
      .map_err(|_| Error::StorageUnavailable("corrupt max_cost_usd".into()))?;

    Ok(PermissionProfile {
      rate_limit_per_minute: row.get("rate_limit_per_minute"),
      max_concurrent_tasks: row.get("max_concurrent_tasks"),
      max_wall_seconds: row.get("max_wall_seconds"),
      max_cost_usd,
      fs_access_mode: row.get("fs_access_mode"),
      workspace_size_ceiling_bytes: row.get("workspace_size_ceiling_bytes"),
    })
  }

  /// Tokens committed for a project within the current monthly window
  /// (the trailing 30 days), counting only settled usage — in-flight
  /// admission reservations are not included.
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` on query failure.
  pub async fn committed_tokens(&self, project_id: &str) -> Result<i64>
  {
    committed_tokens_tx(&self.pool, project_id, now_ms() - MONTHLY_WINDOW_MS).await
  }

  /// Reserve budget for an upcoming task. Fails with
  /// `Error::BudgetExceeded` if the project's monthly token ceiling
  /// (current-window usage + outstanding reservations + this estimate)
  /// would be exceeded. The check and the reservation insert happen in
  /// one transaction so concurrent admits on the same project can't both
  /// pass.
  ///
  /// # Errors
  /// `Error::BudgetExceeded` if the ceiling would be exceeded, otherwise
  /// `Error::StorageUnavailable` on any database failure.
  pub async fn admit(&self, project_id: &str, estimated_tokens: i64) -> Result<AdmissionToken>
  {
    let mut tx = self.pool.begin().await.map_err(storage)?;

    let project_row = sqlx::query("SELECT budget_tokens FROM projects WHERE id = $1")
      .bind(project_id)
      .fetch_optional(&mut *tx)
      .await
      .map_err(storage)?
      .ok_or_else(|| Error::BadRequest { field: "project_id".into(), reason: "unknown project".into() })?;

    let budget: Option<i64> = project_row.get("budget_tokens");

    if let Some(budget) = budget
    {
      let window_start = now_ms() - MONTHLY_WINDOW_MS;

      let used = committed_tokens_tx(&mut *tx, project_id, window_start).await?;

      let reserved: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(estimated_tokens), 0) FROM admission_intents WHERE project_id = $1")
        .bind(project_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;

      if used + reserved + estimated_tokens > budget
      {
        return Err(Error::BudgetExceeded(format!(
          "project {project_id} monthly token limit {budget} would be exceeded (used {used}, reserved {reserved}, this task {estimated_tokens})"
        )));
      }
    }

    let id = format!("adm_{}", uuid::Uuid::new_v4());
    sqlx::query("INSERT INTO admission_intents (id, project_id, estimated_tokens, created_at) VALUES ($1, $2, $3, $4)")
      .bind(&id)
      .bind(project_id)
      .bind(estimated_tokens)
      .bind(now_ms())
      .execute(&mut *tx)
      .await
      .map_err(storage)?;

    tx.commit().await.map_err(storage)?;

    Ok(AdmissionToken { id, project_id: project_id.to_string() })
  }

  /// Settle a reservation: remove the intent and write the actual usage
  /// row, atomically. Called whether the task succeeded, failed, or timed
  /// out with partial usage — partial usage is still billed.
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` on any database failure.
  pub async fn debit(
    &self,
    token: &AdmissionToken,
    api_key_id: Option<&str>,
    task_id: Option<&TaskId>,
    usage: &Usage,
  ) -> Result<()>
  {
    let mut tx = self.pool.begin().await.map_err(storage)?;

    sqlx::query("DELETE FROM admission_intents WHERE id = $1")
      .bind(&token.id)
      .execute(&mut *tx)
      .await
      .map_err(storage)?;

    sqlx::query(
      "INSERT INTO usage_log (project_id, api_key_id, task_id, model, tier, input_tokens, output_tokens, cost_usd, created_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(&token.project_id)
    .bind(api_key_id)
    .bind(task_id.map(gateway_types::TaskId::as_str))
    .bind(&usage.model)
    .bind(usage.tier.as_str())
    .bind(usage.input_tokens)
    .bind(usage.output_tokens)
    .bind(usage.cost_usd.to_string())
    .bind(now_ms())
    .execute(&mut *tx)
    .await
    .map_err(storage)?;

    tx.commit().await.map_err(storage)
  }

  /// Release a reservation without billing anything, e.g. when a task is
  /// rejected before it starts running.
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` on delete failure.
  pub async fn release(&self, token: &AdmissionToken) -> Result<()>
  {
    sqlx::query("DELETE FROM admission_intents WHERE id = $1")
      .bind(&token.id)
      .execute(&self.pool)
      .await
      .map_err(storage)?;
    Ok(())
  }

  /// Append an audit event. `kind` names the
  /// event (e.g. `"admit"`, `"permission_denied"`, `"task_completed"`);
  /// `details_json` is an opaque caller-supplied JSON blob; `severity` is
  /// one of `"info"`, `"warn"`, `"error"`.
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` on insert failure.
  #[allow(clippy::too_many_arguments)]
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
    sqlx::query(
      "INSERT INTO audit_log (task_id, api_key_id, project_id, kind, details_json, severity, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(task_id)
    .bind(api_key_id)
    .bind(project_id)
    .bind(kind)
    .bind(details_json)
    .bind(severity)
    .bind(now_ms())
    .execute(&self.pool)
    .await
    .map_err(storage)?;
    Ok(())
  }
}

async fn committed_tokens_tx<'c, E>(executor: E, project_id: &str, window_start: i64) -> Result<i64>
where
  E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
  sqlx::query_scalar("SELECT COALESCE(SUM(input_tokens + output_tokens), 0) FROM usage_log WHERE project_id = $1 AND created_at >= $2")
    .bind(project_id)
    .bind(window_start)
    .fetch_one(executor)
    .await
    .map_err(storage)
}

fn project_from_row(row: &sqlx::sqlite::SqliteRow) -> ProjectRecord
{
  ProjectRecord {
    id: row.get("id"),
    name: row.get("name"),
    budget_tokens: row.get("budget_tokens"),
    created_at: row.get("created_at"),
  }
}

fn api_key_from_row(row: &sqlx::sqlite::SqliteRow) -> ApiKeyRecord
{
  ApiKeyRecord {
    id: row.get("id"),
    project_id: row.get("project_id"),
    label: row.get("label"),
    revoked: row.get::<bool, _>("revoked"),
    created_at: row.get("created_at"),
    last_used_at: row.get("last_used_at"),
  }
}

#[allow(clippy::cast_possible_truncation)]
fn now_ms() -> i64
{
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .expect("system clock before epoch")
    .as_millis() as i64
}

#[cfg(test)]
mod tests
{
  use super::*;
  use rust_decimal_macros::dec;

  async fn memory_ledger() -> Ledger
  {
    Ledger::new("sqlite::memory:").await.expect("connect")
  }

  #[tokio::test]
  async fn create_and_fetch_project_roundtrips()
  {
    let ledger = memory_ledger().await;
    ledger.create_project("proj_1", "Test", Some(10_000)).await.expect("create");
    let fetched = ledger.get_project("proj_1").await.expect("fetch");
    assert_eq!(fetched.name, "Test");
    assert_eq!(fetched.budget_tokens, Some(10_000));
  }

  #[tokio::test]
  async fn api_key_roundtrips_and_authenticates()
  {
    let ledger = memory_ledger().await;
    ledger.create_project("proj_1", "Test", None).await.expect("create");
    let (plaintext, record) = ledger.create_api_key("proj_1", Some("ci")).await.expect("mint");

    let authed = ledger.authenticate(&plaintext).await.expect("authenticate");
    assert_eq!(authed.id, record.id);

    ledger.revoke_api_key(&record.id).await.expect("revoke");
    let err = ledger.authenticate(&plaintext).await.unwrap_err();
    assert!(matches!(err, Error::AuthRevoked));
  }

  #[tokio::test]
  async fn authenticate_rejects_unknown_key()
  {
    let ledger = memory_ledger().await;
    let err = ledger.authenticate("gw_does-not-exist").await.unwrap_err();
    assert!(matches!(err, Error::AuthInvalid));
  }

  #[tokio::test]
  async fn admit_rejects_when_budget_exceeded()
  {
    let ledger = memory_ledger().await;
    ledger.create_project("proj_1", "Test", Some(1000)).await.expect("create");

    let token = ledger.admit("proj_1", 500).await.expect("first admit fits");
    let usage = Usage { input_tokens: 250, output_tokens: 250, model: "claude-haiku".into(), tier: Tier::Small, cost_usd: dec!(0.50) };
    ledger.debit(&token, None, None, &usage).await.expect("debit");

    let err = ledger.admit("proj_1", 600).await.unwrap_err();
    assert!(matches!(err, Error::BudgetExceeded(_)));
  }

  #[tokio::test]
  async fn admit_without_budget_never_rejects()
  {
    let ledger = memory_ledger().await;
    ledger.create_project("proj_1", "Test", None).await.expect("create");
    ledger.admit("proj_1", 1_000_000).await.expect("unbounded project always admits");
  }

  #[tokio::test]
  async fn reservation_counts_toward_budget_before_debit()
  {
    let ledger = memory_ledger().await;
    ledger.create_project("proj_1", "Test", Some(1000)).await.expect("create");
    let _held = ledger.admit("proj_1", 800).await.expect("fits");

    let err = ledger.admit("proj_1", 300).await.unwrap_err();
    assert!(matches!(err, Error::BudgetExceeded(_)));
  }

  #[tokio::test]
  async fn admission_denies_at_exactly_the_ceiling_scenario()
  {
    let ledger = memory_ledger().await;
    ledger.create_project("proj_1", "Test", Some(1000)).await.expect("create");
    let token = ledger.admit("proj_1", 998).await.expect("fits");
    let usage = Usage { input_tokens: 500, output_tokens: 498, model: "claude-haiku".into(), tier: Tier::Small, cost_usd: dec!(0.10) };
    ledger.debit(&token, None, None, &usage).await.expect("debit");

    let err = ledger.admit("proj_1", 10).await.unwrap_err();
    assert!(matches!(err, Error::BudgetExceeded(_)));
  }

  #[tokio::test]
  async fn committed_tokens_only_counts_settled_usage_in_window()
  {
    let ledger = memory_ledger().await;
    ledger.create_project("proj_1", "Test", Some(1000)).await.expect("create");
    assert_eq!(ledger.committed_tokens("proj_1").await.unwrap(), 0);

    let token = ledger.admit("proj_1", 100).await.expect("fits");
    assert_eq!(ledger.committed_tokens("proj_1").await.unwrap(), 0, "reservation alone isn't committed yet");

    let usage = Usage { input_tokens: 60, output_tokens: 40, model: "claude-haiku".into(), tier: Tier::Small, cost_usd: dec!(0.01) };
    ledger.debit(&token, None, None, &usage).await.expect("debit");
    assert_eq!(ledger.committed_tokens("proj_1").await.unwrap(), 100);
  }

  #[tokio::test]
  async fn new_api_key_gets_default_permission_profile()
  {
    let ledger = memory_ledger().await;
    ledger.create_project("proj_1", "Test", None).await.expect("create");
    let (_, record) = ledger.create_api_key("proj_1", None).await.expect("mint");

    let profile = ledger.permission_profile(&record.id).await.expect("profile");
    assert_eq!(profile.rate_limit_per_minute, 60);
    assert_eq!(profile.max_concurrent_tasks, 1);
    assert_eq!(profile.fs_access_mode, "workspace");
  }

  #[tokio::test]
  async fn grant_and_allowed_names_roundtrip_with_wildcard()
  {
    let ledger = memory_ledger().await;
    ledger.create_project("proj_1", "Test", None).await.expect("create");
    let (_, record) = ledger.create_api_key("proj_1", None).await.expect("mint");

    ledger.grant(&record.id, "agent", "researcher").await.expect("grant");
    ledger.grant(&record.id, "agent", "researcher").await.expect("grant is idempotent");
    ledger.grant(&record.id, "skill", "*").await.expect("grant wildcard");

    let agents = ledger.allowed_names(&record.id, "agent").await.expect("agents");
    assert_eq!(agents, vec!["researcher".to_string()]);

    let skills = ledger.allowed_names(&record.id, "skill").await.expect("skills");
    assert_eq!(skills, vec!["*".to_string()]);

    let tools = ledger.allowed_names(&record.id, "tool").await.expect("tools");
    assert!(tools.is_empty());
  }

  #[tokio::test]
  async fn audit_accepts_events_with_partial_fields()
  {
    let ledger = memory_ledger().await;
    ledger.create_project("proj_1", "Test", None).await.expect("create");
    ledger.audit(None, None, Some("proj_1"), "project_created", None, "info").await.expect("audit");
  }
}
