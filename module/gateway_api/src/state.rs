//! Shared application state: one instance built at startup, cloned (cheaply,
//! via `Arc`) into every request.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gateway_config::Config;
use gateway_cost::PricingManager;
use gateway_direct::{DirectClient, DirectConfig};
use gateway_executor::AgenticExecutor;
use gateway_ledger::Ledger;
use gateway_policy::Policy;
use gateway_registry::Registry;
use gateway_router::RouterThresholds;
use gateway_types::{Error, Result};
use gateway_workerpool::{WorkerPool, WorkerPoolConfig};

/// The version string reported by `/health`, set at compile time from the
/// crate's own `Cargo.toml`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Everything a route handler needs, held behind one `Arc` so cloning state
/// into a handler is a single atomic increment.
#[derive(Clone)]
pub struct AppState
{
  pub ledger: Arc<Ledger>,
  pub registry: Arc<Registry>,
  pub policy: Arc<Policy>,
  pub workerpool: Arc<WorkerPool>,
  pub executor: Arc<AgenticExecutor>,
  pub direct: Arc<DirectClient>,
  pub pricing: Arc<PricingManager>,
  pub router_thresholds: RouterThresholds,
  pub default_task_deadline: Duration,
  pub workspace_root: PathBuf,
  pub ready: Arc<AtomicBool>,
  pub started_at: Instant,
}

impl AppState
{
  /// Build every component from configuration: open the ledger (applying
  /// migrations), construct the registry/policy/pool/executor/direct
  /// client, and mark the instance not-ready until the caller flips
  /// `ready` once startup checks pass.
  ///
  /// # Errors
  /// Propagates `Error::StorageUnavailable` if the ledger can't connect, or
  /// whatever `DirectClient::new` returns if the HTTP client can't be built.
  pub async fn new(config: &Config) -> Result<Self>
  {
    let ledger = Arc::new(Ledger::new(&config.database_url).await?);
    let registry = Arc::new(Registry::new(config.agents_dir.clone(), config.skills_dir.clone()));
    let policy = Arc::new(Policy::new(ledger.clone(), registry.clone()));

    // `PricingManager` isn't `Clone` (it holds an `ArcSwap`), and
    // `WorkerPool::new` takes ownership of its own copy rather than sharing
    // `gateway_direct`'s — so a configured override is loaded into two
    // independent instances rather than one shared one.
    let pricing = Arc::new(PricingManager::new());
    let pool_pricing = PricingManager::new();
    if let Some(path) = &config.pricing_override
    {
      load_pricing_override(&pricing, path)?;
      load_pricing_override(&pool_pricing, path)?;
    }

    let pool_config = WorkerPoolConfig {
      max_concurrent: config.max_concurrent,
      cli_bin: config.cli_bin.clone(),
      cli_strip_env: vec![config.cli_strip_env.clone()],
      capability_config: config.capability_config.clone(),
      default_deadline: config.default_task_deadline,
    };
    let workerpool = Arc::new(WorkerPool::new(pool_config, pool_pricing));

    let executor = Arc::new(AgenticExecutor::new(workerpool.clone(), registry.clone(), config.workspace_root.clone()));

    let direct_config = DirectConfig {
      endpoint: config.direct_endpoint.clone(),
      api_key: std::env::var("GATEWAY_ANTHROPIC_API_KEY").unwrap_or_default(),
      timeout: config.default_task_deadline,
    };
    let direct = Arc::new(DirectClient::new(direct_config, pricing.clone())?);

    Ok(Self {
      ledger,
      registry,
      policy,
      workerpool,
      executor,
      direct,
      pricing,
      router_thresholds: RouterThresholds::default(),
      default_task_deadline: config.default_task_deadline,
      workspace_root: config.workspace_root.clone(),
      ready: Arc::new(AtomicBool::new(false)),
      started_at: Instant::now(),
    })
  }

  /// Seconds since this instance started serving.
  #[must_use]
  pub fn uptime_seconds(&self) -> u64
  {
    self.started_at.elapsed().as_secs()
  }

  /// Whether `/ready` should currently report healthy.
  #[must_use]
  pub fn is_ready(&self) -> bool
  {
    self.ready.load(Ordering::SeqCst)
  }
}

fn load_pricing_override(pricing: &PricingManager, path: &std::path::Path) -> Result<()>
{
  let raw = std::fs::read_to_string(path)
    .map_err(|e| Error::StorageUnavailable(format!("reading pricing override {}: {e}", path.display())))?;
  let table = serde_json::from_str(&raw)
    .map_err(|e| Error::StorageUnavailable(format!("parsing pricing override {}: {e}", path.display())))?;
  pricing.load(table);
  Ok(())
}
