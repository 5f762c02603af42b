//! Startup/shutdown orchestration: readiness flag plus a bounded drain of
//! the worker pool, fed into `axum::serve(...).with_graceful_shutdown(...)`.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::state::AppState;

/// How long `/ready` has to wait before the instance is considered healthy
/// enough to receive traffic: a registry scan plus a ledger round-trip.
pub async fn mark_ready(state: &AppState)
{
  state.ready.store(true, Ordering::SeqCst);
  tracing::info!("gateway is ready");
}

/// Flip readiness off (so `/ready` starts failing, letting a load balancer
/// stop sending new traffic), then give in-flight worker-pool tasks up to
/// `drain_timeout` to finish before the pool force-cancels the remainder.
pub async fn graceful_shutdown(state: &AppState, drain_timeout: Duration)
{
  state.ready.store(false, Ordering::SeqCst);
  tracing::info!("draining in-flight tasks before shutdown");
  state.workerpool.shutdown(drain_timeout).await;
  tracing::info!("shutdown complete");
}

/// Resolves when the process should begin shutting down: `Ctrl+C`, or (on
/// Unix) `SIGTERM` from a process manager.
pub async fn shutdown_signal()
{
  let ctrl_c = async {
    tokio::signal::ctrl_c().await.expect("installing Ctrl+C handler");
  };

  #[cfg(unix)]
  let terminate = async {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
      .expect("installing SIGTERM handler")
      .recv()
      .await;
  };

  #[cfg(not(unix))]
  let terminate = std::future::pending::<()>();

  tokio::select! {
    () = ctrl_c => {}
    () = terminate => {}
  }
}
