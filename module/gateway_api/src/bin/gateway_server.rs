//! Entry point: load configuration, build `AppState`, serve the router,
//! and drain cleanly on `Ctrl+C`/`SIGTERM`.

use std::sync::Arc;
use std::time::Duration;

use gateway_api::lifecycle;
use gateway_api::state::AppState;
use gateway_config::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>>
{
  dotenvy::dotenv().ok();

  let config = Config::from_env()?;

  let log_level = config.log_level.parse().unwrap_or(gateway_telemetry::LogLevel::Info);
  gateway_telemetry::init_logging(log_level)?;

  let state = Arc::new(AppState::new(&config).await?);
  lifecycle::mark_ready(&state).await;

  let app = gateway_api::build_router(state.clone());

  let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
  tracing::info!(addr = %config.listen_addr, "gateway listening");

  let shutdown_state = state.clone();
  axum::serve(listener, app)
    .with_graceful_shutdown(async move {
      lifecycle::shutdown_signal().await;
      lifecycle::graceful_shutdown(&shutdown_state, Duration::from_secs(30)).await;
    })
    .await?;

  Ok(())
}
