//! Fixed one-minute wall-clock rate-limit buckets.
//!
//! Chosen over a token-bucket (the shape `governor` gives you) because a
//! token bucket's burst allowance would let a client exceed the configured
//! per-minute rate right after an idle period, violating the gateway's flat
//! "no more than N requests per key per minute" guarantee.

use crate::error::{storage, Result};
use crate::storage::Ledger;

/// Outcome of a rate-limit check for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision
{
  Admitted
  {
    count_in_window: i64,
  },
  Limited
  {
    count_in_window: i64,
  },
}

impl Ledger
{
  /// Atomically increment the request count for `api_key_id` in the
  /// current one-minute window and report whether it stayed within
  /// `limit_per_minute`.
  ///
  /// The bucket key is `(api_key_id, window_start)`, where `window_start`
  /// is the request's timestamp truncated to the minute. The increment
  /// happens inside a transaction so concurrent requests against the same
  /// key can't both observe a count below the limit and both get admitted.
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` on any database failure.
  pub async fn check_rate_limit(&self, api_key_id: &str, now_ms: i64, limit_per_minute: i64) -> Result<RateLimitDecision>
  {
    let window_start = (now_ms / 60_000) * 60_000;

    let mut tx = self.pool().begin().await.map_err(storage)?;

    sqlx::query(
      "INSERT INTO rate_limits (api_key_id, window_start, request_count) VALUES ($1, $2, 1) \
       ON CONFLICT(api_key_id, window_start) DO UPDATE SET request_count = request_count + 1",
    )
    .bind(api_key_id)
    .bind(window_start)
    .execute(&mut *tx)
    .await
    .map_err(storage)?;

    let count: i64 = sqlx::query_scalar(
      "SELECT request_count FROM rate_limits WHERE api_key_id = $1 AND window_start = $2",
    )
    .bind(api_key_id)
    .bind(window_start)
    .fetch_one(&mut *tx)
    .await
    .map_err(storage)?;

    tx.commit().await.map_err(storage)?;

    Ok(if count <= limit_per_minute
    {
      RateLimitDecision::Admitted { count_in_window: count }
    }
    else
    {
      RateLimitDecision::Limited { count_in_window: count }
    })
  }
}
