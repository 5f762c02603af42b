//! Usage reporting: aggregate `usage_log` rows over a time window.
//!
//! Always a fresh `SUM` over the rows themselves, never a separately
//! maintained running total — a counter that drifts from the rows it
//! summarizes is worse than no counter at all.

use std::collections::HashMap;

use rust_decimal::Decimal;
use sqlx::Row;

use crate::error::{storage, Result};
use crate::storage::Ledger;

/// One tier's contribution to a `UsageWindow`'s `by_model` breakdown.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct TierUsage
{
  pub tokens: i64,
  pub cost_usd: String,
}

/// Aggregated usage for a project over `[since, until)`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct UsageWindow
{
  pub project_id: String,
  pub since_ms: i64,
  pub until_ms: i64,
  pub request_count: i64,
  pub input_tokens: i64,
  pub output_tokens: i64,
  pub cost_usd: String,
  pub by_model: HashMap<String, TierUsage>,
}

impl Ledger
{
  /// Summed usage for a project within `[since_ms, until_ms)`.
  ///
  /// # Errors
  /// Returns `Error::StorageUnavailable` on query failure.
  pub async fn usage_window(&self, project_id: &str, since_ms: i64, until_ms: i64) -> Result<UsageWindow>
  {
    let row = sqlx::query(
      "SELECT \
         COUNT(*) AS request_count, \
         COALESCE(SUM(input_tokens), 0) AS input_tokens, \
         COALESCE(SUM(output_tokens), 0) AS output_tokens, \
         COALESCE(SUM(CAST(cost_usd AS NUMERIC)), 0) AS cost_usd \
       FROM usage_log \
       WHERE project_id = $1 AND created_at >= $2 AND created_at < $3",
    )
    .bind(project_id)
    .bind(since_ms)
    .bind(until_ms)
    .fetch_one(self.pool())
    .await
    .map_err(storage)?;

    let cost_usd: Decimal = row
      .get::<String, _>("cost_usd")
      .parse()
      .unwrap_or(Decimal::ZERO);

    let tier_rows = sqlx::query(
      "SELECT tier, \
         COALESCE(SUM(input_tokens + output_tokens), 0) AS tokens, \
         COALESCE(SUM(CAST(cost_usd AS NUMERIC)), 0) AS cost_usd \
       FROM usage_log \
       WHERE project_id = $1 AND created_at >= $2 AND created_at < $3 \
       GROUP BY tier",
    )
    .bind(project_id)
    .bind(since_ms)
    .bind(until_ms)
    .fetch_all(self.pool())
    .await
    .map_err(storage)?;

    let by_model = tier_rows
      .into_iter()
      .map(|r| {
        let tier: String = r.get("tier");
        let tokens: i64 = r.get("tokens");
        let cost: Decimal = r.get::<String, _>("cost_usd").parse().unwrap_or(Decimal::ZERO);
        (tier, TierUsage { tokens, cost_usd: cost.to_string() })
      })
      .collect();

    Ok(UsageWindow {
      project_id: project_id.to_string(),
      since_ms,
      until_ms,
      request_count: row.get("request_count"),
      input_tokens: row.get("input_tokens"),
      output_tokens: row.get("output_tokens"),
      cost_usd: cost_usd.to_string(),
      by_model,
    })
  }
}

#[cfg(test)]
mod tests
{
  use super::*;
  use gateway_types::{Tier, Usage};
  use rust_decimal_macros::dec;

  #[tokio::test]
  async fn usage_window_sums_across_multiple_debits()
  {
    let ledger = Ledger::new("sqlite::memory:").await.expect("connect");
    ledger.create_project("proj_1", "Test", None).await.expect("create");

    for _ in 0..3
    {
      let token = ledger.admit("proj_1", 150).await.expect("admit");
      let usage = Usage { input_tokens: 100, output_tokens: 50, model: "claude-haiku".into(), tier: Tier::Small, cost_usd: dec!(0.10) };
      ledger.debit(&token, None, None, &usage).await.expect("debit");
    }

    let window = ledger.usage_window("proj_1", 0, i64::MAX).await.expect("window");
    assert_eq!(window.request_count, 3);
    assert_eq!(window.input_tokens, 300);
    assert_eq!(window.cost_usd, "0.30");

    let small = window.by_model.get("small").expect("small tier present");
    assert_eq!(small.tokens, 450);
    assert_eq!(small.cost_usd, "0.30");
  }

  #[tokio::test]
  async fn usage_window_excludes_rows_outside_range()
  {
    let ledger = Ledger::new("sqlite::memory:").await.expect("connect");
    ledger.create_project("proj_1", "Test", None).await.expect("create");

    let window = ledger.usage_window("proj_1", 0, 1).await.expect("window");
    assert_eq!(window.request_count, 0);
    assert_eq!(window.cost_usd, "0");
  }
}
