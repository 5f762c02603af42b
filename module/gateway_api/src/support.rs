//! Shared helpers used by more than one route handler: token estimation,
//! tier-to-model-name mapping, and pre-flight dollar-cost estimation for
//! the per-task cost ceiling.

use rust_decimal::Decimal;

use gateway_cost::{PricingManager, Tracker};
use gateway_types::Tier;

/// Current wall-clock time in milliseconds, the same unit
/// `gateway_ledger`'s rate-limit buckets and timestamps use.
#[allow(clippy::cast_possible_truncation)]
#[must_use]
pub fn now_ms() -> i64
{
  std::time::SystemTime::now()
    .duration_since(std::time::UNIX_EPOCH)
    .expect("system clock before epoch")
    .as_millis() as i64
}

/// Crude token estimate for a block of text: one token per four bytes,
/// floored at one. Good enough for pre-admission cost estimates and for
/// feeding `gateway_router`'s context-size heuristic; actual billing always
/// comes from the CLI/direct path's own usage block, never this estimate.
#[must_use]
pub fn estimate_tokens(text: &str) -> i64
{
  (text.len() as i64 / 4).max(1)
}

/// Canonical model name this gateway asks the direct/CLI path for when the
/// caller names a tier instead of a model. Mirrors `gateway_cost::tier_for_model`'s
/// substring rules in reverse.
#[must_use]
pub fn model_for_tier(tier: Tier) -> &'static str
{
  match tier
  {
    Tier::Small => "claude-3-5-haiku-20241022",
    Tier::Medium => "claude-sonnet-4-20250514",
    Tier::Large => "claude-opus-4-20250514",
  }
}

/// Tokens remaining under a project's monthly ceiling, or `None` for an
/// unlimited project, matching `gateway_router::route`'s
/// `remaining_budget_tokens: Option<i64>` contract.
#[must_use]
pub fn remaining_budget_tokens(budget_tokens: Option<i64>, committed_tokens: i64) -> Option<i64>
{
  Some((budget_tokens? - committed_tokens).max(0))
}

/// Estimate the dollar cost of a not-yet-run completion, for pre-flight
/// admission. `estimated_output_tokens` should be the request's declared
/// `max_tokens` (or a fixed default when the caller didn't specify one).
#[must_use]
pub fn estimate_cost(pricing: &PricingManager, tier: Tier, prompt: &str, estimated_output_tokens: i64) -> Decimal
{
  let tracker = Tracker::new(pricing);
  tracker.cost_for(tier, estimate_tokens(prompt), estimated_output_tokens).unwrap_or(Decimal::ZERO)
}

/// Worst-case token reservation for an agentic task, whose actual token
/// usage is unknown until the CLI child exits. Converts the task's dollar
/// ceiling into tokens at the tier's blended per-token price, so the
/// reservation never under-counts against a caller who happens to spend
/// right up to `max_cost_usd`.
#[must_use]
pub fn worst_case_tokens_for_cost(pricing: &PricingManager, tier: Tier, max_cost_usd: Decimal) -> i64
{
  use rust_decimal::prelude::ToPrimitive;

  let Some(price) = pricing.get(tier)
  else
  {
    return i64::MAX;
  };
  let blended_per_million = (price.input_per_million + price.output_per_million) / Decimal::from(2);
  if blended_per_million.is_zero()
  {
    return i64::MAX;
  }
  let tokens = max_cost_usd * Decimal::from(1_000_000) / blended_per_million;
  tokens.round_dp(0).to_i64().unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn estimate_tokens_floors_at_one()
  {
    assert_eq!(estimate_tokens(""), 1);
    assert_eq!(estimate_tokens("abcd"), 1);
    assert_eq!(estimate_tokens(&"a".repeat(400)), 100);
  }

  #[test]
  fn unlimited_budget_has_no_remaining_tokens_figure()
  {
    assert_eq!(remaining_budget_tokens(None, 0), None);
  }

  #[test]
  fn remaining_tokens_shrinks_as_committed_grows()
  {
    let fresh = remaining_budget_tokens(Some(1000), 0).unwrap();
    let spent = remaining_budget_tokens(Some(1000), 500).unwrap();
    assert!(spent < fresh);
  }

  #[test]
  fn remaining_tokens_never_goes_negative()
  {
    assert_eq!(remaining_budget_tokens(Some(1000), 1500), Some(0));
  }

  #[test]
  fn worst_case_tokens_grows_with_cost_ceiling()
  {
    let pricing = PricingManager::new();
    let small = worst_case_tokens_for_cost(&pricing, Tier::Medium, rust_decimal_macros::dec!(1));
    let large = worst_case_tokens_for_cost(&pricing, Tier::Medium, rust_decimal_macros::dec!(10));
    assert!(large > small);
  }

  #[test]
  fn model_for_tier_round_trips_through_tier_for_model()
  {
    for tier in Tier::ALL
    {
      let model = model_for_tier(tier);
      assert_eq!(gateway_cost::tier_for_model(model), Some(tier));
    }
  }
}
