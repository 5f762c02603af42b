//! Deterministic tier selection. A pure function: same inputs always
//! produce the same tier and reason, no I/O, no shared state — thresholds
//! are passed in, not reached for through a global, so tests can pin
//! them.

use gateway_types::Tier;

/// Thresholds the algorithm evaluates against. Defaults match the
/// documented approximate values; `gateway_config` can override them for
/// tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouterThresholds
{
  pub low_water: i64,
  pub big_ctx_threshold: i64,
  pub short_len: usize,
  pub mid_water: i64,
}

impl Default for RouterThresholds
{
  fn default() -> Self
  {
    Self { low_water: 1000, big_ctx_threshold: 10_000, short_len: 100, mid_water: 5000 }
  }
}

const SHORT_KEYWORDS: [&str; 7] = ["list", "count", "format", "show", "get", "create", "add"];
const HEAVY_KEYWORDS: [&str; 6] = ["analyze", "architect", "debug", "design", "implement", "optimize"];

/// Result of routing a request: the chosen tier and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision
{
  pub tier: Tier,
  pub reason: String,
}

/// Choose a tier for a request. `remaining_budget_tokens` is `None` for an
/// unlimited project.
#[must_use]
pub fn route(prompt: &str, context_size_tokens: i64, remaining_budget_tokens: Option<i64>, thresholds: RouterThresholds) -> RouteDecision
{
  if let Some(remaining) = remaining_budget_tokens
  {
    if remaining <= thresholds.low_water
    {
      return RouteDecision {
        tier: Tier::Small,
        reason: format!("remaining budget {remaining} tokens is below low_water {}", thresholds.low_water),
      };
    }
  }

  if context_size_tokens > thresholds.big_ctx_threshold
  {
    return RouteDecision {
      tier: Tier::Large,
      reason: format!("context size {context_size_tokens} exceeds big_ctx_threshold {}", thresholds.big_ctx_threshold),
    };
  }

  let lower_prompt = prompt.to_ascii_lowercase();

  if prompt.len() < thresholds.short_len && SHORT_KEYWORDS.iter().any(|kw| lower_prompt.contains(kw))
  {
    return RouteDecision {
      tier: Tier::Small,
      reason: format!("prompt under {} bytes matches a short-task keyword", thresholds.short_len),
    };
  }

  let remaining_ok = match remaining_budget_tokens
  {
    Some(r) => r >= thresholds.mid_water,
    None => true,
  };
  if remaining_ok && HEAVY_KEYWORDS.iter().any(|kw| lower_prompt.contains(kw))
  {
    return RouteDecision {
      tier: Tier::Medium,
      reason: "prompt matches a heavy-task keyword and budget allows medium tier".to_string(),
    };
  }

  RouteDecision { tier: Tier::Medium, reason: "default tier".to_string() }
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn low_remaining_budget_forces_small_regardless_of_context()
  {
    let decision = route("analyze this codebase", 50_000, Some(500), RouterThresholds::default());
    assert_eq!(decision.tier, Tier::Small);
  }

  #[test]
  fn large_context_wins_over_keyword_rules()
  {
    let decision = route("list the files", 20_000, Some(100_000), RouterThresholds::default());
    assert_eq!(decision.tier, Tier::Large);
  }

  #[test]
  fn short_prompt_with_keyword_routes_small()
  {
    let decision = route("list files", 10, Some(100_000), RouterThresholds::default());
    assert_eq!(decision.tier, Tier::Small);
  }

  #[test]
  fn heavy_keyword_with_sufficient_budget_routes_medium()
  {
    let decision = route("please debug the failing test suite in depth", 10, Some(100_000), RouterThresholds::default());
    assert_eq!(decision.tier, Tier::Medium);
  }

  #[test]
  fn heavy_keyword_without_sufficient_budget_falls_to_default()
  {
    let decision = route("please debug the failing test suite in depth", 10, Some(4000), RouterThresholds::default());
    assert_eq!(decision.tier, Tier::Medium);
    assert_eq!(decision.reason, "default tier");
  }

  #[test]
  fn unlimited_budget_never_triggers_low_water_rule()
  {
    let decision = route("hello", 10, None, RouterThresholds::default());
    assert_eq!(decision.tier, Tier::Medium);
  }

  #[test]
  fn remaining_exactly_at_low_water_routes_small()
  {
    let thresholds = RouterThresholds::default();
    let decision = route("hello", 10, Some(thresholds.low_water), thresholds);
    assert_eq!(decision.tier, Tier::Small);

    let decision = route("hello", 10, Some(thresholds.low_water + 1), thresholds);
    assert_ne!(decision.reason, format!("remaining budget {} tokens is below low_water {}", thresholds.low_water + 1, thresholds.low_water));
  }
}
