//! Tracker: converts a CLI/direct-path JSON usage block into a normalized
//! [`Usage`].

use gateway_types::{Error, Result, Tier, Usage};
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use serde::Deserialize;
use serde_json::Value;

use crate::pricing::PricingManager;

/// Raw shape expected from the CLI/direct-path's JSON output: at least
/// `usage.input_tokens`, `usage.output_tokens`, and a free-form `model`.
#[derive(Debug, Deserialize)]
struct RawUsage
{
  #[serde(default)]
  model: Option<String>,
  usage: RawUsageBlock,
}

#[derive(Debug, Deserialize)]
struct RawUsageBlock
{
  input_tokens: Option<i64>,
  output_tokens: Option<i64>,
}

/// Parses raw completion output and prices it against a [`PricingManager`].
pub struct Tracker<'a>
{
  pricing: &'a PricingManager,
}

impl<'a> Tracker<'a>
{
  #[must_use]
  pub fn new(pricing: &'a PricingManager) -> Self
  {
    Self { pricing }
  }

  /// Parse a raw JSON usage block and price it.
  ///
  /// # Errors
  /// `InvalidJSON` if `raw` does not parse; `MissingField` if a required
  /// field is absent; `UnknownModel` if the model name does not match any
  /// known tier.
  pub fn parse(&self, raw: &str) -> Result<Usage>
  {
    let value: Value = serde_json::from_str(raw)
      .map_err(|e| Error::BadRequest { field: "usage".into(), reason: format!("invalid JSON: {e}") })?;
    let parsed: RawUsage = serde_json::from_value(value)
      .map_err(|e| Error::BadRequest { field: "usage".into(), reason: format!("missing field: {e}") })?;

    let model = parsed
      .model
      .ok_or_else(|| Error::BadRequest { field: "model".into(), reason: "missing field: model".into() })?;
    let input_tokens = parsed
      .usage
      .input_tokens
      .ok_or_else(|| Error::BadRequest { field: "usage.input_tokens".into(), reason: "missing field".into() })?;
    let output_tokens = parsed
      .usage
      .output_tokens
      .ok_or_else(|| Error::BadRequest { field: "usage.output_tokens".into(), reason: "missing field".into() })?;

    let tier = tier_for_model(&model).ok_or_else(|| Error::UnknownModel(model.clone()))?;
    let cost_usd = self.cost_for(tier, input_tokens, output_tokens)?;

    Ok(Usage { input_tokens, output_tokens, model, tier, cost_usd })
  }

  /// Exact-decimal cost for `(input_tokens, output_tokens)` at `tier`,
  /// rounded half-even to 6 decimal places. Floating point is never used:
  /// debits sum over many rows and drift must be exactly zero.
  ///
  /// # Errors
  /// `UnknownModel` is not returned here; callers that already have a tier
  /// only fail if pricing for that tier is unconfigured, reported the same
  /// way since both indicate a misconfigured deployment.
  pub fn cost_for(&self, tier: Tier, input_tokens: i64, output_tokens: i64) -> Result<Decimal>
  {
    let price = self
      .pricing
      .get(tier)
      .ok_or_else(|| Error::UnknownModel(format!("no pricing configured for tier {tier}")))?;

    let million = Decimal::from(1_000_000);
    let input_cost = Decimal::from(input_tokens) * price.input_per_million / million;
    let output_cost = Decimal::from(output_tokens) * price.output_per_million / million;

    Ok((input_cost + output_cost).round_dp_with_strategy(6, RoundingStrategy::MidpointNearestEven))
  }
}

/// Case-insensitive substring match against each tier's canonical names.
/// First match wins; order matters only in the (currently impossible) case
/// of an identifier containing two canonical substrings.
#[must_use]
pub fn tier_for_model(model: &str) -> Option<Tier>
{
  let lower = model.to_ascii_lowercase();
  if lower.contains("haiku")
  {
    Some(Tier::Small)
  }
  else if lower.contains("sonnet")
  {
    Some(Tier::Medium)
  }
  else if lower.contains("opus")
  {
    Some(Tier::Large)
  }
  else
  {
    None
  }
}

#[cfg(test)]
mod tests
{
  use super::*;

  #[test]
  fn tier_derivation_is_case_insensitive()
  {
    assert_eq!(tier_for_model("claude-3-5-HAIKU-20241022"), Some(Tier::Small));
    assert_eq!(tier_for_model("claude-sonnet-4"), Some(Tier::Medium));
    assert_eq!(tier_for_model("Claude-Opus-4"), Some(Tier::Large));
    assert_eq!(tier_for_model("gpt-4-turbo"), None);
  }

  #[test]
  fn parse_computes_cost_from_tier_pricing()
  {
    let pricing = PricingManager::new();
    let tracker = Tracker::new(&pricing);
    let raw = r#"{"model":"claude-3-5-haiku-20241022","usage":{"input_tokens":100000,"output_tokens":50000}}"#;

    let usage = tracker.parse(raw).expect("parses");
    assert_eq!(usage.tier, Tier::Small);
    assert_eq!(usage.total_tokens(), 150_000);
    // 100_000 * 0.25/1e6 + 50_000 * 1.25/1e6 = 0.025 + 0.0625 = 0.0875
    assert_eq!(usage.cost_usd.to_string(), "0.0875");
  }

  #[test]
  fn parse_rejects_unknown_model()
  {
    let pricing = PricingManager::new();
    let tracker = Tracker::new(&pricing);
    let raw = r#"{"model":"gpt-4-turbo","usage":{"input_tokens":1,"output_tokens":1}}"#;

    let err = tracker.parse(raw).unwrap_err();
    assert!(matches!(err, Error::UnknownModel(_)));
  }

  #[test]
  fn parse_rejects_missing_field()
  {
    let pricing = PricingManager::new();
    let tracker = Tracker::new(&pricing);
    let raw = r#"{"model":"claude-3-5-haiku","usage":{"input_tokens":1}}"#;

    let err = tracker.parse(raw).unwrap_err();
    assert!(matches!(err, Error::BadRequest { .. }));
  }

  #[test]
  fn parse_rejects_invalid_json()
  {
    let pricing = PricingManager::new();
    let tracker = Tracker::new(&pricing);

    let err = tracker.parse("not json").unwrap_err();
    assert!(matches!(err, Error::BadRequest { .. }));
  }
}
