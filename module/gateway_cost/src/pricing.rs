//! Per-tier pricing table.
//!
//! Prices are fixed at build time but remain overridable for tests: the
//! table is held behind an `ArcSwap` so a test can hot-swap it without a
//! lock, the same pattern this workspace already uses for its (retired)
//! per-model LiteLLM pricing table.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use gateway_types::Tier;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Price per one million tokens, input and output, for one tier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierPrice
{
  pub input_per_million: Decimal,
  pub output_per_million: Decimal,
}

fn default_table() -> HashMap<Tier, TierPrice>
{
  let mut m = HashMap::new();
  m.insert(
    Tier::Small,
    TierPrice { input_per_million: dec!(0.25), output_per_million: dec!(1.25) },
  );
  m.insert(
    Tier::Medium,
    TierPrice { input_per_million: dec!(3.0), output_per_million: dec!(15.0) },
  );
  m.insert(
    Tier::Large,
    TierPrice { input_per_million: dec!(15.0), output_per_million: dec!(75.0) },
  );
  m
}

/// Holds the active per-tier pricing table and lets it be swapped wholesale,
/// e.g. from `GATEWAY_PRICING_OVERRIDE` at startup or from a test fixture.
#[derive(Debug)]
pub struct PricingManager
{
  table: ArcSwap<HashMap<Tier, TierPrice>>,
}

impl PricingManager
{
  /// Build a manager seeded with the built-in default table.
  #[must_use]
  pub fn new() -> Self
  {
    Self { table: ArcSwap::from_pointee(default_table()) }
  }

  /// Replace the whole table atomically. Readers in flight see either the
  /// old or the new table, never a partial mix.
  pub fn load(&self, table: HashMap<Tier, TierPrice>)
  {
    self.table.store(Arc::new(table));
  }

  /// Price for a tier, if configured.
  #[must_use]
  pub fn get(&self, tier: Tier) -> Option<TierPrice>
  {
    self.table.load().get(&tier).copied()
  }
}

impl Default for PricingManager
{
  fn default() -> Self
  {
    Self::new()
  }
}
