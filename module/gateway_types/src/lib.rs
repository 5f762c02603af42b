//! Shared types and the error taxonomy used across every gateway crate.
//!
//! All types are feature-gated behind the `enabled` feature, following the
//! rest of this workspace's crates.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
pub mod ids;

#[cfg(feature = "enabled")]
pub use ids::TaskId;

#[cfg(feature = "enabled")]
mod types
{
  use rust_decimal::Decimal;
  use serde::{Deserialize, Serialize};
  use thiserror::Error;

  /// Abstract model class. Physical model names are mapped onto a tier by
  /// substring match (see `gateway_router`/`gateway_cost`).
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
  #[serde(rename_all = "lowercase")]
  pub enum Tier
  {
    Small,
    Medium,
    Large,
  }

  impl Tier
  {
    /// All tiers, in ascending-cost order.
    pub const ALL: [Tier; 3] = [Tier::Small, Tier::Medium, Tier::Large];

    #[must_use]
    pub fn as_str(self) -> &'static str
    {
      match self
      {
        Tier::Small => "small",
        Tier::Medium => "medium",
        Tier::Large => "large",
      }
    }
  }

  impl std::fmt::Display for Tier
  {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
      f.write_str(self.as_str())
    }
  }

  /// Normalized usage for a single completion, produced by `gateway_cost`'s
  /// tracker from a CLI or direct-path JSON output block.
  #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
  pub struct Usage
  {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub model: String,
    pub tier: Tier,
    pub cost_usd: Decimal,
  }

  impl Usage
  {
    #[must_use]
    pub fn total_tokens(&self) -> i64
    {
      self.input_tokens + self.output_tokens
    }
  }

  /// The single error taxonomy shared by every component. `RequestFlow`'s
  /// HTTP adaptation point (`gateway_api::error`) is the only place a
  /// variant becomes a status code; every other call site either handles a
  /// specific variant or propagates it unchanged.
  #[derive(Debug, Clone, Error)]
  pub enum Error
  {
    #[error("missing bearer token")]
    AuthMissing,

    #[error("invalid api key")]
    AuthInvalid,

    #[error("api key has been revoked")]
    AuthRevoked,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("budget exceeded for project {0}")]
    BudgetExceeded(String),

    #[error("bad request: {field}: {reason}")]
    BadRequest
    {
      field: String,
      reason: String,
    },

    #[error("task timed out")]
    TaskTimedOut,

    #[error("task failed: {0}")]
    TaskFailed(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream rejected request: {status}: {body}")]
    UpstreamRejected
    {
      status: u16,
      body: String,
    },

    #[error("upstream rate limited")]
    UpstreamRateLimited,

    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),
  }

  pub type Result<T> = std::result::Result<T, Error>;
}

#[cfg(feature = "enabled")]
pub use types::{Error, Result, Tier, Usage};
