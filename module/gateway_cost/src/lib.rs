//! Cost module: per-tier pricing and the usage Tracker.
//!
//! ## Known pitfalls carried from this workspace's earlier in-memory budget
//! code (now superseded by `gateway_ledger`'s transactional admit/debit):
//! never hold a `DashMap`/lock-guarded entry while calling a method that
//! iterates the same map — sharded locking makes the iteration block on the
//! held entry lock. `gateway_policy`'s in-memory rate-limit fallback and
//! `gateway_registry`'s cache both snapshot under a lock and release it
//! before any further work, for the same reason.

#![cfg_attr(not(feature = "enabled"), allow(unused))]

#[cfg(feature = "enabled")]
pub mod pricing;

#[cfg(feature = "enabled")]
pub mod tracker;

#[cfg(feature = "enabled")]
pub use pricing::{PricingManager, TierPrice};
#[cfg(feature = "enabled")]
pub use tracker::{tier_for_model, Tracker};
