//! Durable state for the gateway: projects, API keys, usage history, rate
//! limit windows, capability grants and the audit trail.
//!
//! The central invariant is that usage is never double-counted and never
//! silently lost: admission and debit both go through a single `SQLite`
//! transaction per call, and usage totals are always a fresh
//! `COALESCE(SUM(...), 0)` over `usage_log` rather than a separately
//! maintained running counter that could drift from the rows it summarizes.

#![warn(missing_docs)]

pub mod error;
pub mod limit_enforcer;
pub mod storage;
pub mod token_generator;
pub mod usage_tracker;

pub use error::{Error, Result};
pub use limit_enforcer::RateLimitDecision;
pub use storage::{AdmissionToken, ApiKeyRecord, Ledger, PermissionProfile, ProjectRecord};
pub use token_generator::TokenGenerator;
pub use usage_tracker::{TierUsage, UsageWindow};
