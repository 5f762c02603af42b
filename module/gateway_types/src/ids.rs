//! Type-safe entity identifier for in-memory tasks
//!
//! Other entities (`project_id`, `api_key`) are opaque strings per the data
//! model — they are looked up by equality against a store and never need
//! parsing or generation. `TaskId` is the one identifier minted by this
//! process itself (`WorkerPool::submit`), so it gets the typed-prefix
//! treatment: `task_<uuid>`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier for an in-flight or completed `WorkerPool` task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId
{
  const PREFIX: &'static str = "task_";

  /// Mint a fresh task id.
  #[must_use]
  pub fn generate() -> Self
  {
    Self(format!("{}{}", Self::PREFIX, uuid::Uuid::new_v4()))
  }

  /// Borrow the id as a plain string, e.g. for use as a map key or in logs.
  #[must_use]
  pub fn as_str(&self) -> &str
  {
    &self.0
  }
}

impl fmt::Display for TaskId
{
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
  {
    f.write_str(&self.0)
  }
}

impl From<TaskId> for String
{
  fn from(id: TaskId) -> Self
  {
    id.0
  }
}
