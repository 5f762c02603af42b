//! One module per endpoint group, matching the HTTP contract.

pub mod batch;
pub mod capabilities;
pub mod chat;
pub mod health;
pub mod process;
pub mod providers;
pub mod route;
pub mod stream;
pub mod task;
pub mod usage;
