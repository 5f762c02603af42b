//! Error conversion from storage-layer failures into the gateway's unified
//! error taxonomy.

pub use gateway_types::{Error, Result};

pub(crate) fn storage(e: sqlx::Error) -> Error
{
  Error::StorageUnavailable(e.to_string())
}
