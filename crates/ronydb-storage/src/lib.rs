//! Storage abstraction for ronydb.
//!
//! Backend crates (e.g., ronydb-store-sqlite, ronydb-store-postgres) implement
//! [`RowStore`] so the backup and rotation crates only ever see tables of JSON
//! rows addressed by id, never a concrete database engine.

mod store;
mod types;

use thiserror::Error;

pub use store::RowStore;
#[cfg(feature = "test-support")]
pub use store::MockRowStore;
pub use types::*;

/// Uniform error type for all storage backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("invalid row: {0}")]
    InvalidRow(String),
    #[error("backend error: {0}")]
    Backend(String),
}

/// Table and column names are spliced into SQL/JSON paths, so only plain
/// identifiers are accepted.
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidQuery(format!(
            "'{}' is not a valid identifier",
            name
        )))
    }
}
