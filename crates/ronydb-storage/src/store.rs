//! The RowStore trait that backends implement.

use crate::types::*;
use crate::StoreError;

/// A table-oriented store of JSON rows.
///
/// Every call is atomic for the rows it touches in a single table; nothing
/// here spans tables or calls, and callers never assume it does.
#[cfg_attr(feature = "test-support", mockall::automock)]
#[async_trait::async_trait]
pub trait RowStore: Send + Sync {
    /// Read rows matching `query.filter`, projected to `query.columns` and
    /// sorted by `query.order` (insertion order when empty).
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, StoreError>;

    /// Insert one row. A store-generated `id` is assigned when the row has none.
    /// Returns the row as stored.
    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError>;

    /// For each row, merge its columns into the existing row whose
    /// `conflict_key` column has the same value, or insert it.
    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        conflict_key: &str,
    ) -> Result<(), StoreError>;

    /// Merge `patch` into every row matching `filter`. Returns the number of rows changed.
    async fn update(&self, table: &str, patch: &Row, filter: &Filter) -> Result<u64, StoreError>;

    /// Delete every row matching `filter`. Returns the number of rows removed.
    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64, StoreError>;
}
