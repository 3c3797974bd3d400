//! In-memory row store.
//!
//! This implementation is suitable for:
//! - Development and testing
//! - Dry runs of backup and rotation logic against copied data
//!
//! Nothing is persisted; dropping the store drops every table.

use async_trait::async_trait;
use ronydb_storage::{
    ensure_row_id, merge_into, project, row_key, validate_identifier, Filter, Query, Row,
    RowStore, StoreError, ID_COLUMN,
};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Tables are kept as insertion-ordered vectors of rows.
pub struct MemoryRowStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
}

impl MemoryRowStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryRowStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RowStore for MemoryRowStore {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        validate_identifier(table)?;
        query.validate()?;

        let tables = self.tables.read().await;
        let mut rows: Vec<Row> = tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| query.filter.matches(r))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        query.sort(&mut rows);

        Ok(rows
            .into_iter()
            .map(|r| project(r, &query.columns))
            .collect())
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, StoreError> {
        validate_identifier(table)?;
        let id = ensure_row_id(&mut row)?;

        let mut tables = self.tables.write().await;
        let rows = tables.entry(table.to_string()).or_default();
        if rows.iter().any(|r| row_key(r, ID_COLUMN).as_deref() == Some(id.as_str())) {
            return Err(StoreError::Conflict);
        }
        rows.push(row.clone());
        Ok(row)
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        conflict_key: &str,
    ) -> Result<(), StoreError> {
        validate_identifier(table)?;
        validate_identifier(conflict_key)?;

        let mut tables = self.tables.write().await;
        // apply to a copy so a bad row leaves the table untouched
        let mut staged = tables.get(table).cloned().unwrap_or_default();

        for mut row in rows {
            let key = row_key(&row, conflict_key).ok_or_else(|| {
                StoreError::InvalidRow(format!("row has no usable '{}' value", conflict_key))
            })?;
            match staged
                .iter_mut()
                .find(|r| row_key(r, conflict_key).as_deref() == Some(key.as_str()))
            {
                Some(existing) => merge_into(existing, &row),
                None => {
                    ensure_row_id(&mut row)?;
                    staged.push(row);
                }
            }
        }

        tables.insert(table.to_string(), staged);
        Ok(())
    }

    async fn update(&self, table: &str, patch: &Row, filter: &Filter) -> Result<u64, StoreError> {
        validate_identifier(table)?;
        filter.validate()?;

        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let mut changed = 0;
        for row in rows.iter_mut().filter(|r| filter.matches(r)) {
            merge_into(row, patch);
            changed += 1;
        }
        Ok(changed)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        validate_identifier(table)?;
        filter.validate()?;

        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !filter.matches(r));
        Ok((before - rows.len()) as u64)
    }
}
