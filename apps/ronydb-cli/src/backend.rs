use std::sync::Arc;

use ronydb_storage::{Filter, Query, Row, RowStore, StoreError};
use ronydb_store_postgres::PostgresRowStore;
use ronydb_store_sqlite::SqliteRowStore;

/// RowStoreBackend abstracts over the SQLite and PostgreSQL row stores
#[derive(Clone)]
pub enum RowStoreBackend {
    Sqlite(Arc<SqliteRowStore>),
    Postgres(Arc<PostgresRowStore>),
}

impl RowStoreBackend {
    /// Open the backend named by the URL scheme.
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let url = normalize_store_url(url);
        if is_postgres(&url) {
            Ok(RowStoreBackend::Postgres(Arc::new(
                PostgresRowStore::open(&url).await?,
            )))
        } else {
            Ok(RowStoreBackend::Sqlite(Arc::new(
                SqliteRowStore::open(&url).await?,
            )))
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            RowStoreBackend::Sqlite(_) => "sqlite",
            RowStoreBackend::Postgres(_) => "postgres",
        }
    }
}

fn is_postgres(url: &str) -> bool {
    url.starts_with("postgres:") || url.starts_with("postgresql:")
}

/// Bare paths are SQLite files, created on first use.
pub fn normalize_store_url(raw: &str) -> String {
    if raw.starts_with("sqlite:") || is_postgres(raw) {
        raw.to_string()
    } else {
        format!("sqlite://{}?mode=rwc", raw)
    }
}

#[async_trait::async_trait]
impl RowStore for RowStoreBackend {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        match self {
            RowStoreBackend::Sqlite(s) => s.select(table, query).await,
            RowStoreBackend::Postgres(s) => s.select(table, query).await,
        }
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        match self {
            RowStoreBackend::Sqlite(s) => s.insert(table, row).await,
            RowStoreBackend::Postgres(s) => s.insert(table, row).await,
        }
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Row>,
        conflict_key: &str,
    ) -> Result<(), StoreError> {
        match self {
            RowStoreBackend::Sqlite(s) => s.upsert(table, rows, conflict_key).await,
            RowStoreBackend::Postgres(s) => s.upsert(table, rows, conflict_key).await,
        }
    }

    async fn update(&self, table: &str, patch: &Row, filter: &Filter) -> Result<u64, StoreError> {
        match self {
            RowStoreBackend::Sqlite(s) => s.update(table, patch, filter).await,
            RowStoreBackend::Postgres(s) => s.update(table, patch, filter).await,
        }
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        match self {
            RowStoreBackend::Sqlite(s) => s.delete(table, filter).await,
            RowStoreBackend::Postgres(s) => s.delete(table, filter).await,
        }
    }
}
