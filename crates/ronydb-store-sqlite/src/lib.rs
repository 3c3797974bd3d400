use ronydb_storage::{
    ensure_row_id, merge_into, project, row_key, validate_identifier, Filter, Query, Row,
    RowStore, StoreError, ID_COLUMN,
};
use serde_json::Value;
use sqlx::{sqlite::SqlitePoolOptions, QueryBuilder, Sqlite, SqlitePool};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Every logical table lives in one `row_store` table, one JSON document per row.
pub struct SqliteRowStore {
    pool: SqlitePool,
}

impl SqliteRowStore {
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        Self::open("sqlite::memory:").await
    }

    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { pool })
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    let s = e.to_string();
    if s.contains("UNIQUE") {
        StoreError::Conflict
    } else {
        StoreError::Backend(s)
    }
}

fn parse_body(body: &str) -> Result<Row, StoreError> {
    serde_json::from_str(body).map_err(|e| StoreError::Backend(format!("corrupt row body: {}", e)))
}

fn encode_body(row: &Row) -> String {
    Value::Object(row.clone()).to_string()
}

// column names are validated identifiers, safe to splice into the path literal
fn path(column: &str) -> String {
    format!("'$.{}'", column)
}

fn push_eq(qb: &mut QueryBuilder<'_, Sqlite>, column: &str, value: &Value) {
    let p = path(column);
    match value {
        Value::Null => {
            qb.push(format!("json_type(body, {p}) = 'null'"));
        }
        Value::Bool(b) => {
            qb.push(format!("json_type(body, {p}) = '{}'", if *b { "true" } else { "false" }));
        }
        Value::Number(n) => {
            qb.push(format!(
                "json_type(body, {p}) IN ('integer', 'real') AND json_extract(body, {p}) = "
            ));
            match n.as_i64() {
                Some(i) => qb.push_bind(i),
                None => qb.push_bind(n.as_f64().unwrap_or_default()),
            };
        }
        Value::String(s) => {
            qb.push(format!(
                "json_type(body, {p}) = 'text' AND json_extract(body, {p}) = "
            ));
            qb.push_bind(s.clone());
        }
        Value::Array(_) | Value::Object(_) => {
            qb.push(format!("json_extract(body, {p}) = json("));
            qb.push_bind(value.to_string());
            qb.push(")");
        }
    }
}

fn push_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &Filter) {
    match filter {
        Filter::All => {
            qb.push("1 = 1");
        }
        Filter::Eq(column, value) => push_eq(qb, column, value),
        Filter::Gte(column, value) => {
            let p = path(column);
            qb.push(format!(
                "json_type(body, {p}) IN ('integer', 'real') AND json_extract(body, {p}) >= "
            ));
            qb.push_bind(*value);
        }
        Filter::And(filters) if filters.is_empty() => {
            qb.push("1 = 1");
        }
        Filter::And(filters) => {
            for (i, f) in filters.iter().enumerate() {
                if i > 0 {
                    qb.push(" AND ");
                }
                qb.push("(");
                push_filter(qb, f);
                qb.push(")");
            }
        }
    }
}

/// `<head> WHERE table_name = ? AND (<filter>)`
fn scoped<'a>(head: &str, table: &str, filter: &Filter) -> QueryBuilder<'a, Sqlite> {
    let mut qb = QueryBuilder::new(head);
    qb.push(" WHERE table_name = ");
    qb.push_bind(table.to_string());
    qb.push(" AND (");
    push_filter(&mut qb, filter);
    qb.push(")");
    qb
}

#[async_trait::async_trait]
impl RowStore for SqliteRowStore {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        validate_identifier(table)?;
        query.validate()?;

        let mut qb = scoped("SELECT body FROM row_store", table, &query.filter);
        qb.push(" ORDER BY ");
        for o in &query.order {
            let p = path(&o.column);
            qb.push(format!(
                "json_extract(body, {p}) IS NULL, json_extract(body, {p}) {}, ",
                if o.descending { "DESC" } else { "ASC" }
            ));
        }
        qb.push("seq");

        let bodies: Vec<(String,)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        bodies
            .into_iter()
            .map(|(body,)| parse_body(&body).map(|row| project(row, &query.columns)))
            .collect()
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, StoreError> {
        validate_identifier(table)?;
        let id = ensure_row_id(&mut row)?;

        sqlx::query("INSERT INTO row_store(table_name, row_id, body) VALUES(?, ?, ?)")
            .bind(table)
            .bind(&id)
            .bind(encode_body(&row))
            .execute(&self.pool)
            .await
            .map_err(backend)?;

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

        let mut tx = self.pool.begin().await.map_err(backend)?;

        for mut row in rows {
            let key_value = match row.get(conflict_key) {
                Some(v) if ronydb_storage::key_text(v).is_some() => v.clone(),
                _ => {
                    return Err(StoreError::InvalidRow(format!(
                        "row has no usable '{}' value",
                        conflict_key
                    )))
                }
            };

            let mut qb = scoped(
                "SELECT seq, body FROM row_store",
                table,
                &Filter::Eq(conflict_key.to_string(), key_value),
            );
            qb.push(" ORDER BY seq LIMIT 1");
            let existing: Option<(i64, String)> = qb
                .build_query_as()
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;

            match existing {
                Some((seq, body)) => {
                    let mut current = parse_body(&body)?;
                    merge_into(&mut current, &row);
                    let id = row_key(&current, ID_COLUMN).ok_or_else(|| {
                        StoreError::InvalidRow("merged row lost its id".into())
                    })?;
                    sqlx::query("UPDATE row_store SET row_id = ?, body = ? WHERE seq = ?")
                        .bind(id)
                        .bind(encode_body(&current))
                        .bind(seq)
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                }
                None => {
                    let id = ensure_row_id(&mut row)?;
                    sqlx::query("INSERT INTO row_store(table_name, row_id, body) VALUES(?, ?, ?)")
                        .bind(table)
                        .bind(id)
                        .bind(encode_body(&row))
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                }
            }
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn update(&self, table: &str, patch: &Row, filter: &Filter) -> Result<u64, StoreError> {
        validate_identifier(table)?;
        filter.validate()?;

        let mut tx = self.pool.begin().await.map_err(backend)?;

        let mut qb = scoped("SELECT seq, body FROM row_store", table, filter);
        let matched: Vec<(i64, String)> = qb
            .build_query_as()
            .fetch_all(&mut *tx)
            .await
            .map_err(backend)?;

        let mut changed = 0u64;
        for (seq, body) in matched {
            let mut current = parse_body(&body)?;
            merge_into(&mut current, patch);
            let id = row_key(&current, ID_COLUMN)
                .ok_or_else(|| StoreError::InvalidRow("patch removed the row id".into()))?;
            sqlx::query("UPDATE row_store SET row_id = ?, body = ? WHERE seq = ?")
                .bind(id)
                .bind(encode_body(&current))
                .bind(seq)
                .execute(&mut *tx)
                .await
                .map_err(backend)?;
            changed += 1;
        }

        tx.commit().await.map_err(backend)?;
        Ok(changed)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64, StoreError> {
        validate_identifier(table)?;
        filter.validate()?;

        let mut qb = scoped("DELETE FROM row_store", table, filter);
        let result = qb
            .build()
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        Ok(result.rows_affected())
    }
}
