use ronydb_storage::{
    ensure_row_id, key_text, merge_into, project, row_from, row_key, validate_identifier, Filter,
    Query, Row, RowStore, StoreError, ID_COLUMN,
};
use serde_json::Value;
use sqlx::{postgres::PgPoolOptions, types::Json, PgPool, Postgres, QueryBuilder};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

pub struct PostgresRowStore {
    pool: PgPool,
}

impl PostgresRowStore {
    pub async fn open(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
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
    if s.contains("duplicate key") || s.contains("unique constraint") {
        StoreError::Conflict
    } else {
        StoreError::Backend(s)
    }
}

// Column names are validated identifiers, so quoting them as literals is safe.
fn field(column: &str) -> String {
    format!("body->'{}'", column)
}

fn push_filter(qb: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::All => {
            qb.push("TRUE");
        }
        Filter::Eq(column, value) => {
            qb.push(format!("{} = ", field(column)));
            qb.push_bind(Json(value.clone()));
        }
        Filter::Gte(column, value) => {
            let f = field(column);
            qb.push(format!(
                "(CASE WHEN jsonb_typeof({f}) = 'number' THEN ({f})::numeric END) >= "
            ));
            qb.push_bind(*value);
        }
        Filter::And(filters) if filters.is_empty() => {
            qb.push("TRUE");
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

fn scoped<'a>(head: &str, table: &str, filter: &Filter) -> QueryBuilder<'a, Postgres> {
    let mut qb = QueryBuilder::new(head);
    qb.push(" WHERE table_name = ");
    qb.push_bind(table.to_string());
    qb.push(" AND (");
    push_filter(&mut qb, filter);
    qb.push(")");
    qb
}

#[async_trait::async_trait]
impl RowStore for PostgresRowStore {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, StoreError> {
        validate_identifier(table)?;
        query.validate()?;

        let mut qb = scoped("SELECT body FROM row_store", table, &query.filter);
        qb.push(" ORDER BY ");
        for o in &query.order {
            qb.push(format!(
                "{} {} NULLS LAST, ",
                field(&o.column),
                if o.descending { "DESC" } else { "ASC" }
            ));
        }
        qb.push("seq");

        let bodies: Vec<(Json<Value>,)> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        bodies
            .into_iter()
            .map(|(Json(body),)| row_from(body).map(|row| project(row, &query.columns)))
            .collect()
    }

    async fn insert(&self, table: &str, mut row: Row) -> Result<Row, StoreError> {
        validate_identifier(table)?;
        let id = ensure_row_id(&mut row)?;

        sqlx::query("INSERT INTO row_store(table_name, row_id, body) VALUES($1, $2, $3)")
            .bind(table)
            .bind(&id)
            .bind(Json(Value::Object(row.clone())))
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
                Some(v) if key_text(v).is_some() => v.clone(),
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
            qb.push(" ORDER BY seq LIMIT 1 FOR UPDATE");
            let existing: Option<(i64, Json<Value>)> = qb
                .build_query_as()
                .fetch_optional(&mut *tx)
                .await
                .map_err(backend)?;

            match existing {
                Some((seq, Json(body))) => {
                    let mut current = row_from(body)?;
                    merge_into(&mut current, &row);
                    let id = row_key(&current, ID_COLUMN).ok_or_else(|| {
                        StoreError::InvalidRow("merged row lost its id".into())
                    })?;
                    sqlx::query("UPDATE row_store SET row_id = $1, body = $2 WHERE seq = $3")
                        .bind(id)
                        .bind(Json(Value::Object(current)))
                        .bind(seq)
                        .execute(&mut *tx)
                        .await
                        .map_err(backend)?;
                }
                None => {
                    let id = ensure_row_id(&mut row)?;
                    sqlx::query(
                        "INSERT INTO row_store(table_name, row_id, body) VALUES($1, $2, $3)",
                    )
                    .bind(table)
                    .bind(id)
                    .bind(Json(Value::Object(row)))
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
        qb.push(" FOR UPDATE");
        let matched: Vec<(i64, Json<Value>)> = qb
            .build_query_as()
            .fetch_all(&mut *tx)
            .await
            .map_err(backend)?;

        let mut changed = 0u64;
        for (seq, Json(body)) in matched {
            let mut current = row_from(body)?;
            merge_into(&mut current, patch);
            let id = row_key(&current, ID_COLUMN)
                .ok_or_else(|| StoreError::InvalidRow("patch removed the row id".into()))?;
            sqlx::query("UPDATE row_store SET row_id = $1, body = $2 WHERE seq = $3")
                .bind(id)
                .bind(Json(Value::Object(current)))
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
