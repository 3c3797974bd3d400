use serde_json::{Map, Value};
use uuid::Uuid;

use crate::StoreError;

/// A single table row: column name -> JSON value.
pub type Row = Map<String, Value>;

/// Column every row is keyed by.
pub const ID_COLUMN: &str = "id";

/// Convert a JSON object into a [`Row`].
pub fn row_from(value: Value) -> Result<Row, StoreError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidRow(format!(
            "expected a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

/// Canonical text form of a key value. Only strings and integers qualify.
pub fn key_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

/// The key of `row` under `column`, if it has a usable one.
pub fn row_key(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(key_text)
}

/// Time-ordered id for rows inserted without one.
pub fn new_row_id() -> String {
    Uuid::now_v7().to_string()
}

/// Give `row` a generated id when it has none and return its key text.
pub fn ensure_row_id(row: &mut Row) -> Result<String, StoreError> {
    match row.get(ID_COLUMN) {
        None | Some(Value::Null) => {
            let id = new_row_id();
            row.insert(ID_COLUMN.to_string(), Value::String(id.clone()));
            Ok(id)
        }
        Some(v) => key_text(v).ok_or_else(|| {
            StoreError::InvalidRow("id must be a non-empty string or an integer".into())
        }),
    }
}

/// Overwrite `target`'s columns with those present in `patch`.
pub fn merge_into(target: &mut Row, patch: &Row) {
    for (k, v) in patch {
        target.insert(k.clone(), v.clone());
    }
}

/// Keep only `columns` (all columns when empty).
pub fn project(row: Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row;
    }
    row.into_iter()
        .filter(|(k, _)| columns.iter().any(|c| c == k))
        .collect()
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
