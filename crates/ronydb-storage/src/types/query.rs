use std::cmp::Ordering;

use serde_json::Value;

use crate::{validate_identifier, Row, StoreError};

/// Row predicate understood by every backend.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    /// Numeric column `>=` value; rows without a number never match.
    Gte(String, i64),
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn gte(column: impl Into<String>, value: i64) -> Self {
        Filter::Gte(column.into(), value)
    }

    /// In-process evaluation, used by the memory backend.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(col, value) => row.get(col) == Some(value),
            Filter::Gte(col, value) => match row.get(col) {
                Some(Value::Number(n)) => match n.as_i64() {
                    Some(i) => i >= *value,
                    None => n.as_f64().is_some_and(|f| f >= *value as f64),
                },
                _ => false,
            },
            Filter::And(filters) => filters.iter().all(|f| f.matches(row)),
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        match self {
            Filter::All => Ok(()),
            Filter::Eq(col, _) | Filter::Gte(col, _) => validate_identifier(col),
            Filter::And(filters) => filters.iter().try_for_each(Filter::validate),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

impl Order {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Parameters for a select.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    /// Columns to return; empty means all.
    pub columns: Vec<String>,
    pub filter: Filter,
    pub order: Vec<Order>,
}

impl Query {
    pub fn all() -> Self {
        Self {
            columns: Vec::new(),
            filter: Filter::All,
            order: Vec::new(),
        }
    }

    pub fn columns(mut self, columns: &[&str]) -> Self {
        self.columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn order_by(mut self, order: Order) -> Self {
        self.order.push(order);
        self
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        self.columns
            .iter()
            .try_for_each(|c| validate_identifier(c))?;
        self.filter.validate()?;
        self.order
            .iter()
            .try_for_each(|o| validate_identifier(&o.column))
    }

    /// Sort `rows` in place by this query's order. Stable, so ties keep
    /// their incoming order; rows missing a column sort after those that
    /// have it regardless of direction.
    pub fn sort(&self, rows: &mut [Row]) {
        if self.order.is_empty() {
            return;
        }
        rows.sort_by(|a, b| {
            for o in &self.order {
                let ord = match (a.get(&o.column), b.get(&o.column)) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Greater,
                    (Some(_), None) => Ordering::Less,
                    (Some(x), Some(y)) => {
                        let ord = compare_values(x, y);
                        if o.descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    }
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }
}

fn rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
