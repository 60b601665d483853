//! SQL text generation for the store. Everything here is pure string work so
//! it can be tested without a database; values always travel as bind
//! parameters, never as interpolated text.

use serde::Serialize;
use serde_json::{Map, Value};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::FromRow;

use super::StoreError;

/// Validate a table or column name before it is quoted into generated SQL.
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}

/// Rewrite `?` placeholders to Postgres `$n` placeholders, numbering from
/// `start`. Clauses must not contain a literal question mark.
pub fn renumber_placeholders(clause: &str, start: usize) -> String {
    let mut out = String::with_capacity(clause.len());
    let mut n = start;

    for c in clause.chars() {
        if c == '?' {
            out.push('$');
            out.push_str(&n.to_string());
            n += 1;
        } else {
            out.push(c);
        }
    }

    out
}

/// Build a SELECT over `table` with optional join fragments, optional eager
/// select expressions, and a WHERE clause that already uses `$n` placeholders.
pub fn select_sql(table: &str, joins: &[String], eager_selects: &[String], clause: &str) -> String {
    let mut columns = format!("\"{}\".*", table);
    for extra in eager_selects {
        columns.push_str(", ");
        columns.push_str(extra);
    }

    let mut query = format!("SELECT {} FROM \"{}\"", columns, table);
    for join in joins {
        query.push(' ');
        query.push_str(join);
    }

    if !clause.is_empty() {
        query.push_str(" WHERE ");
        query.push_str(clause);
    }

    query
}

/// Serialize a record to a JSON object so its fields can drive dynamic
/// INSERT/UPDATE generation.
pub fn to_object<T: Serialize>(item: &T) -> Result<Map<String, Value>, StoreError> {
    match serde_json::to_value(item) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(StoreError::Query(
            "record did not serialize to an object".to_string(),
        )),
        Err(e) => Err(StoreError::Query(e.to_string())),
    }
}

/// Columns that participate in a dynamic write: everything except `id`
/// (assigned by the database) and null fields (left to column defaults on
/// insert, untouched on update). Sorted for deterministic statement text.
fn writable_columns(record: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut columns: Vec<(&String, &Value)> = record
        .iter()
        .filter(|(name, value)| name.as_str() != "id" && !value.is_null())
        .collect();
    columns.sort_by_key(|(name, _)| name.as_str());
    columns
}

/// `INSERT INTO "t" (...) VALUES ($1, ...) RETURNING *` plus the bind values.
pub fn insert_sql(
    table: &str,
    record: &Map<String, Value>,
) -> Result<(String, Vec<Value>), StoreError> {
    let columns = writable_columns(record);
    if columns.is_empty() {
        return Err(StoreError::Query("no insertable columns".to_string()));
    }

    let names = columns
        .iter()
        .map(|(name, _)| format!("\"{}\"", name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = (1..=columns.len())
        .map(|n| format!("${}", n))
        .collect::<Vec<_>>()
        .join(", ");

    let query = format!(
        "INSERT INTO \"{}\" ({}) VALUES ({}) RETURNING *",
        table, names, placeholders
    );
    let params = columns.into_iter().map(|(_, value)| value.clone()).collect();

    Ok((query, params))
}

/// `UPDATE "t" SET ... WHERE "id" = $1 RETURNING *` plus the bind values.
/// The id itself is bound separately as `$1`; field values start at `$2`.
pub fn update_sql(
    table: &str,
    record: &Map<String, Value>,
) -> Result<(String, Vec<Value>), StoreError> {
    let columns = writable_columns(record);
    if columns.is_empty() {
        return Err(StoreError::Query("no updatable columns".to_string()));
    }

    let assignments = columns
        .iter()
        .enumerate()
        .map(|(i, (name, _))| format!("\"{}\" = ${}", name, i + 2))
        .collect::<Vec<_>>()
        .join(", ");

    let query = format!(
        "UPDATE \"{}\" SET {} WHERE \"id\" = $1 RETURNING *",
        table, assignments
    );
    let params = columns.into_iter().map(|(_, value)| value.clone()).collect();

    Ok((query, params))
}

/// Bind a JSON value onto a typed query. Objects and arrays go down as JSONB.
pub fn bind_value<'q, O>(
    q: sqlx::query::QueryAs<'q, sqlx::Postgres, O, PgArguments>,
    v: &'q Value,
) -> sqlx::query::QueryAs<'q, sqlx::Postgres, O, PgArguments>
where
    O: for<'r> FromRow<'r, PgRow>,
{
    match v {
        Value::Null => {
            let none: Option<String> = None;
            q.bind(none)
        }
        Value::Bool(b) => q.bind(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(u) = n.as_u64() {
                q.bind(u as i64)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(n.to_string())
            }
        }
        Value::String(s) => q.bind(s),
        Value::Array(_) | Value::Object(_) => q.bind(v.clone()),
    }
}
