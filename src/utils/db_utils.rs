use chrono::NaiveDate;
use serde_json::Value;
use sqlx::SqliteConnection;

use crate::error::{HrError, HrResult};
use crate::utils::date_parser::parse_date_value;
use crate::utils::validator::coerce_number;

/// How a patchable column converts its JSON value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Text that may be cleared with `null`.
    NullableText,
    Text,
    Real,
    Date,
}

/// SQL bindable value
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Real(f64),
    Date(NaiveDate),
    I64(i64),
    Null,
}

#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

fn convert(column: &str, kind: ColumnKind, value: &Value) -> HrResult<SqlValue> {
    if value.is_null() {
        return match kind {
            ColumnKind::NullableText => Ok(SqlValue::Null),
            _ => Err(HrError::validation(column, "must not be null")),
        };
    }
    match kind {
        ColumnKind::NullableText | ColumnKind::Text => match value {
            Value::String(s) => Ok(SqlValue::Text(s.trim().to_string())),
            other => Ok(SqlValue::Text(other.to_string())),
        },
        ColumnKind::Real => coerce_number(value)
            .map(SqlValue::Real)
            .ok_or_else(|| HrError::validation(column, format!("expected a number, got {value}"))),
        ColumnKind::Date => parse_date_value(value)
            .map(SqlValue::Date)
            .ok_or_else(|| HrError::validation(column, format!("invalid date: {value}"))),
    }
}

/// Builds `UPDATE <table> SET ... WHERE <id_column> = ?` from a JSON patch.
/// Only columns listed in `allowed` may be written.
pub fn build_update_sql(
    table: &str,
    payload: &Value,
    allowed: &[(&str, ColumnKind)],
    id_column: &str,
    id_value: i64,
) -> HrResult<SqlUpdate> {
    let obj = payload
        .as_object()
        .ok_or_else(|| HrError::validation("body", "payload must be a JSON object"))?;

    if obj.is_empty() {
        return Err(HrError::validation("body", "no fields provided for update"));
    }

    let mut columns = Vec::with_capacity(obj.len());
    let mut values = Vec::with_capacity(obj.len() + 1);

    for (key, value) in obj {
        let (column, kind) = allowed
            .iter()
            .find(|(name, _)| name == key)
            .ok_or_else(|| HrError::validation(key.as_str(), "field cannot be updated"))?;
        columns.push(format!("{column} = ?"));
        values.push(convert(column, *kind, value)?);
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        table,
        columns.join(", "),
        id_column
    );
    values.push(SqlValue::I64(id_value));

    Ok(SqlUpdate { sql, values })
}

pub async fn execute_update(conn: &mut SqliteConnection, update: SqlUpdate) -> HrResult<u64> {
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::Text(v) => query.bind(v),
            SqlValue::Real(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
            SqlValue::I64(v) => query.bind(v),
            SqlValue::Null => query.bind(None::<String>),
        };
    }

    let result = query.execute(&mut *conn).await?;
    Ok(result.rows_affected())
}
