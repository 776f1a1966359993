//! Row decoding
//!
//! Turns a `may_postgres::Row` into a [`RawRow`] keyed by column name. Column
//! values are decoded by their PostgreSQL type; timestamps become RFC 3339
//! strings and NUMERIC goes through `rust_decimal` so no precision is lost.

use crate::executor::{DriverError, RawRow};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use may_postgres::types::{FromSql, Type};
use may_postgres::Row;
use rust_decimal::Decimal;
use serde_json::Value as Json;

fn get<'a, T>(row: &'a Row, idx: usize, name: &str) -> Result<Option<T>, DriverError>
where
    T: FromSql<'a>,
{
    row.try_get::<usize, Option<T>>(idx).map_err(|e| {
        DriverError::ParseError(format!("column '{name}' could not be decoded: {e}"))
    })
}

fn float_json(v: Option<f64>) -> Json {
    v.and_then(serde_json::Number::from_f64)
        .map_or(Json::Null, Json::Number)
}

/// Decode every column of `row`
///
/// # Errors
///
/// Returns `DriverError::ParseError` for column types with no JSON mapping.
pub fn row_to_raw(row: &Row) -> Result<RawRow, DriverError> {
    let mut out = RawRow::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let name = column.name();
        let ty = column.type_();
        let value = if *ty == Type::BOOL {
            get::<bool>(row, idx, name)?.map_or(Json::Null, Json::Bool)
        } else if *ty == Type::INT2 {
            get::<i16>(row, idx, name)?.map_or(Json::Null, Json::from)
        } else if *ty == Type::INT4 {
            get::<i32>(row, idx, name)?.map_or(Json::Null, Json::from)
        } else if *ty == Type::INT8 {
            get::<i64>(row, idx, name)?.map_or(Json::Null, Json::from)
        } else if *ty == Type::FLOAT4 {
            float_json(get::<f32>(row, idx, name)?.map(f64::from))
        } else if *ty == Type::FLOAT8 {
            float_json(get::<f64>(row, idx, name)?)
        } else if *ty == Type::NUMERIC {
            get::<Decimal>(row, idx, name)?.map_or(Json::Null, |d| Json::String(d.to_string()))
        } else if *ty == Type::TEXT
            || *ty == Type::VARCHAR
            || *ty == Type::BPCHAR
            || *ty == Type::NAME
        {
            get::<String>(row, idx, name)?.map_or(Json::Null, Json::String)
        } else if *ty == Type::UUID {
            get::<uuid::Uuid>(row, idx, name)?.map_or(Json::Null, |u| Json::String(u.to_string()))
        } else if *ty == Type::TIMESTAMPTZ {
            get::<DateTime<Utc>>(row, idx, name)?
                .map_or(Json::Null, |dt| Json::String(dt.to_rfc3339()))
        } else if *ty == Type::TIMESTAMP {
            get::<NaiveDateTime>(row, idx, name)?
                .map_or(Json::Null, |dt| Json::String(dt.and_utc().to_rfc3339()))
        } else if *ty == Type::DATE {
            get::<NaiveDate>(row, idx, name)?.map_or(Json::Null, |d| Json::String(d.to_string()))
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            get::<Json>(row, idx, name)?.unwrap_or(Json::Null)
        } else {
            return Err(DriverError::ParseError(format!(
                "column '{name}' has unsupported type {ty}"
            )));
        };
        out.insert(name.to_string(), value);
    }
    Ok(out)
}

/// Id of a raw row as the cache keys it
///
/// Numeric and string ids are both accepted; anything else has no id.
pub fn id_of(row: &RawRow) -> Option<String> {
    row.get("id").and_then(id_string)
}

/// Cache key for an id-like JSON value
pub fn id_string(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_id_of_numeric_and_string() {
        let numeric = json!({"id": 12, "name": "x"});
        let text = json!({"id": "abc"});
        let missing = json!({"name": "y"});
        assert_eq!(id_of(numeric.as_object().expect("object")), Some("12".to_string()));
        assert_eq!(id_of(text.as_object().expect("object")), Some("abc".to_string()));
        assert_eq!(id_of(missing.as_object().expect("object")), None);
    }

    #[test]
    fn test_id_string_rejects_null() {
        assert_eq!(id_string(&Json::Null), None);
        assert_eq!(id_string(&json!(true)), None);
    }
}
