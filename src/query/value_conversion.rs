//! Value conversion from SeaQuery to may_postgres.
//!
//! SeaQuery builds statements with a `Values` list; may_postgres wants
//! `ToSql` references. Each value is first converted into an owned boxed
//! parameter, then borrowed for the duration of a closure so the references
//! stay valid while the statement runs.
//!
//! Nulls keep the Rust type of their variant (`String(None)` binds as a null
//! `text`, `BigInt(None)` as a null `int8`) so PostgreSQL type checks pass.

use crate::executor::DriverError;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use may_postgres::types::ToSql;
use rust_decimal::Decimal;
use sea_query::Value;

/// An owned statement parameter
pub type BoxedParam = Box<dyn ToSql + Sync>;

fn boxed<T: ToSql + Sync + 'static>(value: T) -> BoxedParam {
    Box::new(value)
}

/// Convert one SeaQuery value into an owned `ToSql` parameter.
///
/// # Errors
///
/// Returns `DriverError::QueryError` for value types with no PostgreSQL mapping
/// here, or unsigned values that do not fit in `i64`.
pub fn to_param(value: &Value) -> Result<BoxedParam, DriverError> {
    let param = match value {
        Value::Bool(v) => boxed(*v),
        Value::TinyInt(v) => boxed(v.map(i16::from)),
        Value::SmallInt(v) => boxed(*v),
        Value::Int(v) => boxed(*v),
        Value::BigInt(v) => boxed(*v),
        Value::TinyUnsigned(v) => boxed(v.map(i16::from)),
        Value::SmallUnsigned(v) => boxed(v.map(i32::from)),
        Value::Unsigned(v) => boxed(v.map(i64::from)),
        Value::BigUnsigned(Some(u)) => {
            let converted = i64::try_from(*u).map_err(|_| {
                DriverError::QueryError(format!(
                    "BigUnsigned value {u} exceeds i64::MAX, cannot be safely cast to i64"
                ))
            })?;
            boxed(Some(converted))
        }
        Value::BigUnsigned(None) => boxed(None::<i64>),
        Value::Float(v) => boxed(*v),
        Value::Double(v) => boxed(*v),
        Value::Char(v) => boxed(v.map(|c| c.to_string())),
        Value::String(Some(s)) => boxed(Some(String::clone(s))),
        Value::String(None) => boxed(None::<String>),
        Value::Bytes(Some(b)) => boxed(Some(Vec::<u8>::clone(b))),
        Value::Bytes(None) => boxed(None::<Vec<u8>>),
        Value::Json(Some(j)) => boxed(Some(serde_json::Value::clone(j))),
        Value::Json(None) => boxed(None::<serde_json::Value>),
        Value::Uuid(Some(u)) => boxed(Some(uuid::Uuid::clone(u))),
        Value::Uuid(None) => boxed(None::<uuid::Uuid>),
        Value::ChronoDateTimeUtc(Some(dt)) => boxed(Some(DateTime::<Utc>::clone(dt))),
        Value::ChronoDateTimeUtc(None) => boxed(None::<DateTime<Utc>>),
        Value::ChronoDateTime(Some(dt)) => boxed(Some(NaiveDateTime::clone(dt))),
        Value::ChronoDateTime(None) => boxed(None::<NaiveDateTime>),
        Value::ChronoDate(Some(d)) => boxed(Some(NaiveDate::clone(d))),
        Value::ChronoDate(None) => boxed(None::<NaiveDate>),
        Value::Decimal(Some(d)) => boxed(Some(Decimal::clone(d))),
        Value::Decimal(None) => boxed(None::<Decimal>),
        _ => {
            return Err(DriverError::QueryError(format!(
                "Unsupported value type in query: {value:?}"
            )));
        }
    };
    Ok(param)
}

/// Convert SeaQuery values to may_postgres parameters and run `f` with them.
///
/// # Errors
///
/// Returns the conversion error, or whatever `f` returns.
pub fn with_converted_params<F, R>(values: &sea_query::Values, f: F) -> Result<R, DriverError>
where
    F: FnOnce(&[&dyn ToSql]) -> Result<R, DriverError>,
{
    let owned = values
        .iter()
        .map(to_param)
        .collect::<Result<Vec<_>, _>>()?;
    let params: Vec<&dyn ToSql> = owned.iter().map(|p| p.as_ref() as &dyn ToSql).collect();
    f(&params)
}

/// JSON rendering of a parameter, used for query statistics and the mock driver
pub fn value_to_json(value: &Value) -> serde_json::Value {
    use serde_json::Value as Json;

    fn num<T: Into<serde_json::Number>>(v: Option<T>) -> Json {
        v.map_or(Json::Null, |n| Json::Number(n.into()))
    }
    fn float(v: Option<f64>) -> Json {
        v.and_then(serde_json::Number::from_f64)
            .map_or(Json::Null, Json::Number)
    }

    match value {
        Value::Bool(v) => v.map_or(Json::Null, Json::Bool),
        Value::TinyInt(v) => num(*v),
        Value::SmallInt(v) => num(*v),
        Value::Int(v) => num(*v),
        Value::BigInt(v) => num(*v),
        Value::TinyUnsigned(v) => num(*v),
        Value::SmallUnsigned(v) => num(*v),
        Value::Unsigned(v) => num(*v),
        Value::BigUnsigned(v) => num(*v),
        Value::Float(v) => float(v.map(f64::from)),
        Value::Double(v) => float(*v),
        Value::Char(v) => v.map_or(Json::Null, |c| Json::String(c.to_string())),
        Value::String(Some(s)) => Json::String(String::clone(s)),
        Value::Json(Some(j)) => serde_json::Value::clone(j),
        Value::Uuid(Some(u)) => Json::String(u.to_string()),
        Value::ChronoDateTimeUtc(Some(dt)) => Json::String(dt.to_rfc3339()),
        Value::ChronoDateTime(Some(dt)) => Json::String(dt.to_string()),
        Value::ChronoDate(Some(d)) => Json::String(d.to_string()),
        Value::Decimal(Some(d)) => Json::String(d.to_string()),
        Value::String(None)
        | Value::Json(None)
        | Value::Uuid(None)
        | Value::ChronoDateTimeUtc(None)
        | Value::ChronoDateTime(None)
        | Value::ChronoDate(None)
        | Value::Decimal(None)
        | Value::Bytes(None) => Json::Null,
        other => Json::String(format!("{other:?}")),
    }
}
