//! Scalar field definitions and their converters

use crate::value::FieldValue;
use chrono::{DateTime, Utc};
use sea_query::Value;
use serde_json::Value as Json;
use std::fmt;
use std::sync::Arc;

/// Two-way conversion for a field type the crate does not know about
///
/// `to_type` receives the non-null raw column value; `from_type` receives the
/// value to bind, which may be [`FieldValue::Null`].
pub trait FieldConverter: Send + Sync + fmt::Debug {
    fn to_type(&self, raw: &Json) -> Result<FieldValue, String>;
    fn from_type(&self, value: &FieldValue) -> Result<Value, String>;
}

/// Column type of a field
#[derive(Debug, Clone)]
pub enum FieldType {
    /// Integer primary/foreign key, surfaced as a string
    Id,
    /// UUID, surfaced as a string
    Uuid,
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Json,
    Custom(Arc<dyn FieldConverter>),
}

fn mismatch(expected: &str, raw: &Json) -> String {
    format!("expected {expected}, got {raw}")
}

impl FieldType {
    /// Raw (non-null) column value to a typed value
    pub fn decode(&self, raw: &Json) -> Result<FieldValue, String> {
        match self {
            FieldType::Id => match raw {
                Json::String(s) => Ok(FieldValue::Text(s.clone())),
                Json::Number(n) => Ok(FieldValue::Text(n.to_string())),
                _ => Err(mismatch("an id", raw)),
            },
            FieldType::Uuid => match raw {
                Json::String(s) => uuid::Uuid::parse_str(s)
                    .map(|u| FieldValue::Text(u.to_string()))
                    .map_err(|e| format!("invalid uuid '{s}': {e}")),
                _ => Err(mismatch("a uuid", raw)),
            },
            FieldType::Text => raw
                .as_str()
                .map(|s| FieldValue::Text(s.to_string()))
                .ok_or_else(|| mismatch("text", raw)),
            FieldType::Integer => match raw {
                Json::Number(n) => n
                    .as_i64()
                    .map(FieldValue::Integer)
                    .ok_or_else(|| mismatch("an integer", raw)),
                Json::String(s) => s
                    .parse::<i64>()
                    .map(FieldValue::Integer)
                    .map_err(|_| mismatch("an integer", raw)),
                _ => Err(mismatch("an integer", raw)),
            },
            FieldType::Float => match raw {
                Json::Number(n) => n
                    .as_f64()
                    .map(FieldValue::Float)
                    .ok_or_else(|| mismatch("a number", raw)),
                // NUMERIC columns arrive as strings
                Json::String(s) => s
                    .parse::<f64>()
                    .map(FieldValue::Float)
                    .map_err(|_| mismatch("a number", raw)),
                _ => Err(mismatch("a number", raw)),
            },
            FieldType::Boolean => raw
                .as_bool()
                .map(FieldValue::Bool)
                .ok_or_else(|| mismatch("a boolean", raw)),
            FieldType::Timestamp => match raw {
                Json::String(s) => DateTime::parse_from_rfc3339(s)
                    .map(|dt| FieldValue::Timestamp(dt.with_timezone(&Utc)))
                    .map_err(|e| format!("invalid timestamp '{s}': {e}")),
                _ => Err(mismatch("a timestamp", raw)),
            },
            FieldType::Json => Ok(FieldValue::Json(raw.clone())),
            FieldType::Custom(converter) => converter.to_type(raw),
        }
    }

    /// Typed value to a statement parameter; nulls keep the column's type
    pub fn encode(&self, value: &FieldValue) -> Result<Value, String> {
        match (self, value) {
            (FieldType::Custom(converter), v) => converter.from_type(v),
            (FieldType::Id, FieldValue::Null) => Ok(Value::BigInt(None)),
            (FieldType::Id, FieldValue::Integer(i)) => Ok(Value::from(*i)),
            (FieldType::Id, FieldValue::Text(s)) => s
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("invalid id '{s}'")),
            (FieldType::Uuid, FieldValue::Null) => Ok(Value::Uuid(None)),
            (FieldType::Uuid, FieldValue::Text(s)) => uuid::Uuid::parse_str(s)
                .map(Value::from)
                .map_err(|e| format!("invalid uuid '{s}': {e}")),
            (FieldType::Text, FieldValue::Null) => Ok(Value::String(None)),
            (FieldType::Text, FieldValue::Text(s)) => Ok(Value::from(s.clone())),
            (FieldType::Integer, FieldValue::Null) => Ok(Value::BigInt(None)),
            (FieldType::Integer, FieldValue::Integer(i)) => Ok(Value::from(*i)),
            (FieldType::Float, FieldValue::Null) => Ok(Value::Double(None)),
            (FieldType::Float, FieldValue::Float(f)) => Ok(Value::from(*f)),
            (FieldType::Float, FieldValue::Integer(i)) => Ok(Value::from(*i as f64)),
            (FieldType::Boolean, FieldValue::Null) => Ok(Value::Bool(None)),
            (FieldType::Boolean, FieldValue::Bool(b)) => Ok(Value::from(*b)),
            (FieldType::Timestamp, FieldValue::Null) => Ok(Value::ChronoDateTimeUtc(None)),
            (FieldType::Timestamp, FieldValue::Timestamp(dt)) => Ok(Value::from(*dt)),
            (FieldType::Json, FieldValue::Null) => Ok(Value::Json(None)),
            (FieldType::Json, FieldValue::Json(j)) => Ok(Value::from(j.clone())),
            (FieldType::Json, other) => Ok(Value::from(other.to_json())),
            (ty, other) => Err(format!("{other:?} does not fit a {} field", ty.name())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::Id => "id",
            FieldType::Uuid => "uuid",
            FieldType::Text => "text",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Timestamp => "timestamp",
            FieldType::Json => "json",
            FieldType::Custom(_) => "custom",
        }
    }
}

/// A scalar field of an entity
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub field_type: FieldType,
    pub nullable_on_input: bool,
    pub nullable_on_output: bool,
}

impl FieldDef {
    pub fn new(field_type: FieldType, nullable: bool) -> Self {
        Self {
            field_type,
            nullable_on_input: nullable,
            nullable_on_output: nullable,
        }
    }

    /// Database-generated integer id: optional on input, always present on output
    pub fn id() -> Self {
        Self::autogenerated(FieldType::Id)
    }

    /// Database-generated value: optional on input, always present on output
    pub fn autogenerated(field_type: FieldType) -> Self {
        Self {
            field_type,
            nullable_on_input: true,
            nullable_on_output: false,
        }
    }

    pub fn custom(converter: Arc<dyn FieldConverter>, nullable: bool) -> Self {
        Self::new(FieldType::Custom(converter), nullable)
    }

    pub fn nullable_on_input(mut self, nullable: bool) -> Self {
        self.nullable_on_input = nullable;
        self
    }

    pub fn nullable_on_output(mut self, nullable: bool) -> Self {
        self.nullable_on_output = nullable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug)]
    struct Cents;

    impl FieldConverter for Cents {
        fn to_type(&self, raw: &Json) -> Result<FieldValue, String> {
            raw.as_i64()
                .map(|c| FieldValue::Float(c as f64 / 100.0))
                .ok_or_else(|| "expected cents".to_string())
        }

        fn from_type(&self, value: &FieldValue) -> Result<Value, String> {
            match value {
                FieldValue::Null => Ok(Value::BigInt(None)),
                v => v
                    .as_f64()
                    .map(|f| Value::from((f * 100.0).round() as i64))
                    .ok_or_else(|| "expected amount".to_string()),
            }
        }
    }

    #[test]
    fn test_id_decodes_numbers_as_text() {
        assert_eq!(FieldType::Id.decode(&json!(5)), Ok(FieldValue::Text("5".to_string())));
        assert_eq!(FieldType::Id.encode(&FieldValue::from("5")), Ok(Value::from(5i64)));
        assert!(FieldType::Id.encode(&FieldValue::from("five")).is_err());
    }

    #[test]
    fn test_timestamp_round_trip() {
        let decoded = FieldType::Timestamp
            .decode(&json!("2024-03-01T10:00:00+00:00"))
            .expect("valid timestamp");
        assert!(decoded.as_timestamp().is_some());
        assert!(FieldType::Timestamp.encode(&decoded).is_ok());
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        assert!(FieldType::Text.decode(&json!(1)).is_err());
        assert!(FieldType::Boolean.encode(&FieldValue::from("yes")).is_err());
    }

    #[test]
    fn test_numeric_strings_decode_as_float() {
        assert_eq!(FieldType::Float.decode(&json!("12.50")), Ok(FieldValue::Float(12.5)));
    }

    #[test]
    fn test_custom_converter() {
        let ty = FieldType::Custom(Arc::new(Cents));
        assert_eq!(ty.decode(&json!(1250)), Ok(FieldValue::Float(12.5)));
        assert_eq!(ty.encode(&FieldValue::Float(12.5)), Ok(Value::from(1250i64)));
    }

    #[test]
    fn test_id_field_flags() {
        let id = FieldDef::id();
        assert!(id.nullable_on_input);
        assert!(!id.nullable_on_output);
    }
}
