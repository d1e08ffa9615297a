//! Type conversion utilities for SQLite

use rusqlite::types::{Value as SqliteValue, ValueRef};

use crate::value::Value;

/// Convert a dbind Value to a rusqlite Value.
///
/// SQLite has no date, decimal or JSON storage classes; those travel as
/// text that the matching `FromValue` impls parse back.
pub fn to_sqlite_value(value: &Value) -> SqliteValue {
    match value {
        Value::Null => SqliteValue::Null,
        Value::Bool(v) => SqliteValue::Integer(i64::from(*v)),
        Value::I8(v) => SqliteValue::Integer(i64::from(*v)),
        Value::I16(v) => SqliteValue::Integer(i64::from(*v)),
        Value::I32(v) => SqliteValue::Integer(i64::from(*v)),
        Value::I64(v) => SqliteValue::Integer(*v),
        Value::U8(v) => SqliteValue::Integer(i64::from(*v)),
        Value::U16(v) => SqliteValue::Integer(i64::from(*v)),
        Value::U32(v) => SqliteValue::Integer(i64::from(*v)),
        Value::U64(v) => match i64::try_from(*v) {
            Ok(v) => SqliteValue::Integer(v),
            Err(_) => SqliteValue::Text(v.to_string()),
        },
        Value::F32(v) => SqliteValue::Real(f64::from(*v)),
        Value::F64(v) => SqliteValue::Real(*v),
        Value::String(v) => SqliteValue::Text(v.clone()),
        Value::Bytes(v) => SqliteValue::Blob(v.clone()),
        Value::Date(v) => SqliteValue::Text(v.format("%Y-%m-%d").to_string()),
        Value::DateTime(v) => SqliteValue::Text(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Value::Time(v) => SqliteValue::Text(v.format("%H:%M:%S%.f").to_string()),
        Value::Decimal(v) => SqliteValue::Text(v.to_string()),
        Value::Json(v) => SqliteValue::Text(v.to_string()),
    }
}

/// Convert a borrowed SQLite column value to a dbind Value
pub fn from_sqlite_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::I64(v),
        ValueRef::Real(v) => Value::F64(v),
        ValueRef::Text(v) => Value::String(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Bytes(v.to_vec()),
    }
}
