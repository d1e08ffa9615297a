//! FromValue trait for converting database values to Rust types

use crate::error::{Error, Result};
use crate::value::Value;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;

/// Trait for types that can be constructed from a database value.
///
/// This is automatically implemented for common Rust types and can
/// be manually implemented for custom types (e.g., enums).
pub trait FromValue: Sized {
    /// Convert a database value to this type.
    fn from_value(value: Value) -> Result<Self>;
}

fn mismatch(expected: &'static str, value: &Value) -> Error {
    Error::TypeConversion {
        expected,
        actual: value.type_name().to_string(),
    }
}

fn out_of_range(expected: &'static str, value: &Value) -> Error {
    Error::TypeConversion {
        expected,
        actual: format!("{}({}) out of range", value.type_name(), value),
    }
}

// Drivers report integer columns with whatever width they like (SQLite and
// MySQL both favour 64 bits), so every integer target accepts every integer
// variant and range-checks.
macro_rules! impl_from_value_int {
    ($($ty:ty => $name:literal),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self> {
                    let converted = match &value {
                        Value::I8(v) => <$ty>::try_from(*v).ok(),
                        Value::I16(v) => <$ty>::try_from(*v).ok(),
                        Value::I32(v) => <$ty>::try_from(*v).ok(),
                        Value::I64(v) => <$ty>::try_from(*v).ok(),
                        Value::U8(v) => <$ty>::try_from(*v).ok(),
                        Value::U16(v) => <$ty>::try_from(*v).ok(),
                        Value::U32(v) => <$ty>::try_from(*v).ok(),
                        Value::U64(v) => <$ty>::try_from(*v).ok(),
                        _ => return Err(mismatch($name, &value)),
                    };
                    converted.ok_or_else(|| out_of_range($name, &value))
                }
            }
        )*
    };
}

impl_from_value_int!(
    i8 => "i8",
    i16 => "i16",
    i32 => "i32",
    i64 => "i64",
    u8 => "u8",
    u16 => "u16",
    u32 => "u32",
    u64 => "u64",
    usize => "usize"
);

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bool(v) => Ok(v),
            Value::I8(_)
            | Value::I16(_)
            | Value::I32(_)
            | Value::I64(_)
            | Value::U8(_)
            | Value::U16(_)
            | Value::U32(_)
            | Value::U64(_) => Ok(i64::from_value(value.clone()).map_or(true, |v| v != 0)),
            _ => Err(mismatch("bool", &value)),
        }
    }
}

impl FromValue for f32 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::F32(v) => Ok(v),
            Value::F64(v) => Ok(v as f32),
            _ => Err(mismatch("f32", &value)),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::F32(v) => Ok(v as f64),
            Value::F64(v) => Ok(v),
            Value::I64(v) => Ok(v as f64),
            Value::I32(v) => Ok(v.into()),
            _ => Err(mismatch("f64", &value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(v) => Ok(v),
            Value::Bytes(v) => String::from_utf8(v).map_err(|e| Error::TypeConversion {
                expected: "utf8 string",
                actual: format!("invalid utf8: {}", e),
            }),
            _ => Err(mismatch("string", &value)),
        }
    }
}

impl FromValue for Vec<u8> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Bytes(v) => Ok(v),
            Value::String(v) => Ok(v.into_bytes()),
            _ => Err(mismatch("bytes", &value)),
        }
    }
}

impl FromValue for NaiveDate {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Date(v) => Ok(v),
            Value::DateTime(v) => Ok(v.date()),
            Value::String(ref v) => v.parse().map_err(|_| mismatch("date", &value)),
            _ => Err(mismatch("date", &value)),
        }
    }
}

impl FromValue for NaiveDateTime {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::DateTime(v) => Ok(v),
            Value::Date(v) => Ok(v.and_time(NaiveTime::MIN)),
            Value::String(ref v) => v.parse().map_err(|_| mismatch("datetime", &value)),
            _ => Err(mismatch("datetime", &value)),
        }
    }
}

impl FromValue for NaiveTime {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Time(v) => Ok(v),
            Value::DateTime(v) => Ok(v.time()),
            Value::String(ref v) => v.parse().map_err(|_| mismatch("time", &value)),
            _ => Err(mismatch("time", &value)),
        }
    }
}

impl FromValue for Decimal {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Decimal(v) => Ok(v),
            Value::I64(v) => Ok(Decimal::from(v)),
            Value::U64(v) => Ok(Decimal::from(v)),
            Value::String(v) => v.parse().map_err(|_| Error::TypeConversion {
                expected: "decimal",
                actual: format!("invalid decimal string: {}", v),
            }),
            _ => Err(mismatch("decimal", &value)),
        }
    }
}

impl FromValue for serde_json::Value {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Json(v) => Ok(v),
            Value::String(v) => serde_json::from_str(&v).map_err(|e| Error::TypeConversion {
                expected: "json",
                actual: format!("invalid json: {}", e),
            }),
            _ => Err(mismatch("json", &value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Null => Ok(None),
            _ => Ok(Some(T::from_value(value)?)),
        }
    }
}
