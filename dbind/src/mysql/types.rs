//! Conversions between dbind values and the MySQL wire format

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use mysql_async::{Column, Params, Row, Value as MySqlValue};

use crate::error::{Error, Result};
use crate::traits::ColumnDescriptor;
use crate::value::Value;

/// Positional parameters for a prepared statement
pub fn to_mysql_params(params: &[Value]) -> Params {
    if params.is_empty() {
        Params::Empty
    } else {
        Params::Positional(params.iter().map(to_mysql_value).collect())
    }
}

/// Describe a result column by name and wire type
pub fn column_descriptor(column: &Column) -> ColumnDescriptor {
    ColumnDescriptor::new(column.name_str()).with_type(format!("{:?}", column.column_type()))
}

/// Convert a fetched row into dbind Values, in column order
pub fn row_values(row: Row) -> Result<Vec<Value>> {
    (0..row.len())
        .map(|i| {
            let value = row
                .as_ref(i)
                .ok_or_else(|| Error::ColumnNotFound(format!("#{i}")))?
                .clone();
            from_mysql_value(value)
        })
        .collect()
}

/// Encode one parameter for the binary protocol.
///
/// Decimals and JSON travel as text; the server casts them on insert.
pub fn to_mysql_value(value: &Value) -> MySqlValue {
    match value {
        Value::Null => MySqlValue::NULL,
        Value::Bool(v) => MySqlValue::from(*v),
        Value::I8(v) => MySqlValue::Int(i64::from(*v)),
        Value::I16(v) => MySqlValue::Int(i64::from(*v)),
        Value::I32(v) => MySqlValue::Int(i64::from(*v)),
        Value::I64(v) => MySqlValue::Int(*v),
        Value::U8(v) => MySqlValue::UInt(u64::from(*v)),
        Value::U16(v) => MySqlValue::UInt(u64::from(*v)),
        Value::U32(v) => MySqlValue::UInt(u64::from(*v)),
        Value::U64(v) => MySqlValue::UInt(*v),
        Value::F32(v) => MySqlValue::Float(*v),
        Value::F64(v) => MySqlValue::Double(*v),
        Value::String(v) => MySqlValue::Bytes(v.clone().into_bytes()),
        Value::Bytes(v) => MySqlValue::Bytes(v.clone()),
        Value::Date(v) => wire_datetime(v.and_time(NaiveTime::MIN)),
        Value::DateTime(v) => wire_datetime(*v),
        Value::Time(v) => MySqlValue::Time(
            false,
            0,
            v.hour() as u8,
            v.minute() as u8,
            v.second() as u8,
            v.nanosecond() / 1_000,
        ),
        Value::Decimal(v) => MySqlValue::Bytes(v.to_string().into_bytes()),
        Value::Json(v) => MySqlValue::Bytes(v.to_string().into_bytes()),
    }
}

fn wire_datetime(v: NaiveDateTime) -> MySqlValue {
    MySqlValue::Date(
        v.year() as u16,
        v.month() as u8,
        v.day() as u8,
        v.hour() as u8,
        v.minute() as u8,
        v.second() as u8,
        v.nanosecond() / 1_000,
    )
}

fn conversion(expected: &'static str, actual: String) -> Error {
    Error::TypeConversion { expected, actual }
}

/// Decode one column value.
///
/// Text columns arrive as bytes and become strings when they are valid
/// UTF-8. A DATETIME at exactly midnight decodes as a date.
pub fn from_mysql_value(value: MySqlValue) -> Result<Value> {
    Ok(match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Bytes(v) => match String::from_utf8(v) {
            Ok(text) => Value::String(text),
            Err(err) => Value::Bytes(err.into_bytes()),
        },
        MySqlValue::Int(v) => Value::I64(v),
        MySqlValue::UInt(v) => Value::U64(v),
        MySqlValue::Float(v) => Value::F32(v),
        MySqlValue::Double(v) => Value::F64(v),
        MySqlValue::Date(year, month, day, hour, min, sec, micro) => {
            let date = NaiveDate::from_ymd_opt(i32::from(year), u32::from(month), u32::from(day))
                .ok_or_else(|| conversion("date", format!("{year}-{month}-{day}")))?;
            if (hour, min, sec, micro) == (0, 0, 0, 0) {
                Value::Date(date)
            } else {
                Value::DateTime(date.and_time(clock(hour, min, sec, micro)?))
            }
        }
        // NaiveTime covers a single day only
        MySqlValue::Time(negative, days, hours, mins, secs, micro) => {
            if negative || days > 0 || hours >= 24 {
                let sign = if negative { "-" } else { "" };
                let total_hours = days * 24 + u32::from(hours);
                return Err(conversion(
                    "time (00:00:00 to 23:59:59)",
                    format!("{sign}{total_hours}:{mins:02}:{secs:02}"),
                ));
            }
            Value::Time(clock(hours, mins, secs, micro)?)
        }
    })
}

fn clock(hour: u8, min: u8, sec: u8, micro: u32) -> Result<NaiveTime> {
    NaiveTime::from_hms_micro_opt(u32::from(hour), u32::from(min), u32::from(sec), micro)
        .ok_or_else(|| conversion("time", format!("{hour}:{min}:{sec}.{micro}")))
}
