//! FromRow trait for mapping result rows to Rust structs

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::traits::ColumnDescriptor;
use crate::value::Value;

/// A result row that can be queried by column name.
///
/// This trait abstracts over row representations so the same `FromRow`
/// implementations work whichever backend produced the data.
pub trait Row {
    /// Get a value from the row by column name as a dynamic Value.
    ///
    /// Returns an error if the column doesn't exist.
    fn get_value(&self, column: &str) -> Result<Value>;
}

/// Extension trait for typed access to row values.
pub trait RowExt: Row {
    /// Get a typed value from the row by column name.
    fn get<T: crate::FromValue>(&self, column: &str) -> Result<T> {
        let value = self.get_value(column)?;
        T::from_value(value)
    }
}

impl<R: Row> RowExt for R {}

/// Trait for types that can be constructed from a result row.
///
/// Usually implemented via `#[derive(FromRow)]`, which also registers the
/// type with the record row mapper so it can be used as a query return.
///
/// # Manual Implementation
///
/// ```ignore
/// use dbind::{FromRow, Row, RowExt, Result};
///
/// pub struct User {
///     pub id: i64,
///     pub username: String,
/// }
///
/// impl FromRow for User {
///     fn from_row<R: Row>(row: &R) -> Result<Self> {
///         Ok(Self {
///             id: row.get("id")?,
///             username: row.get("username")?,
///         })
///     }
/// }
/// ```
pub trait FromRow: Sized {
    /// Construct an instance of this type from a result row.
    fn from_row<R: Row>(row: &R) -> Result<Self>;
}

/// A row keyed by column name, built by zipping column descriptors with
/// raw values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    values: HashMap<String, Value>,
}

impl ColumnMap {
    pub fn new(values: Vec<Value>, columns: &[ColumnDescriptor]) -> Self {
        let values = columns
            .iter()
            .map(|c| c.name.clone())
            .zip(values)
            .collect();
        Self { values }
    }

    pub fn into_inner(self) -> HashMap<String, Value> {
        self.values
    }
}

impl Row for ColumnMap {
    fn get_value(&self, column: &str) -> Result<Value> {
        self.values
            .get(column)
            .cloned()
            .ok_or_else(|| Error::ColumnNotFound(column.to_string()))
    }
}

impl Row for HashMap<String, Value> {
    fn get_value(&self, column: &str) -> Result<Value> {
        self.get(column)
            .cloned()
            .ok_or_else(|| Error::ColumnNotFound(column.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_map_zips_names() {
        let columns = [ColumnDescriptor::new("id"), ColumnDescriptor::new("name")];
        let row = ColumnMap::new(vec![Value::I64(1), Value::from("ann")], &columns);
        assert_eq!(row.get::<i64>("id").unwrap(), 1);
        assert_eq!(row.get::<String>("name").unwrap(), "ann");
        assert!(matches!(
            row.get::<String>("email"),
            Err(Error::ColumnNotFound(c)) if c == "email"
        ));
    }
}
