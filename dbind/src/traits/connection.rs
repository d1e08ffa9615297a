//! Blocking connection and pool capabilities

use std::collections::VecDeque;

use crate::error::Result;
use crate::mung::MungSymbol;
use crate::value::Value;

/// Metadata describing one result column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Column name as reported by the driver
    pub name: String,
    /// Driver type name, when known
    pub type_name: Option<String>,
    /// Whether the column may hold NULL, when known
    pub null_ok: Option<bool>,
}

impl ColumnDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: None,
            null_ok: None,
        }
    }

    pub fn with_type(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }
}

/// A forward-only result handle.
pub trait Cursor {
    /// Columns of the result set.
    fn description(&self) -> &[ColumnDescriptor];

    /// Number of rows in the result, if the driver knows it up front.
    fn row_count(&self) -> Option<u64> {
        None
    }

    /// Fetch the next row, or `None` once exhausted.
    fn fetch_one(&mut self) -> Result<Option<Vec<Value>>>;

    /// Fetch every remaining row.
    fn fetch_all(&mut self) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_one()? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Release driver resources held by the cursor.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A leased database connection.
pub trait Connection {
    type Cursor: Cursor + 'static;

    /// Whether each bound statement is committed as soon as it runs.
    fn autocommit(&self) -> bool;

    fn set_autocommit(&mut self, autocommit: bool);

    /// Run a statement that returns no rows; yields the affected-row count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    /// Run a statement that returns rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Self::Cursor>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;
}

/// A source of connections for a blocking binder.
///
/// The pool owns physical connections; binders only lease and release them.
pub trait ConnectionPool: Send + Sync + 'static {
    type Connection: Connection + 'static;

    /// Marker policy used when rendering templates for this pool.
    fn mung_symbol(&self) -> MungSymbol;

    fn lease(&self) -> Result<Self::Connection>;

    fn release(&self, connection: Self::Connection) -> Result<()>;
}

/// A cursor over rows already pulled from the driver.
#[derive(Debug, Clone, Default)]
pub struct BufferedCursor {
    columns: Vec<ColumnDescriptor>,
    rows: VecDeque<Vec<Value>>,
    total: u64,
}

impl BufferedCursor {
    pub fn new(columns: Vec<ColumnDescriptor>, rows: Vec<Vec<Value>>) -> Self {
        let total = rows.len() as u64;
        Self {
            columns,
            rows: rows.into(),
            total,
        }
    }

    /// Rows not yet fetched.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    pub(crate) fn next_row(&mut self) -> Option<Vec<Value>> {
        self.rows.pop_front()
    }

    pub(crate) fn drain(&mut self) -> Vec<Vec<Value>> {
        self.rows.drain(..).collect()
    }

    pub(crate) fn total(&self) -> u64 {
        self.total
    }

    pub(crate) fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }
}

impl Cursor for BufferedCursor {
    fn description(&self) -> &[ColumnDescriptor] {
        self.columns()
    }

    fn row_count(&self) -> Option<u64> {
        Some(self.total())
    }

    fn fetch_one(&mut self) -> Result<Option<Vec<Value>>> {
        Ok(self.next_row())
    }

    fn fetch_all(&mut self) -> Result<Vec<Vec<Value>>> {
        Ok(self.drain())
    }

    fn close(&mut self) -> Result<()> {
        self.rows.clear();
        Ok(())
    }
}
