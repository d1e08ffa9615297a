use rusqlite::params_from_iter;
use tracing::trace;

use super::types::{from_sqlite_value, to_sqlite_value};
use crate::error::Result;
use crate::traits::{BufferedCursor, ColumnDescriptor, Connection};
use crate::value::Value;

/// A leased SQLite connection.
///
/// A transaction is opened lazily before the first statement and stays open
/// until `commit` or `rollback`, so a scope's statements form one unit.
pub struct SqliteConnection {
    conn: rusqlite::Connection,
    autocommit: bool,
    in_transaction: bool,
}

impl SqliteConnection {
    pub(crate) fn new(conn: rusqlite::Connection, autocommit: bool) -> Self {
        Self {
            conn,
            autocommit,
            in_transaction: false,
        }
    }

    /// Whether statements have run since the last commit or rollback.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub(crate) fn into_inner(self) -> rusqlite::Connection {
        self.conn
    }

    fn begin(&mut self) -> Result<()> {
        if !self.in_transaction {
            self.conn.execute_batch("BEGIN")?;
            self.in_transaction = true;
        }
        Ok(())
    }
}

impl Connection for SqliteConnection {
    type Cursor = BufferedCursor;

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn set_autocommit(&mut self, autocommit: bool) {
        self.autocommit = autocommit;
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.begin()?;
        trace!(sql, params = params.len(), "sqlite execute");
        let affected = self
            .conn
            .execute(sql, params_from_iter(params.iter().map(to_sqlite_value)))?;
        Ok(affected as u64)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<BufferedCursor> {
        self.begin()?;
        trace!(sql, params = params.len(), "sqlite query");
        let mut stmt = self.conn.prepare(sql)?;
        let columns: Vec<ColumnDescriptor> = stmt
            .column_names()
            .into_iter()
            .map(ColumnDescriptor::new)
            .collect();

        let mut rows = stmt.query(params_from_iter(params.iter().map(to_sqlite_value)))?;
        let mut buffered = Vec::new();
        while let Some(row) = rows.next()? {
            let values = (0..columns.len())
                .map(|i| row.get_ref(i).map(from_sqlite_value))
                .collect::<rusqlite::Result<Vec<_>>>()?;
            buffered.push(values);
        }
        Ok(BufferedCursor::new(columns, buffered))
    }

    fn commit(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute_batch("COMMIT")?;
            self.in_transaction = false;
        }
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        if self.in_transaction {
            self.conn.execute_batch("ROLLBACK")?;
            self.in_transaction = false;
        }
        Ok(())
    }
}
