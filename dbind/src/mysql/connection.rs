use async_trait::async_trait;
use mysql_async::prelude::*;
use tracing::trace;

use super::types::{column_descriptor, row_values, to_mysql_params};
use crate::error::Result;
use crate::traits::{AsyncConnection, BufferedCursor, ColumnDescriptor};
use crate::value::Value;

/// A leased MySQL connection.
pub struct MySqlConnection {
    conn: mysql_async::Conn,
    autocommit: bool,
}

impl MySqlConnection {
    pub(crate) fn new(conn: mysql_async::Conn, autocommit: bool) -> Self {
        Self { conn, autocommit }
    }

    /// Get a mutable reference to the underlying mysql_async connection.
    pub fn inner(&mut self) -> &mut mysql_async::Conn {
        &mut self.conn
    }

    /// Id of the last row inserted through this connection.
    pub fn last_insert_id(&self) -> Option<u64> {
        self.conn.last_insert_id()
    }
}

#[async_trait]
impl AsyncConnection for MySqlConnection {
    type Cursor = BufferedCursor;

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn set_autocommit(&mut self, autocommit: bool) {
        self.autocommit = autocommit;
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        trace!(sql, params = params.len(), "mysql execute");
        self.conn.exec_drop(sql, to_mysql_params(params)).await?;
        Ok(self.conn.affected_rows())
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<BufferedCursor> {
        trace!(sql, params = params.len(), "mysql query");
        let mut result = self.conn.exec_iter(sql, to_mysql_params(params)).await?;
        let columns: Vec<ColumnDescriptor> =
            result.columns_ref().iter().map(column_descriptor).collect();
        let rows: Vec<mysql_async::Row> = result.collect().await?;
        let rows = rows
            .into_iter()
            .map(row_values)
            .collect::<Result<Vec<_>>>()?;
        Ok(BufferedCursor::new(columns, rows))
    }

    async fn commit(&mut self) -> Result<()> {
        self.conn.query_drop("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.conn.query_drop("ROLLBACK").await?;
        Ok(())
    }
}
