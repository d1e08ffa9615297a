//! Asynchronous connection and pool capabilities
//!
//! Same contract as the blocking traits in [`super::connection`], with a
//! suspension point at every call that waits on the database.

use async_trait::async_trait;

use super::connection::{BufferedCursor, ColumnDescriptor};
use crate::error::Result;
use crate::mung::MungSymbol;
use crate::value::Value;

#[async_trait]
pub trait AsyncCursor: Send {
    fn description(&self) -> &[ColumnDescriptor];

    fn row_count(&self) -> Option<u64> {
        None
    }

    async fn fetch_one(&mut self) -> Result<Option<Vec<Value>>>;

    async fn fetch_all(&mut self) -> Result<Vec<Vec<Value>>> {
        let mut rows = Vec::new();
        while let Some(row) = self.fetch_one().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait AsyncConnection: Send + 'static {
    type Cursor: AsyncCursor + 'static;

    fn autocommit(&self) -> bool;

    fn set_autocommit(&mut self, autocommit: bool);

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64>;

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Self::Cursor>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

#[async_trait]
pub trait AsyncConnectionPool: Send + Sync + 'static {
    type Connection: AsyncConnection;

    fn mung_symbol(&self) -> MungSymbol;

    async fn lease(&self) -> Result<Self::Connection>;

    async fn release(&self, connection: Self::Connection) -> Result<()>;
}

#[async_trait]
impl AsyncCursor for BufferedCursor {
    fn description(&self) -> &[ColumnDescriptor] {
        self.columns()
    }

    fn row_count(&self) -> Option<u64> {
        Some(self.total())
    }

    async fn fetch_one(&mut self) -> Result<Option<Vec<Value>>> {
        Ok(self.next_row())
    }

    async fn fetch_all(&mut self) -> Result<Vec<Vec<Value>>> {
        Ok(self.drain())
    }
}
