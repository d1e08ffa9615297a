//! Core traits for dbind

mod argument;
mod async_connection;
mod connection;
mod from_row;
mod from_value;
mod to_value;

pub use argument::{resolve, Argument, Arguments, Signature};
pub(crate) use argument::join;
pub use async_connection::{AsyncConnection, AsyncConnectionPool, AsyncCursor};
pub use connection::{BufferedCursor, ColumnDescriptor, Connection, ConnectionPool, Cursor};
pub use from_row::{ColumnMap, FromRow, Row, RowExt};
pub use from_value::FromValue;
pub use to_value::ToValue;
