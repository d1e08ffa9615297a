//! dbind - SQL templates bound to Rust functions
//!
//! A bound function is built once from a SQL template and called many times.
//! Templates reference the call's arguments by dotted path: `#{user.id}`
//! binds a driver parameter, `!{table}` splices the value into the SQL text.
//! The declared return type picks how many rows are fetched and how each is
//! mapped.
//!
//! Connections are scoped per thread (or per tokio task for the async
//! binder): nested bound calls share the outermost call's connection, and
//! only the outermost call commits or rolls back.
//!
//! # Features
//!
//! - **Templates**: `#{path}` parameters and `!{path}` literals, validated
//!   against the argument type when the function is bound
//! - **Derive Macros**: `#[derive(Arguments, FromRow)]` for argument structs
//!   and result records
//! - **Return Shapes**: nothing, a count, one row, an optional row, many rows
//!   or a lazy stream
//! - **Backends**: blocking SQLite via `rusqlite`, async MySQL via
//!   `mysql_async`
//!
//! # Example
//!
//! ```ignore
//! use dbind::{Arguments, FromRow, FunctionBinder, SqlitePool};
//!
//! #[derive(Arguments)]
//! struct ById {
//!     id: i64,
//! }
//!
//! #[derive(FromRow)]
//! struct User {
//!     id: i64,
//!     name: String,
//! }
//!
//! let binder = FunctionBinder::with_pool(SqlitePool::new("app.db"));
//! let find = binder.query::<ById, Option<User>>("SELECT id, name FROM users WHERE id = #{id}")?;
//! let user = find.call(&ById { id: 7 })?;
//! ```

extern crate self as dbind;

pub mod binder;
pub mod config;
pub mod error;
pub mod mapping;
pub mod mung;
pub mod mysql;
pub mod sqlite;
pub mod template;
pub mod traits;
pub mod value;

// Re-export the derive macros
pub use dbind_derive::{Arguments, FromRow};

// Re-export main types
pub use binder::{
    AsyncBoundExecution, AsyncBoundFunction, AsyncBoundQuery, AsyncBoundStream,
    AsyncBoundTransaction, AsyncFunctionBinder, AsyncRowStream, AsyncSession, BoundExecution,
    BoundFunction, BoundQuery, BoundStream, BoundTransaction, FunctionBinder, RowStream, Session,
};
pub use config::{Backend, PoolConfig};
pub use error::{Error, Result};
pub use mapping::{ExecuteReturn, MapperKind, QueryReturn, ReturnStrategy, RowMapper, RowShape};
pub use mung::{MungSymbol, NumberedSymbols, StaticSymbol, SymbolGenerator};
pub use mysql::{MySqlConnection, MySqlPool, MySqlPoolBuilder};
pub use sqlite::{SqliteConnection, SqlitePool};
pub use template::{Fragment, Placeholder, RenderedSql, Template};
pub use traits::{
    Argument, Arguments, AsyncConnection, AsyncConnectionPool, AsyncCursor, BufferedCursor,
    ColumnDescriptor, Connection, ConnectionPool, Cursor, FromRow, FromValue, Row, RowExt,
    Signature, ToValue,
};
pub use value::Value;
