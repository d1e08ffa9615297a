//! MySQL implementation for dbind
//!
//! An async backend over `mysql_async`, used with
//! [`AsyncFunctionBinder`](crate::AsyncFunctionBinder).

mod connection;
mod pool;
mod types;

pub use connection::MySqlConnection;
pub use pool::{MySqlPool, MySqlPoolBuilder};
