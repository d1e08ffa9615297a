//! SQLite implementation for dbind
//!
//! A blocking backend over `rusqlite`. Parameters use the `?` marker.

mod connection;
mod pool;
mod types;

pub use connection::SqliteConnection;
pub use pool::SqlitePool;
