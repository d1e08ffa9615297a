//! Default configuration values - single source of truth

/// Config file looked up when no explicit path is given (extension optional)
pub const CONFIG_FILE: &str = "dbind";

/// Environment variable prefix (`DBIND_URL`, `DBIND_POOL_MAX`, ...)
pub const ENV_PREFIX: &str = "DBIND";

/// Minimum pooled connections (MySQL)
pub const POOL_MIN: usize = 10;

/// Maximum pooled connections (MySQL)
pub const POOL_MAX: usize = 100;

/// Idle connections kept for reuse (SQLite)
pub const MAX_IDLE: usize = 4;

/// How long SQLite waits on a locked database, in milliseconds
pub const BUSY_TIMEOUT_MS: u64 = 5_000;

/// Whether leased connections commit after every bound statement
pub const AUTOCOMMIT: bool = true;
