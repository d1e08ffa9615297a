//! Error types for dbind

use thiserror::Error;

/// Result type alias for dbind operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while binding or invoking templated SQL.
///
/// Variants fall into two groups. Bind-time errors surface when a bound
/// function is created and indicate a programming mistake; call-time errors
/// surface from individual invocations. See [`Error::is_bind_time`].
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed SQL template; `snippet` holds the source line and a caret
    #[error("{message} (line {line}, column {column}):\n{snippet}")]
    Template {
        message: String,
        line: usize,
        column: usize,
        snippet: String,
    },

    /// A placeholder names something the bound function does not take
    #[error("Argument '{argument}' specified in template but is not an argument of {function}")]
    MissingTemplateArgument { argument: String, function: String },

    /// Operation needs a pool but none was set
    #[error("No connection pool has been set for the binder")]
    NoPoolSet,

    /// `set_pool` was called twice
    #[error("The connection pool for a binder can only be set once")]
    PoolAlreadySet,

    /// Placeholder path could not be walked
    #[error("Cannot resolve argument '{path}': {reason}")]
    ArgumentResolution { path: String, reason: String },

    /// More than one row for a single-row return
    #[error("Only expected one row, but got {0}")]
    TooManyRows(u64),

    /// No row for a required single-row return
    #[error("Expected one row, found none")]
    NoRows,

    /// More than one column for a scalar row
    #[error("Too many values, expected 1, got {0}")]
    TooManyValues(usize),

    /// Type conversion error
    #[error("Type conversion error: expected {expected}, got {actual}")]
    TypeConversion {
        expected: &'static str,
        actual: String,
    },

    /// Column not found in row
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    /// Null value for non-optional field
    #[error("Unexpected null value for column: {0}")]
    UnexpectedNull(String),

    /// Row decode error
    #[error("Failed to decode row: {0}")]
    RowDecode(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// MySQL driver error
    #[error("MySQL error: {0}")]
    MySql(#[from] mysql_async::Error),

    /// SQLite driver error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Configuration source error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// URL scheme without a backend
    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// Error raised by application code inside a bound transaction
    #[error(transparent)]
    Application(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wrap an application error so it can flow through a transaction.
    pub fn application<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Error::Application(err.into())
    }

    /// Whether this error is raised when binding rather than when calling.
    pub fn is_bind_time(&self) -> bool {
        matches!(
            self,
            Error::Template { .. }
                | Error::MissingTemplateArgument { .. }
                | Error::PoolAlreadySet
        )
    }
}
