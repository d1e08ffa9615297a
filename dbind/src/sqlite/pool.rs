use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

use super::connection::SqliteConnection;
use crate::config::{defaults, Backend, PoolConfig};
use crate::error::{Error, Result};
use crate::mung::MungSymbol;
use crate::traits::{Connection, ConnectionPool};

/// A small pool of SQLite connections to one database file.
///
/// Connections are opened on demand. Up to `max_idle` released connections
/// are kept for reuse; the rest are closed.
pub struct SqlitePool {
    path: PathBuf,
    busy_timeout: Duration,
    max_idle: usize,
    autocommit: bool,
    idle: Mutex<Vec<rusqlite::Connection>>,
}

impl SqlitePool {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            busy_timeout: Duration::from_millis(defaults::BUSY_TIMEOUT_MS),
            max_idle: defaults::MAX_IDLE,
            autocommit: defaults::AUTOCOMMIT,
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Build a pool from a `sqlite://` configuration.
    pub fn from_config(config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        let path = match config.backend()? {
            Backend::Sqlite { path } => path,
            Backend::MySql => {
                return Err(Error::Configuration(format!(
                    "expected a sqlite url, got '{}'",
                    config.url
                )))
            }
        };
        Ok(Self::new(path)
            .busy_timeout(config.busy_timeout())
            .max_idle(config.max_idle)
            .autocommit(config.autocommit))
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Initial autocommit flag of leased connections.
    pub fn autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Connections waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn idle(&self) -> Result<std::sync::MutexGuard<'_, Vec<rusqlite::Connection>>> {
        self.idle
            .lock()
            .map_err(|_| Error::Connection("sqlite pool lock poisoned".into()))
    }
}

impl ConnectionPool for SqlitePool {
    type Connection = SqliteConnection;

    fn mung_symbol(&self) -> MungSymbol {
        MungSymbol::QMARK
    }

    fn lease(&self) -> Result<SqliteConnection> {
        let reused = self.idle()?.pop();
        let conn = match reused {
            Some(conn) => conn,
            None => {
                debug!(path = %self.path.display(), "opening sqlite connection");
                let conn = rusqlite::Connection::open(&self.path)?;
                conn.busy_timeout(self.busy_timeout)?;
                conn
            }
        };
        Ok(SqliteConnection::new(conn, self.autocommit))
    }

    fn release(&self, mut connection: SqliteConnection) -> Result<()> {
        // Never hand out a connection with a transaction still open
        connection.rollback()?;
        let mut idle = self.idle()?;
        if idle.len() < self.max_idle {
            idle.push(connection.into_inner());
        }
        Ok(())
    }
}
