//! Shared fixtures: scripted in-memory pools and tracing setup
//!
//! The mock pools hand out connections that answer from a reply queue and
//! record every lease, statement, commit, rollback and release, so tests can
//! assert on exactly what a binder did with its connections.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ctor::ctor;
use dbind::{
    AsyncConnection, AsyncConnectionPool, AsyncCursor, BufferedCursor, ColumnDescriptor,
    Connection, ConnectionPool, Cursor, Error, MungSymbol, Result, Value,
};
use tracing_subscriber::EnvFilter;

#[ctor]
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Something a mock connection did.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Lease(usize),
    Execute {
        cnx: usize,
        sql: String,
        params: Vec<Value>,
    },
    Query {
        cnx: usize,
        sql: String,
        params: Vec<Value>,
    },
    Commit(usize),
    Rollback(usize),
    Release(usize),
    Close(usize),
}

#[derive(Debug, Clone)]
enum Reply {
    Rows(Vec<ColumnDescriptor>, Vec<Vec<Value>>),
    Affected(u64),
    Fail(String),
}

#[derive(Default)]
struct ScriptState {
    events: Mutex<Vec<Event>>,
    replies: Mutex<VecDeque<Reply>>,
    next_id: AtomicUsize,
    fail_commits: AtomicBool,
    panic_commits: AtomicBool,
    commit_delay: AtomicU64,
    rollback_delay: AtomicU64,
    release_delay: AtomicU64,
    close_delay: AtomicU64,
}

/// Reply queue and event log shared by a mock pool and its connections.
#[derive(Clone, Default)]
pub struct Script(Arc<ScriptState>);

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a result set for the next statement.
    pub fn rows(&self, columns: &[&str], rows: Vec<Vec<Value>>) -> &Self {
        let columns = columns.iter().map(|c| ColumnDescriptor::new(*c)).collect();
        self.push(Reply::Rows(columns, rows))
    }

    /// Queue an affected-row count for the next statement.
    pub fn affected(&self, n: u64) -> &Self {
        self.push(Reply::Affected(n))
    }

    /// Make the next statement fail.
    pub fn fail(&self, message: &str) -> &Self {
        self.push(Reply::Fail(message.to_string()))
    }

    pub fn fail_commits(&self) {
        self.0.fail_commits.store(true, Ordering::SeqCst);
    }

    pub fn panic_commits(&self) {
        self.0.panic_commits.store(true, Ordering::SeqCst);
    }

    /// Async commits take `millis` before they land.
    pub fn slow_commits(&self, millis: u64) {
        self.0.commit_delay.store(millis, Ordering::SeqCst);
    }

    pub fn slow_rollbacks(&self, millis: u64) {
        self.0.rollback_delay.store(millis, Ordering::SeqCst);
    }

    pub fn slow_releases(&self, millis: u64) {
        self.0.release_delay.store(millis, Ordering::SeqCst);
    }

    pub fn slow_closes(&self, millis: u64) {
        self.0.close_delay.store(millis, Ordering::SeqCst);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }

    pub fn leases(&self) -> usize {
        self.count(|e| matches!(e, Event::Lease(_)))
    }

    pub fn commits(&self) -> usize {
        self.count(|e| matches!(e, Event::Commit(_)))
    }

    pub fn rollbacks(&self) -> usize {
        self.count(|e| matches!(e, Event::Rollback(_)))
    }

    pub fn releases(&self) -> usize {
        self.count(|e| matches!(e, Event::Release(_)))
    }

    pub fn closes(&self) -> usize {
        self.count(|e| matches!(e, Event::Close(_)))
    }

    /// Rendered SQL and parameters of every statement, in order.
    pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute { sql, params, .. } | Event::Query { sql, params, .. } => {
                    Some((sql, params))
                }
                _ => None,
            })
            .collect()
    }

    /// Connection ids that ran statements.
    pub fn statement_connections(&self) -> Vec<usize> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute { cnx, .. } | Event::Query { cnx, .. } => Some(cnx),
                _ => None,
            })
            .collect()
    }

    fn push(&self, reply: Reply) -> &Self {
        self.0.replies.lock().unwrap().push_back(reply);
        self
    }

    fn record(&self, event: Event) {
        self.0.events.lock().unwrap().push(event);
    }

    fn next_reply(&self) -> Option<Reply> {
        self.0.replies.lock().unwrap().pop_front()
    }

    async fn pause(delay: &AtomicU64) {
        let millis = delay.load(Ordering::SeqCst);
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }

    fn lease(&self) -> usize {
        let id = self.0.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(Event::Lease(id));
        id
    }
}

/// A scripted connection.
pub struct MockConnection {
    id: usize,
    autocommit: bool,
    script: Script,
}

impl MockConnection {
    pub fn id(&self) -> usize {
        self.id
    }

    fn run_execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.script.record(Event::Execute {
            cnx: self.id,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        match self.script.next_reply() {
            Some(Reply::Affected(n)) => Ok(n),
            Some(Reply::Rows(_, rows)) => Ok(rows.len() as u64),
            Some(Reply::Fail(message)) => Err(Error::Query(message)),
            None => Ok(1),
        }
    }

    fn run_query(&mut self, sql: &str, params: &[Value]) -> Result<BufferedCursor> {
        self.script.record(Event::Query {
            cnx: self.id,
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        match self.script.next_reply() {
            Some(Reply::Rows(columns, rows)) => Ok(BufferedCursor::new(columns, rows)),
            Some(Reply::Affected(_)) | None => Ok(BufferedCursor::new(Vec::new(), Vec::new())),
            Some(Reply::Fail(message)) => Err(Error::Query(message)),
        }
    }

    fn run_commit(&mut self) -> Result<()> {
        if self.script.0.panic_commits.load(Ordering::SeqCst) {
            panic!("commit exploded");
        }
        if self.script.0.fail_commits.load(Ordering::SeqCst) {
            return Err(Error::Connection("commit failed".into()));
        }
        self.script.record(Event::Commit(self.id));
        Ok(())
    }

    fn run_rollback(&mut self) -> Result<()> {
        self.script.record(Event::Rollback(self.id));
        Ok(())
    }
}

impl Connection for MockConnection {
    type Cursor = BufferedCursor;

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn set_autocommit(&mut self, autocommit: bool) {
        self.autocommit = autocommit;
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        self.run_execute(sql, params)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<BufferedCursor> {
        self.run_query(sql, params)
    }

    fn commit(&mut self) -> Result<()> {
        self.run_commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.run_rollback()
    }
}

/// Blocking pool over a [`Script`]. Uses `%s` markers.
pub struct MockPool {
    script: Script,
    autocommit: bool,
}

impl MockPool {
    pub fn new(script: &Script) -> Self {
        Self {
            script: script.clone(),
            autocommit: false,
        }
    }

    pub fn autocommit(mut self, autocommit: bool) -> Self {
        self.autocommit = autocommit;
        self
    }

    fn connect(&self) -> MockConnection {
        MockConnection {
            id: self.script.lease(),
            autocommit: self.autocommit,
            script: self.script.clone(),
        }
    }
}

impl ConnectionPool for MockPool {
    type Connection = MockConnection;

    fn mung_symbol(&self) -> MungSymbol {
        MungSymbol::FORMAT
    }

    fn lease(&self) -> Result<MockConnection> {
        Ok(self.connect())
    }

    fn release(&self, connection: MockConnection) -> Result<()> {
        self.script.record(Event::Release(connection.id));
        Ok(())
    }
}

/// Async cursor that records its close.
pub struct AsyncMockCursor {
    cnx: usize,
    rows: BufferedCursor,
    script: Script,
}

#[async_trait]
impl AsyncCursor for AsyncMockCursor {
    fn description(&self) -> &[ColumnDescriptor] {
        Cursor::description(&self.rows)
    }

    fn row_count(&self) -> Option<u64> {
        Cursor::row_count(&self.rows)
    }

    async fn fetch_one(&mut self) -> Result<Option<Vec<Value>>> {
        Cursor::fetch_one(&mut self.rows)
    }

    async fn close(&mut self) -> Result<()> {
        Script::pause(&self.script.0.close_delay).await;
        self.script.record(Event::Close(self.cnx));
        Cursor::close(&mut self.rows)
    }
}

/// Async flavour of [`MockConnection`].
pub struct AsyncMockConnection(MockConnection);

#[async_trait]
impl AsyncConnection for AsyncMockConnection {
    type Cursor = AsyncMockCursor;

    fn autocommit(&self) -> bool {
        self.0.autocommit
    }

    fn set_autocommit(&mut self, autocommit: bool) {
        self.0.autocommit = autocommit;
    }

    async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        tokio::task::yield_now().await;
        self.0.run_execute(sql, params)
    }

    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<AsyncMockCursor> {
        tokio::task::yield_now().await;
        let rows = self.0.run_query(sql, params)?;
        Ok(AsyncMockCursor {
            cnx: self.0.id,
            rows,
            script: self.0.script.clone(),
        })
    }

    async fn commit(&mut self) -> Result<()> {
        Script::pause(&self.0.script.0.commit_delay).await;
        self.0.run_commit()
    }

    async fn rollback(&mut self) -> Result<()> {
        Script::pause(&self.0.script.0.rollback_delay).await;
        self.0.run_rollback()
    }
}

/// Async pool over a [`Script`]. Uses `$n` markers.
pub struct AsyncMockPool(MockPool);

impl AsyncMockPool {
    pub fn new(script: &Script) -> Self {
        Self(MockPool::new(script))
    }

    pub fn autocommit(self, autocommit: bool) -> Self {
        Self(self.0.autocommit(autocommit))
    }
}

#[async_trait]
impl AsyncConnectionPool for AsyncMockPool {
    type Connection = AsyncMockConnection;

    fn mung_symbol(&self) -> MungSymbol {
        MungSymbol::DOLLAR
    }

    async fn lease(&self) -> Result<AsyncMockConnection> {
        Ok(AsyncMockConnection(self.0.connect()))
    }

    async fn release(&self, connection: AsyncMockConnection) -> Result<()> {
        Script::pause(&self.0.script.0.release_delay).await;
        self.0.script.record(Event::Release(connection.0.id));
        Ok(())
    }
}
