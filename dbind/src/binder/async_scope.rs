//! Async connection scopes
//!
//! The async twin of the blocking scope: the active connection lives in a
//! tokio task-local, so concurrent tasks never share one, while futures
//! awaited inside a bound call see the caller's connection.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use super::BinderState;
use crate::error::{Error, Result};
use crate::traits::{AsyncConnection, AsyncConnectionPool, AsyncCursor};
use crate::value::Value;

type ActiveMap = HashMap<u64, Arc<dyn Any + Send + Sync>>;

tokio::task_local! {
    static ACTIVE: ActiveMap;
}

type Slot<C> = Mutex<Option<C>>;

fn released() -> Error {
    Error::Connection("connection has been released".into())
}

/// The connection of the current async scope.
pub struct AsyncSession<C> {
    slot: Arc<Slot<C>>,
}

impl<C> Clone for AsyncSession<C> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<C: AsyncConnection> AsyncSession<C> {
    fn new(connection: C) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(connection))),
        }
    }

    pub async fn autocommit(&self) -> Result<bool> {
        let slot = self.slot.lock().await;
        slot.as_ref().map(|c| c.autocommit()).ok_or_else(released)
    }

    pub async fn set_autocommit(&self, autocommit: bool) -> Result<()> {
        let mut slot = self.slot.lock().await;
        slot.as_mut().ok_or_else(released)?.set_autocommit(autocommit);
        Ok(())
    }

    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let mut slot = self.slot.lock().await;
        slot.as_mut().ok_or_else(released)?.execute(sql, params).await
    }

    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<C::Cursor> {
        let mut slot = self.slot.lock().await;
        slot.as_mut().ok_or_else(released)?.query(sql, params).await
    }

    pub async fn commit(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        slot.as_mut().ok_or_else(released)?.commit().await
    }

    pub async fn rollback(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        slot.as_mut().ok_or_else(released)?.rollback().await
    }

    pub fn same_connection(&self, other: &AsyncSession<C>) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }
}

fn active<C: AsyncConnection>(binder: u64) -> Option<AsyncSession<C>> {
    let slot = ACTIVE
        .try_with(|active| active.get(&binder).cloned())
        .ok()
        .flatten()?;
    slot.downcast::<Slot<C>>()
        .ok()
        .map(|slot| AsyncSession { slot })
}

/// Run `f` in the calling task's scope for `binder`.
///
/// The outermost call leases a connection, runs `f` with that connection
/// visible to everything it awaits, then commits or rolls back and releases.
/// Nested calls join the active connection and leave completion to the
/// outermost one.
pub(crate) async fn with_connection<P, R, F, Fut>(binder: &Arc<BinderState<P>>, f: F) -> Result<R>
where
    P: AsyncConnectionPool,
    F: FnOnce(AsyncSession<P::Connection>) -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let scope = AsyncScopeGuard::open(binder).await?;
    if !scope.is_owner() {
        let outcome = f(scope.session().clone()).await;
        return scope.exit(outcome).await;
    }

    let mut active = ACTIVE.try_with(Clone::clone).unwrap_or_default();
    let slot: Arc<dyn Any + Send + Sync> = scope.session().slot.clone();
    active.insert(binder.id(), slot);
    let outcome = ACTIVE.scope(active, f(scope.session().clone())).await;
    scope.exit(outcome).await
}

/// Spawn cleanup for a scope abandoned mid-flight.
pub(crate) fn spawn_cleanup<F>(task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(task);
        }
        Err(_) => warn!("no tokio runtime to clean up an abandoned connection scope"),
    }
}

/// One entry into a binder's async connection scope.
pub(crate) struct AsyncScopeGuard<P: AsyncConnectionPool> {
    binder: Arc<BinderState<P>>,
    session: AsyncSession<P::Connection>,
    owner: bool,
    finished: bool,
}

impl<P: AsyncConnectionPool> AsyncScopeGuard<P> {
    /// Join the task's active connection or lease one. A fresh lease is
    /// not visible to other calls until it is installed by
    /// [`with_connection`].
    pub(crate) async fn open(binder: &Arc<BinderState<P>>) -> Result<Self> {
        let pool = binder.pool()?;
        if let Some(session) = active::<P::Connection>(binder.id()) {
            trace!(binder = binder.id(), "joining active connection scope");
            return Ok(Self {
                binder: Arc::clone(binder),
                session,
                owner: false,
                finished: false,
            });
        }

        let session = AsyncSession::new(pool.lease().await?);
        debug!(binder = binder.id(), "leased connection");
        Ok(Self {
            binder: Arc::clone(binder),
            session,
            owner: true,
            finished: false,
        })
    }

    pub(crate) fn session(&self) -> &AsyncSession<P::Connection> {
        &self.session
    }

    pub(crate) fn is_owner(&self) -> bool {
        self.owner
    }

    /// Leave the scope with the body's outcome. Same rules as the blocking
    /// scope: only the owner commits, rolls back and releases.
    ///
    /// The guard stays armed until the connection is back in the pool, so a
    /// caller dropped while commit or rollback is pending still gets the
    /// rollback and release from [`Drop`].
    pub(crate) async fn exit<R>(mut self, outcome: Result<R>) -> Result<R> {
        if !self.owner {
            self.finished = true;
            return outcome;
        }

        let outcome = match outcome {
            Ok(value) => match self.session.commit().await {
                Ok(()) => {
                    debug!(binder = self.binder.id(), "committed");
                    Ok(value)
                }
                Err(err) => {
                    warn!(binder = self.binder.id(), error = %err, "commit failed");
                    rollback_quietly(self.binder.id(), &self.session).await;
                    Err(err)
                }
            },
            Err(err) => {
                rollback_quietly(self.binder.id(), &self.session).await;
                Err(err)
            }
        };

        let released = release(&self.binder, &self.session).await;
        self.finished = true;
        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) | (Err(err), _) => Err(err),
        }
    }
}

impl<P: AsyncConnectionPool> Drop for AsyncScopeGuard<P> {
    fn drop(&mut self) {
        if self.finished || !self.owner {
            return;
        }
        warn!(binder = self.binder.id(), "connection scope abandoned");
        let binder = Arc::clone(&self.binder);
        let session = self.session.clone();
        spawn_cleanup(async move {
            // Already handed to a release task
            if session.slot.lock().await.is_none() {
                return;
            }
            rollback_quietly(binder.id(), &session).await;
            if let Err(err) = release(&binder, &session).await {
                warn!(binder = binder.id(), error = %err, "release failed");
            }
        });
    }
}

async fn rollback_quietly<C: AsyncConnection>(binder: u64, session: &AsyncSession<C>) {
    debug!(binder, "rolling back");
    if let Err(err) = session.rollback().await {
        warn!(binder, error = %err, "rollback failed");
    }
}

/// Return the session's connection to the pool.
///
/// Once taken out of the session the connection is owned by a spawned task,
/// which finishes the release even if the awaiting caller is dropped.
async fn release<P: AsyncConnectionPool>(
    binder: &Arc<BinderState<P>>,
    session: &AsyncSession<P::Connection>,
) -> Result<()> {
    let Some(connection) = session.slot.lock().await.take() else {
        return Ok(());
    };
    debug!(binder = binder.id(), "releasing connection");
    let binder = Arc::clone(binder);
    let task = async move { binder.pool()?.release(connection).await };
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle
            .spawn(task)
            .await
            .map_err(|err| Error::Connection(format!("release task failed: {err}")))?,
        Err(_) => task.await,
    }
}

/// Closes an async cursor exactly once; a cursor dropped while open is
/// closed on a spawned task.
pub(crate) struct AsyncCursorGuard<C: AsyncCursor + 'static> {
    cursor: Option<C>,
}

impl<C: AsyncCursor + 'static> AsyncCursorGuard<C> {
    pub(crate) fn new(cursor: C) -> Self {
        Self {
            cursor: Some(cursor),
        }
    }

    pub(crate) async fn fetch_one(&mut self) -> Result<Option<Vec<Value>>> {
        match self.cursor.as_mut() {
            Some(cursor) => cursor.fetch_one().await,
            None => Ok(None),
        }
    }

    pub(crate) fn cursor(&mut self) -> Result<&mut C> {
        self.cursor
            .as_mut()
            .ok_or_else(|| Error::Query("cursor is closed".into()))
    }

    pub(crate) async fn close(&mut self) -> Result<()> {
        match self.cursor.take() {
            Some(mut cursor) => cursor.close().await,
            None => Ok(()),
        }
    }

    pub(crate) fn take(&mut self) -> Option<C> {
        self.cursor.take()
    }
}

impl<C: AsyncCursor + 'static> Drop for AsyncCursorGuard<C> {
    fn drop(&mut self) {
        if let Some(mut cursor) = self.cursor.take() {
            spawn_cleanup(async move {
                if let Err(err) = cursor.close().await {
                    warn!(error = %err, "closing cursor failed");
                }
            });
        }
    }
}
