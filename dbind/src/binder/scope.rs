//! Blocking connection scopes
//!
//! Every thread keeps one active connection per binder. The outermost bound
//! call leases it, nested calls on the same thread join it, and only the
//! outermost exit commits or rolls back and returns it to the pool.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::BinderState;
use crate::error::{Error, Result};
use crate::traits::{Connection, ConnectionPool, Cursor};
use crate::value::Value;

thread_local! {
    static ACTIVE: RefCell<HashMap<u64, Rc<dyn Any>>> = RefCell::new(HashMap::new());
}

type Slot<C> = RefCell<Option<C>>;

/// The connection of the current scope.
///
/// Handed to `connection` closures and to transactions bound with
/// `transaction_with_connection`. Every call borrows the connection for its
/// own duration only; after the scope releases the connection, calls fail.
pub struct Session<C> {
    slot: Rc<Slot<C>>,
}

impl<C> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            slot: Rc::clone(&self.slot),
        }
    }
}

impl<C: Connection> Session<C> {
    fn new(connection: C) -> Self {
        Self {
            slot: Rc::new(RefCell::new(Some(connection))),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut C) -> Result<R>) -> Result<R> {
        let mut slot = self
            .slot
            .try_borrow_mut()
            .map_err(|_| Error::Connection("connection is already in use".into()))?;
        let connection = slot
            .as_mut()
            .ok_or_else(|| Error::Connection("connection has been released".into()))?;
        f(connection)
    }

    pub fn autocommit(&self) -> Result<bool> {
        self.with(|c| Ok(c.autocommit()))
    }

    pub fn set_autocommit(&self, autocommit: bool) -> Result<()> {
        self.with(|c| {
            c.set_autocommit(autocommit);
            Ok(())
        })
    }

    /// Run a statement, returning the affected row count.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.with(|c| c.execute(sql, params))
    }

    pub fn query(&self, sql: &str, params: &[Value]) -> Result<C::Cursor> {
        self.with(|c| c.query(sql, params))
    }

    pub fn commit(&self) -> Result<()> {
        self.with(|c| c.commit())
    }

    pub fn rollback(&self) -> Result<()> {
        self.with(|c| c.rollback())
    }

    /// Whether both sessions wrap the same physical connection.
    pub fn same_connection(&self, other: &Session<C>) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

fn active<C: Connection + 'static>(binder: u64) -> Option<Session<C>> {
    let slot = ACTIVE
        .try_with(|active| active.borrow().get(&binder).cloned())
        .ok()
        .flatten()?;
    slot.downcast::<Slot<C>>()
        .ok()
        .map(|slot| Session { slot })
}

/// One entry into a binder's connection scope.
pub(crate) struct ScopeGuard<P: ConnectionPool> {
    binder: Arc<BinderState<P>>,
    session: Session<P::Connection>,
    owner: bool,
    registered: bool,
    finished: bool,
}

impl<P: ConnectionPool> ScopeGuard<P> {
    /// Join the thread's active scope, or lease a connection and make it
    /// the active one.
    pub(crate) fn enter(binder: &Arc<BinderState<P>>) -> Result<Self> {
        Self::open(binder, true)
    }

    /// Join the thread's active scope, or lease a connection that nested
    /// calls will not see. Streams use this: their rows are consumed after
    /// the bound call returns.
    pub(crate) fn detached(binder: &Arc<BinderState<P>>) -> Result<Self> {
        Self::open(binder, false)
    }

    fn open(binder: &Arc<BinderState<P>>, register: bool) -> Result<Self> {
        let pool = binder.pool()?;
        if let Some(session) = active::<P::Connection>(binder.id()) {
            trace!(binder = binder.id(), "joining active connection scope");
            return Ok(Self {
                binder: Arc::clone(binder),
                session,
                owner: false,
                registered: false,
                finished: false,
            });
        }

        let session = Session::new(pool.lease()?);
        debug!(binder = binder.id(), register, "leased connection");
        if register {
            let slot: Rc<dyn Any> = session.slot.clone();
            ACTIVE.with(|active| active.borrow_mut().insert(binder.id(), slot));
        }
        Ok(Self {
            binder: Arc::clone(binder),
            session,
            owner: true,
            registered: register,
            finished: false,
        })
    }

    pub(crate) fn session(&self) -> &Session<P::Connection> {
        &self.session
    }

    pub(crate) fn is_owner(&self) -> bool {
        self.owner
    }

    /// Leave the scope with the body's outcome.
    ///
    /// Joined entries pass the outcome through. The owning entry commits on
    /// success and rolls back on failure, then releases the connection. A
    /// failed commit is rolled back and reported; a failed rollback is logged
    /// and the body's error wins. The guard stays armed until the release,
    /// so a panicking commit or rollback still releases from [`Drop`].
    pub(crate) fn exit<R>(mut self, outcome: Result<R>) -> Result<R> {
        if !self.owner {
            self.finished = true;
            return outcome;
        }

        let outcome = match outcome {
            Ok(value) => match self.session.commit() {
                Ok(()) => {
                    debug!(binder = self.binder.id(), "committed");
                    Ok(value)
                }
                Err(err) => {
                    warn!(binder = self.binder.id(), error = %err, "commit failed");
                    self.rollback_quietly();
                    Err(err)
                }
            },
            Err(err) => {
                self.rollback_quietly();
                Err(err)
            }
        };

        let released = self.release();
        self.finished = true;
        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) | (Err(err), _) => Err(err),
        }
    }

    fn rollback_quietly(&self) {
        debug!(binder = self.binder.id(), "rolling back");
        if let Err(err) = self.session.rollback() {
            warn!(binder = self.binder.id(), error = %err, "rollback failed");
        }
    }

    fn release(&mut self) -> Result<()> {
        if self.registered {
            let id = self.binder.id();
            let _ = ACTIVE.try_with(|active| active.borrow_mut().remove(&id));
            self.registered = false;
        }
        let connection = match self.session.slot.try_borrow_mut() {
            Ok(mut slot) => slot.take(),
            Err(_) => return Err(Error::Connection("connection is already in use".into())),
        };
        match connection {
            Some(connection) => {
                debug!(binder = self.binder.id(), "releasing connection");
                self.binder.pool()?.release(connection)
            }
            None => Ok(()),
        }
    }
}

impl<P: ConnectionPool> Drop for ScopeGuard<P> {
    fn drop(&mut self) {
        if self.finished || !self.owner {
            return;
        }
        warn!(binder = self.binder.id(), "connection scope abandoned");
        self.rollback_quietly();
        if let Err(err) = self.release() {
            warn!(binder = self.binder.id(), error = %err, "release failed");
        }
    }
}

/// Closes a cursor exactly once.
pub(crate) struct CursorGuard<C: Cursor> {
    cursor: C,
    closed: bool,
}

impl<C: Cursor> CursorGuard<C> {
    pub(crate) fn new(cursor: C) -> Self {
        Self {
            cursor,
            closed: false,
        }
    }

    pub(crate) fn cursor(&mut self) -> &mut C {
        &mut self.cursor
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.cursor.close()
    }
}

impl<C: Cursor> Drop for CursorGuard<C> {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "closing cursor failed");
        }
    }
}
