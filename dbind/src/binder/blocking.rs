//! Blocking binder and its bound functions
//!
//! Every bound call runs inside the thread's connection scope from
//! [`super::scope`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::debug;

use super::scope::{CursorGuard, ScopeGuard, Session};
use super::{bind_template, BinderState, BoundFunction};
use crate::error::{Error, Result};
use crate::mapping::{fetch_rows, ExecuteReturn, QueryReturn, RowMapper, RowShape};
use crate::mung::MungSymbol;
use crate::template::{RenderedSql, Template};
use crate::traits::{Arguments, ColumnDescriptor, Connection, ConnectionPool, Cursor, Signature};
use crate::value::Value;

type CursorOf<P> = <<P as ConnectionPool>::Connection as Connection>::Cursor;

/// Binds SQL templates to a blocking [`ConnectionPool`].
///
/// Clones share the pool and the connection scope.
///
/// ```ignore
/// let binder = FunctionBinder::with_pool(SqlitePool::new("app.db"));
/// let insert = binder.execute::<NewUser, u64>("INSERT INTO users (name) VALUES (#{name})")?;
/// insert.call(&NewUser { name: "ada".into() })?;
/// ```
pub struct FunctionBinder<P: ConnectionPool> {
    state: Arc<BinderState<P>>,
}

impl<P: ConnectionPool> Clone for FunctionBinder<P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<P: ConnectionPool> Default for FunctionBinder<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ConnectionPool> FunctionBinder<P> {
    /// A binder without a pool. Functions can be bound right away; calling
    /// them fails until [`set_pool`](Self::set_pool) is called.
    pub fn new() -> Self {
        Self {
            state: Arc::new(BinderState::new()),
        }
    }

    pub fn with_pool(pool: P) -> Self {
        let binder = Self::new();
        // A fresh binder has no pool yet
        let _ = binder.state.set_pool(pool);
        binder
    }

    /// Install the pool. Fails with `PoolAlreadySet` on a second call.
    pub fn set_pool(&self, pool: P) -> Result<()> {
        self.state.set_pool(pool)
    }

    pub fn pool(&self) -> Result<&P> {
        self.state.pool()
    }

    /// The pool's parameter marker policy.
    pub fn mung_symbol(&self) -> Result<MungSymbol> {
        Ok(self.pool()?.mung_symbol())
    }

    /// Run `f` on the thread's active connection, leasing one if none is
    /// active.
    ///
    /// The call that leased the connection commits when `f` succeeds, rolls
    /// back when it fails or panics, and always releases the connection.
    pub fn connection<R>(&self, f: impl FnOnce(&Session<P::Connection>) -> Result<R>) -> Result<R> {
        let scope = ScopeGuard::enter(&self.state)?;
        let outcome = f(scope.session());
        scope.exit(outcome)
    }

    /// Bind a DML statement returning nothing or the affected row count.
    pub fn execute<A, R>(&self, sql: &str) -> Result<BoundExecution<P, A, R>>
    where
        A: Signature,
        R: ExecuteReturn,
    {
        Ok(BoundExecution {
            binder: self.clone(),
            template: bind_template::<A>(sql)?,
            marker: PhantomData,
        })
    }

    /// Bind a query. `R` picks both the row count and the row mapper; see
    /// [`QueryReturn`].
    pub fn query<A, R>(&self, sql: &str) -> Result<BoundQuery<P, A, R>>
    where
        A: Signature,
        R: QueryReturn,
    {
        Ok(BoundQuery {
            binder: self.clone(),
            template: bind_template::<A>(sql)?,
            marker: PhantomData,
        })
    }

    /// Bind a query whose rows are mapped lazily as the caller iterates.
    pub fn stream<A, T>(&self, sql: &str) -> Result<BoundStream<P, A, T>>
    where
        A: Signature,
        T: RowShape,
    {
        Ok(BoundStream {
            binder: self.clone(),
            template: bind_template::<A>(sql)?,
            marker: PhantomData,
        })
    }

    /// Bind a closure to run as one transaction.
    ///
    /// Bound functions called inside `f` share its connection. Autocommit is
    /// off for the duration of the call, and the outermost scope commits.
    pub fn transaction<A, R, F>(&self, f: F) -> BoundTransaction<P, A, R>
    where
        A: 'static,
        R: 'static,
        F: Fn(A) -> Result<R> + Send + Sync + 'static,
    {
        self.transaction_with_connection(move |_: &Session<P::Connection>, args: A| f(args))
    }

    /// Like [`transaction`](Self::transaction), also handing `f` the
    /// connection.
    pub fn transaction_with_connection<A, R, F>(&self, f: F) -> BoundTransaction<P, A, R>
    where
        A: 'static,
        R: 'static,
        F: Fn(&Session<P::Connection>, A) -> Result<R> + Send + Sync + 'static,
    {
        BoundTransaction {
            binder: self.clone(),
            func: Box::new(f),
        }
    }

    fn render(&self, template: &Template, args: &dyn Arguments) -> Result<RenderedSql> {
        let symbols = self.mung_symbol()?;
        template.render(&mut *symbols.generator(), args)
    }
}

/// A bound DML statement.
pub struct BoundExecution<P: ConnectionPool, A, R> {
    binder: FunctionBinder<P>,
    template: Template,
    marker: PhantomData<fn(&A) -> R>,
}

impl<P, A, R> BoundExecution<P, A, R>
where
    P: ConnectionPool,
    A: Signature,
    R: ExecuteReturn,
{
    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn call(&self, args: &A) -> Result<R> {
        let rendered = self.binder.render(&self.template, args)?;
        self.binder.connection(|cnx| {
            let affected = cnx.execute(&rendered.sql, &rendered.params)?;
            if cnx.autocommit()? {
                cnx.commit()?;
            }
            debug!(affected, "executed");
            R::from_affected(affected)
        })
    }
}

impl<'a, P, A, R> BoundFunction<&'a A> for BoundExecution<P, A, R>
where
    P: ConnectionPool,
    A: Signature,
    R: ExecuteReturn,
{
    type Output = R;

    fn call(&self, args: &'a A) -> Result<R> {
        BoundExecution::call(self, args)
    }
}

/// A bound query. Without an explicit return type rows come back as raw
/// tuples.
pub struct BoundQuery<P: ConnectionPool, A, R = Vec<Vec<Value>>> {
    binder: FunctionBinder<P>,
    template: Template,
    marker: PhantomData<fn(&A) -> R>,
}

impl<P, A, R> BoundQuery<P, A, R>
where
    P: ConnectionPool,
    A: Signature,
    R: QueryReturn,
{
    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn call(&self, args: &A) -> Result<R> {
        let rendered = self.binder.render(&self.template, args)?;
        self.binder.connection(|cnx| {
            let mut cursor = CursorGuard::new(cnx.query(&rendered.sql, &rendered.params)?);
            let rows = fetch_rows(R::STRATEGY, cursor.cursor())?;
            let columns = cursor.cursor().description().to_vec();
            cursor.close()?;
            let value = R::from_rows(rows, &columns)?;
            if cnx.autocommit()? {
                cnx.commit()?;
            }
            Ok(value)
        })
    }
}

impl<'a, P, A, R> BoundFunction<&'a A> for BoundQuery<P, A, R>
where
    P: ConnectionPool,
    A: Signature,
    R: QueryReturn,
{
    type Output = R;

    fn call(&self, args: &'a A) -> Result<R> {
        BoundQuery::call(self, args)
    }
}

/// A bound query yielding a [`RowStream`].
pub struct BoundStream<P: ConnectionPool, A, T> {
    binder: FunctionBinder<P>,
    template: Template,
    marker: PhantomData<fn(&A) -> T>,
}

impl<P, A, T> BoundStream<P, A, T>
where
    P: ConnectionPool,
    A: Signature,
    T: RowShape,
{
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Run the query and hand back its rows.
    ///
    /// Inside an active scope the stream borrows that scope's connection.
    /// Otherwise it holds a connection of its own, committed and released
    /// once the stream is exhausted, or rolled back and released when it
    /// fails or is dropped early.
    pub fn call(&self, args: &A) -> Result<RowStream<P, T>> {
        let rendered = self.binder.render(&self.template, args)?;
        let scope = ScopeGuard::detached(&self.binder.state)?;
        let cursor = match scope.session().query(&rendered.sql, &rendered.params) {
            Ok(cursor) => cursor,
            Err(err) => return scope.exit(Err(err)),
        };
        let columns = cursor.description().to_vec();
        Ok(RowStream {
            cursor: CursorGuard::new(cursor),
            scope: scope.is_owner().then_some(scope),
            mapper: T::Mapper::default(),
            columns,
            finished: false,
        })
    }
}

impl<'a, P, A, T> BoundFunction<&'a A> for BoundStream<P, A, T>
where
    P: ConnectionPool,
    A: Signature,
    T: RowShape,
{
    type Output = RowStream<P, T>;

    fn call(&self, args: &'a A) -> Result<RowStream<P, T>> {
        BoundStream::call(self, args)
    }
}

/// Mapped rows of a streaming query.
pub struct RowStream<P: ConnectionPool, T: RowShape> {
    // The cursor closes before the scope releases its connection
    cursor: CursorGuard<CursorOf<P>>,
    scope: Option<ScopeGuard<P>>,
    mapper: T::Mapper,
    columns: Vec<ColumnDescriptor>,
    finished: bool,
}

impl<P: ConnectionPool, T: RowShape> RowStream<P, T> {
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    fn finish(&mut self, failure: Option<Error>) -> Option<Result<T>> {
        self.finished = true;
        let closed = self.cursor.close();
        let outcome = match failure {
            Some(err) => Err(err),
            None => closed,
        };
        let outcome = match self.scope.take() {
            Some(scope) => scope.exit(outcome),
            None => outcome,
        };
        outcome.err().map(Err)
    }
}

impl<P: ConnectionPool, T: RowShape> Iterator for RowStream<P, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.cursor.cursor().fetch_one() {
            Ok(Some(row)) => match self.mapper.map_row(row, &self.columns) {
                Ok(value) => Some(Ok(value)),
                Err(err) => self.finish(Some(err)),
            },
            Ok(None) => self.finish(None),
            Err(err) => self.finish(Some(err)),
        }
    }
}

type TransactionFn<C, A, R> = dyn Fn(&Session<C>, A) -> Result<R> + Send + Sync;

/// A closure bound as one transaction.
pub struct BoundTransaction<P: ConnectionPool, A, R> {
    binder: FunctionBinder<P>,
    func: Box<TransactionFn<P::Connection, A, R>>,
}

impl<P: ConnectionPool, A, R> BoundTransaction<P, A, R> {
    pub fn call(&self, args: A) -> Result<R> {
        self.binder.connection(|cnx| {
            let previous = cnx.autocommit()?;
            cnx.set_autocommit(false)?;
            let outcome = (self.func)(cnx, args);
            let restored = cnx.set_autocommit(previous);
            outcome.and_then(|value| restored.map(|()| value))
        })
    }
}

impl<P: ConnectionPool, A, R> BoundFunction<A> for BoundTransaction<P, A, R> {
    type Output = R;

    fn call(&self, args: A) -> Result<R> {
        BoundTransaction::call(self, args)
    }
}

macro_rules! impl_display {
    ($($name:ident),*) => {
        $(
            impl<P: ConnectionPool, A, R> fmt::Display for $name<P, A, R> {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(
                        f,
                        "{} of {} ({})",
                        stringify!($name),
                        self.template,
                        std::any::type_name::<A>()
                    )
                }
            }
        )*
    };
}

impl_display!(BoundExecution, BoundQuery, BoundStream);

impl<P: ConnectionPool, A, R> fmt::Display for BoundTransaction<P, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoundTransaction ({})", std::any::type_name::<A>())
    }
}
