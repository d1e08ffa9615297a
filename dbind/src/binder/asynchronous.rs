//! Async binder, bound functions and row streams

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use tracing::debug;

use super::async_scope::{
    spawn_cleanup, with_connection, AsyncCursorGuard, AsyncScopeGuard, AsyncSession,
};
use super::{bind_template, AsyncBoundFunction, BinderState};
use crate::error::{Error, Result};
use crate::mapping::{fetch_rows_async, ExecuteReturn, QueryReturn, RowMapper, RowShape};
use crate::mung::MungSymbol;
use crate::template::{RenderedSql, Template};
use crate::traits::{
    Arguments, AsyncConnection, AsyncConnectionPool, AsyncCursor, ColumnDescriptor, Signature,
};
use crate::value::Value;

type CursorOf<P> = <<P as AsyncConnectionPool>::Connection as AsyncConnection>::Cursor;

/// Binds SQL templates to an [`AsyncConnectionPool`].
///
/// Each tokio task gets its own connection scope; futures awaited inside a
/// bound call share the caller's connection.
pub struct AsyncFunctionBinder<P: AsyncConnectionPool> {
    state: Arc<BinderState<P>>,
}

impl<P: AsyncConnectionPool> Clone for AsyncFunctionBinder<P> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<P: AsyncConnectionPool> Default for AsyncFunctionBinder<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: AsyncConnectionPool> AsyncFunctionBinder<P> {
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

    pub fn set_pool(&self, pool: P) -> Result<()> {
        self.state.set_pool(pool)
    }

    pub fn pool(&self) -> Result<&P> {
        self.state.pool()
    }

    pub fn mung_symbol(&self) -> Result<MungSymbol> {
        Ok(self.pool()?.mung_symbol())
    }

    /// Run `f` on the task's active connection, leasing one if none is
    /// active. The leasing call commits or rolls back and releases.
    pub async fn connection<R, F, Fut>(&self, f: F) -> Result<R>
    where
        F: FnOnce(AsyncSession<P::Connection>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        with_connection(&self.state, f).await
    }

    pub fn execute<A, R>(&self, sql: &str) -> Result<AsyncBoundExecution<P, A, R>>
    where
        A: Signature + Sync,
        R: ExecuteReturn,
    {
        Ok(AsyncBoundExecution {
            binder: self.clone(),
            template: bind_template::<A>(sql)?,
            marker: PhantomData,
        })
    }

    pub fn query<A, R>(&self, sql: &str) -> Result<AsyncBoundQuery<P, A, R>>
    where
        A: Signature + Sync,
        R: QueryReturn,
    {
        Ok(AsyncBoundQuery {
            binder: self.clone(),
            template: bind_template::<A>(sql)?,
            marker: PhantomData,
        })
    }

    pub fn stream<A, T>(&self, sql: &str) -> Result<AsyncBoundStream<P, A, T>>
    where
        A: Signature + Sync,
        T: RowShape + Send + 'static,
    {
        Ok(AsyncBoundStream {
            binder: self.clone(),
            template: bind_template::<A>(sql)?,
            marker: PhantomData,
        })
    }

    pub fn transaction<A, R, F, Fut>(&self, f: F) -> AsyncBoundTransaction<P, A, R>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        self.transaction_with_connection(move |_: AsyncSession<P::Connection>, args: A| f(args))
    }

    pub fn transaction_with_connection<A, R, F, Fut>(&self, f: F) -> AsyncBoundTransaction<P, A, R>
    where
        A: Send + 'static,
        R: Send + 'static,
        F: Fn(AsyncSession<P::Connection>, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        AsyncBoundTransaction {
            binder: self.clone(),
            func: Box::new(
                move |session: AsyncSession<P::Connection>, args: A| -> BoxFuture<'static, Result<R>> {
                    f(session, args).boxed()
                },
            ),
        }
    }

    fn render(&self, template: &Template, args: &dyn Arguments) -> Result<RenderedSql> {
        let symbols = self.mung_symbol()?;
        template.render(&mut *symbols.generator(), args)
    }
}

pub struct AsyncBoundExecution<P: AsyncConnectionPool, A, R> {
    binder: AsyncFunctionBinder<P>,
    template: Template,
    marker: PhantomData<fn(&A) -> R>,
}

impl<P, A, R> AsyncBoundExecution<P, A, R>
where
    P: AsyncConnectionPool,
    A: Signature + Sync,
    R: ExecuteReturn,
{
    pub fn template(&self) -> &Template {
        &self.template
    }

    pub async fn call(&self, args: &A) -> Result<R> {
        let rendered = self.binder.render(&self.template, args)?;
        with_connection(&self.binder.state, |cnx| async move {
            let affected = cnx.execute(&rendered.sql, &rendered.params).await?;
            if cnx.autocommit().await? {
                cnx.commit().await?;
            }
            debug!(affected, "executed");
            R::from_affected(affected)
        })
        .await
    }
}

impl<'a, P, A, R> AsyncBoundFunction<&'a A> for AsyncBoundExecution<P, A, R>
where
    P: AsyncConnectionPool,
    A: Signature + Sync,
    R: ExecuteReturn,
{
    type Output = R;

    fn call(&self, args: &'a A) -> impl Future<Output = Result<R>> + Send {
        AsyncBoundExecution::call(self, args)
    }
}

pub struct AsyncBoundQuery<P: AsyncConnectionPool, A, R = Vec<Vec<Value>>> {
    binder: AsyncFunctionBinder<P>,
    template: Template,
    marker: PhantomData<fn(&A) -> R>,
}

impl<P, A, R> AsyncBoundQuery<P, A, R>
where
    P: AsyncConnectionPool,
    A: Signature + Sync,
    R: QueryReturn,
{
    pub fn template(&self) -> &Template {
        &self.template
    }

    pub async fn call(&self, args: &A) -> Result<R> {
        let rendered = self.binder.render(&self.template, args)?;
        with_connection(&self.binder.state, |cnx| async move {
            let mut cursor =
                AsyncCursorGuard::new(cnx.query(&rendered.sql, &rendered.params).await?);
            let rows = fetch_rows_async(R::STRATEGY, cursor.cursor()?).await?;
            let columns = cursor.cursor()?.description().to_vec();
            cursor.close().await?;
            let value = R::from_rows(rows, &columns)?;
            if cnx.autocommit().await? {
                cnx.commit().await?;
            }
            Ok(value)
        })
        .await
    }
}

impl<'a, P, A, R> AsyncBoundFunction<&'a A> for AsyncBoundQuery<P, A, R>
where
    P: AsyncConnectionPool,
    A: Signature + Sync,
    R: QueryReturn,
{
    type Output = R;

    fn call(&self, args: &'a A) -> impl Future<Output = Result<R>> + Send {
        AsyncBoundQuery::call(self, args)
    }
}

pub struct AsyncBoundStream<P: AsyncConnectionPool, A, T> {
    binder: AsyncFunctionBinder<P>,
    template: Template,
    marker: PhantomData<fn(&A) -> T>,
}

impl<P, A, T> AsyncBoundStream<P, A, T>
where
    P: AsyncConnectionPool,
    A: Signature + Sync,
    T: RowShape + Send + 'static,
{
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Run the query and hand back its rows as a [`Stream`]. Connection
    /// handling follows the blocking [`BoundStream`](super::BoundStream).
    pub async fn call(&self, args: &A) -> Result<AsyncRowStream<T>> {
        let rendered = self.binder.render(&self.template, args)?;
        let scope = AsyncScopeGuard::open(&self.binder.state).await?;
        let cursor = match scope
            .session()
            .query(&rendered.sql, &rendered.params)
            .await
        {
            Ok(cursor) => cursor,
            Err(err) => return scope.exit(Err(err)).await,
        };
        let columns = cursor.description().to_vec();
        let state = StreamState::<P, T> {
            cursor: AsyncCursorGuard::new(cursor),
            scope: scope.is_owner().then_some(scope),
            mapper: T::Mapper::default(),
            columns: columns.clone(),
        };
        Ok(AsyncRowStream::new(state, columns))
    }
}

impl<'a, P, A, T> AsyncBoundFunction<&'a A> for AsyncBoundStream<P, A, T>
where
    P: AsyncConnectionPool,
    A: Signature + Sync,
    T: RowShape + Send + 'static,
{
    type Output = AsyncRowStream<T>;

    fn call(&self, args: &'a A) -> impl Future<Output = Result<AsyncRowStream<T>>> + Send {
        AsyncBoundStream::call(self, args)
    }
}

struct StreamState<P: AsyncConnectionPool, T: RowShape> {
    cursor: AsyncCursorGuard<CursorOf<P>>,
    scope: Option<AsyncScopeGuard<P>>,
    mapper: T::Mapper,
    columns: Vec<ColumnDescriptor>,
}

impl<P: AsyncConnectionPool, T: RowShape> StreamState<P, T> {
    async fn next(mut self) -> Option<(Result<T>, Option<Self>)> {
        match self.cursor.fetch_one().await {
            Ok(Some(row)) => match self.mapper.map_row(row, &self.columns) {
                Ok(value) => Some((Ok(value), Some(self))),
                Err(err) => self.finish(Some(err)).await,
            },
            Ok(None) => self.finish(None).await,
            Err(err) => self.finish(Some(err)).await,
        }
    }

    async fn finish(mut self, failure: Option<Error>) -> Option<(Result<T>, Option<Self>)> {
        let closed = self.cursor.close().await;
        let outcome = match failure {
            Some(err) => Err(err),
            None => closed,
        };
        let outcome = match self.scope.take() {
            Some(scope) => scope.exit(outcome).await,
            None => outcome,
        };
        outcome.err().map(|err| (Err(err), None))
    }
}

impl<P: AsyncConnectionPool, T: RowShape> Drop for StreamState<P, T> {
    fn drop(&mut self) {
        // Dropped before exhaustion: close the cursor, then roll back and
        // release on one task so the two stay ordered
        let Some(scope) = self.scope.take() else {
            return;
        };
        let cursor = self.cursor.take();
        spawn_cleanup(async move {
            if let Some(mut cursor) = cursor {
                let _ = cursor.close().await;
            }
            let abandoned: Result<()> = Err(Error::Query("stream dropped before exhaustion".into()));
            let _ = scope.exit(abandoned).await;
        });
    }
}

/// Mapped rows of an async streaming query.
pub struct AsyncRowStream<T> {
    columns: Vec<ColumnDescriptor>,
    inner: BoxStream<'static, Result<T>>,
}

impl<T: RowShape + Send + 'static> AsyncRowStream<T> {
    fn new<P: AsyncConnectionPool>(state: StreamState<P, T>, columns: Vec<ColumnDescriptor>) -> Self {
        let inner = stream::unfold(Some(state), |state| async move { state?.next().await }).boxed();
        Self { columns, inner }
    }
}

impl<T> AsyncRowStream<T> {
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }
}

impl<T> Stream for AsyncRowStream<T> {
    type Item = Result<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

type TransactionFn<C, A, R> =
    dyn Fn(AsyncSession<C>, A) -> BoxFuture<'static, Result<R>> + Send + Sync;

pub struct AsyncBoundTransaction<P: AsyncConnectionPool, A, R> {
    binder: AsyncFunctionBinder<P>,
    func: Box<TransactionFn<P::Connection, A, R>>,
}

impl<P, A, R> AsyncBoundTransaction<P, A, R>
where
    P: AsyncConnectionPool,
    A: Send + 'static,
    R: Send + 'static,
{
    pub async fn call(&self, args: A) -> Result<R> {
        with_connection(&self.binder.state, |cnx| async move {
            let previous = cnx.autocommit().await?;
            cnx.set_autocommit(false).await?;
            let outcome = (self.func)(cnx.clone(), args).await;
            let restored = cnx.set_autocommit(previous).await;
            outcome.and_then(|value| restored.map(|()| value))
        })
        .await
    }
}

impl<P, A, R> AsyncBoundFunction<A> for AsyncBoundTransaction<P, A, R>
where
    P: AsyncConnectionPool,
    A: Send + 'static,
    R: Send + 'static,
{
    type Output = R;

    fn call(&self, args: A) -> impl Future<Output = Result<R>> + Send {
        AsyncBoundTransaction::call(self, args)
    }
}

macro_rules! impl_display {
    ($($name:ident),*) => {
        $(
            impl<P: AsyncConnectionPool, A, R> fmt::Display for $name<P, A, R> {
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

impl_display!(AsyncBoundExecution, AsyncBoundQuery, AsyncBoundStream);

impl<P: AsyncConnectionPool, A, R> fmt::Display for AsyncBoundTransaction<P, A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AsyncBoundTransaction ({})", std::any::type_name::<A>())
    }
}
